//! # Log Records and Summaries
//!
//! Typed rows accumulated by hosts, applications and controllers during a
//! run. The front-end serializes them (CSV per log, JSON for summaries);
//! nothing here performs I/O.

use serde::Serialize;

// ─── Per-Host Packet Log ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Sent,
    Rcvd,
}

impl Direction {
    /// Single-character CSV marker: `-` outbound, `+` inbound.
    pub fn symbol(self) -> char {
        match self {
            Direction::Sent => '-',
            Direction::Rcvd => '+',
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PacketLogRecord {
    pub timestamp_us: u64,
    pub direction: Direction,
    pub seq: Option<u64>,
    pub ack: Option<u64>,
    pub pkt_size_byte: usize,
    pub one_way_delay_ms: Option<i64>,
    pub rtt_ms: Option<i64>,
    pub tx_link_qsize_byte: usize,
    pub rx_link_qsize_byte: usize,
}

// ─── Video Logs ─────────────────────────────────────────────────────────────

/// One row per encoded frame on the sending side.
#[derive(Debug, Clone, Serialize)]
pub struct VideoSendRecord {
    pub timestamp_us: u64,
    pub target_bitrate_bps: u64,
    pub fec_data_rate_bps: u64,
    pub frame_bitrate_bps: u64,
    pub min_frame_bitrate_bps: u64,
    pub max_frame_bitrate_bps: u64,
    pub fec_rate: f64,
    pub model_id: u32,
    pub padding_byte: usize,
}

/// One row per decoded frame on the receiving side.
#[derive(Debug, Clone, Serialize)]
pub struct VideoRecvRecord {
    pub frame_id: u64,
    pub model_id: u32,
    pub frame_encode_ts_us: u64,
    pub frame_decode_ts_us: u64,
    pub encode_bitrate_bps: u64,
    pub frame_loss_rate: f64,
    pub ssim: f64,
    pub psnr: f64,
}

// ─── Controller Logs ────────────────────────────────────────────────────────

/// Loss/delay hybrid estimator vector, one row per feedback event.
#[derive(Debug, Clone, Serialize)]
pub struct GccRecord {
    pub timestamp_us: u64,
    pub rate_bps: u64,
    pub loss_based_rate_bps: u64,
    pub delay_based_rate_bps: u64,
    pub remote_rate_control_state: &'static str,
    pub delay_gradient: f64,
    pub delay_gradient_hat: f64,
    pub delay_gradient_thresh: f64,
    pub rcv_rate_bps: u64,
    pub overuse_signal: &'static str,
    pub loss_fraction: f64,
}

/// Threshold/FEC controller state, one row per RTCP report.
#[derive(Debug, Clone, Serialize)]
pub struct FbraRecord {
    pub timestamp_us: u64,
    pub rate_bps: u64,
    pub p40_owd_ms: f64,
    pub p80_owd_ms: f64,
    pub state: &'static str,
    pub fec_enabled: bool,
    pub fec_interval: u32,
    pub corr_owd_low: f64,
    pub corr_owd_high: f64,
}

/// Rate-matching controller, one row per ACK.
#[derive(Debug, Clone, Serialize)]
pub struct SalsifyRecord {
    pub timestamp_us: u64,
    pub num_pkt_inflight: i64,
    pub mean_interarrival_us: i64,
    pub incoming_rate_bps: u64,
    pub encode_rate_bps: u64,
}

// ─── Host Summary ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct HostSummary {
    pub host_id: u32,
    pub bytes_sent: usize,
    pub bytes_rcvd: usize,
    pub sending_rate_mbps: f64,
    pub recving_rate_mbps: f64,
}
