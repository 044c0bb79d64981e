//! # RTP Endpoint Behavior
//!
//! The RTP-flavored host role: RFC 3550-style reception bookkeeping,
//! periodic RTCP report generation (loss fraction, smoothed one-way delay,
//! interval throughput, REMB, last-decoded frame), and a NACK module that
//! converts sequence gaps into retransmission requests.
//!
//! The sender half stamps its current RTT estimate into outgoing RTP data
//! packets so the receiver can time NACK retries; the estimate itself is
//! derived from RTCP arrivals (the report's own delay plus the one-way
//! delay it carries).

use std::collections::HashMap;

use tracing::trace;

use crate::packet::{Packet, PacketKind, RtcpReport};
use crate::time::{Rate, Timestamp, TimestampDelta};

pub const RTCP_INTERVAL: TimestampDelta = TimestampDelta::from_millis(50);
pub const REMB_INTERVAL: TimestampDelta = TimestampDelta::from_secs(1);

/// OWD smoothing weight (same convention as SRTT).
const OWD_ALPHA: f64 = 1.0 / 8.0;

// ─── Reception State ────────────────────────────────────────────────────────

/// RFC 3550 §A.3-style counters for loss-fraction reports.
#[derive(Debug, Default)]
pub struct RtpState {
    pub max_seq: u64,
    pub base_seq: u64,
    pub received: u64,
    pub expected_prior: u64,
    pub received_prior: u64,
    pub bytes_received: u64,
    pub bytes_received_prior: u64,
    /// Sender RTT carried in-band on RTP data packets.
    pub rtt: TimestampDelta,
}

// ─── NACK Module ────────────────────────────────────────────────────────────

const MAX_NACK_RETRIES: u32 = 10;
/// Re-arm floor when the RTT estimate is still unknown or tiny.
const MIN_NACK_REARM: TimestampDelta = TimestampDelta::from_millis(10);

#[derive(Debug, Default)]
struct NackInfo {
    retries: u32,
    ts_sent: Option<Timestamp>,
}

/// Tracks missing sequences between the highest seen and what arrived.
#[derive(Debug, Default)]
pub struct NackModule {
    pkts_lost: HashMap<u64, NackInfo>,
}

impl NackModule {
    /// Record a reception: close the gap up to `seq` (exclusive) and clear
    /// the entry if the packet itself was awaited.
    pub fn on_pkt_rcvd(&mut self, seq: u64, prev_max_seq: u64) {
        self.pkts_lost.remove(&seq);
        if seq > prev_max_seq + 1 {
            self.add_missing(prev_max_seq + 1, seq);
        }
    }

    fn add_missing(&mut self, from_seq: u64, to_seq: u64) {
        for seq in from_seq..to_seq {
            self.pkts_lost.entry(seq).or_default();
        }
    }

    /// Select sequences due for (re-)request: never sent, or older than
    /// `1.5 · rtt`. Entries past the retry budget are dropped.
    pub fn generate_nacks(&mut self, now: Timestamp, rtt: TimestampDelta) -> Vec<u64> {
        let rearm = (rtt * 1.5).max(MIN_NACK_REARM);
        let mut nacks = Vec::new();
        let mut exhausted = Vec::new();
        for (&seq, info) in &mut self.pkts_lost {
            if info.retries >= MAX_NACK_RETRIES {
                exhausted.push(seq);
                continue;
            }
            let due = match info.ts_sent {
                None => true,
                Some(ts) => now - ts > rearm,
            };
            if due {
                info.retries += 1;
                info.ts_sent = Some(now);
                nacks.push(seq);
            }
        }
        for seq in exhausted {
            self.pkts_lost.remove(&seq);
        }
        nacks.sort_unstable();
        nacks
    }

    /// Drop tracking for everything at or below `max_seq` (the frame
    /// covering those sequences has decoded).
    pub fn clean_up_to(&mut self, max_seq: u64) {
        self.pkts_lost.retain(|&seq, _| seq > max_seq);
    }

    pub fn tracked(&self) -> usize {
        self.pkts_lost.len()
    }

    pub fn reset(&mut self) {
        self.pkts_lost.clear();
    }
}

// ─── RTP Endpoint ───────────────────────────────────────────────────────────

pub struct RtpEndpoint {
    state: RtpState,
    nack: NackModule,
    /// Exponentially smoothed one-way delay, ms.
    owd_ms: Option<f64>,
    last_rtcp_report_ts: Timestamp,
    last_remb_ts: Timestamp,
    sender_rtt: TimestampDelta,
    /// Report generation is suppressed on the media-sending side.
    send_reports: bool,
}

impl RtpEndpoint {
    pub fn new(send_reports: bool) -> Self {
        RtpEndpoint {
            state: RtpState::default(),
            nack: NackModule::default(),
            owd_ms: None,
            last_rtcp_report_ts: Timestamp::ZERO,
            last_remb_ts: Timestamp::ZERO,
            sender_rtt: TimestampDelta::ZERO,
            send_reports,
        }
    }

    /// RTT estimate stamped into outgoing RTP data packets.
    pub fn sender_rtt(&self) -> TimestampDelta {
        self.sender_rtt
    }

    pub fn state(&self) -> &RtpState {
        &self.state
    }

    /// Feed a received packet into the endpoint's reception state.
    pub fn on_pkt_rcvd(&mut self, pkt: &Packet) {
        match &pkt.kind {
            PacketKind::RtpData { rtt } => {
                let prev_max = self.state.max_seq;
                if self.state.received == 0 {
                    self.state.base_seq = pkt.seq;
                    self.state.max_seq = pkt.seq;
                } else {
                    self.nack.on_pkt_rcvd(pkt.seq, prev_max);
                    self.state.max_seq = self.state.max_seq.max(pkt.seq);
                }
                self.state.received += 1;
                self.state.bytes_received += pkt.size_byte as u64;
                self.state.rtt = *rtt;

                let sample_ms = pkt.total_delay().as_millis_f64();
                self.owd_ms = Some(match self.owd_ms {
                    None => sample_ms,
                    Some(prev) => (1.0 - OWD_ALPHA) * prev + OWD_ALPHA * sample_ms,
                });
            }
            PacketKind::Rtcp(report) => {
                // The report's own one-way trip plus the delay it carries
                // approximates a round trip.
                self.sender_rtt = pkt.total_delay() + report.owd;
            }
            _ => {}
        }
    }

    /// A frame decoded: stop chasing its sequences.
    pub fn on_frame_decoded(&mut self, max_pkt_seq: u64) {
        self.nack.clean_up_to(max_pkt_seq);
    }

    /// Periodic work: an RTCP report when due (receiving side only) and
    /// NACKs for overdue gaps.
    pub fn periodic(
        &mut self,
        now: Timestamp,
        remb: Option<Rate>,
        last_decoded_frame: Option<u64>,
    ) -> Vec<Packet> {
        let mut out = Vec::new();
        if self.send_reports && now - self.last_rtcp_report_ts >= RTCP_INTERVAL {
            let report = self.build_report(now, remb, last_decoded_frame);
            trace!(
                loss = report.loss_fraction,
                owd_ms = report.owd.millis(),
                tput_bps = report.tput.bps(),
                "rtcp report"
            );
            out.push(Packet::rtcp(report));
            self.last_rtcp_report_ts = now;
        }
        for seq in self.nack.generate_nacks(now, self.state.rtt) {
            trace!(seq, "send nack");
            out.push(Packet::nack(seq));
        }
        out
    }

    fn build_report(
        &mut self,
        now: Timestamp,
        remb: Option<Rate>,
        last_decoded_frame: Option<u64>,
    ) -> RtcpReport {
        let state = &mut self.state;
        let expected = state.max_seq - state.base_seq + 1;
        let expected_interval = expected - state.expected_prior;
        state.expected_prior = expected;
        let received_interval = state.received - state.received_prior;
        state.received_prior = state.received;
        let lost_interval = expected_interval as i64 - received_interval as i64;
        let loss_fraction = if expected_interval > 0 && lost_interval > 0 {
            lost_interval as f64 / expected_interval as f64
        } else {
            0.0
        };

        let elapsed = now - self.last_rtcp_report_ts;
        let bytes = state.bytes_received - state.bytes_received_prior;
        state.bytes_received_prior = state.bytes_received;
        let tput = if elapsed.micros() > 0 {
            Rate::from_bytes_per_sec(bytes as f64 / elapsed.as_secs_f64())
        } else {
            Rate::ZERO
        };

        let remb = if remb.is_some() && now - self.last_remb_ts >= REMB_INTERVAL {
            self.last_remb_ts = now;
            remb
        } else {
            None
        };

        RtcpReport {
            loss_fraction,
            owd: TimestampDelta::from_micros((self.owd_ms.unwrap_or(0.0) * 1000.0) as i64),
            tput,
            remb,
            last_decoded_frame,
        }
    }

    pub fn reset(&mut self) {
        self.state = RtpState::default();
        self.nack.reset();
        self.owd_ms = None;
        self.last_rtcp_report_ts = Timestamp::ZERO;
        self.last_remb_ts = Timestamp::ZERO;
        self.sender_rtt = TimestampDelta::ZERO;
    }
}
