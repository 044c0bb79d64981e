//! # Packet Model
//!
//! The tagged packet family exchanged between hosts: generic data, RTP
//! data, RTCP reports, NACKs and ACKs, plus the video payload a data
//! packet may carry.
//!
//! Every packet tracks three instants — first sent, last sent, received —
//! with `ts_first_sent == ts_sent` distinguishing originals from
//! retransmissions, and accumulates propagation and queueing delay as it
//! crosses a link.

use crate::time::{Rate, Timestamp, TimestampDelta};

/// Maximum segment size: fixed ceiling on data packet bytes.
pub const MSS: usize = 1500;

// ─── Application Payload ────────────────────────────────────────────────────

/// Video frame data carried by a packet.
#[derive(Debug, Clone, Default)]
pub struct VideoPayload {
    pub frame_id: u64,
    pub model_id: u32,
    /// Packet index within the frame's packet sequence.
    pub offset: u32,
    pub num_pkts: u32,
    /// Frame size before FEC encoding.
    pub frame_size_byte: usize,
    /// Frame size after FEC encoding.
    pub frame_size_fec_enc_byte: usize,
    pub encode_ts: Timestamp,
    pub encode_bitrate: Rate,
    pub fec_rate: f64,
    pub padding: bool,
    pub padding_size_byte: usize,
}

/// What the application hands to the transport for one packet.
#[derive(Debug, Clone)]
pub struct AppData {
    pub size_byte: usize,
    pub video: Option<VideoPayload>,
}

impl AppData {
    pub fn plain(size_byte: usize) -> Self {
        AppData {
            size_byte,
            video: None,
        }
    }

    pub fn video(size_byte: usize, payload: VideoPayload) -> Self {
        AppData {
            size_byte,
            video: Some(payload),
        }
    }
}

// ─── Packet Kinds ───────────────────────────────────────────────────────────

/// Receiver feedback summarised over one RTCP interval.
#[derive(Debug, Clone, Default)]
pub struct RtcpReport {
    pub loss_fraction: f64,
    /// Smoothed one-way delay observed by the reporting side.
    pub owd: TimestampDelta,
    /// Receiver-observed throughput since the previous report.
    pub tput: Rate,
    /// Receiver-estimated sender bitrate, carried at most once per second.
    pub remb: Option<Rate>,
    pub last_decoded_frame: Option<u64>,
}

/// Per-packet acknowledgement.
#[derive(Debug, Clone, Default)]
pub struct AckInfo {
    /// Sequence number of the acknowledged data packet.
    pub ack_seq: u64,
    /// Smoothed inter-arrival time measured by the receiver.
    pub mean_interarrival: TimestampDelta,
    /// When the acknowledged data packet was (last) sent.
    pub ts_data_pkt_sent: Timestamp,
    pub data_pkt_size: usize,
    pub last_decoded_frame: Option<u64>,
}

/// The packet variant tag.
#[derive(Debug, Clone)]
pub enum PacketKind {
    Data,
    /// RTP data; carries the sender's current round-trip-time estimate so
    /// the receiver can time its NACKs.
    RtpData { rtt: TimestampDelta },
    Rtcp(RtcpReport),
    Nack { seq: u64 },
    Ack(AckInfo),
}

// ─── Packet ─────────────────────────────────────────────────────────────────

/// A packet in flight (or cached for retransmission).
#[derive(Debug, Clone)]
pub struct Packet {
    pub size_byte: usize,
    pub seq: u64,
    pub kind: PacketKind,
    pub video: Option<VideoPayload>,
    /// Sender-stamped inter-burst gap, excluded from the receiver's
    /// inter-arrival estimate.
    pub grace_period: TimestampDelta,

    prop_delay: TimestampDelta,
    queue_delay: TimestampDelta,
    ts_sent: Timestamp,
    ts_first_sent: Option<Timestamp>,
    ts_rcvd: Timestamp,
}

/// Control packets occupy one byte on the wire model.
const CONTROL_PKT_SIZE: usize = 1;

impl Packet {
    fn base(size_byte: usize, kind: PacketKind, video: Option<VideoPayload>) -> Self {
        Packet {
            size_byte,
            seq: 0,
            kind,
            video,
            grace_period: TimestampDelta::ZERO,
            prop_delay: TimestampDelta::ZERO,
            queue_delay: TimestampDelta::ZERO,
            ts_sent: Timestamp::ZERO,
            ts_first_sent: None,
            ts_rcvd: Timestamp::ZERO,
        }
    }

    /// A generic data packet, sized by its application payload.
    pub fn data(app: AppData) -> Self {
        Self::base(app.size_byte, PacketKind::Data, app.video)
    }

    /// An RTP data packet carrying the sender's RTT snapshot.
    pub fn rtp_data(app: AppData, rtt: TimestampDelta) -> Self {
        Self::base(app.size_byte, PacketKind::RtpData { rtt }, app.video)
    }

    pub fn rtcp(report: RtcpReport) -> Self {
        Self::base(CONTROL_PKT_SIZE, PacketKind::Rtcp(report), None)
    }

    pub fn nack(seq: u64) -> Self {
        Self::base(CONTROL_PKT_SIZE, PacketKind::Nack { seq }, None)
    }

    pub fn ack(info: AckInfo) -> Self {
        Self::base(CONTROL_PKT_SIZE, PacketKind::Ack(info), None)
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn ts_sent(&self) -> Timestamp {
        self.ts_sent
    }

    pub fn ts_first_sent(&self) -> Timestamp {
        self.ts_first_sent.unwrap_or(Timestamp::ZERO)
    }

    pub fn ts_rcvd(&self) -> Timestamp {
        self.ts_rcvd
    }

    /// Accumulated propagation plus queueing delay.
    pub fn total_delay(&self) -> TimestampDelta {
        self.prop_delay + self.queue_delay
    }

    pub fn prop_delay(&self) -> TimestampDelta {
        self.prop_delay
    }

    pub fn queue_delay(&self) -> TimestampDelta {
        self.queue_delay
    }

    /// True for the first transmission of this packet.
    pub fn is_original(&self) -> bool {
        self.ts_first_sent == Some(self.ts_sent)
    }

    /// True for data-bearing kinds (as opposed to control feedback).
    pub fn is_data(&self) -> bool {
        matches!(self.kind, PacketKind::Data | PacketKind::RtpData { .. })
    }

    pub fn is_padding(&self) -> bool {
        self.video.as_ref().map(|v| v.padding).unwrap_or(false)
    }

    /// Round-trip time sample carried by an ACK, available once received.
    pub fn ack_rtt(&self) -> Option<TimestampDelta> {
        match &self.kind {
            PacketKind::Ack(info) => Some(self.ts_rcvd - info.ts_data_pkt_sent),
            _ => None,
        }
    }

    // ─── Mutators ───────────────────────────────────────────────────────

    pub fn set_ts_sent(&mut self, ts: Timestamp) {
        self.ts_sent = ts;
        if self.ts_first_sent.is_none() {
            self.ts_first_sent = Some(ts);
        }
    }

    pub fn set_ts_rcvd(&mut self, ts: Timestamp) {
        self.ts_rcvd = ts;
    }

    pub fn add_prop_delay(&mut self, delay: TimestampDelta) {
        self.prop_delay = self.prop_delay + delay;
    }

    pub fn add_queue_delay(&mut self, delay: TimestampDelta) {
        self.queue_delay = self.queue_delay + delay;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sent_recorded_once() {
        let mut pkt = Packet::data(AppData::plain(MSS));
        pkt.set_ts_sent(Timestamp::from_millis(10));
        assert!(pkt.is_original());

        // Retransmission: last-sent moves, first-sent stays.
        pkt.set_ts_sent(Timestamp::from_millis(500));
        assert!(!pkt.is_original());
        assert_eq!(pkt.ts_first_sent().millis(), 10);
        assert_eq!(pkt.ts_sent().millis(), 500);
    }

    #[test]
    fn delays_accumulate() {
        let mut pkt = Packet::data(AppData::plain(100));
        pkt.add_prop_delay(TimestampDelta::from_millis(50));
        pkt.add_queue_delay(TimestampDelta::from_millis(7));
        pkt.add_queue_delay(TimestampDelta::from_millis(3));
        assert_eq!(pkt.total_delay().millis(), 60);
    }

    #[test]
    fn ack_rtt_spans_send_to_receive() {
        let mut ack = Packet::ack(AckInfo {
            ack_seq: 9,
            ts_data_pkt_sent: Timestamp::from_millis(100),
            ..Default::default()
        });
        ack.set_ts_rcvd(Timestamp::from_millis(180));
        assert_eq!(ack.ack_rtt().unwrap().millis(), 80);
    }

    #[test]
    fn padding_flag_comes_from_payload() {
        let payload = VideoPayload {
            padding: true,
            ..Default::default()
        };
        let pkt = Packet::data(AppData {
            size_byte: 200,
            video: Some(payload),
        });
        assert!(pkt.is_padding());
        assert!(pkt.is_data());
        assert!(!Packet::nack(3).is_data());
    }
}
