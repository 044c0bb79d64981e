//! # Salsify Endpoint Behavior
//!
//! The per-packet-ACK host role. The receiving side keeps an exponentially
//! smoothed inter-arrival time, excluding the sender-stamped burst grace,
//! and acknowledges every data packet. The sending side stamps the grace —
//! the idle gap beyond what pacing alone would produce — and runs its
//! pacer at 1.5× the controller rate to absorb burstiness (applied by the
//! host).

use crate::packet::{AckInfo, Packet, MSS};
use crate::time::{Rate, Timestamp, TimestampDelta};

/// Smoothing weight for the inter-arrival estimate.
const TAO_ALPHA: f64 = 0.1;

/// Pacing multiplier over the controller's target rate.
pub const PACING_MULTIPLIER: f64 = 1.5;

pub struct SalsifyEndpoint {
    /// Smoothed inter-arrival time.
    tao: TimestampDelta,
    ts_prev_pkt_rcvd: Option<Timestamp>,
}

impl SalsifyEndpoint {
    pub fn new() -> Self {
        SalsifyEndpoint {
            tao: TimestampDelta::ZERO,
            ts_prev_pkt_rcvd: None,
        }
    }

    pub fn mean_interarrival(&self) -> TimestampDelta {
        self.tao
    }

    /// Process a received data packet: update the inter-arrival estimate
    /// and produce the ACK to return to the sender.
    pub fn on_data_rcvd(&mut self, pkt: &Packet, last_decoded_frame: Option<u64>) -> Packet {
        let ts_rcvd = pkt.ts_rcvd();
        if let Some(prev_rcvd) = self.ts_prev_pkt_rcvd {
            // The sender's inter-burst grace is excluded so idle gaps do
            // not read as a slow link.
            let sample =
                ((ts_rcvd - prev_rcvd) - pkt.grace_period).max(TimestampDelta::ZERO);
            self.tao = sample * TAO_ALPHA + self.tao * (1.0 - TAO_ALPHA);
        }
        self.ts_prev_pkt_rcvd = Some(ts_rcvd);

        Packet::ack(AckInfo {
            ack_seq: pkt.seq,
            mean_interarrival: self.tao,
            ts_data_pkt_sent: pkt.ts_sent(),
            data_pkt_size: pkt.size_byte,
            last_decoded_frame,
        })
    }

    pub fn reset(&mut self) {
        self.tao = TimestampDelta::ZERO;
        self.ts_prev_pkt_rcvd = None;
    }
}

impl Default for SalsifyEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

/// Grace period for a packet sent `gap` after its predecessor: the excess
/// over the natural serialization gap of one MSS at the pacing rate.
pub fn burst_grace(gap: TimestampDelta, pacing_rate: Rate) -> TimestampDelta {
    if pacing_rate.is_zero() {
        return TimestampDelta::ZERO;
    }
    let natural_us = (MSS as f64 * 8.0 / pacing_rate.bps() as f64) * 1e6;
    (gap - TimestampDelta::from_micros(natural_us as i64)).max(TimestampDelta::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{AppData, PacketKind};

    fn data_pkt(seq: u64, sent_ms: u64, rcvd_ms: u64, grace_ms: i64) -> Packet {
        let mut pkt = Packet::data(AppData::plain(MSS));
        pkt.seq = seq;
        pkt.grace_period = TimestampDelta::from_millis(grace_ms);
        pkt.set_ts_sent(Timestamp::from_millis(sent_ms));
        pkt.set_ts_rcvd(Timestamp::from_millis(rcvd_ms));
        pkt
    }

    #[test]
    fn first_packet_does_not_move_the_estimate() {
        let mut ep = SalsifyEndpoint::new();
        let ack = ep.on_data_rcvd(&data_pkt(0, 100, 150, 0), None);
        assert_eq!(ep.mean_interarrival(), TimestampDelta::ZERO);
        match ack.kind {
            PacketKind::Ack(info) => {
                assert_eq!(info.ack_seq, 0);
                assert_eq!(info.ts_data_pkt_sent.millis(), 100);
                assert_eq!(info.data_pkt_size, MSS);
            }
            other => panic!("expected ack, got {other:?}"),
        }
    }

    #[test]
    fn interarrival_smooths_with_alpha() {
        let mut ep = SalsifyEndpoint::new();
        ep.on_data_rcvd(&data_pkt(0, 100, 150, 0), None);
        ep.on_data_rcvd(&data_pkt(1, 101, 160, 0), None);
        // First sample 10 ms at α = 0.1 → 1 ms.
        assert_eq!(ep.mean_interarrival().millis(), 1);
        ep.on_data_rcvd(&data_pkt(2, 102, 170, 0), None);
        // 10 · 0.1 + 1 · 0.9 = 1.9 ms.
        assert_eq!(ep.mean_interarrival().micros(), 1900);
    }

    #[test]
    fn grace_excluded_from_sample() {
        let mut ep = SalsifyEndpoint::new();
        ep.on_data_rcvd(&data_pkt(0, 100, 150, 0), None);
        // 30 ms gap but 28 ms of it was sender idle time.
        ep.on_data_rcvd(&data_pkt(1, 130, 180, 28), None);
        assert_eq!(ep.mean_interarrival().micros(), 200);
    }

    #[test]
    fn negative_sample_clamps_to_zero() {
        let mut ep = SalsifyEndpoint::new();
        ep.on_data_rcvd(&data_pkt(0, 100, 150, 0), None);
        // Grace exceeds the observed gap.
        ep.on_data_rcvd(&data_pkt(1, 130, 155, 20), None);
        assert_eq!(ep.mean_interarrival(), TimestampDelta::ZERO);
    }

    #[test]
    fn burst_grace_is_excess_over_pacing_gap() {
        // 12 Mbps: one MSS serializes in 1 ms.
        let rate = Rate::from_mbps(12.0);
        assert_eq!(
            burst_grace(TimestampDelta::from_millis(5), rate),
            TimestampDelta::from_millis(4)
        );
        // A back-to-back send has no grace.
        assert_eq!(
            burst_grace(TimestampDelta::from_millis(1), rate),
            TimestampDelta::ZERO
        );
        assert_eq!(
            burst_grace(TimestampDelta::from_millis(5), Rate::ZERO),
            TimestampDelta::ZERO
        );
    }
}
