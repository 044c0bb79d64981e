//! # Frame
//!
//! The receiver-side reassembly unit. A frame is born on the first packet
//! received for its id, mutated by every subsequent packet, and retired
//! two frames after it decodes.

use std::collections::BTreeSet;

use crate::time::{Rate, Timestamp, TimestampDelta};

#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub frame_id: u64,
    pub model_id: u32,
    pub first_pkt_seq: u64,
    /// Frame size before FEC encoding.
    pub frame_size_byte: usize,
    /// Frame size after FEC encoding.
    pub frame_size_fec_enc_byte: usize,
    /// Bytes received so far (padding excluded).
    pub frame_size_rcvd_byte: usize,
    /// Bytes after FEC reconstruction (zero until FEC decode runs).
    pub frame_size_fec_dec_byte: usize,
    pub num_pkts: u32,
    pub num_pkts_rcvd: u32,
    pub encode_bitrate: Rate,
    pub encode_ts: Timestamp,
    pub decode_ts: Option<Timestamp>,
    pub last_pkt_sent_ts: Timestamp,
    pub last_pkt_rcvd_ts: Timestamp,
    pub fec_rate: f64,
    /// Sequence numbers seen for this frame; rejects duplicate deliveries.
    pub pkts_rcvd: BTreeSet<u64>,

    // Quality metrics, populated on successful decode.
    pub ssim: f64,
    pub psnr: f64,
}

impl Frame {
    pub fn frame_delay(&self) -> Option<TimestampDelta> {
        self.decode_ts.map(|ts| ts - self.encode_ts)
    }

    /// Highest sequence number received for this frame.
    pub fn max_pkt_seq(&self) -> Option<u64> {
        self.pkts_rcvd.iter().next_back().copied()
    }

    /// Fraction of the FEC-encoded frame still missing. Uses the
    /// FEC-decoded byte count once FEC decode has run, the raw received
    /// count before that. `0.0` means fully recovered.
    pub fn loss_rate(&self) -> f64 {
        if self.frame_size_fec_dec_byte > 0 && self.frame_size_fec_enc_byte > 0 {
            1.0 - self.frame_size_fec_dec_byte as f64 / self.frame_size_fec_enc_byte as f64
        } else if self.frame_size_fec_enc_byte > 0 {
            1.0 - self.frame_size_rcvd_byte as f64 / self.frame_size_fec_enc_byte as f64
        } else if self.frame_size_byte > 0 {
            1.0 - self.frame_size_rcvd_byte as f64 / self.frame_size_byte as f64
        } else {
            -1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loss_rate_prefers_fec_decoded_bytes() {
        let mut frame = Frame {
            frame_size_fec_enc_byte: 1000,
            frame_size_rcvd_byte: 900,
            ..Default::default()
        };
        assert!((frame.loss_rate() - 0.1).abs() < 1e-9);

        frame.frame_size_fec_dec_byte = 1000;
        assert_eq!(frame.loss_rate(), 0.0);
    }

    #[test]
    fn loss_rate_without_any_sizes_is_sentinel() {
        let frame = Frame::default();
        assert_eq!(frame.loss_rate(), -1.0);
    }

    #[test]
    fn frame_delay_requires_decode() {
        let mut frame = Frame {
            encode_ts: Timestamp::from_millis(40),
            ..Default::default()
        };
        assert!(frame.frame_delay().is_none());
        frame.decode_ts = Some(Timestamp::from_millis(130));
        assert_eq!(frame.frame_delay().unwrap().millis(), 90);
    }

    #[test]
    fn max_pkt_seq_tracks_receptions() {
        let mut frame = Frame::default();
        assert!(frame.max_pkt_seq().is_none());
        frame.pkts_rcvd.insert(12);
        frame.pkts_rcvd.insert(9);
        assert_eq!(frame.max_pkt_seq(), Some(12));
    }
}
