//! # Forward Error Correction
//!
//! Byte-budget FEC model: the encoder inflates a frame's size by
//! `1/(1 - r)` for redundancy rate `r ∈ [0, 1)`, and the decoder declares
//! a frame fully reconstructed when the missing fraction is within `r`.
//!
//! The encoder handle is shared between the video sender (which applies
//! the inflation) and a redundancy-coupled controller (which steers rate
//! and on/off).

use std::cell::RefCell;
use std::rc::Rc;

use crate::frame::Frame;

pub type SharedFecEncoder = Rc<RefCell<FecEncoder>>;

#[derive(Debug, Default)]
pub struct FecEncoder {
    enabled: bool,
    rate: f64,
}

impl FecEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedFecEncoder {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn set_rate(&mut self, rate: f64) {
        debug_assert!((0.0..1.0).contains(&rate));
        self.rate = rate;
    }

    /// Inflate a frame size by the redundancy factor; pass-through when
    /// disabled.
    pub fn encode(&self, fsize_byte: usize) -> usize {
        if self.enabled {
            (fsize_byte as f64 / (1.0 - self.rate)) as usize
        } else {
            fsize_byte
        }
    }
}

#[derive(Debug, Default)]
pub struct FecDecoder;

impl FecDecoder {
    /// Decide reconstruction for a frame: if the missing fraction is
    /// within the frame's redundancy rate, all encoded bytes count as
    /// recovered; otherwise only the bytes actually received do.
    pub fn decode(&self, frame: &mut Frame) {
        if frame.frame_size_fec_enc_byte == 0 {
            return;
        }
        let missing =
            1.0 - frame.frame_size_rcvd_byte as f64 / frame.frame_size_fec_enc_byte as f64;
        frame.frame_size_fec_dec_byte = if missing <= frame.fec_rate {
            frame.frame_size_fec_enc_byte
        } else {
            frame.frame_size_rcvd_byte
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_inflates_only_when_enabled() {
        let mut fec = FecEncoder::new();
        fec.set_rate(0.2);
        assert_eq!(fec.encode(800), 800);
        fec.enable();
        assert_eq!(fec.encode(800), 1000);
    }

    #[test]
    fn zero_rate_is_identity() {
        let mut fec = FecEncoder::new();
        fec.enable();
        assert_eq!(fec.encode(1234), 1234);
    }

    #[test]
    fn decode_recovers_within_redundancy() {
        let decoder = FecDecoder;
        let mut frame = Frame {
            frame_size_fec_enc_byte: 1000,
            frame_size_rcvd_byte: 900,
            fec_rate: 0.125,
            ..Default::default()
        };
        decoder.decode(&mut frame);
        assert_eq!(frame.frame_size_fec_dec_byte, 1000);
        assert_eq!(frame.loss_rate(), 0.0);
    }

    #[test]
    fn decode_gives_up_past_redundancy() {
        let decoder = FecDecoder;
        let mut frame = Frame {
            frame_size_fec_enc_byte: 1000,
            frame_size_rcvd_byte: 700,
            fec_rate: 0.125,
            ..Default::default()
        };
        decoder.decode(&mut frame);
        assert_eq!(frame.frame_size_fec_dec_byte, 700);
        assert!(frame.loss_rate() > 0.0);
    }
}
