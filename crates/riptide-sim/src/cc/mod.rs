//! # Congestion Control
//!
//! One contract, four interchangeable strategies:
//!
//! - [`oracle::OracleCc`] — reads the tx link's future bit budget
//! - [`gcc::Gcc`] — loss-based rate + frame-gradient delay filter +
//!   receiver-estimate cap
//! - [`salsify::SalsifyCc`] — rate matching from inflight-adjusted
//!   per-packet inter-arrival times
//! - [`fbra::Fbra`] — OWD-percentile state machine with coupled FEC
//!   redundancy
//!
//! Controllers are state machines over observable signals; hosts feed them
//! through the typed hooks below and read back a target rate.

pub mod fbra;
pub mod gcc;
pub mod oracle;
pub mod salsify;

use crate::app::FrameTiming;
use crate::packet::Packet;
use crate::time::{Rate, Timestamp};

pub trait CongestionControl {
    fn tick(&mut self, _now: Timestamp) {}

    fn reset(&mut self);

    fn on_pkt_sent(&mut self, _now: Timestamp, _pkt: &Packet) {}

    fn on_pkt_rcvd(&mut self, _now: Timestamp, _pkt: &Packet) {}

    fn on_pkt_lost(&mut self, _now: Timestamp, _pkt: &Packet) {}

    /// Frame-arrival timing for gradient-based estimators.
    fn on_frame_rcvd(&mut self, _now: Timestamp, _timing: FrameTiming, _prev: FrameTiming) {}

    /// Target sending rate for the window `[start_ts, end_ts]`.
    fn est_rate(&mut self, start_ts: Timestamp, end_ts: Timestamp) -> Rate;

    /// Encoder rate decoupled from pacing, when the strategy separates the
    /// two.
    fn encode_rate(&self) -> Option<Rate> {
        None
    }

    /// Receiver-side estimate of the remote sender's rate, fed back to the
    /// peer (REMB).
    fn remote_estimate(&self) -> Option<Rate> {
        None
    }
}
