//! # riptide-sim
//!
//! Discrete-time simulator for interactive real-time media transport over
//! a bandwidth-variable, lossy bottleneck link.
//!
//! Two hosts exchange a video stream across a pair of directional links;
//! at each endpoint a congestion-control loop, a pacer, a retransmission
//! buffer, an optional FEC stage, and a video encoder/decoder cooperate
//! to deliver frames within a bounded end-to-end delay. Everything runs
//! in lockstep under a tick-driven clock; there is no real I/O, no
//! wall-clock scheduling and no threading.
//!
//! ## Crate structure
//!
//! - [`time`] — instants, durations and bitrates with saturating arithmetic
//! - [`clock`] — fixed-resolution tick dispatcher with an observer list
//! - [`trace`] — bandwidth traces with cyclic bit integration
//! - [`packet`] — the tagged packet family and video payloads
//! - [`link`] — trace-backed queue with loss, delay and a byte cap
//! - [`pacer`] — token-bucket send budget
//! - [`fec`] / [`frame`] / [`codec`] — the video frame pipeline
//! - [`app`] / [`video`] — the application contract and the conferencing pair
//! - [`rtx`] — ACK-based and NACK-based retransmission policies
//! - [`cc`] — the four interchangeable congestion controllers
//! - [`host`] / [`rtp_host`] / [`salsify_host`] — the packet pump and roles
//! - [`stats`] — typed log records and summaries
//! - [`sim`] — configuration and assembly of a complete run

pub mod app;
pub mod cc;
pub mod clock;
pub mod codec;
pub mod fec;
pub mod frame;
pub mod host;
pub mod link;
pub mod pacer;
pub mod packet;
pub mod rtp_host;
pub mod rtx;
pub mod salsify_host;
pub mod sim;
pub mod stats;
pub mod time;
pub mod trace;
pub mod video;
