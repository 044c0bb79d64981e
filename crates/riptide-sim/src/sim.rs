//! # Simulation Assembly
//!
//! Wires a complete two-host run from a [`SimConfig`]: clock, a pair of
//! directional links, the video sender/receiver pair, the chosen
//! congestion controller, and the matching host variant and retransmit
//! policy. The CLI and the integration tests share this construction
//! path.

use std::cell::RefCell;
use std::rc::Rc;
use std::str::FromStr;

use thiserror::Error;

use crate::cc::fbra::Fbra;
use crate::cc::gcc::Gcc;
use crate::cc::oracle::OracleCc;
use crate::cc::salsify::SalsifyCc;
use crate::cc::CongestionControl;
use crate::clock::SimClock;
use crate::codec::{Decoder, Encoder, LookupTable, SharedExternalCodec};
use crate::fec::FecEncoder;
use crate::host::{Host, HostRole};
use crate::link::Link;
use crate::pacer::Pacer;
use crate::packet::MSS;
use crate::rtp_host::RtpEndpoint;
use crate::rtx::{AckRtxManager, NackRtxManager};
use crate::salsify_host::SalsifyEndpoint;
use crate::stats::{
    FbraRecord, GccRecord, HostSummary, PacketLogRecord, SalsifyRecord, VideoRecvRecord,
    VideoSendRecord,
};
use crate::trace::LinkTrace;
use crate::video::{PacketizePolicy, VideoReceiver, VideoSender, FPS};

/// Default run length in seconds.
pub const DEFAULT_DURATION_SECS: u64 = 30;
/// Default RNG seed for the link loss draws.
pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("unknown congestion controller `{0}` (expected oracle|salsify|gcc|fbra)")]
    UnknownController(String),
    #[error("a codec lookup table is required when no external codec is supplied")]
    MissingLookupTable,
}

/// The four interchangeable congestion-control strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcKind {
    Oracle,
    Salsify,
    Gcc,
    Fbra,
}

impl FromStr for CcKind {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "oracle" => Ok(CcKind::Oracle),
            "salsify" => Ok(CcKind::Salsify),
            "gcc" => Ok(CcKind::Gcc),
            "fbra" => Ok(CcKind::Fbra),
            other => Err(BuildError::UnknownController(other.to_string())),
        }
    }
}

pub struct SimConfig {
    pub cc: CcKind,
    pub trace: LinkTrace,
    pub lookup_table: Option<Rc<LookupTable>>,
    /// External encode/decode capability replacing the lookup table.
    pub external_codec: Option<SharedExternalCodec>,
    pub duration_secs: u64,
    pub seed: u64,
}

impl SimConfig {
    pub fn new(cc: CcKind, trace: LinkTrace, lookup_table: Rc<LookupTable>) -> Self {
        SimConfig {
            cc,
            trace,
            lookup_table: Some(lookup_table),
            external_codec: None,
            duration_secs: DEFAULT_DURATION_SECS,
            seed: DEFAULT_SEED,
        }
    }
}

/// Per-controller record handles for log extraction.
enum CcHandles {
    Oracle,
    Salsify(Rc<RefCell<SalsifyCc>>),
    Gcc {
        sender: Rc<RefCell<Gcc>>,
        receiver: Rc<RefCell<Gcc>>,
    },
    Fbra(Rc<RefCell<Fbra>>),
}

pub struct Simulation {
    clock: SimClock,
    tx_link: Rc<RefCell<Link>>,
    sender_host: Rc<RefCell<Host>>,
    receiver_host: Rc<RefCell<Host>>,
    sender_app: Rc<RefCell<VideoSender>>,
    receiver_app: Rc<RefCell<VideoReceiver>>,
    cc_handles: CcHandles,
}

impl Simulation {
    pub fn build(config: SimConfig) -> Result<Self, BuildError> {
        let SimConfig {
            cc,
            trace,
            lookup_table,
            external_codec,
            duration_secs: _,
            seed,
        } = config;

        let (encoder, decoder) = match (&lookup_table, external_codec) {
            (_, Some(ext)) => (
                Encoder::from_external(ext.clone()),
                Decoder::from_external(ext),
            ),
            (Some(table), None) => (
                Encoder::from_table(table.clone()),
                Decoder::from_table(table.clone()),
            ),
            (None, None) => return Err(BuildError::MissingLookupTable),
        };

        let tx_link = Rc::new(RefCell::new(Link::new(trace.clone(), seed)));
        let rx_link = Rc::new(RefCell::new(Link::new(trace, seed.wrapping_add(1))));

        let fec_encoder = FecEncoder::shared();
        let sender_app = Rc::new(RefCell::new(VideoSender::new(encoder, fec_encoder.clone())));
        let receiver_app = Rc::new(RefCell::new(VideoReceiver::new(decoder)));

        let sender_pacer = Pacer::new(MSS * 10, 40);
        let receiver_pacer = Pacer::new(MSS * 10, 1);

        // Controller-specific wiring: host roles, retransmit policies and
        // packetization follow the strategy.
        struct Wiring {
            sender_cc: Rc<RefCell<dyn CongestionControl>>,
            receiver_cc: Rc<RefCell<dyn CongestionControl>>,
            sender_rtx: Option<Box<dyn crate::rtx::RtxManager>>,
            sender_role: HostRole,
            receiver_role: HostRole,
            handles: CcHandles,
        }

        let wiring = match cc {
            CcKind::Oracle => {
                sender_app.borrow_mut().enable_padding();
                Wiring {
                    sender_cc: Rc::new(RefCell::new(OracleCc::new(tx_link.clone()))),
                    receiver_cc: Rc::new(RefCell::new(OracleCc::new(rx_link.clone()))),
                    sender_rtx: None,
                    sender_role: HostRole::Plain,
                    receiver_role: HostRole::Plain,
                    handles: CcHandles::Oracle,
                }
            }
            CcKind::Salsify => {
                sender_app
                    .borrow_mut()
                    .set_packetize_policy(PacketizePolicy::Mtu);
                let salsify = Rc::new(RefCell::new(SalsifyCc::new(FPS)));
                Wiring {
                    sender_cc: salsify.clone(),
                    receiver_cc: Rc::new(RefCell::new(OracleCc::new(rx_link.clone()))),
                    sender_rtx: Some(Box::new(AckRtxManager::new())),
                    sender_role: HostRole::Salsify(SalsifyEndpoint::new()),
                    receiver_role: HostRole::Salsify(SalsifyEndpoint::new()),
                    handles: CcHandles::Salsify(salsify),
                }
            }
            CcKind::Gcc => {
                sender_app.borrow_mut().enable_padding();
                let sender_gcc = Rc::new(RefCell::new(Gcc::new()));
                let receiver_gcc = Rc::new(RefCell::new(Gcc::new()));
                Wiring {
                    sender_cc: sender_gcc.clone(),
                    receiver_cc: receiver_gcc.clone(),
                    sender_rtx: Some(Box::new(NackRtxManager::new())),
                    sender_role: HostRole::Rtp(RtpEndpoint::new(false)),
                    receiver_role: HostRole::Rtp(RtpEndpoint::new(true)),
                    handles: CcHandles::Gcc {
                        sender: sender_gcc,
                        receiver: receiver_gcc,
                    },
                }
            }
            CcKind::Fbra => {
                sender_app.borrow_mut().enable_padding();
                let fbra = Rc::new(RefCell::new(Fbra::new(fec_encoder.clone())));
                Wiring {
                    sender_cc: fbra.clone(),
                    receiver_cc: Rc::new(RefCell::new(OracleCc::new(rx_link.clone()))),
                    sender_rtx: Some(Box::new(NackRtxManager::new())),
                    sender_role: HostRole::Rtp(RtpEndpoint::new(false)),
                    receiver_role: HostRole::Rtp(RtpEndpoint::new(true)),
                    handles: CcHandles::Fbra(fbra),
                }
            }
        };

        let sender_host = Rc::new(RefCell::new(Host::new(
            0,
            tx_link.clone(),
            rx_link.clone(),
            sender_pacer,
            wiring.sender_cc,
            wiring.sender_rtx,
            sender_app.clone(),
            wiring.sender_role,
        )));
        let receiver_host = Rc::new(RefCell::new(Host::new(
            1,
            rx_link.clone(),
            tx_link.clone(),
            receiver_pacer,
            wiring.receiver_cc,
            None,
            receiver_app.clone(),
            wiring.receiver_role,
        )));

        // Links advance before hosts so this tick's budget reflects this
        // tick's bandwidth.
        let mut clock = SimClock::with_default_resolution();
        clock.register(tx_link.clone());
        clock.register(rx_link);
        clock.register(sender_host.clone());
        clock.register(receiver_host.clone());

        Ok(Simulation {
            clock,
            tx_link,
            sender_host,
            receiver_host,
            sender_app,
            receiver_app,
            cc_handles: wiring.handles,
        })
    }

    /// Run for the configured number of seconds.
    pub fn run(&mut self, duration_secs: u64) {
        self.clock.elapse(duration_secs);
    }

    pub fn now(&self) -> crate::time::Timestamp {
        self.clock.now()
    }

    pub fn avg_trace_bw_mbps(&self) -> f64 {
        self.tx_link.borrow().trace().avg_bw_mbps()
    }

    // ─── Results ────────────────────────────────────────────────────────

    pub fn summaries(&self) -> Vec<HostSummary> {
        let now = self.clock.now();
        vec![
            self.sender_host.borrow().summary(now),
            self.receiver_host.borrow().summary(now),
        ]
    }

    pub fn sender_pkt_log(&self) -> Vec<PacketLogRecord> {
        self.sender_host.borrow_mut().take_records()
    }

    pub fn receiver_pkt_log(&self) -> Vec<PacketLogRecord> {
        self.receiver_host.borrow_mut().take_records()
    }

    pub fn video_send_log(&self) -> Vec<VideoSendRecord> {
        self.sender_app.borrow_mut().take_records()
    }

    pub fn video_recv_log(&self) -> Vec<VideoRecvRecord> {
        self.receiver_app.borrow_mut().take_records()
    }

    pub fn gcc_logs(&self) -> Option<(Vec<GccRecord>, Vec<GccRecord>)> {
        match &self.cc_handles {
            CcHandles::Gcc { sender, receiver } => Some((
                sender.borrow_mut().take_records(),
                receiver.borrow_mut().take_records(),
            )),
            _ => None,
        }
    }

    pub fn fbra_log(&self) -> Option<Vec<FbraRecord>> {
        match &self.cc_handles {
            CcHandles::Fbra(fbra) => Some(fbra.borrow_mut().take_records()),
            _ => None,
        }
    }

    pub fn salsify_log(&self) -> Option<Vec<SalsifyRecord>> {
        match &self.cc_handles {
            CcHandles::Salsify(cc) => Some(cc.borrow_mut().take_records()),
            _ => None,
        }
    }
}
