//! # Loss/Delay Hybrid Controller
//!
//! Three sub-estimators combined as `min(loss_based, receiver_estimate)`:
//!
//! - a delay-based estimator running at the receiver — per-frame delay
//!   gradient through an arrival-time Kalman filter, an adaptive
//!   threshold, and an `{INC, HOLD, DEC}` rate control state machine;
//! - a loss-based estimator at the sender driven by RTCP loss fractions;
//! - the receiver estimate carried back as REMB, capping the sender rate.

use tracing::trace;

use crate::app::FrameTiming;
use crate::cc::CongestionControl;
use crate::packet::{Packet, PacketKind};
use crate::stats::GccRecord;
use crate::time::{Rate, Timestamp, TimestampDelta};

const START_RATE_KBPS: f64 = 1000.0;

// ─── Arrival-Time Filter ────────────────────────────────────────────────────

/// Scalar Kalman filter over the delay gradient, with measurement-noise
/// adaptation scaled by the recent frame rate.
struct ArrivalTimeFilter {
    /// Send instants of the last K frames, for the frame-rate factor.
    ts_frame_sent: Vec<Timestamp>,
    z: f64,
    m_hat: f64,
    var_v_hat: f64,
    e: f64,
}

impl ArrivalTimeFilter {
    const K: usize = 5;
    const CHI: f64 = 0.1;
    const Q: f64 = 1e-3;

    fn new() -> Self {
        ArrivalTimeFilter {
            ts_frame_sent: Vec::with_capacity(Self::K + 1),
            z: 0.0,
            m_hat: 0.0,
            var_v_hat: 0.0,
            e: 0.0,
        }
    }

    fn add_frame_sent_time(&mut self, ts: Timestamp) {
        self.ts_frame_sent.push(ts);
        if self.ts_frame_sent.len() > Self::K {
            self.ts_frame_sent.remove(0);
        }
    }

    /// Highest frame rate (per ms) over the retained send instants.
    fn f_max(&self) -> f64 {
        let mut f_max = f64::MIN;
        for pair in self.ts_frame_sent.windows(2) {
            let gap_ms = (pair[1] - pair[0]).as_millis_f64();
            let f = 1000.0 / gap_ms;
            f_max = f_max.max(f);
        }
        f_max
    }

    fn update(&mut self, delay_gradient_ms: f64) -> f64 {
        let alpha = if self.ts_frame_sent.len() < 2 {
            1.0
        } else {
            (1.0 - Self::CHI).powf(30.0 / (1000.0 * self.f_max()))
        };
        self.z = delay_gradient_ms - self.m_hat;
        self.var_v_hat = (alpha * self.var_v_hat + (1.0 - alpha) * self.z.powi(2)).max(1.0);
        let k = (self.e + Self::Q) / (self.var_v_hat + self.e + Self::Q);
        self.m_hat += self.z * k;
        self.e = (1.0 - k) * (self.e + Self::Q);
        self.m_hat
    }

    fn reset(&mut self) {
        self.ts_frame_sent.clear();
        self.z = 0.0;
        self.m_hat = 0.0;
        self.var_v_hat = 0.0;
        self.e = 0.0;
    }
}

// ─── Delay-Based Estimator ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RateControlState {
    Dec,
    Hold,
    Inc,
}

impl RateControlState {
    fn as_str(self) -> &'static str {
        match self {
            RateControlState::Dec => "DEC",
            RateControlState::Hold => "HOLD",
            RateControlState::Inc => "INC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BwUsageSignal {
    Underuse,
    Normal,
    Overuse,
}

impl BwUsageSignal {
    fn as_str(self) -> &'static str {
        match self {
            BwUsageSignal::Underuse => "UNDERUSE",
            BwUsageSignal::Normal => "NORMAL",
            BwUsageSignal::Overuse => "OVERUSE",
        }
    }
}

pub struct DelayBasedBwe {
    // Receive-rate window.
    pkt_size_wnd: Vec<usize>,
    ts_rcvd_wnd: Vec<Timestamp>,
    rcv_rate: Rate,

    // Gradient and adaptive threshold.
    delay_grad_thresh_ms: f64,
    delay_grad_ms: f64,
    delay_grad_hat_ms: f64,
    filter: ArrivalTimeFilter,

    // Overuse detection.
    sig: BwUsageSignal,
    new_sig: BwUsageSignal,
    ts_overuse_start: Timestamp,

    // Rate control.
    state: RateControlState,
    rate_update_ts: Timestamp,
    rate: Rate,
    start_rate: Rate,
}

impl DelayBasedBwe {
    const START_DELAY_GRADIENT_THRESH_MS: f64 = 5.0;
    const OVERUSE_CONFIRM: TimestampDelta = TimestampDelta::from_millis(100);
    const HISTORY_WINDOW: TimestampDelta = TimestampDelta::from_millis(500);
    const K_U: f64 = 0.01;
    const K_D: f64 = 0.00018;
    const ALPHA: f64 = 0.85;
    const ETA: f64 = 1.05;

    pub fn new(start_rate: Rate) -> Self {
        DelayBasedBwe {
            pkt_size_wnd: Vec::new(),
            ts_rcvd_wnd: Vec::new(),
            rcv_rate: Rate::ZERO,
            delay_grad_thresh_ms: Self::START_DELAY_GRADIENT_THRESH_MS,
            delay_grad_ms: 0.0,
            delay_grad_hat_ms: 0.0,
            filter: ArrivalTimeFilter::new(),
            sig: BwUsageSignal::Normal,
            new_sig: BwUsageSignal::Normal,
            ts_overuse_start: Timestamp::ZERO,
            state: RateControlState::Inc,
            rate_update_ts: Timestamp::ZERO,
            rate: start_rate,
            start_rate,
        }
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    fn on_pkt_rcvd(&mut self, pkt: &Packet) {
        self.pkt_size_wnd.push(pkt.size_byte);
        self.ts_rcvd_wnd.push(pkt.ts_rcvd());
    }

    fn on_frame_rcvd(&mut self, now: Timestamp, timing: FrameTiming, prev: FrameTiming) {
        // Trim the receive window, then compute the rate over it.
        let cutoff = Self::HISTORY_WINDOW;
        let drop_n = self
            .ts_rcvd_wnd
            .iter()
            .take_while(|&&ts| now - ts > cutoff)
            .count();
        self.ts_rcvd_wnd.drain(..drop_n);
        self.pkt_size_wnd.drain(..drop_n);

        let wnd = (now - Timestamp::ZERO).min(cutoff);
        if wnd.micros() > 0 {
            let bytes: usize = self.pkt_size_wnd.iter().sum();
            self.rcv_rate = Rate::from_bps((8.0 * bytes as f64 / wnd.as_secs_f64()) as u64);
        }

        self.filter.add_frame_sent_time(timing.sent);

        // Delay gradient: inter-receive minus inter-send interval.
        self.delay_grad_ms =
            ((timing.rcvd - prev.rcvd) - (timing.sent - prev.sent)).as_millis_f64();
        self.delay_grad_hat_ms = self.filter.update(self.delay_grad_ms);

        // Adaptive threshold follows |d̂| faster upward than downward.
        let k_gamma = if self.delay_grad_hat_ms.abs() < self.delay_grad_thresh_ms {
            Self::K_D
        } else {
            Self::K_U
        };
        self.delay_grad_thresh_ms += (timing.rcvd - prev.rcvd).as_millis_f64()
            * k_gamma
            * (self.delay_grad_hat_ms.abs() - self.delay_grad_thresh_ms);

        self.update_bw_usage_signal(now);
        self.update_state();
        self.update_rate(now);
        trace!(
            d = self.delay_grad_ms,
            d_hat = self.delay_grad_hat_ms,
            thresh = self.delay_grad_thresh_ms,
            state = self.state.as_str(),
            rate_bps = self.rate.bps(),
            "delay bwe frame"
        );
    }

    fn update_bw_usage_signal(&mut self, now: Timestamp) {
        let new_sig = if self.delay_grad_hat_ms > self.delay_grad_thresh_ms {
            BwUsageSignal::Overuse
        } else if self.delay_grad_hat_ms < -self.delay_grad_thresh_ms {
            BwUsageSignal::Underuse
        } else {
            BwUsageSignal::Normal
        };

        // Overuse only latches after a confirmation window.
        if new_sig == BwUsageSignal::Overuse {
            if new_sig != self.sig {
                if new_sig != self.new_sig {
                    self.new_sig = new_sig;
                    self.ts_overuse_start = now;
                } else if now - self.ts_overuse_start >= Self::OVERUSE_CONFIRM {
                    self.sig = self.new_sig;
                }
            }
        } else {
            self.new_sig = new_sig;
            self.sig = new_sig;
        }
    }

    fn update_state(&mut self) {
        self.state = match self.state {
            RateControlState::Dec => {
                if self.sig != BwUsageSignal::Overuse {
                    RateControlState::Hold
                } else {
                    RateControlState::Dec
                }
            }
            RateControlState::Hold => match self.sig {
                BwUsageSignal::Overuse => RateControlState::Dec,
                BwUsageSignal::Normal => RateControlState::Inc,
                BwUsageSignal::Underuse => RateControlState::Hold,
            },
            RateControlState::Inc => match self.sig {
                BwUsageSignal::Overuse => RateControlState::Dec,
                BwUsageSignal::Underuse => RateControlState::Hold,
                BwUsageSignal::Normal => RateControlState::Inc,
            },
        };
    }

    fn update_rate(&mut self, now: Timestamp) {
        let cap = self.rcv_rate * 1.5;
        self.rate = match self.state {
            RateControlState::Inc => {
                let dt_s = (now - self.rate_update_ts).as_secs_f64().min(1.0);
                (self.rate * Self::ETA.powf(dt_s)).min(cap)
            }
            RateControlState::Dec => (self.rcv_rate * Self::ALPHA).min(cap),
            RateControlState::Hold => self.rate.min(cap),
        };
        self.rate_update_ts = now;
    }

    fn reset(&mut self) {
        let start = self.start_rate;
        *self = Self::new(start);
    }
}

// ─── Loss-Based Estimator ───────────────────────────────────────────────────

pub struct LossBasedBwe {
    rate: Rate,
}

impl LossBasedBwe {
    pub fn new(start_rate: Rate) -> Self {
        LossBasedBwe { rate: start_rate }
    }

    pub fn on_pkt_loss(&mut self, loss_fraction: f64) {
        if loss_fraction > 0.1 {
            self.rate = self.rate * (1.0 - 0.5 * loss_fraction);
        } else if loss_fraction < 0.02 {
            self.rate = self.rate * 1.05;
        }
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    pub fn set_rate(&mut self, rate: Rate) {
        self.rate = rate;
    }
}

// ─── Combined Controller ────────────────────────────────────────────────────

pub struct Gcc {
    rate: Rate,
    /// Latest REMB from the peer's delay-based estimator.
    bwe_incoming: Rate,
    delay_based: DelayBasedBwe,
    loss_based: LossBasedBwe,
    records: Vec<GccRecord>,
}

impl Gcc {
    pub fn new() -> Self {
        let start = Rate::from_kbps(START_RATE_KBPS);
        Gcc {
            rate: start,
            bwe_incoming: start,
            delay_based: DelayBasedBwe::new(start),
            loss_based: LossBasedBwe::new(start),
            records: Vec::new(),
        }
    }

    pub fn take_records(&mut self) -> Vec<GccRecord> {
        std::mem::take(&mut self.records)
    }

    fn record(&mut self, now: Timestamp, loss_fraction: f64) {
        self.records.push(GccRecord {
            timestamp_us: now.micros(),
            rate_bps: self.rate.bps(),
            loss_based_rate_bps: self.loss_based.rate().bps(),
            delay_based_rate_bps: self.delay_based.rate().bps(),
            remote_rate_control_state: self.delay_based.state.as_str(),
            delay_gradient: self.delay_based.delay_grad_ms,
            delay_gradient_hat: self.delay_based.delay_grad_hat_ms,
            delay_gradient_thresh: self.delay_based.delay_grad_thresh_ms,
            rcv_rate_bps: self.delay_based.rcv_rate.bps(),
            overuse_signal: self.delay_based.sig.as_str(),
            loss_fraction,
        });
    }
}

impl Default for Gcc {
    fn default() -> Self {
        Self::new()
    }
}

impl CongestionControl for Gcc {
    fn reset(&mut self) {
        let start = Rate::from_kbps(START_RATE_KBPS);
        self.rate = start;
        self.bwe_incoming = start;
        self.delay_based.reset();
        self.loss_based = LossBasedBwe::new(start);
        self.records.clear();
    }

    fn on_pkt_rcvd(&mut self, now: Timestamp, pkt: &Packet) {
        match &pkt.kind {
            PacketKind::RtpData { .. } => self.delay_based.on_pkt_rcvd(pkt),
            PacketKind::Rtcp(report) => {
                self.loss_based.on_pkt_loss(report.loss_fraction);
                if let Some(remb) = report.remb {
                    if !remb.is_zero() {
                        self.bwe_incoming = remb;
                    }
                }
                self.rate = self.loss_based.rate().min(self.bwe_incoming);
                self.loss_based.set_rate(self.rate);
                self.record(now, report.loss_fraction);
            }
            _ => {}
        }
    }

    fn on_frame_rcvd(&mut self, now: Timestamp, timing: FrameTiming, prev: FrameTiming) {
        self.delay_based.on_frame_rcvd(now, timing, prev);
        self.record(now, 0.0);
    }

    fn est_rate(&mut self, _start_ts: Timestamp, _end_ts: Timestamp) -> Rate {
        self.rate
    }

    fn remote_estimate(&self) -> Option<Rate> {
        Some(self.delay_based.rate())
    }
}
