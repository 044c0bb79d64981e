//! # Threshold/FEC Controller
//!
//! A state machine over one-way-delay percentiles, coupled to the FEC
//! encoder it shares with the video sender. Delay correlations against the
//! 40th and 80th percentiles of a two-second OWD history drive transitions
//! between `{UP, STAY, DOWN, PROBE}`; probing enables FEC and ramping up
//! converts the probe redundancy into rate.
//!
//! After an undershoot the controller deactivates for roughly one RTCP
//! interval, then bounces back from the goodput observed while inactive.

use tracing::trace;

use crate::cc::CongestionControl;
use crate::fec::SharedFecEncoder;
use crate::packet::{Packet, PacketKind, RtcpReport};
use crate::stats::FbraRecord;
use crate::time::{Rate, Timestamp, TimestampDelta};

/// 1.05 × the 50 ms RTCP interval.
const DEACTIVATION_PERIOD: TimestampDelta = TimestampDelta::from_micros(52_500);
const ALPHA_UNDERSHOOT: f64 = 2.0;
const ALPHA_STAY: f64 = 1.1;
const ALPHA_DOWN: f64 = 1.6;
const BETA: f64 = 1.2;
const MIN_FEC_INTERVAL: u32 = 2;
const MAX_FEC_INTERVAL: u32 = 14;
const HISTORY_WND: TimestampDelta = TimestampDelta::from_secs(2);
const MIN_RATE_KBPS: f64 = 50.0;
const MAX_RATE_KBPS: f64 = 24_000.0;
const START_RATE_BPS: u64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FbraState {
    Down,
    Stay,
    Up,
    Probe,
}

impl FbraState {
    fn as_str(self) -> &'static str {
        match self {
            FbraState::Down => "DOWN",
            FbraState::Stay => "STAY",
            FbraState::Up => "UP",
            FbraState::Probe => "PROBE",
        }
    }
}

/// Linear-interpolation percentile over an unsorted sample set.
fn percentile(data: &[f64], p: f64) -> f64 {
    assert!(!data.is_empty(), "percentile of an empty set");
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("OWD samples are finite"));
    let n = sorted.len() as f64;
    let position = p / 100.0 * (n - 1.0);
    if position <= 0.0 {
        return sorted[0];
    }
    if position >= n - 1.0 {
        return sorted[sorted.len() - 1];
    }
    let lower_idx = position as usize;
    let lower = sorted[lower_idx];
    let upper = sorted[lower_idx + 1];
    lower + (position - lower_idx as f64) * (upper - lower)
}

pub struct Fbra {
    rate: Rate,
    enabled: bool,
    disable_start_ts: Option<Timestamp>,
    state: FbraState,
    fec_interval: u32,
    fec_encoder: SharedFecEncoder,
    owd_history: Vec<f64>,
    owd_ts: Vec<Timestamp>,
    goodput_during_undershoot: Rate,
    latest_rtcp: Option<(RtcpReport, Timestamp)>,
    records: Vec<FbraRecord>,
}

impl Fbra {
    pub fn new(fec_encoder: SharedFecEncoder) -> Self {
        let fec_interval = 8;
        {
            let mut fec = fec_encoder.borrow_mut();
            fec.set_rate(1.0 / fec_interval as f64);
            fec.disable();
        }
        Fbra {
            rate: Rate::from_bps(START_RATE_BPS),
            enabled: true,
            disable_start_ts: None,
            state: FbraState::Stay,
            fec_interval,
            fec_encoder,
            owd_history: Vec::new(),
            owd_ts: Vec::new(),
            goodput_during_undershoot: Rate::ZERO,
            latest_rtcp: None,
            records: Vec::new(),
        }
    }

    pub fn take_records(&mut self) -> Vec<FbraRecord> {
        std::mem::take(&mut self.records)
    }

    // ─── State Handlers ─────────────────────────────────────────────────

    fn up(&mut self, losses: f64, corr_owd_high: f64) {
        if losses > 0.0 || corr_owd_high > ALPHA_DOWN {
            self.undershoot();
            self.disable_rate_control();
            self.state = FbraState::Down;
        } else {
            self.state = FbraState::Stay;
            self.fec_encoder.borrow_mut().disable();
        }
    }

    fn down(&mut self, losses: f64, corr_owd_high: f64) {
        if losses > 0.0 {
            self.state = FbraState::Stay;
        } else if corr_owd_high > ALPHA_UNDERSHOOT {
            self.undershoot();
            self.disable_rate_control();
            self.state = FbraState::Down;
        } else {
            self.state = FbraState::Stay;
        }
        self.fec_encoder.borrow_mut().disable();
    }

    fn stay(&mut self, losses: f64, corr_owd_low: f64, corr_owd_high: f64) {
        if losses > 0.0 {
            // Persistent losses while already holding push downward.
            self.undershoot();
            self.disable_rate_control();
            self.state = FbraState::Down;
            self.fec_encoder.borrow_mut().disable();
        } else if corr_owd_high > ALPHA_STAY {
            self.undershoot();
            self.disable_rate_control();
            self.state = FbraState::Down;
            self.fec_encoder.borrow_mut().disable();
        } else {
            // Clear delay: tighten the FEC interval and start probing.
            if corr_owd_low <= 1.0 && corr_owd_high <= 1.0 {
                self.fec_interval = self
                    .fec_interval
                    .saturating_sub(1)
                    .clamp(MIN_FEC_INTERVAL, MAX_FEC_INTERVAL);
                self.fec_encoder
                    .borrow_mut()
                    .set_rate(1.0 / self.fec_interval as f64);
            }
            self.state = FbraState::Probe;
            self.fec_encoder.borrow_mut().enable();
        }
    }

    fn probe(&mut self, losses: f64, corr_owd_low: f64, corr_owd_high: f64) {
        if losses > 0.0 {
            self.undershoot();
            self.disable_rate_control();
            self.fec_encoder.borrow_mut().disable();
            self.state = FbraState::Down;
        } else if corr_owd_high > ALPHA_DOWN {
            self.undershoot();
            self.disable_rate_control();
            self.fec_encoder.borrow_mut().disable();
            self.state = FbraState::Down;
        } else if corr_owd_high > ALPHA_STAY {
            self.state = FbraState::Stay;
            self.fec_encoder.borrow_mut().disable();
        } else if corr_owd_low > BETA {
            // Probe is inflating delay: back off the redundancy.
            self.fec_interval = (self.fec_interval + 1).clamp(MIN_FEC_INTERVAL, MAX_FEC_INTERVAL);
            self.fec_encoder
                .borrow_mut()
                .set_rate(1.0 / self.fec_interval as f64);
            self.state = FbraState::Probe;
        } else {
            // The probe redundancy fits: convert it into rate.
            let fec_rate = self.fec_encoder.borrow().rate();
            self.rate = (self.rate * (1.0 / (1.0 - fec_rate))).clamp(
                Rate::from_kbps(MIN_RATE_KBPS),
                Rate::from_kbps(MAX_RATE_KBPS),
            );
            self.state = FbraState::Up;
            self.fec_encoder.borrow_mut().disable();
        }
    }

    fn undershoot(&mut self) {
        self.rate = (self.rate * 0.85).clamp(
            Rate::from_kbps(MIN_RATE_KBPS),
            Rate::from_kbps(MAX_RATE_KBPS),
        );
        trace!(rate_bps = self.rate.bps(), "undershoot");
    }

    fn disable_rate_control(&mut self) {
        self.enabled = false;
        self.disable_start_ts = None; // armed by the next RTCP arrival
    }

    fn bounce_back(&mut self) {
        let saw_losses = self
            .latest_rtcp
            .as_ref()
            .map(|(report, _)| report.loss_fraction > 0.0)
            .unwrap_or(false);
        if saw_losses {
            self.undershoot();
        } else {
            self.rate = (self.goodput_during_undershoot * 0.9).clamp(
                Rate::from_kbps(MIN_RATE_KBPS),
                Rate::from_kbps(MAX_RATE_KBPS),
            );
        }
        self.state = FbraState::Stay;
        self.enabled = true;
        trace!(rate_bps = self.rate.bps(), "bounce back");
    }
}

impl CongestionControl for Fbra {
    fn tick(&mut self, _now: Timestamp) {
        if self.enabled {
            return;
        }
        let (Some(start), Some((_, rtcp_rcvd))) = (self.disable_start_ts, self.latest_rtcp.as_ref())
        else {
            return;
        };
        if *rtcp_rcvd - start >= DEACTIVATION_PERIOD {
            self.bounce_back();
        }
    }

    fn reset(&mut self) {
        self.rate = Rate::from_bps(START_RATE_BPS);
        self.enabled = true;
        self.disable_start_ts = None;
        self.state = FbraState::Stay;
        self.fec_interval = 8;
        {
            let mut fec = self.fec_encoder.borrow_mut();
            fec.set_rate(1.0 / self.fec_interval as f64);
            fec.disable();
        }
        self.owd_history.clear();
        self.owd_ts.clear();
        self.goodput_during_undershoot = Rate::ZERO;
        self.latest_rtcp = None;
        self.records.clear();
    }

    fn on_pkt_rcvd(&mut self, now: Timestamp, pkt: &Packet) {
        let PacketKind::Rtcp(report) = &pkt.kind else {
            return;
        };
        // Arm the deactivation timer from the first report after the
        // undershoot.
        if !self.enabled && self.disable_start_ts.is_none() {
            self.disable_start_ts = Some(now);
        }
        self.latest_rtcp = Some((report.clone(), pkt.ts_rcvd()));

        let owd_ms = report.owd.as_millis_f64();
        if owd_ms <= 0.0 {
            return;
        }
        let losses = report.loss_fraction;

        // Loss-free samples feed the delay history (plus the seeding
        // sample); the window spans the last two seconds.
        if losses == 0.0 || self.owd_history.is_empty() {
            self.owd_history.push(owd_ms);
            self.owd_ts.push(now);
            let cutoff = HISTORY_WND;
            let drop_n = self
                .owd_ts
                .iter()
                .take_while(|&&ts| now - ts > cutoff)
                .count();
            self.owd_ts.drain(..drop_n);
            self.owd_history.drain(..drop_n);
        }

        if !self.enabled {
            self.goodput_during_undershoot = report.tput;
        }

        let p40_owd = percentile(&self.owd_history, 40.0);
        let p80_owd = percentile(&self.owd_history, 80.0);
        let corr_owd_low = owd_ms / p40_owd;
        let corr_owd_high = owd_ms / p80_owd;

        self.records.push(FbraRecord {
            timestamp_us: now.micros(),
            rate_bps: self.rate.bps(),
            p40_owd_ms: p40_owd,
            p80_owd_ms: p80_owd,
            state: self.state.as_str(),
            fec_enabled: self.fec_encoder.borrow().is_enabled(),
            fec_interval: self.fec_interval,
            corr_owd_low,
            corr_owd_high,
        });

        if !self.enabled {
            return;
        }

        match self.state {
            FbraState::Up => self.up(losses, corr_owd_high),
            FbraState::Down => self.down(losses, corr_owd_high),
            FbraState::Stay => self.stay(losses, corr_owd_low, corr_owd_high),
            FbraState::Probe => self.probe(losses, corr_owd_low, corr_owd_high),
        }
    }

    fn est_rate(&mut self, _start_ts: Timestamp, _end_ts: Timestamp) -> Rate {
        self.rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fec::FecEncoder;

    fn rtcp_pkt(owd_ms: i64, loss: f64, tput_kbps: f64, now: Timestamp) -> Packet {
        let mut pkt = Packet::rtcp(RtcpReport {
            loss_fraction: loss,
            owd: TimestampDelta::from_millis(owd_ms),
            tput: Rate::from_kbps(tput_kbps),
            remb: None,
            last_decoded_frame: None,
        });
        pkt.set_ts_rcvd(now);
        pkt
    }

    fn controller() -> (Fbra, SharedFecEncoder) {
        let fec = FecEncoder::shared();
        let fbra = Fbra::new(fec.clone());
        (fbra, fec)
    }

    /// Drive `n` reports with the given OWD/loss, 50 ms apart.
    fn feed(fbra: &mut Fbra, n: usize, owd_ms: i64, loss: f64, start_ms: u64) -> Timestamp {
        let mut now = Timestamp::from_millis(start_ms);
        for _ in 0..n {
            fbra.tick(now);
            fbra.on_pkt_rcvd(now, &rtcp_pkt(owd_ms, loss, 500.0, now));
            now = now + TimestampDelta::from_millis(50);
        }
        now
    }

    // ─── Percentile Tests ───────────────────────────────────────────────

    #[test]
    fn percentile_interpolates() {
        let data = vec![10.0, 20.0, 30.0, 40.0, 50.0];
        assert_eq!(percentile(&data, 0.0), 10.0);
        assert_eq!(percentile(&data, 100.0), 50.0);
        assert_eq!(percentile(&data, 50.0), 30.0);
        assert_eq!(percentile(&data, 40.0), 26.0);
        assert_eq!(percentile(&data, 80.0), 42.0);
    }

    #[test]
    fn percentile_single_sample() {
        assert_eq!(percentile(&[7.5], 40.0), 7.5);
        assert_eq!(percentile(&[7.5], 80.0), 7.5);
    }

    // ─── State Machine Tests ────────────────────────────────────────────

    #[test]
    fn initial_fec_configuration() {
        let (fbra, fec) = controller();
        assert_eq!(fbra.fec_interval, 8);
        assert!(!fec.borrow().is_enabled());
        assert_eq!(fec.borrow().rate(), 0.125);
    }

    #[test]
    fn steady_delay_moves_stay_to_probe_with_fec() {
        let (mut fbra, fec) = controller();
        feed(&mut fbra, 1, 40, 0.0, 100);
        assert_eq!(fbra.state, FbraState::Probe);
        assert!(fec.borrow().is_enabled());
        // Flat OWD decremented the interval toward its floor.
        assert_eq!(fbra.fec_interval, 7);
    }

    #[test]
    fn losses_in_stay_undershoot_to_down() {
        let (mut fbra, fec) = controller();
        let rate_before = fbra.rate;
        // Seed history, then a lossy report while in STAY.
        fbra.on_pkt_rcvd(
            Timestamp::from_millis(100),
            &rtcp_pkt(40, 0.0, 500.0, Timestamp::from_millis(100)),
        );
        fbra.state = FbraState::Stay;
        fbra.on_pkt_rcvd(
            Timestamp::from_millis(150),
            &rtcp_pkt(40, 0.1, 500.0, Timestamp::from_millis(150)),
        );
        assert_eq!(fbra.state, FbraState::Down);
        assert!(!fbra.enabled);
        assert!(!fec.borrow().is_enabled());
        assert!(fbra.rate <= rate_before * 0.85);
        assert!(fbra.rate >= Rate::from_kbps(MIN_RATE_KBPS));
    }

    #[test]
    fn undershoot_respects_floor() {
        let (mut fbra, _fec) = controller();
        fbra.rate = Rate::from_kbps(52.0);
        fbra.undershoot();
        assert_eq!(fbra.rate, Rate::from_kbps(MIN_RATE_KBPS));
    }

    #[test]
    fn probe_success_ramps_up_by_redundancy() {
        let (mut fbra, fec) = controller();
        feed(&mut fbra, 1, 40, 0.0, 100); // STAY → PROBE
        assert_eq!(fbra.state, FbraState::Probe);
        let rate_before = fbra.rate;
        let fec_rate = fec.borrow().rate();
        feed(&mut fbra, 1, 40, 0.0, 150); // PROBE → UP
        assert_eq!(fbra.state, FbraState::Up);
        assert!(!fec.borrow().is_enabled());
        let expected = rate_before * (1.0 / (1.0 - fec_rate));
        assert_eq!(fbra.rate, expected);
    }

    #[test]
    fn probe_with_inflated_low_corr_widens_interval() {
        let (mut fbra, fec) = controller();
        // Bimodal delay history spreads the percentiles apart.
        fbra.state = FbraState::Probe;
        fbra.owd_history = vec![40.0, 40.0, 40.0, 40.0, 40.0, 40.0, 60.0, 60.0, 60.0, 60.0];
        fbra.owd_ts = vec![Timestamp::from_millis(150); 10];
        // OWD of 50 ms: 1.25× the p40 (above BETA) yet well under the p80
        // thresholds — widen the interval, keep probing.
        fbra.on_pkt_rcvd(
            Timestamp::from_millis(200),
            &rtcp_pkt(50, 0.0, 500.0, Timestamp::from_millis(200)),
        );
        assert_eq!(fbra.state, FbraState::Probe);
        assert_eq!(fbra.fec_interval, 9);
        assert_eq!(fec.borrow().rate(), 1.0 / 9.0);
    }

    #[test]
    fn deactivation_then_bounce_back_from_goodput() {
        let (mut fbra, _fec) = controller();
        // Seed, then force an undershoot via loss in STAY.
        feed(&mut fbra, 1, 40, 0.0, 100);
        fbra.state = FbraState::Stay;
        fbra.on_pkt_rcvd(
            Timestamp::from_millis(150),
            &rtcp_pkt(40, 0.2, 500.0, Timestamp::from_millis(150)),
        );
        assert!(!fbra.enabled);

        // Next loss-free report arms the timer and records goodput.
        fbra.on_pkt_rcvd(
            Timestamp::from_millis(200),
            &rtcp_pkt(40, 0.0, 400.0, Timestamp::from_millis(200)),
        );
        assert_eq!(fbra.goodput_during_undershoot, Rate::from_kbps(400.0));

        // A report past the deactivation period triggers the bounce.
        fbra.on_pkt_rcvd(
            Timestamp::from_millis(260),
            &rtcp_pkt(40, 0.0, 400.0, Timestamp::from_millis(260)),
        );
        fbra.tick(Timestamp::from_millis(261));
        assert!(fbra.enabled);
        assert_eq!(fbra.state, FbraState::Stay);
        assert_eq!(fbra.rate, Rate::from_kbps(400.0) * 0.9);
    }

    #[test]
    fn fec_interval_stays_within_bounds() {
        let (mut fbra, _fec) = controller();
        // Long flat run: interval keeps decrementing but floors at 2.
        let mut start = 100;
        for _ in 0..30 {
            feed(&mut fbra, 2, 40, 0.0, start);
            start += 100;
        }
        assert!(fbra.fec_interval >= MIN_FEC_INTERVAL);
        assert!(fbra.fec_interval <= MAX_FEC_INTERVAL);
    }

    #[test]
    fn records_capture_state_and_percentiles() {
        let (mut fbra, _fec) = controller();
        feed(&mut fbra, 3, 40, 0.0, 100);
        let records = fbra.take_records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].state, "STAY");
        assert!(records.iter().all(|r| r.p40_owd_ms <= r.p80_owd_ms + 1e-9));
    }
}
