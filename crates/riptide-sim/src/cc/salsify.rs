//! # Rate-Matching Controller
//!
//! Matches the sending rate to the receiver-observed packet drain rate:
//! every ACK carries the smoothed inter-arrival time `τ`, and the target
//! rate is `MSS / τ`. A separate encoder rate budgets each frame by how
//! many packets fit the end-to-end delay cap after subtracting packets
//! already in flight, letting the sender decouple pacing from encoding.

use tracing::trace;

use crate::cc::CongestionControl;
use crate::packet::{Packet, PacketKind, MSS};
use crate::stats::SalsifyRecord;
use crate::time::{Rate, Timestamp, TimestampDelta};

const START_RATE_BPS: u64 = 100_000;
const TARGET_E2E_DELAY_CAP: TimestampDelta = TimestampDelta::from_millis(100);
const MIN_ENCODE_RATE_KBPS: f64 = 50.0;
const MAX_ENCODE_RATE_KBPS: f64 = 24_000.0;

pub struct SalsifyCc {
    rate: Rate,
    encode_rate: Rate,
    num_pkt_inflight: i64,
    fps: u64,
    records: Vec<SalsifyRecord>,
}

impl SalsifyCc {
    pub fn new(fps: u64) -> Self {
        SalsifyCc {
            rate: Rate::from_bps(START_RATE_BPS),
            encode_rate: Rate::from_bps(START_RATE_BPS),
            num_pkt_inflight: 0,
            fps,
            records: Vec::new(),
        }
    }

    pub fn num_pkt_inflight(&self) -> i64 {
        self.num_pkt_inflight
    }

    pub fn take_records(&mut self) -> Vec<SalsifyRecord> {
        std::mem::take(&mut self.records)
    }
}

impl CongestionControl for SalsifyCc {
    fn reset(&mut self) {
        self.rate = Rate::from_bps(START_RATE_BPS);
        self.encode_rate = Rate::from_bps(START_RATE_BPS);
        self.num_pkt_inflight = 0;
        self.records.clear();
    }

    fn on_pkt_sent(&mut self, _now: Timestamp, _pkt: &Packet) {
        self.num_pkt_inflight += 1;
    }

    fn on_pkt_lost(&mut self, _now: Timestamp, _pkt: &Packet) {
        self.num_pkt_inflight = (self.num_pkt_inflight - 1).max(0);
    }

    fn on_pkt_rcvd(&mut self, now: Timestamp, pkt: &Packet) {
        let PacketKind::Ack(info) = &pkt.kind else {
            return;
        };
        self.num_pkt_inflight = (self.num_pkt_inflight - 1).max(0);

        if info.mean_interarrival < TimestampDelta::ZERO {
            return;
        }
        let tau = info.mean_interarrival.max(TimestampDelta::from_micros(1));

        let incoming_rate = Rate::from_bytes_per_sec(MSS as f64 / tau.as_secs_f64());

        // Packets that fit the delay cap, less those already in flight,
        // bound the next frame's size.
        let pkt_budget = (TARGET_E2E_DELAY_CAP.micros() as f64 / tau.micros() as f64
            - self.num_pkt_inflight as f64)
            .max(0.0);
        let max_frame_size_byte = MSS as f64 * pkt_budget;

        self.rate = incoming_rate;
        self.encode_rate = Rate::from_bytes_per_sec(max_frame_size_byte * self.fps as f64)
            .clamp(
                Rate::from_kbps(MIN_ENCODE_RATE_KBPS),
                Rate::from_kbps(MAX_ENCODE_RATE_KBPS),
            );

        trace!(
            inflight = self.num_pkt_inflight,
            tau_us = tau.micros(),
            incoming_bps = incoming_rate.bps(),
            encode_bps = self.encode_rate.bps(),
            "ack"
        );
        self.records.push(SalsifyRecord {
            timestamp_us: now.micros(),
            num_pkt_inflight: self.num_pkt_inflight,
            mean_interarrival_us: tau.micros(),
            incoming_rate_bps: incoming_rate.bps(),
            encode_rate_bps: self.encode_rate.bps(),
        });
    }

    fn est_rate(&mut self, _start_ts: Timestamp, _end_ts: Timestamp) -> Rate {
        self.rate
    }

    fn encode_rate(&self) -> Option<Rate> {
        Some(self.encode_rate)
    }
}
