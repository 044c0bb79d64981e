//! # Pacer
//!
//! Token bucket in bits with a configurable ceiling, refreshed by the
//! clock. The host recomputes the pacing rate at the pacer's configured
//! update step; the last-rate-update instant recorded here is what
//! throttles that recomputation.

use crate::packet::MSS;
use crate::time::{Rate, Timestamp, TimestampDelta};

pub struct Pacer {
    max_budget_bit: u64,
    budget_bit: u64,
    update_step: TimestampDelta,
    ts_last_rate_update: Timestamp,
    ts_last_budget_update: Timestamp,
    pacing_rate: Rate,
}

impl Pacer {
    pub fn new(max_budget_byte: usize, update_step_ms: i64) -> Self {
        Pacer {
            max_budget_bit: max_budget_byte as u64 * 8,
            budget_bit: MSS as u64 * 8,
            update_step: TimestampDelta::from_millis(update_step_ms),
            ts_last_rate_update: Timestamp::ZERO,
            ts_last_budget_update: Timestamp::ZERO,
            pacing_rate: Rate::ZERO,
        }
    }

    pub fn tick(&mut self, now: Timestamp) {
        let elapsed = now - self.ts_last_budget_update;
        let gained = self.pacing_rate.bits_over(elapsed);
        self.budget_bit = (self.budget_bit + gained).min(self.max_budget_bit);
        self.ts_last_budget_update = now;
    }

    pub fn reset(&mut self) {
        self.budget_bit = MSS as u64 * 8;
        self.ts_last_budget_update = Timestamp::ZERO;
        self.ts_last_rate_update = Timestamp::ZERO;
        self.pacing_rate = Rate::ZERO;
    }

    /// A send is permitted iff the packet fits the budget and the pacing
    /// rate is nonzero.
    pub fn can_send(&self, pkt_size_byte: usize) -> bool {
        pkt_size_byte as u64 * 8 <= self.budget_bit && !self.pacing_rate.is_zero()
    }

    /// Consume budget for a sent packet. Callers gate on [`Pacer::can_send`].
    pub fn on_pkt_sent(&mut self, pkt_size_byte: usize) {
        debug_assert!(self.can_send(pkt_size_byte));
        self.budget_bit = self.budget_bit.saturating_sub(pkt_size_byte as u64 * 8);
    }

    pub fn set_pacing_rate(&mut self, rate: Rate, now: Timestamp) {
        self.pacing_rate = rate;
        self.ts_last_rate_update = now;
    }

    pub fn pacing_rate(&self) -> Rate {
        self.pacing_rate
    }

    pub fn ts_last_rate_update(&self) -> Timestamp {
        self.ts_last_rate_update
    }

    pub fn update_interval(&self) -> TimestampDelta {
        self.update_step
    }

    pub fn budget_bit(&self) -> u64 {
        self.budget_bit
    }
}
