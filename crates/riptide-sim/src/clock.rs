//! # Tick-Driven Clock
//!
//! Fixed-resolution dispatcher that advances every registered observer in
//! lockstep. One `SimClock` is constructed per simulation and passed
//! explicitly — there is no process-wide instance.
//!
//! Observers run in registration order; components whose outputs feed
//! others (links before hosts) must be registered first. Each observer is
//! invoked with the current instant, then the clock advances by one
//! resolution step.

use std::cell::RefCell;
use std::rc::Rc;

use crate::time::{Timestamp, TimestampDelta};

/// Default tick resolution: 1 ms.
pub const DEFAULT_RESOLUTION_US: i64 = 1000;

/// A component driven by the simulation clock.
pub trait ClockObserver {
    /// Advance one tick. `now` is the instant this tick runs at.
    fn tick(&mut self, now: Timestamp);

    /// Clear transient state, preserving configuration.
    fn reset(&mut self);
}

/// Shared handle to a clock observer.
pub type ObserverHandle = Rc<RefCell<dyn ClockObserver>>;

/// The simulation clock.
pub struct SimClock {
    now: Timestamp,
    resolution: TimestampDelta,
    observers: Vec<ObserverHandle>,
}

impl SimClock {
    pub fn new(resolution: TimestampDelta) -> Self {
        assert!(resolution.micros() > 0, "clock resolution must be positive");
        SimClock {
            now: Timestamp::ZERO,
            resolution,
            observers: Vec::new(),
        }
    }

    pub fn with_default_resolution() -> Self {
        Self::new(TimestampDelta::from_micros(DEFAULT_RESOLUTION_US))
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn resolution(&self) -> TimestampDelta {
        self.resolution
    }

    /// Register an observer. Order is stable and significant.
    pub fn register(&mut self, observer: ObserverHandle) {
        self.observers.push(observer);
    }

    /// Run one tick: invoke every observer at the current instant, then
    /// advance simulated time by the resolution.
    pub fn tick(&mut self) {
        let now = self.now;
        for obs in &self.observers {
            obs.borrow_mut().tick(now);
        }
        self.now = now + self.resolution;
    }

    /// Loop ticks for `secs` seconds of simulated time.
    pub fn elapse(&mut self, secs: u64) {
        let ticks = (secs as i64 * 1_000_000) / self.resolution.micros();
        for _ in 0..ticks {
            self.tick();
        }
    }

    /// Reset every observer, then return the clock to zero.
    pub fn reset(&mut self) {
        for obs in &self.observers {
            obs.borrow_mut().reset();
        }
        self.now = Timestamp::ZERO;
    }
}
