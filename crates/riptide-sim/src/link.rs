//! # Bottleneck Link
//!
//! A bandwidth-trace-backed queue with propagation delay, uniform random
//! loss and a finite byte capacity.
//!
//! Dequeueing is driven by a bit budget derived from the trace: on each
//! tick the link integrates the bandwidth allotted since the head packet
//! was sent (or since the last budget update, whichever is later) and
//! releases head packets whose size fits the accumulated budget. Released
//! packets become deliverable once their send instant plus total delay has
//! passed.
//!
//! Packets refused at ingress — loss draw or full queue — vanish without
//! notification; retransmission is the only recovery mechanism.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use tracing::debug;

use crate::clock::ClockObserver;
use crate::packet::Packet;
use crate::time::Timestamp;
use crate::trace::LinkTrace;

pub struct Link {
    trace: LinkTrace,
    seed: u64,
    rng: StdRng,
    qsize_byte: usize,
    budget_bit: u64,
    last_budget_update: Timestamp,
    queue: VecDeque<Packet>,
    ready: VecDeque<Packet>,
}

impl Link {
    pub fn new(trace: LinkTrace, seed: u64) -> Self {
        Link {
            trace,
            seed,
            rng: StdRng::seed_from_u64(seed),
            qsize_byte: 0,
            budget_bit: 0,
            last_budget_update: Timestamp::ZERO,
            queue: VecDeque::new(),
            ready: VecDeque::new(),
        }
    }

    /// Accept a packet for transmission. Drops silently when the loss draw
    /// fires or the packet would overflow the queue capacity.
    pub fn push(&mut self, mut pkt: Packet) {
        if self.rng.random::<f64>() < self.trace.random_loss_rate() {
            debug!(seq = pkt.seq, "link drop: random loss");
            return;
        }
        if let Some(cap) = self.trace.queue_cap_byte() {
            if self.qsize_byte + pkt.size_byte > cap {
                debug!(seq = pkt.seq, qsize = self.qsize_byte, "link drop: queue full");
                return;
            }
        }
        pkt.add_prop_delay(self.trace.prop_delay());
        self.qsize_byte += pkt.size_byte;
        self.queue.push_back(pkt);
    }

    /// Yield the next packet whose delivery instant has arrived.
    pub fn pull(&mut self, now: Timestamp) -> Option<Packet> {
        let head = self.ready.front()?;
        if head.ts_sent() + head.total_delay() <= now {
            self.ready.pop_front()
        } else {
            None
        }
    }

    /// Bits the trace allots over `[t0, t1)`. Side-effect free.
    pub fn avail_bits_to_send(&self, t0: Timestamp, t1: Timestamp) -> u64 {
        self.trace.bits_between(t0, t1)
    }

    pub fn qsize_byte(&self) -> usize {
        self.qsize_byte
    }

    pub fn qsize_pkts(&self) -> usize {
        self.queue.len()
    }

    pub fn trace(&self) -> &LinkTrace {
        &self.trace
    }

    /// Release head packets that fit the accumulated bit budget.
    fn update_bw_budget(&mut self, now: Timestamp) {
        while let Some(pkt) = self.queue.front() {
            let ts_sent = pkt.ts_sent();
            let prev = ts_sent.max(self.last_budget_update);
            let gained = self.trace.bits_between(prev, now);
            // First view of this head replaces the budget; a head that was
            // already waiting accumulates.
            self.budget_bit = if prev == ts_sent {
                gained
            } else {
                self.budget_bit + gained
            };
            self.last_budget_update = now;

            let pkt_bits = pkt.size_byte as u64 * 8;
            if self.budget_bit < pkt_bits {
                break;
            }
            self.budget_bit -= pkt_bits;
            let mut pkt = self.queue.pop_front().expect("head checked above");
            pkt.add_queue_delay(now - ts_sent);
            self.qsize_byte -= pkt.size_byte;
            self.ready.push_back(pkt);
        }
    }
}

impl ClockObserver for Link {
    fn tick(&mut self, now: Timestamp) {
        self.update_bw_budget(now);
    }

    fn reset(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
        self.qsize_byte = 0;
        self.budget_bit = 0;
        self.last_budget_update = Timestamp::ZERO;
        self.queue.clear();
        self.ready.clear();
    }
}
