//! # Bandwidth Trace
//!
//! An ordered sequence of `(time, bandwidth)` samples with a fixed step,
//! plus the link scalars: propagation delay, random loss probability and
//! queue capacity. The time axis is cyclic — when the simulation outruns
//! the trace, integration wraps modulo the trace length.
//!
//! ## CSV format
//!
//! Header plus rows `time_ms, bandwidth_mbps, prop_delay_ms,
//! random_loss_rate, queue_cap_byte, t_s`. Rows after the first may leave
//! scalar columns empty to inherit the previous value. The sixth column is
//! parsed and retained but currently unused.

use thiserror::Error;

use crate::time::{Timestamp, TimestampDelta};

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("trace has no sample rows")]
    Empty,
    #[error("trace needs at least two samples to define a step")]
    SingleSample,
    #[error("line {line}: bad field `{field}`: {value}")]
    BadField {
        line: usize,
        field: &'static str,
        value: String,
    },
    #[error("line {line}: non-uniform sample step")]
    NonUniformStep { line: usize },
}

/// A bandwidth-trace-backed link description.
#[derive(Debug, Clone)]
pub struct LinkTrace {
    /// Sample instants, uniform step, starting at `ts[0]`.
    ts: Vec<Timestamp>,
    /// Bandwidth per sample, Mbps (equivalently: bits per microsecond).
    bw_mbps: Vec<f64>,
    step: TimestampDelta,
    prop_delay: TimestampDelta,
    random_loss_rate: f64,
    queue_cap_byte: Option<usize>,
    /// Reserved column from the trace format; parsed, never acted on.
    t_s: Option<f64>,
}

impl LinkTrace {
    /// Build a trace from uniform samples (used by tests and scenario code).
    pub fn from_samples(
        bw_mbps: Vec<f64>,
        step: TimestampDelta,
        prop_delay: TimestampDelta,
        random_loss_rate: f64,
        queue_cap_byte: Option<usize>,
    ) -> Result<Self, TraceError> {
        if bw_mbps.is_empty() {
            return Err(TraceError::Empty);
        }
        let ts = (0..bw_mbps.len() as i64)
            .map(|i| Timestamp::ZERO + step * i)
            .collect();
        Ok(LinkTrace {
            ts,
            bw_mbps,
            step,
            prop_delay,
            random_loss_rate,
            queue_cap_byte,
            t_s: None,
        })
    }

    /// Parse the CSV trace format. The first line is a header.
    pub fn parse(text: &str) -> Result<Self, TraceError> {
        let mut ts = Vec::new();
        let mut bw_mbps = Vec::new();
        let mut prop_delay = TimestampDelta::ZERO;
        let mut random_loss_rate = 0.0;
        let mut queue_cap_byte = None;
        let mut t_s = None;

        for (idx, line) in text.lines().enumerate() {
            if idx == 0 || line.trim().is_empty() {
                continue;
            }
            let line_no = idx + 1;
            let mut cols = line.split(',').map(str::trim);

            let time_ms: u64 = parse_col(cols.next(), line_no, "time_ms")?
                .ok_or_else(|| TraceError::BadField {
                    line: line_no,
                    field: "time_ms",
                    value: String::new(),
                })?;
            let bw: f64 = parse_col(cols.next(), line_no, "bandwidth_mbps")?
                .ok_or_else(|| TraceError::BadField {
                    line: line_no,
                    field: "bandwidth_mbps",
                    value: String::new(),
                })?;
            ts.push(Timestamp::from_millis(time_ms));
            bw_mbps.push(bw);

            // Scalar columns inherit when left empty.
            if let Some(ms) = parse_col::<i64>(cols.next(), line_no, "prop_delay_ms")? {
                prop_delay = TimestampDelta::from_millis(ms);
            }
            if let Some(loss) = parse_col::<f64>(cols.next(), line_no, "random_loss_rate")? {
                random_loss_rate = loss;
            }
            if let Some(cap) = parse_col::<usize>(cols.next(), line_no, "queue_cap_byte")? {
                queue_cap_byte = Some(cap);
            }
            if let Some(v) = parse_col::<f64>(cols.next(), line_no, "t_s")? {
                t_s = Some(v);
            }
        }

        if ts.is_empty() {
            return Err(TraceError::Empty);
        }
        if ts.len() < 2 {
            return Err(TraceError::SingleSample);
        }
        let step = ts[1] - ts[0];
        for (i, pair) in ts.windows(2).enumerate() {
            if pair[1] - pair[0] != step {
                return Err(TraceError::NonUniformStep { line: i + 3 });
            }
        }

        Ok(LinkTrace {
            ts,
            bw_mbps,
            step,
            prop_delay,
            random_loss_rate,
            queue_cap_byte,
            t_s,
        })
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn prop_delay(&self) -> TimestampDelta {
        self.prop_delay
    }

    pub fn random_loss_rate(&self) -> f64 {
        self.random_loss_rate
    }

    pub fn queue_cap_byte(&self) -> Option<usize> {
        self.queue_cap_byte
    }

    pub fn step(&self) -> TimestampDelta {
        self.step
    }

    pub fn len(&self) -> usize {
        self.bw_mbps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bw_mbps.is_empty()
    }

    pub fn t_s(&self) -> Option<f64> {
        self.t_s
    }

    pub fn avg_bw_mbps(&self) -> f64 {
        if self.bw_mbps.is_empty() {
            return 0.0;
        }
        self.bw_mbps.iter().sum::<f64>() / self.bw_mbps.len() as f64
    }

    // ─── Integration ────────────────────────────────────────────────────

    /// Bits the trace allots over `[t0, t1)`, wrapping cyclically.
    ///
    /// Walks the bins intersecting the interval: full bins contribute
    /// `bw · step`, and the bandwidth-weighted prefix/suffix fragments
    /// outside the interval are subtracted. 1 Mbps integrates to exactly
    /// one bit per microsecond.
    pub fn bits_between(&self, t0: Timestamp, t1: Timestamp) -> u64 {
        if t1 <= t0 {
            return 0;
        }
        let base = self.ts[0].micros() as i64;
        let step = self.step.micros();
        let n = self.bw_mbps.len() as i64;

        let u0 = t0.micros() as i64 - base;
        let u1 = t1.micros() as i64 - base;
        let start = u0.div_euclid(step);
        let end = u1.div_euclid(step);

        let bw_at = |bin: i64| self.bw_mbps[bin.rem_euclid(n) as usize];

        let bits = if start == end {
            bw_at(start) * (u1 - u0) as f64
        } else {
            let mut sum = 0.0;
            for bin in start..=end {
                sum += bw_at(bin) * step as f64;
            }
            sum -= bw_at(start) * (u0 - start * step) as f64;
            sum -= bw_at(end) * ((end + 1) * step - u1) as f64;
            sum
        };
        bits.max(0.0) as u64
    }
}

fn parse_col<T: std::str::FromStr>(
    col: Option<&str>,
    line: usize,
    field: &'static str,
) -> Result<Option<T>, TraceError> {
    match col {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|_| TraceError::BadField {
            line,
            field,
            value: raw.to_string(),
        }),
    }
}
