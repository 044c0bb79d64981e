//! # Oracle Controller
//!
//! Reads the tx link's bandwidth trace directly: the target rate over a
//! window is exactly the bits the link will admit in that window. Useful
//! as a ceiling baseline and as the feedback-free receiver-side
//! controller.

use std::cell::RefCell;
use std::rc::Rc;

use crate::cc::CongestionControl;
use crate::link::Link;
use crate::time::{Rate, Timestamp};

pub struct OracleCc {
    link: Rc<RefCell<Link>>,
}

impl OracleCc {
    pub fn new(link: Rc<RefCell<Link>>) -> Self {
        OracleCc { link }
    }
}

impl CongestionControl for OracleCc {
    fn reset(&mut self) {}

    fn est_rate(&mut self, start_ts: Timestamp, end_ts: Timestamp) -> Rate {
        let window = end_ts - start_ts;
        if window.micros() <= 0 {
            return Rate::ZERO;
        }
        let bits = self.link.borrow().avail_bits_to_send(start_ts, end_ts);
        Rate::from_bps((bits as f64 / window.as_secs_f64()).round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimestampDelta;
    use crate::trace::LinkTrace;

    #[test]
    fn oracle_reports_trace_bandwidth() {
        let trace = LinkTrace::from_samples(
            vec![2.0, 2.0, 1.0],
            TimestampDelta::from_secs(1),
            TimestampDelta::ZERO,
            0.0,
            None,
        )
        .unwrap();
        let link = Rc::new(RefCell::new(Link::new(trace, 1)));
        let mut cc = OracleCc::new(link);

        let rate = cc.est_rate(Timestamp::ZERO, Timestamp::from_millis(40));
        assert_eq!(rate.bps(), 2_000_000);

        // Window straddling the 2 → 1 Mbps edge averages the two bins.
        let rate = cc.est_rate(Timestamp::from_millis(1500), Timestamp::from_millis(2500));
        assert_eq!(rate.bps(), 1_500_000);
    }

    #[test]
    fn empty_window_is_zero() {
        let trace = LinkTrace::from_samples(
            vec![2.0],
            TimestampDelta::from_secs(1),
            TimestampDelta::ZERO,
            0.0,
            None,
        )
        .unwrap();
        let link = Rc::new(RefCell::new(Link::new(trace, 1)));
        let mut cc = OracleCc::new(link);
        let t = Timestamp::from_millis(10);
        assert_eq!(cc.est_rate(t, t), Rate::ZERO);
    }
}
