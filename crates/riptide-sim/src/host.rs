//! # Host
//!
//! The top-level packet pump at each endpoint: per tick it refreshes the
//! pacing rate from its congestion controller, advances the pacer and
//! application, runs retransmission bookkeeping, drains outgoing packets
//! under the pacing budget, and ingests arrivals from the rx link.
//!
//! Tick order is fixed — rate update, pacer, application, controller,
//! retransmit manager, send, receive — so a packet generated in a tick can
//! leave in that tick, while feedback received in a tick influences the
//! controller only from the next tick on.
//!
//! Role variants (plain / RTP / Salsify) hook packet classification,
//! receive-side state and periodic feedback generation; their state lives
//! in [`crate::rtp_host`] and [`crate::salsify_host`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::app::{AppEvent, Application};
use crate::cc::CongestionControl;
use crate::clock::ClockObserver;
use crate::link::Link;
use crate::pacer::Pacer;
use crate::packet::{Packet, PacketKind};
use crate::rtp_host::RtpEndpoint;
use crate::rtx::RtxManager;
use crate::salsify_host::{burst_grace, SalsifyEndpoint, PACING_MULTIPLIER};
use crate::stats::{Direction, HostSummary, PacketLogRecord};
use crate::time::{Rate, Timestamp};

pub enum HostRole {
    Plain,
    Rtp(RtpEndpoint),
    Salsify(SalsifyEndpoint),
}

pub struct Host {
    id: u32,
    tx_link: Rc<RefCell<Link>>,
    rx_link: Rc<RefCell<Link>>,
    pacer: Pacer,
    cc: Rc<RefCell<dyn CongestionControl>>,
    rtx: Option<Box<dyn RtxManager>>,
    app: Rc<RefCell<dyn Application>>,
    role: HostRole,
    seq: u64,
    /// Host-generated control packets (RTCP, ACK, NACK), drained first.
    ctrl_queue: VecDeque<Packet>,
    ts_pkt_sent: Option<Timestamp>,

    records: Vec<PacketLogRecord>,
    bytes_sent: usize,
    bytes_rcvd: usize,
}

impl Host {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u32,
        tx_link: Rc<RefCell<Link>>,
        rx_link: Rc<RefCell<Link>>,
        pacer: Pacer,
        cc: Rc<RefCell<dyn CongestionControl>>,
        rtx: Option<Box<dyn RtxManager>>,
        app: Rc<RefCell<dyn Application>>,
        role: HostRole,
    ) -> Self {
        Host {
            id,
            tx_link,
            rx_link,
            pacer,
            cc,
            rtx,
            app,
            role,
            seq: 0,
            ctrl_queue: VecDeque::new(),
            ts_pkt_sent: None,
            records: Vec::new(),
            bytes_sent: 0,
            bytes_rcvd: 0,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn pacing_rate(&self) -> Rate {
        self.pacer.pacing_rate()
    }

    pub fn take_records(&mut self) -> Vec<PacketLogRecord> {
        std::mem::take(&mut self.records)
    }

    pub fn summary(&self, now: Timestamp) -> HostSummary {
        let secs = now.as_secs_f64();
        let to_mbps = |bytes: usize| {
            if secs > 0.0 {
                bytes as f64 * 8.0 / secs / 1e6
            } else {
                0.0
            }
        };
        HostSummary {
            host_id: self.id,
            bytes_sent: self.bytes_sent,
            bytes_rcvd: self.bytes_rcvd,
            sending_rate_mbps: to_mbps(self.bytes_sent),
            recving_rate_mbps: to_mbps(self.bytes_rcvd),
        }
    }

    // ─── Rate Coupling ──────────────────────────────────────────────────

    /// Refresh the pacing rate once per pacer update interval, and pass
    /// the rate allocation down to a sending application (pacing minus
    /// the bandwidth reserved for bytes already queued).
    fn update_rate(&mut self, now: Timestamp) {
        let interval = self.pacer.update_interval();
        if !now.is_zero() && now - self.pacer.ts_last_rate_update() < interval {
            return;
        }
        let mut pacing = self.cc.borrow_mut().est_rate(now, now + interval);
        if matches!(self.role, HostRole::Salsify(_)) {
            pacing = pacing * PACING_MULTIPLIER;
        }
        self.pacer.set_pacing_rate(pacing, now);

        let rtx_qbits = self
            .rtx
            .as_mut()
            .map(|rtx| rtx.queued_bytes() * 8)
            .unwrap_or(0);
        let app_qbits = self.app.borrow().queued_bytes() * 8;
        let reserved = Rate::from_bps(
            ((rtx_qbits + app_qbits) as f64 / interval.as_secs_f64()) as u64,
        );
        // A controller that decouples encoding from pacing supplies the
        // base rate; everyone else encodes against the pacing rate.
        let base = self.cc.borrow().encode_rate().unwrap_or(pacing);
        self.app
            .borrow_mut()
            .set_target_bitrate(base.saturating_sub(reserved));
    }

    // ─── Outgoing Path ──────────────────────────────────────────────────

    fn next_pkt_size(&mut self) -> usize {
        if let Some(pkt) = self.ctrl_queue.front() {
            return pkt.size_byte;
        }
        if let Some(rtx) = self.rtx.as_mut() {
            let size = rtx.next_pkt_size();
            if size > 0 {
                return size;
            }
        }
        self.app.borrow().next_pkt_size()
    }

    /// Priority: host control queue, then retransmissions, then fresh
    /// application data (which gets the next sequence number).
    fn next_pkt(&mut self) -> Option<Packet> {
        if let Some(pkt) = self.ctrl_queue.pop_front() {
            return Some(pkt);
        }
        if let Some(rtx) = self.rtx.as_mut() {
            if rtx.next_pkt_size() > 0 {
                return rtx.next_pkt();
            }
        }
        let data = self.app.borrow_mut().next_pkt()?;
        let mut pkt = match &self.role {
            HostRole::Rtp(ep) => Packet::rtp_data(data, ep.sender_rtt()),
            _ => Packet::data(data),
        };
        pkt.seq = self.seq;
        self.seq += 1;
        Some(pkt)
    }

    fn send(&mut self, now: Timestamp) {
        loop {
            let size = self.next_pkt_size();
            if size == 0 || !self.pacer.can_send(size) {
                break;
            }
            let Some(mut pkt) = self.next_pkt() else {
                break;
            };

            if matches!(self.role, HostRole::Salsify(_)) && pkt.is_data() {
                if let Some(prev) = self.ts_pkt_sent {
                    pkt.grace_period = burst_grace(now - prev, self.pacer.pacing_rate());
                }
            }
            pkt.set_ts_sent(now);
            self.ts_pkt_sent = Some(now);

            self.cc.borrow_mut().on_pkt_sent(now, &pkt);
            if let Some(rtx) = self.rtx.as_mut() {
                rtx.on_pkt_sent(now, &pkt);
            }
            self.log_pkt(Direction::Sent, &pkt, now);
            self.bytes_sent += pkt.size_byte;
            self.tx_link.borrow_mut().push(pkt);
            self.pacer.on_pkt_sent(size);
        }
    }

    // ─── Incoming Path ──────────────────────────────────────────────────

    fn receive(&mut self, now: Timestamp) {
        loop {
            let pkt = self.rx_link.borrow_mut().pull(now);
            let Some(mut pkt) = pkt else {
                break;
            };
            pkt.set_ts_rcvd(now);
            self.log_pkt(Direction::Rcvd, &pkt, now);
            self.bytes_rcvd += pkt.size_byte;

            self.cc.borrow_mut().on_pkt_rcvd(now, &pkt);
            if let Some(rtx) = self.rtx.as_mut() {
                for lost in rtx.on_pkt_rcvd(now, &pkt) {
                    self.cc.borrow_mut().on_pkt_lost(now, &lost);
                }
            }

            match &mut self.role {
                HostRole::Plain => {}
                HostRole::Rtp(ep) => ep.on_pkt_rcvd(&pkt),
                HostRole::Salsify(ep) => {
                    if pkt.is_data() {
                        let last_decoded = self.app.borrow().last_decoded_frame();
                        let ack = ep.on_data_rcvd(&pkt, last_decoded);
                        self.ctrl_queue.push_back(ack);
                    }
                }
            }

            if pkt.is_data() {
                self.app.borrow_mut().deliver_pkt(pkt);
            }
        }
    }

    // ─── Event and Feedback Plumbing ────────────────────────────────────

    fn handle_app_events(&mut self, now: Timestamp) {
        let events = self.app.borrow_mut().drain_events();
        for event in events {
            let AppEvent::FrameDecoded {
                max_pkt_seq,
                timing,
                prev_timing,
                ..
            } = event;
            if let HostRole::Rtp(ep) = &mut self.role {
                ep.on_frame_decoded(max_pkt_seq);
            }
            // Without the previous frame's timing (bursty loss) the
            // gradient sample is skipped rather than fabricated.
            if let Some(prev) = prev_timing {
                self.cc.borrow_mut().on_frame_rcvd(now, timing, prev);
            }
        }
    }

    fn role_periodic(&mut self, now: Timestamp) {
        let HostRole::Rtp(ep) = &mut self.role else {
            return;
        };
        let remb = self.cc.borrow().remote_estimate();
        let last_decoded = self.app.borrow().last_decoded_frame();
        let pkts = ep.periodic(now, remb, last_decoded);
        self.ctrl_queue.extend(pkts);
    }

    fn log_pkt(&mut self, direction: Direction, pkt: &Packet, now: Timestamp) {
        let (seq, ack, owd, rtt) = match (&pkt.kind, direction) {
            (PacketKind::Ack(info), Direction::Rcvd) => (
                None,
                Some(info.ack_seq),
                Some(pkt.total_delay().millis()),
                pkt.ack_rtt().map(|r| r.millis()),
            ),
            (_, Direction::Rcvd) => (Some(pkt.seq), None, Some(pkt.total_delay().millis()), None),
            (_, Direction::Sent) => (Some(pkt.seq), None, None, None),
        };
        self.records.push(PacketLogRecord {
            timestamp_us: now.micros(),
            direction,
            seq,
            ack,
            pkt_size_byte: pkt.size_byte,
            one_way_delay_ms: owd,
            rtt_ms: rtt,
            tx_link_qsize_byte: self.tx_link.borrow().qsize_byte(),
            rx_link_qsize_byte: self.rx_link.borrow().qsize_byte(),
        });
    }
}

impl ClockObserver for Host {
    fn tick(&mut self, now: Timestamp) {
        self.update_rate(now);
        self.pacer.tick(now);
        self.app.borrow_mut().tick(now);
        self.handle_app_events(now);
        self.cc.borrow_mut().tick(now);
        if let Some(rtx) = self.rtx.as_mut() {
            rtx.tick(now);
        }
        self.send(now);
        self.receive(now);
        // Feedback generated from this tick's arrivals departs next tick.
        self.role_periodic(now);
    }

    fn reset(&mut self) {
        if let Some(rtx) = self.rtx.as_mut() {
            rtx.reset();
        }
        self.cc.borrow_mut().reset();
        self.pacer.reset();
        self.app.borrow_mut().reset();
        match &mut self.role {
            HostRole::Plain => {}
            HostRole::Rtp(ep) => ep.reset(),
            HostRole::Salsify(ep) => ep.reset(),
        }
        self.seq = 0;
        self.ctrl_queue.clear();
        self.ts_pkt_sent = None;
        self.records.clear();
        self.bytes_sent = 0;
        self.bytes_rcvd = 0;
        self.update_rate(Timestamp::ZERO);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{FileReceiver, FileSender};
    use crate::cc::oracle::OracleCc;
    use crate::clock::SimClock;
    use crate::packet::MSS;
    use crate::time::TimestampDelta;
    use crate::trace::LinkTrace;

    fn link(mbps: f64, prop_ms: i64) -> Rc<RefCell<Link>> {
        let trace = LinkTrace::from_samples(
            vec![mbps; 64],
            TimestampDelta::from_secs(1),
            TimestampDelta::from_millis(prop_ms),
            0.0,
            None,
        )
        .unwrap();
        Rc::new(RefCell::new(Link::new(trace, 42)))
    }

    /// A file-transfer pair over symmetric 2 Mbps links with the oracle
    /// controller on both sides.
    fn file_pair() -> (SimClock, Rc<RefCell<Host>>, Rc<RefCell<Host>>, Rc<RefCell<FileReceiver>>) {
        let forward = link(2.0, 50);
        let backward = link(2.0, 50);
        let rx_app = Rc::new(RefCell::new(FileReceiver::default()));

        let sender = Rc::new(RefCell::new(Host::new(
            0,
            forward.clone(),
            backward.clone(),
            Pacer::new(MSS * 10, 40),
            Rc::new(RefCell::new(OracleCc::new(forward.clone()))),
            None,
            Rc::new(RefCell::new(FileSender)),
            HostRole::Plain,
        )));
        let receiver = Rc::new(RefCell::new(Host::new(
            1,
            backward.clone(),
            forward.clone(),
            Pacer::new(MSS * 10, 1),
            Rc::new(RefCell::new(OracleCc::new(backward.clone()))),
            None,
            rx_app.clone(),
            HostRole::Plain,
        )));

        let mut clock = SimClock::with_default_resolution();
        clock.register(forward);
        clock.register(backward);
        clock.register(sender.clone());
        clock.register(receiver.clone());
        (clock, sender, receiver, rx_app)
    }

    #[test]
    fn file_transfer_tracks_link_capacity() {
        let (mut clock, sender, _receiver, rx_app) = file_pair();
        clock.elapse(5);

        // 2 Mbps for 5 s = 1.25 MB end to end; allow pacing slack.
        let delivered = rx_app.borrow().bytes_rcvd();
        assert!(delivered > 1_000_000, "delivered {delivered}");
        assert!(delivered <= 1_250_000 + MSS);

        let summary = sender.borrow().summary(clock.now());
        assert!(summary.sending_rate_mbps <= 2.2);
        assert!(summary.sending_rate_mbps > 1.6);
    }

    #[test]
    fn sequence_numbers_strictly_increase() {
        let (mut clock, sender, _receiver, _rx_app) = file_pair();
        clock.elapse(2);
        let records = sender.borrow_mut().take_records();
        let seqs: Vec<u64> = records
            .iter()
            .filter(|r| r.direction == Direction::Sent)
            .filter_map(|r| r.seq)
            .collect();
        assert!(!seqs.is_empty());
        assert!(seqs.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn received_delay_respects_propagation_floor() {
        let (mut clock, _sender, receiver, _rx_app) = file_pair();
        clock.elapse(2);
        let records = receiver.borrow_mut().take_records();
        let delays: Vec<i64> = records
            .iter()
            .filter(|r| r.direction == Direction::Rcvd)
            .filter_map(|r| r.one_way_delay_ms)
            .collect();
        assert!(!delays.is_empty());
        assert!(delays.iter().all(|&d| d >= 50));
    }

    #[test]
    fn reset_replays_identically() {
        let (mut clock, sender, _receiver, _rx_app) = file_pair();
        clock.elapse(2);
        let first: Vec<String> = sender
            .borrow_mut()
            .take_records()
            .iter()
            .map(|r| format!("{:?}", r))
            .collect();

        clock.reset();
        clock.elapse(2);
        let second: Vec<String> = sender
            .borrow_mut()
            .take_records()
            .iter()
            .map(|r| format!("{:?}", r))
            .collect();
        assert_eq!(first, second);
    }
}
