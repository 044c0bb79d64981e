//! # Retransmission Managers
//!
//! Two policies over one reorder buffer keyed by sequence number:
//!
//! - **ACK-based**: infers losses from gaps below a cumulative ACK point,
//!   guarded by a Karn/Jacobson RTO estimate.
//! - **NACK-based**: the retransmit queue is fed exclusively by NACK
//!   packets from the peer; an ageing sweep retires entries after one
//!   second.
//!
//! Loss events are returned to the host, which forwards them to the
//! congestion controller.

use std::collections::{BTreeSet, HashMap};

use tracing::trace;

use crate::packet::{Packet, PacketKind};
use crate::time::{Timestamp, TimestampDelta};

// ─── Shared Buffer ──────────────────────────────────────────────────────────

/// Cached image of a sent packet awaiting acknowledgement.
#[derive(Debug)]
pub struct RtxRecord {
    pub num_rtx: u32,
    /// RTO captured when the packet entered the buffer.
    pub rto: TimestampDelta,
    pub pkt: Packet,
}

/// Reorder buffer shared by both retransmit policies. The entry for a
/// sequence number always mirrors the most recently sent image of that
/// packet.
#[derive(Debug, Default)]
pub struct RtxBuffer {
    entries: HashMap<u64, RtxRecord>,
}

impl RtxBuffer {
    /// Record a send: refresh an existing entry (retransmission) or insert
    /// a fresh one with the supplied RTO.
    pub fn on_pkt_sent(&mut self, pkt: &Packet, rto: TimestampDelta) {
        match self.entries.get_mut(&pkt.seq) {
            Some(record) => {
                record.num_rtx += 1;
                record.pkt = pkt.clone();
            }
            None => {
                self.entries.insert(
                    pkt.seq,
                    RtxRecord {
                        num_rtx: 0,
                        rto,
                        pkt: pkt.clone(),
                    },
                );
            }
        }
    }

    pub fn get(&self, seq: u64) -> Option<&RtxRecord> {
        self.entries.get(&seq)
    }

    pub fn remove(&mut self, seq: u64) -> Option<RtxRecord> {
        self.entries.remove(&seq)
    }

    pub fn contains(&self, seq: u64) -> bool {
        self.entries.contains_key(&seq)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(u64, &RtxRecord) -> bool) {
        self.entries.retain(|&seq, record| keep(seq, record));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ─── Manager Contract ───────────────────────────────────────────────────────

pub trait RtxManager {
    fn on_pkt_sent(&mut self, now: Timestamp, pkt: &Packet);

    /// Process a received packet. Returns clones of packets newly inferred
    /// lost, for the host to report to its congestion controller.
    fn on_pkt_rcvd(&mut self, now: Timestamp, pkt: &Packet) -> Vec<Packet>;

    /// Size of the next pending retransmission, zero when idle. Purges
    /// queue entries whose buffer backing has gone away.
    fn next_pkt_size(&mut self) -> usize;

    /// Pop the next retransmission as a fresh copy of the cached image.
    fn next_pkt(&mut self) -> Option<Packet>;

    /// Bytes waiting in the retransmit queue.
    fn queued_bytes(&mut self) -> usize;

    fn tick(&mut self, now: Timestamp);

    fn reset(&mut self);
}

/// Skip caching for feedback and padding: neither is retransmitted.
fn cacheable(pkt: &Packet) -> bool {
    pkt.is_data() && !pkt.is_padding()
}

/// Drop queued sequences whose buffer entry has been acknowledged away.
fn purge_dangling(queue: &mut BTreeSet<u64>, buffer: &RtxBuffer) {
    queue.retain(|&seq| buffer.contains(seq));
}

// ─── ACK-Based Manager ──────────────────────────────────────────────────────

const SRTT_ALPHA: f64 = 1.0 / 8.0;
const RTTVAR_BETA: f64 = 1.0 / 4.0;
const RTO_K: f64 = 4.0;
const INITIAL_RTO: TimestampDelta = TimestampDelta::from_secs(3);
const MIN_RTO: TimestampDelta = TimestampDelta::from_secs(1);
const MAX_RTO: TimestampDelta = TimestampDelta::from_secs(60);

pub struct AckRtxManager {
    buffer: RtxBuffer,
    rtx_queue: BTreeSet<u64>,
    max_ack: Option<u64>,
    srtt: TimestampDelta,
    rttvar: TimestampDelta,
    rto: TimestampDelta,
}

impl AckRtxManager {
    pub fn new() -> Self {
        AckRtxManager {
            buffer: RtxBuffer::default(),
            rtx_queue: BTreeSet::new(),
            max_ack: None,
            srtt: TimestampDelta::ZERO,
            rttvar: TimestampDelta::ZERO,
            rto: INITIAL_RTO,
        }
    }

    pub fn rto(&self) -> TimestampDelta {
        self.rto
    }

    pub fn srtt(&self) -> TimestampDelta {
        self.srtt
    }

    fn update_rto(&mut self, rtt: TimestampDelta) {
        if self.srtt.is_zero() && self.rttvar.is_zero() {
            self.srtt = rtt;
            self.rttvar = rtt * 0.5;
        } else {
            self.srtt = self.srtt * (1.0 - SRTT_ALPHA) + rtt * SRTT_ALPHA;
            let abs_diff = (self.srtt - rtt).abs();
            self.rttvar = self.rttvar * (1.0 - RTTVAR_BETA) + abs_diff * RTTVAR_BETA;
        }
        self.rto = (self.srtt + self.rttvar * RTO_K).clamp(MIN_RTO, MAX_RTO);
    }
}

impl Default for AckRtxManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RtxManager for AckRtxManager {
    fn on_pkt_sent(&mut self, _now: Timestamp, pkt: &Packet) {
        if !cacheable(pkt) {
            return;
        }
        self.buffer.on_pkt_sent(pkt, self.rto);
    }

    fn on_pkt_rcvd(&mut self, now: Timestamp, pkt: &Packet) -> Vec<Packet> {
        let PacketKind::Ack(info) = &pkt.kind else {
            return Vec::new();
        };
        let ack_num = info.ack_seq;
        if self.buffer.remove(ack_num).is_none() {
            // Already acknowledged and evicted earlier.
            return Vec::new();
        }

        // Sequences below the ACK that are still buffered are loss
        // candidates; retransmit each at most once per RTO.
        let mut lost = Vec::new();
        let start = self.max_ack.map(|m| m + 1).unwrap_or(0);
        for seq in start..ack_num {
            let Some(record) = self.buffer.get(seq) else {
                continue;
            };
            let overdue =
                record.num_rtx == 0 || now - record.pkt.ts_sent() > record.rto;
            if overdue && !self.rtx_queue.contains(&seq) {
                trace!(seq, ack_num, "mark for retransmit");
                lost.push(record.pkt.clone());
                self.rtx_queue.insert(seq);
            }
        }

        purge_dangling(&mut self.rtx_queue, &self.buffer);

        if Some(ack_num) == self.max_ack.map(|m| m + 1).or(Some(0)) {
            self.max_ack = Some(ack_num);
        }

        if let Some(rtt) = pkt.ack_rtt() {
            self.update_rto(rtt);
        }
        lost
    }

    fn next_pkt_size(&mut self) -> usize {
        purge_dangling(&mut self.rtx_queue, &self.buffer);
        self.rtx_queue
            .first()
            .and_then(|&seq| self.buffer.get(seq))
            .map(|record| record.pkt.size_byte)
            .unwrap_or(0)
    }

    fn next_pkt(&mut self) -> Option<Packet> {
        let seq = self.rtx_queue.pop_first()?;
        self.buffer.get(seq).map(|record| record.pkt.clone())
    }

    fn queued_bytes(&mut self) -> usize {
        purge_dangling(&mut self.rtx_queue, &self.buffer);
        self.rtx_queue
            .iter()
            .filter_map(|&seq| self.buffer.get(seq))
            .map(|record| record.pkt.size_byte)
            .sum()
    }

    fn tick(&mut self, _now: Timestamp) {}

    fn reset(&mut self) {
        self.buffer.clear();
        self.rtx_queue.clear();
        self.max_ack = None;
        self.srtt = TimestampDelta::ZERO;
        self.rttvar = TimestampDelta::ZERO;
        self.rto = INITIAL_RTO;
    }
}

// ─── NACK-Based Manager ─────────────────────────────────────────────────────

/// Buffer entries older than this are evicted.
const NACK_BUFFER_AGE: TimestampDelta = TimestampDelta::from_secs(1);
/// The ageing sweep runs at most this often.
const NACK_CLEAN_INTERVAL: TimestampDelta = TimestampDelta::from_secs(1);

pub struct NackRtxManager {
    buffer: RtxBuffer,
    rtx_queue: BTreeSet<u64>,
    ts_last_clean: Timestamp,
}

impl NackRtxManager {
    pub fn new() -> Self {
        NackRtxManager {
            buffer: RtxBuffer::default(),
            rtx_queue: BTreeSet::new(),
            ts_last_clean: Timestamp::ZERO,
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for NackRtxManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RtxManager for NackRtxManager {
    fn on_pkt_sent(&mut self, _now: Timestamp, pkt: &Packet) {
        if !cacheable(pkt) {
            return;
        }
        self.buffer.on_pkt_sent(pkt, TimestampDelta::ZERO);
    }

    fn on_pkt_rcvd(&mut self, _now: Timestamp, pkt: &Packet) -> Vec<Packet> {
        if let PacketKind::Nack { seq } = pkt.kind {
            if self.buffer.contains(seq) {
                trace!(seq, "queue retransmit from nack");
                self.rtx_queue.insert(seq);
            }
        }
        Vec::new()
    }

    fn next_pkt_size(&mut self) -> usize {
        purge_dangling(&mut self.rtx_queue, &self.buffer);
        self.rtx_queue
            .first()
            .and_then(|&seq| self.buffer.get(seq))
            .map(|record| record.pkt.size_byte)
            .unwrap_or(0)
    }

    fn next_pkt(&mut self) -> Option<Packet> {
        let seq = self.rtx_queue.pop_first()?;
        self.buffer.get(seq).map(|record| record.pkt.clone())
    }

    fn queued_bytes(&mut self) -> usize {
        purge_dangling(&mut self.rtx_queue, &self.buffer);
        self.rtx_queue
            .iter()
            .filter_map(|&seq| self.buffer.get(seq))
            .map(|record| record.pkt.size_byte)
            .sum()
    }

    fn tick(&mut self, now: Timestamp) {
        if now - self.ts_last_clean < NACK_CLEAN_INTERVAL {
            return;
        }
        self.ts_last_clean = now;
        let queue = &mut self.rtx_queue;
        self.buffer.retain(|seq, record| {
            let keep = now - record.pkt.ts_sent() <= NACK_BUFFER_AGE;
            if !keep {
                queue.remove(&seq);
            }
            keep
        });
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.rtx_queue.clear();
        self.ts_last_clean = Timestamp::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{AckInfo, AppData, MSS};

    fn data_pkt(seq: u64, sent_ms: u64) -> Packet {
        let mut pkt = Packet::data(AppData::plain(MSS));
        pkt.seq = seq;
        pkt.set_ts_sent(Timestamp::from_millis(sent_ms));
        pkt
    }

    fn ack_pkt(ack_seq: u64, data_sent_ms: u64, rcvd_ms: u64) -> Packet {
        let mut ack = Packet::ack(AckInfo {
            ack_seq,
            ts_data_pkt_sent: Timestamp::from_millis(data_sent_ms),
            data_pkt_size: MSS,
            ..Default::default()
        });
        ack.set_ts_rcvd(Timestamp::from_millis(rcvd_ms));
        ack
    }

    // ─── ACK-Based Tests ────────────────────────────────────────────────

    #[test]
    fn gap_below_ack_marks_loss_exactly_once() {
        let mut rtx = AckRtxManager::new();
        let now = Timestamp::from_millis(200);
        for seq in 0..10 {
            rtx.on_pkt_sent(now, &data_pkt(seq, 100));
        }
        // ACKs 0..=2 arrive in order: no gaps.
        for seq in 0..3 {
            let lost = rtx.on_pkt_rcvd(now, &ack_pkt(seq, 100, 180));
            assert!(lost.is_empty());
        }
        // Packet 3 was dropped; the ACK of 4 exposes the gap.
        let lost = rtx.on_pkt_rcvd(now, &ack_pkt(4, 100, 190));
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].seq, 3);
        assert_eq!(rtx.next_pkt_size(), MSS);

        // The next ACK does not re-mark 3 (already queued, not overdue).
        let lost = rtx.on_pkt_rcvd(now, &ack_pkt(5, 100, 195));
        assert!(lost.is_empty());

        let resend = rtx.next_pkt().unwrap();
        assert_eq!(resend.seq, 3);
        assert_eq!(rtx.next_pkt_size(), 0);
    }

    #[test]
    fn retransmitted_entry_waits_for_rto() {
        let mut rtx = AckRtxManager::new();
        rtx.on_pkt_sent(Timestamp::from_millis(100), &data_pkt(3, 100));
        for seq in [4u64, 5] {
            rtx.on_pkt_sent(Timestamp::from_millis(100), &data_pkt(seq, 100));
        }
        let now = Timestamp::from_millis(200);
        let lost = rtx.on_pkt_rcvd(now, &ack_pkt(4, 100, 200));
        assert_eq!(lost.len(), 1);

        // Simulate the retransmission of 3.
        let resend = rtx.next_pkt().unwrap();
        let mut resend_img = resend.clone();
        resend_img.set_ts_sent(Timestamp::from_millis(210));
        rtx.on_pkt_sent(Timestamp::from_millis(210), &resend_img);
        assert_eq!(rtx.buffer.get(3).unwrap().num_rtx, 1);

        // Well within the RTO: ACK of 5 must not re-mark 3.
        let lost = rtx.on_pkt_rcvd(Timestamp::from_millis(220), &ack_pkt(5, 100, 220));
        assert!(lost.is_empty());
    }

    #[test]
    fn ack_of_unknown_seq_is_ignored() {
        let mut rtx = AckRtxManager::new();
        let lost = rtx.on_pkt_rcvd(Timestamp::from_millis(10), &ack_pkt(7, 0, 10));
        assert!(lost.is_empty());
        assert_eq!(rtx.next_pkt_size(), 0);
    }

    #[test]
    fn rto_seeds_then_follows_jacobson() {
        let mut rtx = AckRtxManager::new();
        assert_eq!(rtx.rto(), TimestampDelta::from_secs(3));

        rtx.on_pkt_sent(Timestamp::from_millis(0), &data_pkt(0, 0));
        // First sample 100 ms: srtt = 100 ms, rttvar = 50 ms,
        // rto = clamp(100 + 4·50) = 1 s floor.
        rtx.on_pkt_rcvd(Timestamp::from_millis(100), &ack_pkt(0, 0, 100));
        assert_eq!(rtx.srtt(), TimestampDelta::from_millis(100));
        assert_eq!(rtx.rto(), TimestampDelta::from_secs(1));

        // Second sample 200 ms: srtt = 7/8·100 + 1/8·200 = 112.5 ms.
        rtx.on_pkt_sent(Timestamp::from_millis(150), &data_pkt(1, 150));
        rtx.on_pkt_rcvd(Timestamp::from_millis(350), &ack_pkt(1, 150, 350));
        assert_eq!(rtx.srtt().micros(), 112_500);
        assert!(rtx.rto() >= TimestampDelta::from_secs(1));
        assert!(rtx.rto() <= TimestampDelta::from_secs(60));
        assert!(rtx.rto() >= rtx.srtt());
    }

    #[test]
    fn rto_never_exceeds_bounds() {
        let mut rtx = AckRtxManager::new();
        rtx.on_pkt_sent(Timestamp::from_millis(0), &data_pkt(0, 0));
        // Pathological 10-minute sample still clamps to 60 s.
        rtx.on_pkt_rcvd(Timestamp::from_secs(600), &ack_pkt(0, 0, 600_000));
        assert_eq!(rtx.rto(), TimestampDelta::from_secs(60));
    }

    // ─── NACK-Based Tests ───────────────────────────────────────────────

    #[test]
    fn nack_queues_only_buffered_sequences() {
        let mut rtx = NackRtxManager::new();
        let now = Timestamp::from_millis(100);
        let mut pkt = data_pkt(5, 100);
        pkt.kind = PacketKind::RtpData {
            rtt: TimestampDelta::ZERO,
        };
        rtx.on_pkt_sent(now, &pkt);

        rtx.on_pkt_rcvd(now, &Packet::nack(5));
        rtx.on_pkt_rcvd(now, &Packet::nack(6)); // never sent
        assert_eq!(rtx.next_pkt_size(), MSS);
        assert_eq!(rtx.next_pkt().unwrap().seq, 5);
        assert!(rtx.next_pkt().is_none());
    }

    #[test]
    fn padding_and_control_never_cached() {
        let mut rtx = NackRtxManager::new();
        let now = Timestamp::ZERO;
        let mut padding = data_pkt(1, 0);
        padding.video = Some(crate::packet::VideoPayload {
            padding: true,
            ..Default::default()
        });
        rtx.on_pkt_sent(now, &padding);
        rtx.on_pkt_sent(now, &Packet::nack(9));
        assert_eq!(rtx.buffered(), 0);
    }

    #[test]
    fn ageing_sweep_runs_once_per_second() {
        let mut rtx = NackRtxManager::new();
        rtx.on_pkt_sent(Timestamp::from_millis(100), &data_pkt(0, 100));
        rtx.on_pkt_rcvd(Timestamp::from_millis(150), &Packet::nack(0));

        // Sweep at 1 s: entry only 0.9 s old, kept.
        rtx.tick(Timestamp::from_secs(1));
        assert_eq!(rtx.buffered(), 1);

        // Next sweep due at 2 s; entry is then 1.9 s old and evicted,
        // along with its queue entry.
        rtx.tick(Timestamp::from_millis(1500));
        assert_eq!(rtx.buffered(), 1, "sweep must not rerun within a second");
        rtx.tick(Timestamp::from_secs(2));
        assert_eq!(rtx.buffered(), 0);
        assert_eq!(rtx.next_pkt_size(), 0);
    }
}
