//! # End-to-end scenarios
//!
//! Full simulator runs over programmatically built traces and codec
//! tables: one scenario per congestion-control strategy plus the
//! cross-cutting invariants (deterministic replay, monotone sequence
//! numbers, propagation floor, queue cap, in-order decode).

use std::rc::Rc;

use riptide_sim::codec::{CodecStats, LookupTable};
use riptide_sim::sim::{CcKind, SimConfig, Simulation};
use riptide_sim::stats::Direction;
use riptide_sim::time::TimestampDelta;
use riptide_sim::trace::LinkTrace;

// ─── Helpers ────────────────────────────────────────────────────────────────

/// A codec table with one frame row: models sized 500..10_000 bytes in
/// 500-byte steps, quality defined for every loss bin.
fn table() -> Rc<LookupTable> {
    let cells = (0u32..20)
        .flat_map(|m| {
            let size = 500 * (m as usize + 1);
            (0..10).map(move |tenth| {
                (
                    m,
                    tenth as f64 / 10.0,
                    CodecStats {
                        size_byte: size,
                        psnr: 30.0 + m as f64 - tenth as f64,
                        ssim: 0.90 + 0.004 * m as f64 - 0.01 * tenth as f64,
                    },
                )
            })
        })
        .collect();
    LookupTable::from_cells(vec![cells]).unwrap()
}

fn constant_trace(mbps: f64, secs: usize, prop_ms: i64, loss: f64, cap: Option<usize>) -> LinkTrace {
    LinkTrace::from_samples(
        vec![mbps; secs],
        TimestampDelta::from_secs(1),
        TimestampDelta::from_millis(prop_ms),
        loss,
        cap,
    )
    .unwrap()
}

fn run(cc: CcKind, trace: LinkTrace, secs: u64) -> Simulation {
    let config = SimConfig::new(cc, trace, table());
    let mut sim = Simulation::build(config).unwrap();
    sim.run(secs);
    sim
}

// ─── Oracle: constant 2 Mbps, 50 ms propagation, no loss ────────────────────

#[test]
fn oracle_tracks_constant_link() {
    let sim = run(
        CcKind::Oracle,
        constant_trace(2.0, 32, 50, 0.0, None),
        30,
    );

    let summaries = sim.summaries();
    assert!(
        (1.7..=2.1).contains(&summaries[0].sending_rate_mbps),
        "sender rate {} Mbps",
        summaries[0].sending_rate_mbps
    );

    let frames = sim.video_recv_log();
    // 25 fps for 30 s, minus the in-order gating tail.
    assert!(frames.len() >= 740, "decoded {} frames", frames.len());
    assert!(frames.iter().all(|f| f.frame_loss_rate == 0.0));

    for frame in &frames {
        let delay_ms = (frame.frame_decode_ts_us - frame.frame_encode_ts_us) / 1000;
        assert!(delay_ms >= 50, "frame {} delay {delay_ms} ms", frame.frame_id);
        assert!(delay_ms <= 200, "frame {} delay {delay_ms} ms", frame.frame_id);
    }
}

// ─── Hybrid: step trace 1 → 0.5 Mbps at t = 15 s ───────────────────────────

#[test]
fn gcc_adapts_to_bandwidth_step() {
    let mut bw = vec![1.0; 15];
    bw.extend(vec![0.5; 17]);
    let trace = LinkTrace::from_samples(
        bw,
        TimestampDelta::from_secs(1),
        TimestampDelta::from_millis(25),
        0.0,
        Some(30_000),
    )
    .unwrap();
    let sim = run(CcKind::Gcc, trace, 30);

    let (sender_log, receiver_log) = sim.gcc_logs().unwrap();

    // The receiver-side delay estimator reacts to the step with a DEC.
    let dec_after_step = receiver_log.iter().any(|r| {
        r.timestamp_us >= 15_000_000
            && r.timestamp_us <= 17_000_000
            && r.remote_rate_control_state == "DEC"
    });
    assert!(dec_after_step, "no DEC within 2 s of the step");

    // Queue overflow losses trip the multiplicative decrease at least once.
    assert!(sender_log.iter().any(|r| r.loss_fraction > 0.1));

    // The sender rate settles around the post-step capacity.
    let tail: Vec<u64> = sender_log
        .iter()
        .filter(|r| r.timestamp_us >= 20_000_000)
        .map(|r| r.rate_bps)
        .collect();
    assert!(!tail.is_empty());
    let avg = tail.iter().sum::<u64>() / tail.len() as u64;
    assert!(
        (250_000..=750_000).contains(&avg),
        "tail average {avg} bps"
    );
}

// ─── Rate-matching: bursty trace, per-packet ACKs ──────────────────────────

#[test]
fn salsify_encode_rate_stays_clamped() {
    let mut bw = Vec::new();
    for _ in 0..8 {
        bw.push(2.0);
        bw.push(0.5);
    }
    let trace = LinkTrace::from_samples(
        bw,
        TimestampDelta::from_secs(1),
        TimestampDelta::from_millis(40),
        0.0,
        Some(60_000),
    )
    .unwrap();
    let sim = run(CcKind::Salsify, trace, 15);

    let records = sim.salsify_log().unwrap();
    assert!(!records.is_empty());
    for r in &records {
        assert!(r.num_pkt_inflight >= 0);
        assert!(r.mean_interarrival_us >= 1);
        assert!(
            (50_000..=24_000_000).contains(&r.encode_rate_bps),
            "encode rate {} bps",
            r.encode_rate_bps
        );
    }

    // The stream stays alive through the bursts.
    let frames = sim.video_recv_log();
    assert!(frames.len() > 50, "decoded {} frames", frames.len());
}

// ─── Threshold/FEC: periodic capacity dips force loss bursts ───────────────

#[test]
fn fbra_cycles_states_and_bounds_fec_interval() {
    let mut bw = Vec::new();
    for _ in 0..8 {
        bw.extend([1.0, 1.0, 1.0, 0.4]);
    }
    let trace = LinkTrace::from_samples(
        bw,
        TimestampDelta::from_secs(1),
        TimestampDelta::from_millis(25),
        0.0,
        Some(30_000),
    )
    .unwrap();
    let sim = run(CcKind::Fbra, trace, 30);

    let records = sim.fbra_log().unwrap();
    assert!(records.len() > 100, "{} fbra records", records.len());

    let visited = |state: &str| records.iter().any(|r| r.state == state);
    assert!(visited("STAY"));
    assert!(visited("PROBE"));
    assert!(visited("DOWN"));

    for r in &records {
        assert!((2..=14).contains(&r.fec_interval), "interval {}", r.fec_interval);
        assert!(r.rate_bps >= 50_000, "rate {} bps", r.rate_bps);
        // FEC is never left enabled while holding in DOWN.
        if r.state == "DOWN" {
            assert!(!r.fec_enabled);
        }
    }
}

// ─── NACK retransmission over a uniformly lossy link ───────────────────────

#[test]
fn nack_recovery_keeps_median_frame_loss_at_zero() {
    let sim = run(
        CcKind::Gcc,
        constant_trace(1.0, 32, 25, 0.01, None),
        15,
    );

    let frames = sim.video_recv_log();
    assert!(frames.len() > 300, "decoded {} frames", frames.len());

    let mut losses: Vec<f64> = frames.iter().map(|f| f.frame_loss_rate).collect();
    losses.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let p50 = losses[losses.len() / 2];
    assert!(p50 <= 0.005, "median frame loss {p50}");
}

// ─── Cross-cutting invariants ──────────────────────────────────────────────

#[test]
fn replay_is_byte_identical() {
    let build = || {
        run(
            CcKind::Gcc,
            constant_trace(1.0, 16, 25, 0.02, Some(30_000)),
            10,
        )
    };
    let log_a = build()
        .sender_pkt_log()
        .iter()
        .map(|r| serde_json::to_string(r).unwrap())
        .collect::<Vec<_>>();
    let log_b = build()
        .sender_pkt_log()
        .iter()
        .map(|r| serde_json::to_string(r).unwrap())
        .collect::<Vec<_>>();
    assert!(!log_a.is_empty());
    assert_eq!(log_a, log_b);
}

#[test]
fn original_sends_use_monotonic_sequences() {
    let sim = run(CcKind::Oracle, constant_trace(2.0, 16, 50, 0.0, None), 5);
    let records = sim.sender_pkt_log();
    let seqs: Vec<u64> = records
        .iter()
        .filter(|r| r.direction == Direction::Sent)
        .filter_map(|r| r.seq)
        .collect();
    assert!(!seqs.is_empty());
    assert!(
        seqs.windows(2).all(|w| w[1] > w[0]),
        "sequence numbers must strictly increase"
    );
}

#[test]
fn delivery_respects_propagation_floor() {
    let sim = run(CcKind::Oracle, constant_trace(2.0, 16, 50, 0.0, None), 5);
    let records = sim.receiver_pkt_log();
    let delays: Vec<i64> = records
        .iter()
        .filter(|r| r.direction == Direction::Rcvd)
        .filter_map(|r| r.one_way_delay_ms)
        .collect();
    assert!(!delays.is_empty());
    assert!(delays.iter().all(|&d| d >= 50));
}

#[test]
fn link_queues_never_exceed_cap() {
    let cap = 30_000;
    let sim = run(
        CcKind::Gcc,
        constant_trace(0.8, 16, 25, 0.0, Some(cap)),
        10,
    );
    for records in [sim.sender_pkt_log(), sim.receiver_pkt_log()] {
        for r in &records {
            assert!(r.tx_link_qsize_byte <= cap);
            assert!(r.rx_link_qsize_byte <= cap);
        }
    }
}

#[test]
fn frames_decode_in_order() {
    let sim = run(
        CcKind::Gcc,
        constant_trace(1.0, 16, 25, 0.01, Some(30_000)),
        10,
    );
    let frames = sim.video_recv_log();
    assert!(frames.len() > 100);
    assert!(frames.windows(2).all(|w| w[1].frame_id == w[0].frame_id + 1));
    // Decode instants are monotone along with the ids.
    assert!(frames
        .windows(2)
        .all(|w| w[1].frame_decode_ts_us >= w[0].frame_decode_ts_us));
}
