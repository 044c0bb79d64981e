//! riptide — media transport simulator front-end.
//!
//! Loads a bandwidth trace and a codec lookup table, assembles the
//! simulation for the chosen congestion controller, runs it, and writes
//! the per-host, per-application and per-controller CSV logs into the
//! output directory. Summaries are printed as JSON.

mod output;

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use riptide_sim::codec::LookupTable;
use riptide_sim::sim::{CcKind, SimConfig, Simulation, DEFAULT_DURATION_SECS, DEFAULT_SEED};
use riptide_sim::trace::LinkTrace;

/// Discrete-time media transport simulator.
#[derive(Parser, Debug)]
#[command(name = "riptide", about = "Simulate video transport under a bandwidth trace")]
struct Cli {
    /// Congestion controller: oracle, salsify, gcc or fbra.
    #[arg(long)]
    cc: String,

    /// Bandwidth trace CSV.
    #[arg(long)]
    trace: PathBuf,

    /// Codec lookup-table CSV.
    #[arg(long)]
    lookup_table: Option<PathBuf>,

    /// Output directory for CSV logs.
    #[arg(long)]
    save_dir: PathBuf,

    /// Simulated run length in seconds.
    #[arg(long, default_value_t = DEFAULT_DURATION_SECS)]
    duration: u64,

    /// RNG seed for the link loss draws.
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let cc: CcKind = cli.cc.parse()?;
    let trace_text = fs::read_to_string(&cli.trace)
        .with_context(|| format!("reading trace {}", cli.trace.display()))?;
    let trace = LinkTrace::parse(&trace_text)
        .with_context(|| format!("parsing trace {}", cli.trace.display()))?;

    let lookup_table = match &cli.lookup_table {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading lookup table {}", path.display()))?;
            Some(
                LookupTable::parse(&text)
                    .with_context(|| format!("parsing lookup table {}", path.display()))?,
            )
        }
        None => None,
    };

    fs::create_dir_all(&cli.save_dir)
        .with_context(|| format!("creating {}", cli.save_dir.display()))?;

    let config = SimConfig {
        cc,
        trace,
        lookup_table,
        external_codec: None,
        duration_secs: cli.duration,
        seed: cli.seed,
    };
    info!(cc = %cli.cc, duration = cli.duration, seed = cli.seed, "starting run");

    let mut sim = Simulation::build(config)?;
    sim.run(cli.duration);
    output::write_logs(&sim, &cli.save_dir)?;

    for summary in sim.summaries() {
        println!("{}", serde_json::to_string(&summary)?);
    }
    println!(
        "{{\"avg_trace_bw_mbps\":{:.3}}}",
        sim.avg_trace_bw_mbps()
    );

    Ok(())
}
