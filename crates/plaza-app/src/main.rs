//! Headless host for the plaza crowd simulation.
//!
//! Stands in for the real renderer/roster stack: builds a synthetic roster,
//! drives the clock at a configurable frame rate, optionally toggles
//! formation mode partway through, and logs state summaries.

use anyhow::{Context, Result};
use clap::Parser;
use plaza_core::{PlazaConfig, RosterEntry, Simulation};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "plaza", about = "Headless plaza crowd simulation driver")]
struct Args {
    /// Number of synthetic agents in the roster.
    #[arg(long, default_value_t = 40)]
    agents: usize,

    /// Number of clusters the roster is split across.
    #[arg(long, default_value_t = 4)]
    clusters: usize,

    /// Simulated run length in seconds.
    #[arg(long, default_value_t = 60.0)]
    duration: f32,

    /// Host frame cadence in frames per second; the core throttles to its
    /// own fixed tick rate internally.
    #[arg(long, default_value_t = 60.0)]
    fps: f32,

    /// RNG seed for a reproducible run.
    #[arg(long)]
    seed: Option<u64>,

    /// Activate formation mode for this cluster halfway through the run.
    #[arg(long)]
    formation_cluster: Option<usize>,

    /// Seconds between logged state summaries.
    #[arg(long, default_value_t = 5.0)]
    summary_interval: f32,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    run(&args)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn run(args: &Args) -> Result<()> {
    if args.fps <= 0.0 || args.duration <= 0.0 {
        anyhow::bail!("fps and duration must be positive");
    }

    let config = PlazaConfig {
        rng_seed: args.seed,
        ..PlazaConfig::default()
    };
    let mut sim = Simulation::new(config).context("building simulation")?;

    let roster = synthetic_roster(args.agents, args.clusters.max(1));
    let outcome = sim.sync(&roster);
    info!(agents = outcome.added.len(), "roster seeded");

    let frame = 1.0 / args.fps;
    let frames = (args.duration / frame).ceil() as u64;
    let formation_at = frames / 2;
    let mut formation_done = false;
    let mut since_summary = 0.0_f32;

    for n in 0..frames {
        let report = sim.advance(frame);
        for fault in &report.faults {
            warn!(id = %fault.id, error = %fault.error, "agent neutralized");
        }

        if let Some(cluster) = args.formation_cluster
            && !formation_done
            && n >= formation_at
        {
            sim.formation_activate(&cluster_name(cluster));
            formation_done = true;
        }

        since_summary += frame;
        if since_summary >= args.summary_interval {
            since_summary = 0.0;
            log_summary(&sim);
        }
    }

    if sim.is_formation_active() {
        sim.formation_deactivate();
    }
    log_summary(&sim);
    info!(ticks = sim.tick().0, "run complete");
    Ok(())
}

fn log_summary(sim: &Simulation) {
    let summary = sim.summary();
    let mut parts: Vec<String> = summary
        .counts
        .iter()
        .map(|(kind, count)| format!("{kind:?}={count}"))
        .collect();
    parts.sort();
    info!(
        tick = sim.tick().0,
        agents = summary.total(),
        states = parts.join(" "),
        "state summary"
    );
}

fn cluster_name(index: usize) -> String {
    format!("cluster-{index}")
}

fn synthetic_roster(agents: usize, clusters: usize) -> Vec<RosterEntry> {
    (0..agents)
        .map(|i| RosterEntry::new(format!("agent-{i:03}"), cluster_name(i % clusters)))
        .collect()
}
