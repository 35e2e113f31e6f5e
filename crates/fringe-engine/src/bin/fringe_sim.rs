// ─────────────────────────────────────────────────────────────────────
// Fringe RTD — Simulator Demo
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use fringe_engine::engine::Pipeline;
use fringe_engine::flags::ControlFlags;
use fringe_engine::logging::init_logging;
use fringe_engine::simulator::{SimulatedInstrument, SimulatorConfig};
use fringe_engine::tracker::TrackLoop;
use fringe_types::config::PipelineConfig;
use tracing::{info, warn};

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Run the fringe tracker against the simulated combiner",
    long_about = None,
    after_help = "Examples:\n  fringe-sim --cycles 50\n  fringe-sim --natural --recipe flux --recipe filter\n  fringe-sim --config configs/pipeline_default.json --filter Hl\n"
)]
struct Args {
    /// Number of track-loop iterations
    #[arg(long, default_value_t = 20)]
    cycles: u64,

    /// Simulator noise seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Simulate the combiner without the Wollaston (24 windows)
    #[arg(long)]
    natural: bool,

    /// Disable piston jitter and scan position errors
    #[arg(long)]
    quiet: bool,

    /// Pipeline configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Named filter preset for the fringe band
    #[arg(long)]
    filter: Option<String>,

    /// Extra recipes to enable besides track
    #[arg(long)]
    recipe: Vec<String>,

    /// Sleep between acquisition retries [ms]
    #[arg(long)]
    backoff_ms: Option<u64>,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(&args.log);

    let mut settings = match &args.config {
        Some(path) => PipelineConfig::from_file(&path.to_string_lossy())?,
        None => PipelineConfig::default(),
    };
    if let Some(preset) = &args.filter {
        settings.select_filter(preset)?;
    }
    if let Some(backoff) = args.backoff_ms {
        settings.retry_backoff_ms = backoff;
    }

    let mut sim_config = if args.quiet {
        SimulatorConfig::quiet()
    } else {
        SimulatorConfig::default()
    };
    if args.natural {
        sim_config = sim_config.natural();
    }
    sim_config.seed = args.seed;

    let flags = Arc::new(ControlFlags::new(true, false));
    let instrument = SimulatedInstrument::new(sim_config, Arc::clone(&flags))?;
    let pipeline = Pipeline::new(instrument, "simulator", settings)?;
    for name in &args.recipe {
        pipeline.handle().enable_recipe(name)?;
    }

    let track = TrackLoop::spawn(pipeline, flags, Some(args.cycles))?;
    let (pipeline, stats) = track
        .join()
        .map_err(|_| "track thread panicked".to_string())?;

    let handle = pipeline.handle();
    let data = handle.read();
    match data.cycle.telescope.get(&data.ledger) {
        Some(solution) => info!(
            position = ?solution.position.as_slice(),
            snr = ?solution.snr.as_slice(),
            tracking = ?solution.tracking,
            "last telescope solution"
        ),
        None => warn!("no telescope solution in the last cycle"),
    }
    if let Some(phases) = data.cycle.differential_phase.get(&data.ledger) {
        info!(phases = ?phases.as_slice(), "last differential phase");
    }
    info!(
        scans = data.persistent.data_counter,
        completed = stats.completed,
        retries = stats.retries,
        failures = stats.failures,
        offsets_sent = pipeline.acquisition().sent_offsets().len(),
        phases_sent = pipeline.acquisition().sent_phases().len(),
        "simulation finished"
    );
    Ok(())
}
