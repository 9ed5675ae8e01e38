use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::Parser;
use tracing::{info, Level};

use ratesim::actor::SimNode;
use ratesim::config::Config;
use ratesim::scenario::Scenario;

#[derive(Debug, Parser)]
#[command(
    name = "ratesim",
    about = "Rate-controlled messaging fabric simulation"
)]
struct Args {
    /// Path to the JSON configuration.
    config: PathBuf,
    /// Override the configured verbosity (0 silent, 1 progress, 2+ per-event).
    #[arg(long)]
    verbosity: Option<u32>,
    /// Override the configured log file (defaults to stderr).
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(verbosity: u32, log_file: Option<&Path>) -> anyhow::Result<()> {
    let level = match verbosity {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false);
    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::from_file(&args.config)?;
    if let Some(verbosity) = args.verbosity {
        config.verbosity = verbosity;
    }
    if let Some(path) = args.log_file {
        config.log_file = Some(path);
    }
    init_logging(config.verbosity, config.log_file.as_deref())?;

    // Validation happens here; any configuration error exits non-zero
    // before a single event is scheduled.
    let scenario = Scenario::from_config(&config)?;
    let (sim, summary) = scenario.run();

    let mut messages = 0u64;
    let mut bytes = 0u64;
    for id in scenario.receiver_ids() {
        if let SimNode::Receiver(r) = sim.actor(id) {
            messages += r.messages();
            bytes += r.bytes();
        }
    }
    info!(
        end_tick = summary.end_time.tick(),
        events = summary.events_processed,
        messages,
        bytes,
        "simulation complete"
    );
    Ok(())
}
