//! chainrepair driver
//!
//! Runs the repair passes against a namespaced chain dump and prints the
//! run report as JSON on stdout.
//!
//! ## Usage
//!
//! ```bash
//! # Full run: strip, clean legacy keys, walk from the tip, verify
//! chainrepair --config chainrepair.toml run
//!
//! # Strip only, without writing anything
//! chainrepair --source ~/dumps/db --dest /data/out --prefix-len 3 --suffix-len 0 --dry-run strip
//!
//! # Verify an existing destination
//! chainrepair --dest /data/out verify
//! ```
//!
//! Ctrl-C stops the run at the next commit boundary; everything committed
//! before that stays valid and a re-run picks up idempotently.

use std::path::PathBuf;

use chainrepair::config::EngineConfig;
use chainrepair::metrics;
use chainrepair::telemetry::{init_tracing, TelemetryConfig};
use chainrepair::{EngineError, Pipeline, RunReport, Stages};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[clap(name = "chainrepair")]
#[clap(about = "Strip namespace envelopes and rebuild the canonical chain index", long_about = None)]
struct Args {
    /// Config file (defaults to ./chainrepair.toml when present)
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Source store directory
    #[clap(long, global = true)]
    source: Option<String>,

    /// Destination store directory
    #[clap(long, global = true)]
    dest: Option<String>,

    /// Source envelope prefix width in bytes
    #[clap(long, global = true)]
    prefix_len: Option<usize>,

    /// Source envelope suffix width in bytes
    #[clap(long, global = true)]
    suffix_len: Option<usize>,

    /// Operations per durable commit
    #[clap(long, global = true)]
    batch_size: Option<usize>,

    /// Read and analyse everything, write nothing
    #[clap(long, global = true, default_value_t = false)]
    dry_run: bool,

    /// Log format: "pretty" or "json"
    #[clap(long, global = true)]
    log_format: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// All passes in order
    Run,
    /// Build the hash index and strip the source into the destination
    Strip,
    /// Pick a tip, walk to genesis and repair canonical records
    Walk,
    /// Scan canonical records for gaps and check parent links
    Verify,
    /// Convert and delete legacy 10-byte canonical keys
    CleanupLegacy,
}

impl Command {
    fn stages(self) -> Stages {
        match self {
            Command::Run => Stages::ALL,
            Command::Strip => Stages::STRIP,
            Command::Walk => Stages::WALK,
            Command::Verify => Stages::VERIFY,
            Command::CleanupLegacy => Stages::CLEANUP_LEGACY,
        }
    }
}

fn apply_overrides(config: &mut EngineConfig, args: &Args) {
    if let Some(source) = &args.source {
        config.source_path = source.clone();
    }
    if let Some(dest) = &args.dest {
        config.dest_path = dest.clone();
    }
    if let Some(prefix_len) = args.prefix_len {
        config.prefix_len = prefix_len;
    }
    if let Some(suffix_len) = args.suffix_len {
        config.suffix_len = suffix_len;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if args.dry_run {
        config.dry_run = true;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut telemetry = TelemetryConfig::default();
    if let Some(format) = &args.log_format {
        telemetry.log_format = format.clone();
    }
    let _log_guard = init_tracing(telemetry)?;
    metrics::register_metrics();

    let mut config = EngineConfig::load(args.config.as_deref())?;
    apply_overrides(&mut config, &args);
    // verify never touches the source
    if matches!(args.command, Command::Verify) && config.source_path.is_empty() {
        config.source_path = "-".to_string();
    }
    let settings = config.settings()?;

    info!(
        command = ?args.command,
        source = %settings.source_path.display(),
        dest = %settings.dest_path.display(),
        dry_run = settings.dry_run,
        "Starting chainrepair"
    );

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping at the next commit boundary");
            ctrl_c.cancel();
        }
    });

    let pipeline = Pipeline::new(settings, cancel);
    let mut report = RunReport::default();
    let result = pipeline.run(args.command.stages(), &mut report).await;

    println!("{}", serde_json::to_string_pretty(&report)?);

    match result {
        Ok(()) => Ok(()),
        Err(EngineError::Cancelled { committed_ops }) => {
            warn!(committed_ops, "Run cancelled");
            std::process::exit(130);
        }
        Err(e) => Err(e.into()),
    }
}
