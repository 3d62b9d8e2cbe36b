//! cleanctl - convergence control for iterative deconvolution imaging
//!
//! Command line entry point. It initializes:
//! - Configuration loading ([`ConfigManager`]): `imaging.yaml` and `targets.yaml`
//! - Logging infrastructure (daily file rotation, optional console output)
//! - Tokio runtime for the engine subprocesses
//! - One [`ConvergenceController`] wired to the process engine and the
//!   filesystem product store
//!
//! # Execution Flow
//!
//! 1. Load the imaging config (file + `CLEANCTL__*` environment overrides)
//! 2. Initialize logging → `<logging.dir>/<logging.prefix>.<date>`
//! 3. Load the targets and keep the ones selected with `--target`
//! 4. Image each target in file order; targets never run concurrently
//! 5. Write `<imagename>.result.yaml` or `<name>.error.yaml` into the working directory
//! 6. Log the run metrics; exit non-zero when any target failed

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use cleanctl::config::save_yaml;
use cleanctl::services::{FsProductStore, ProcessImagingEngine, StandardHeuristics, SummaryStatistics};
use cleanctl::{
    APP_NAME, ConfigManager, ControllerOptions, ConvergenceController, ImagingConfig, RunMetrics,
    VERSION,
};
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Drive an external imaging engine until each target's clean converges.
#[derive(Parser, Debug)]
#[command(name = "cleanctl", version, about)]
struct Args {
    /// Directory holding imaging.yaml and targets.yaml.
    #[arg(long, value_name = "DIR", env = "CLEANCTL_CONFIG_DIR", default_value = ".")]
    config_dir: Utf8PathBuf,

    /// Only image the named targets (repeatable). All targets when omitted.
    #[arg(long = "target", value_name = "NAME")]
    targets: Vec<String>,

    /// Log at debug level.
    #[arg(long)]
    debug: bool,

    /// Also log to the console.
    #[arg(long)]
    console: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config_manager = ConfigManager::new(&args.config_dir)?;
    let mut config = config_manager.load_imaging_config()?;
    config.logging.debug |= args.debug;
    config.logging.console |= args.console;

    let _guard = cleanctl::logging::setup_logging(&config.logging)?;
    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let targets = config_manager.load_targets()?;
    for name in &args.targets {
        if !targets.targets.contains_key(name) {
            tracing::warn!("Target {} not found in {}", name, config_manager.config_dir());
        }
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("cleanctl-worker")
        .build()
        .context("Failed to create the tokio runtime")?;

    let metrics = Arc::new(RunMetrics::new());
    let controller = build_controller(&config, Arc::clone(&metrics));
    let working_dir = Utf8PathBuf::from(&config.working_dir);

    let mut failed = 0usize;
    for (name, target) in targets.select(&args.targets) {
        tracing::info!("Imaging target {}", name);
        match runtime.block_on(controller.run(target, target.masking, target.maxncleans)) {
            Ok(result) => {
                let path = working_dir.join(format!("{}.result.yaml", target.image_name()));
                write_outcome(&path, &result);
            }
            Err(e) => {
                failed += 1;
                let path = working_dir.join(format!("{}.error.yaml", name));
                write_outcome(&path, &e.error_result());
            }
        }
    }

    metrics.log_summary();
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));

    let imaged = metrics.targets_imaged.load(Ordering::Relaxed);
    if failed > 0 {
        anyhow::bail!("{} of {} targets failed", failed, failed + imaged);
    }
    tracing::info!("All {} targets imaged", imaged);
    Ok(())
}

fn build_controller(
    config: &ImagingConfig,
    metrics: Arc<RunMetrics>,
) -> ConvergenceController<ProcessImagingEngine, StandardHeuristics, SummaryStatistics, FsProductStore>
{
    let working_dir = config.working_dir.as_str();
    let options = ControllerOptions {
        imaging_mode: config.imaging_mode.clone(),
        pblimit: config.heuristics.pblimit_image,
    };

    ConvergenceController::new(
        ProcessImagingEngine::new(config.engine.clone(), working_dir),
        StandardHeuristics::new(config.heuristics.clone(), working_dir),
        SummaryStatistics::new(working_dir),
        FsProductStore::new(working_dir),
        options,
    )
    .with_metrics(metrics)
}

/// Results are best effort: a failed write is logged, the run goes on.
fn write_outcome<T: serde::Serialize>(path: &Utf8Path, value: &T) {
    match save_yaml(path, value) {
        Ok(()) => tracing::info!("Wrote {}", path),
        Err(e) => tracing::error!("{:#}", e),
    }
}
