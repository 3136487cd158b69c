use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use baton::config::{
    ServiceConfig, DEFAULT_JOB_FILE, DEFAULT_LOCK_STALE_SECS, DEFAULT_MARKER_SUFFIX,
    DEFAULT_SETTLE_SECS,
};
use baton::error::{BatonError, Result};
use baton::lifecycle::{LaunchOutcome, LifecycleController, Mode, RunOutcome};
use baton::preempt::{install_preemption_handler, PreemptSignal};
use baton::store::{JobProgress, JobStore};
use baton::submit::SubmissionGateway;
use baton::worker::{ShellProcessor, WorkLoop};

#[derive(Parser, Debug)]
#[command(name = "baton")]
#[command(version)]
#[command(about = "Runs a job queue across wall-clock limited allocations, resubmitting itself before preemption")]
struct Args {
    /// Job working directory
    workdir: PathBuf,

    /// Continuation callback (set by the batch script, not by hand)
    #[arg(long)]
    continuation: bool,

    /// Turn on debugging
    #[arg(long)]
    debug: bool,

    /// Seconds a job descriptor must stay untouched before its job is processed
    #[arg(long, env = "BATON_SETTLE_SECS", default_value_t = DEFAULT_SETTLE_SECS)]
    settle_time: u64,

    /// Job descriptor file name inside each job folder
    #[arg(long, env = "BATON_JOB_FILE", default_value = DEFAULT_JOB_FILE)]
    job_file: String,

    /// Suffix appended to an item name to form its completion marker
    #[arg(long, env = "BATON_MARKER_SUFFIX", default_value = DEFAULT_MARKER_SUFFIX)]
    marker_suffix: String,

    /// Seconds after which a leftover submit.lock is considered abandoned (0 = never)
    #[arg(long, env = "BATON_LOCK_STALE_SECS", default_value_t = DEFAULT_LOCK_STALE_SECS)]
    lock_stale_after: u64,

    /// Signal the scheduler sends before the wall-clock kill
    #[arg(long, env = "BATON_PREEMPT_SIGNAL", value_enum, default_value_t = PreemptSignal::Usr1)]
    preempt_signal: PreemptSignal,

    /// Print per-job progress and exit without touching lifecycle state
    #[arg(long)]
    status: bool,

    /// Output format for --status
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

impl Args {
    fn config(&self) -> ServiceConfig {
        let stale = (self.lock_stale_after > 0).then(|| Duration::from_secs(self.lock_stale_after));
        ServiceConfig::new(self.workdir.clone())
            .with_continuation(self.continuation)
            .with_debug(self.debug)
            .with_settle_time(Duration::from_secs(self.settle_time))
            .with_job_file(self.job_file.clone())
            .with_marker_suffix(self.marker_suffix.clone())
            .with_lock_stale_after(stale)
            .with_preempt_signal(self.preempt_signal)
    }
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_thread_ids(true)
        .init();
}

// =============================================================================
// Status
// =============================================================================

fn print_status(progress: &[JobProgress], format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(progress)
                .map_err(|e| BatonError::io("encoding status", e.into()))?;
            println!("{json}");
        }
        OutputFormat::Table => {
            if progress.is_empty() {
                println!("No jobs found.");
                return Ok(());
            }
            println!(
                "{:<38} {:<12} {:>8} {:>8}  MODIFIED",
                "JOB", "STATE", "PENDING", "TOTAL"
            );
            println!("{}", "-".repeat(96));
            for p in progress {
                println!(
                    "{:<38} {:<12} {:>8} {:>8}  {}",
                    p.job,
                    p.state(),
                    p.pending,
                    p.total,
                    p.modified.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
        }
    }
    Ok(())
}

// =============================================================================
// Dispatch
// =============================================================================

/// Every path through the service ends here; this is the only place that
/// decides the exit status.
async fn dispatch(args: Args) -> Result<()> {
    let config = args.config();
    tracing::info!(
        pid = std::process::id(),
        workdir = %config.workdir.display(),
        continuation = config.continuation,
        "Starting"
    );

    if args.status {
        if !config.workdir.is_dir() {
            return Err(BatonError::WorkdirMissing(config.workdir.clone()));
        }
        let progress = JobStore::new(&config).progress();
        return print_status(&progress, &args.output);
    }

    config.validate()?;
    let gateway = SubmissionGateway::for_current_exe(&config)?;
    let mut controller = LifecycleController::new(config.clone(), gateway);

    match controller.resolve_mode()? {
        Mode::Fresh => match controller.launch().await? {
            LaunchOutcome::Submitted { allocation_id } => {
                tracing::info!(%allocation_id, "Submitted");
            }
            LaunchOutcome::AlreadyActive => tracing::info!("Already active, nothing to do"),
            LaunchOutcome::Conflict => tracing::info!("Submission conflict, nothing to do"),
        },
        Mode::Continuation(record) => {
            let preemption = install_preemption_handler(config.preempt_signal)?;
            let mut work_loop = WorkLoop::new(JobStore::new(&config), ShellProcessor::new(&config));
            match controller.run(record, preemption, &mut work_loop).await? {
                RunOutcome::Drained => tracing::info!("Queue drained"),
                RunOutcome::Stalled { pending_jobs } => {
                    tracing::warn!(pending_jobs, "Stopped without progress, jobs left pending")
                }
                RunOutcome::Preempted { allocation_id } => {
                    tracing::info!(%allocation_id, "Handed off to next allocation")
                }
            }
        }
    }

    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start async runtime");
            return ExitCode::from(1);
        }
    };

    let code = match runtime.block_on(dispatch(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Fatal");
            ExitCode::from(e.exit_code())
        }
    };

    // Don't wait for an abandoned in-flight item after a handoff.
    runtime.shutdown_background();
    code
}
