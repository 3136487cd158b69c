use std::path::PathBuf;
use std::time::Duration;

use crate::error::{BatonError, Result};
use crate::preempt::PreemptSignal;

/// Shell command prefix the service resubmits itself with.
pub const SUBMIT_FILE: &str = ".submit";
/// Written next to a missing `.submit` as a starting point for operators.
pub const SUBMIT_SAMPLE_FILE: &str = ".submit.sample";
/// Present while an allocation owns the working directory.
pub const LIFECYCLE_FILE: &str = "jobinfo.yaml";
/// Guards the window between checking and creating the lifecycle record.
pub const LOCK_FILE: &str = "submit.lock";

pub const DEFAULT_SETTLE_SECS: u64 = 300;
pub const DEFAULT_LOCK_STALE_SECS: u64 = 3600;
pub const DEFAULT_JOB_FILE: &str = "baton.job";
pub const DEFAULT_MARKER_SUFFIX: &str = ".result";

pub const ENV_SETTLE_SECS: &str = "BATON_SETTLE_SECS";
pub const ENV_JOB_FILE: &str = "BATON_JOB_FILE";
pub const ENV_MARKER_SUFFIX: &str = "BATON_MARKER_SUFFIX";
pub const ENV_LOCK_STALE_SECS: &str = "BATON_LOCK_STALE_SECS";
pub const ENV_PREEMPT_SIGNAL: &str = "BATON_PREEMPT_SIGNAL";

/// Slurm example written to `.submit.sample`. The scheduler must deliver
/// USR1 before the wall-clock kill and print only the job id (`--parsable`).
pub const SUBMIT_SAMPLE: &str = "sbatch --signal B:USR1@30 -D$workdir \\
   -e $workdir/stderr.out -o $workdir/stdout.out \\
   --open-mode=append --parsable \\
   --mail-type=ALL \\
   -p general
";

/// Runtime configuration for one invocation of the service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root directory holding `.submit`, the lifecycle files and job folders.
    pub workdir: PathBuf,

    /// Re-invocation inside a freshly granted allocation.
    pub continuation: bool,

    /// Mirrored into every resubmission.
    pub debug: bool,

    /// Quiet time a job descriptor needs before its job is processed.
    pub settle_time: Duration,

    /// Descriptor file name looked up one level below `workdir`.
    pub job_file: String,

    /// Appended to an item name to form its completion marker.
    pub marker_suffix: String,

    /// Age after which a leftover `submit.lock` is treated as abandoned.
    /// `None` keeps a lock forever.
    pub lock_stale_after: Option<Duration>,

    /// Warning the scheduler sends before the wall-clock kill.
    pub preempt_signal: PreemptSignal,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("."),
            continuation: false,
            debug: false,
            settle_time: Duration::from_secs(DEFAULT_SETTLE_SECS),
            job_file: DEFAULT_JOB_FILE.to_string(),
            marker_suffix: DEFAULT_MARKER_SUFFIX.to_string(),
            lock_stale_after: Some(Duration::from_secs(DEFAULT_LOCK_STALE_SECS)),
            preempt_signal: PreemptSignal::default(),
        }
    }
}

impl ServiceConfig {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            ..Default::default()
        }
    }

    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    pub fn with_job_file(mut self, job_file: impl Into<String>) -> Self {
        self.job_file = job_file.into();
        self
    }

    pub fn with_marker_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.marker_suffix = suffix.into();
        self
    }

    pub fn with_lock_stale_after(mut self, stale_after: Option<Duration>) -> Self {
        self.lock_stale_after = stale_after;
        self
    }

    pub fn with_preempt_signal(mut self, sig: PreemptSignal) -> Self {
        self.preempt_signal = sig;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_continuation(mut self, continuation: bool) -> Self {
        self.continuation = continuation;
        self
    }

    pub fn submit_path(&self) -> PathBuf {
        self.workdir.join(SUBMIT_FILE)
    }

    pub fn submit_sample_path(&self) -> PathBuf {
        self.workdir.join(SUBMIT_SAMPLE_FILE)
    }

    pub fn lifecycle_path(&self) -> PathBuf {
        self.workdir.join(LIFECYCLE_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.workdir.join(LOCK_FILE)
    }

    /// Tunables a continuation must run with, as the environment variables
    /// the CLI reads them from. Exported by the batch script so that flags
    /// given to the fresh launch survive into every later allocation.
    pub fn continuation_env(&self) -> Vec<(&'static str, String)> {
        vec![
            (ENV_SETTLE_SECS, self.settle_time.as_secs().to_string()),
            (ENV_JOB_FILE, self.job_file.clone()),
            (ENV_MARKER_SUFFIX, self.marker_suffix.clone()),
            (
                ENV_LOCK_STALE_SECS,
                self.lock_stale_after
                    .map_or(0, |d| d.as_secs())
                    .to_string(),
            ),
            (ENV_PREEMPT_SIGNAL, self.preempt_signal.as_arg().to_string()),
        ]
    }

    /// Check that the deployment is usable before touching any state.
    ///
    /// A missing `.submit` leaves a `.submit.sample` behind (unless one is
    /// already there) so the operator has something to start from.
    pub fn validate(&self) -> Result<()> {
        if !self.workdir.is_dir() {
            return Err(BatonError::WorkdirMissing(self.workdir.clone()));
        }

        let submit = self.submit_path();
        if !submit.exists() {
            let sample = self.submit_sample_path();
            if !sample.exists() {
                tracing::info!(path = %sample.display(), "Creating a sample submission template");
                std::fs::write(&sample, SUBMIT_SAMPLE)
                    .map_err(|e| BatonError::io(format!("writing {}", sample.display()), e))?;
            }
            return Err(BatonError::TemplateMissing(submit));
        }

        Ok(())
    }
}
