use crate::config::ServiceConfig;
use crate::error::Result;
use crate::lifecycle::lock::{LockAttempt, SubmissionLock};
use crate::lifecycle::record::{LifecycleFile, LifecycleRecord};
use crate::preempt::Preemption;
use crate::submit::SubmissionGateway;
use crate::worker::{ItemProcessor, LoopOutcome, WorkLoop};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Fresh,
    Submitting,
    Armed,
    Working,
    Drained,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Fresh => write!(f, "fresh"),
            LifecycleState::Submitting => write!(f, "submitting"),
            LifecycleState::Armed => write!(f, "armed"),
            LifecycleState::Working => write!(f, "working"),
            LifecycleState::Drained => write!(f, "drained"),
        }
    }
}

/// Which path this invocation takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Fresh,
    Continuation(LifecycleRecord),
}

/// Result of the fresh-launch path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    Submitted { allocation_id: String },
    /// A lifecycle record already exists; nothing to do.
    AlreadyActive,
    /// Another process holds the submission lock.
    Conflict,
}

/// Result of the continuation path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Drained,
    Stalled { pending_jobs: usize },
    /// The preemption warning arrived and the next allocation was queued.
    Preempted { allocation_id: String },
}

/// Decides, at first launch and at preemption, whether to submit, resubmit
/// or work. The lifecycle record is the only state shared between
/// allocations.
pub struct LifecycleController {
    config: ServiceConfig,
    lifecycle: LifecycleFile,
    gateway: SubmissionGateway,
    state: LifecycleState,
}

impl LifecycleController {
    pub fn new(config: ServiceConfig, gateway: SubmissionGateway) -> Self {
        Self {
            lifecycle: LifecycleFile::new(config.lifecycle_path()),
            config,
            gateway,
            state: LifecycleState::Fresh,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn lifecycle(&self) -> &LifecycleFile {
        &self.lifecycle
    }

    fn transition(&mut self, next: LifecycleState) {
        tracing::debug!(from = %self.state, to = %next, "Lifecycle transition");
        self.state = next;
    }

    /// A continuation without a lifecycle record is stale or accidental and
    /// is handled as a fresh launch.
    pub fn resolve_mode(&self) -> Result<Mode> {
        if !self.config.continuation {
            return Ok(Mode::Fresh);
        }
        if !self.lifecycle.exists() {
            tracing::warn!(
                path = %self.lifecycle.path().display(),
                "Continuation requested without a lifecycle record, treating as a fresh launch"
            );
            return Ok(Mode::Fresh);
        }
        Ok(Mode::Continuation(self.lifecycle.load()?))
    }

    /// Fresh-launch path: submit the first allocation unless one is already
    /// active or another process is submitting right now.
    pub async fn launch(&mut self) -> Result<LaunchOutcome> {
        let lock = match SubmissionLock::try_acquire(
            &self.config.lock_path(),
            self.config.lock_stale_after,
        )? {
            LockAttempt::Acquired(lock) => lock,
            LockAttempt::Held => {
                tracing::info!("Submission conflict, another process is submitting");
                return Ok(LaunchOutcome::Conflict);
            }
        };

        if self.lifecycle.exists() {
            tracing::info!("Lifecycle record already exists, service is already in the system");
            return Ok(LaunchOutcome::AlreadyActive);
        }

        self.transition(LifecycleState::Submitting);
        let record = LifecycleRecord::new(self.config.debug);
        let allocation_id = self.gateway.submit(&record).await?;
        self.lifecycle
            .save(&record.with_allocation(allocation_id.clone()))?;
        drop(lock);

        tracing::info!(%allocation_id, "Job initially submitted");
        Ok(LaunchOutcome::Submitted { allocation_id })
    }

    /// Continuation path: work until the queue drains, or hand off to a new
    /// allocation as soon as the preemption warning fires.
    ///
    /// The handoff works from a snapshot of `record` taken before any work
    /// starts. On preemption the in-flight item is abandoned; it has no
    /// marker yet and is picked up again by the next allocation.
    pub async fn run<P: ItemProcessor>(
        &mut self,
        record: LifecycleRecord,
        preemption: Preemption,
        work_loop: &mut WorkLoop<P>,
    ) -> Result<RunOutcome> {
        let snapshot = record;
        self.transition(LifecycleState::Armed);
        tracing::info!(allocation_id = ?snapshot.allocation_id, "Continuation armed");

        self.transition(LifecycleState::Working);
        let outcome = tokio::select! {
            outcome = work_loop.run() => outcome,
            _ = preemption.notified() => {
                return self.handoff(&snapshot).await;
            }
        };

        // Remove the record so the next cold start submits from scratch.
        self.lifecycle.remove()?;
        self.transition(LifecycleState::Drained);
        tracing::info!("Shutting down, lifecycle record removed");

        Ok(match outcome {
            LoopOutcome::Drained => RunOutcome::Drained,
            LoopOutcome::Stalled { pending_jobs } => RunOutcome::Stalled { pending_jobs },
        })
    }

    async fn handoff(&mut self, snapshot: &LifecycleRecord) -> Result<RunOutcome> {
        self.transition(LifecycleState::Submitting);
        let allocation_id = self.gateway.submit(snapshot).await?;
        self.lifecycle
            .save(&snapshot.handoff(allocation_id.clone()))?;
        tracing::info!(%allocation_id, "Resubmitted ahead of preemption");
        Ok(RunOutcome::Preempted { allocation_id })
    }
}
