use std::collections::BTreeMap;

use crate::store::{JobStore, JobUnit};
use crate::worker::processor::ItemProcessor;

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// No job has anything left to do.
    Drained,
    /// A whole pass completed nothing while jobs were still pending.
    Stalled { pending_jobs: usize },
}

/// Counts for a single pass over the settled jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub jobs: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Pulls settled jobs from the [`JobStore`] and feeds their items to an
/// [`ItemProcessor`] until nothing is left.
pub struct WorkLoop<P> {
    store: JobStore,
    processor: P,
}

impl<P: ItemProcessor> WorkLoop<P> {
    pub fn new(store: JobStore, processor: P) -> Self {
        Self { store, processor }
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn store_mut(&mut self) -> &mut JobStore {
        &mut self.store
    }

    /// Run passes until the queue drains or a pass makes no progress.
    ///
    /// Failed items keep their place in the manifest and are retried on the
    /// next pass, or by the next allocation once this one gives up.
    pub async fn run(&mut self) -> LoopOutcome {
        loop {
            let batch = self.store.next_batch().await;
            if batch.is_empty() {
                tracing::info!("Finished processing things");
                return LoopOutcome::Drained;
            }

            let pending_jobs = batch.len();
            tracing::info!(jobs = pending_jobs, "Starting processing of jobs");
            let summary = self.run_pass(batch).await;
            tracing::info!(
                jobs = summary.jobs,
                completed = summary.completed,
                failed = summary.failed,
                "Pass finished"
            );

            if summary.completed == 0 {
                tracing::warn!(
                    jobs = pending_jobs,
                    failed = summary.failed,
                    "Some items didn't complete even though they were valid"
                );
                return LoopOutcome::Stalled { pending_jobs };
            }
        }
    }

    /// Process one batch, a group at a time.
    pub async fn run_pass(&mut self, batch: Vec<JobUnit>) -> PassSummary {
        let mut summary = PassSummary {
            jobs: batch.len(),
            ..Default::default()
        };

        let mut groups: BTreeMap<String, Vec<JobUnit>> = BTreeMap::new();
        for unit in batch {
            groups
                .entry(self.processor.group_key(&unit))
                .or_default()
                .push(unit);
        }

        for (group, units) in groups {
            tracing::info!(%group, jobs = units.len(), "Starting processing for group");
            if let Err(e) = self.processor.prepare(&group).await {
                let items: usize = units.iter().map(|u| u.manifest.len()).sum();
                tracing::error!(%group, error = %e, "Failed to prepare group, skipping its jobs");
                summary.failed += items;
                continue;
            }

            for unit in &units {
                tracing::info!(jobdir = %unit.jobdir.display(), "Processing job");
                for item in self.store.work_items(unit) {
                    match self.processor.process(unit, &item).await {
                        Ok(()) if item.marker.exists() => {
                            summary.completed += 1;
                        }
                        Ok(()) => {
                            tracing::warn!(
                                job = %unit.name(),
                                item = %item.name,
                                marker = %item.marker.display(),
                                "Item reported success without a completion marker"
                            );
                            summary.failed += 1;
                        }
                        Err(e) => {
                            tracing::error!(
                                job = %unit.name(),
                                item = %item.name,
                                error = %e,
                                "Failed during processing of item"
                            );
                            summary.failed += 1;
                        }
                    }
                }
            }

            self.processor.release(&group).await;
        }

        summary
    }
}
