use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ServiceConfig;
use crate::error::{BatonError, Result};
use crate::store::job::{JobDescriptor, JobUnit, WorkItem};
use crate::store::settle::is_settled;
use crate::store::warnings::WarnOnce;

/// Reads the on-disk job queue: one descriptor per job folder directly below
/// the working directory.
#[derive(Debug)]
pub struct JobStore {
    workdir: PathBuf,
    job_file: String,
    marker_suffix: String,
    settle_time: Duration,
    warned: WarnOnce,
}

/// Per-job progress line for `--status`.
#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub job: String,
    pub pending: usize,
    pub total: usize,
    pub settled: bool,
    pub modified: DateTime<Utc>,
}

impl JobProgress {
    pub fn state(&self) -> &'static str {
        if self.pending == 0 {
            "FINISHED"
        } else if !self.settled {
            "SETTLING"
        } else {
            "IN PROGRESS"
        }
    }
}

impl JobStore {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            workdir: config.workdir.clone(),
            job_file: config.job_file.clone(),
            marker_suffix: config.marker_suffix.clone(),
            settle_time: config.settle_time,
            warned: WarnOnce::new(),
        }
    }

    pub fn settle_time(&self) -> Duration {
        self.settle_time
    }

    /// Unreadable descriptors that have been reported and not recovered yet.
    pub fn warned_len(&self) -> usize {
        self.warned.len()
    }

    /// Completion marker path for `item` in `jobdir`.
    pub fn marker_path(&self, jobdir: &Path, item: &str) -> PathBuf {
        jobdir.join(format!("{item}{}", self.marker_suffix))
    }

    /// Jobs with work left, settled or not. Finished jobs and unreadable
    /// descriptors are left out.
    pub fn discover(&mut self) -> Vec<JobUnit> {
        self.scan()
            .into_iter()
            .filter(|unit| {
                if unit.is_finished() {
                    tracing::debug!(
                        path = %unit.descriptor_path.display(),
                        "Job is finished, skipping"
                    );
                    false
                } else {
                    true
                }
            })
            .collect()
    }

    /// Settled jobs ready to process.
    ///
    /// When jobs exist but none has settled yet this sleeps one settle period
    /// and looks again, so the caller never busy-polls a directory that is
    /// still being uploaded. An empty result means the queue is drained.
    pub async fn next_batch(&mut self) -> Vec<JobUnit> {
        loop {
            let units = self.discover();
            if units.is_empty() {
                return units;
            }

            let waiting = units.len();
            let settled: Vec<JobUnit> = units.into_iter().filter(|u| u.settled).collect();
            if !settled.is_empty() {
                return settled;
            }

            tracing::info!(
                jobs = waiting,
                wait_secs = self.settle_time.as_secs_f64(),
                "Waiting for jobs to settle"
            );
            tokio::time::sleep(self.settle_time).await;
        }
    }

    /// Drop manifest entries whose completion marker already exists.
    /// Blank entries can never be completed and are dropped as well, and so
    /// are entries that do not name a plain file inside the job folder.
    pub fn filter_manifest(&self, jobdir: &Path, manifest: Vec<String>) -> Vec<String> {
        manifest
            .into_iter()
            .filter(|item| {
                if item.trim().is_empty() {
                    return false;
                }
                if !is_plain_name(item) {
                    tracing::debug!(jobdir = %jobdir.display(), %item, "Ignoring manifest entry outside the job folder");
                    return false;
                }
                !self.marker_path(jobdir, item).exists()
            })
            .collect()
    }

    pub fn work_items(&self, unit: &JobUnit) -> Vec<WorkItem> {
        unit.manifest
            .iter()
            .map(|name| WorkItem {
                name: name.clone(),
                path: unit.jobdir.join(name),
                marker: self.marker_path(&unit.jobdir, name),
            })
            .collect()
    }

    /// Progress of every readable job, finished ones included.
    pub fn progress(&mut self) -> Vec<JobProgress> {
        self.scan()
            .into_iter()
            .map(|unit| JobProgress {
                job: unit.name(),
                pending: unit.manifest.len(),
                total: unit.total_items,
                settled: unit.settled,
                modified: DateTime::<Utc>::from(unit.modified),
            })
            .collect()
    }

    fn scan(&mut self) -> Vec<JobUnit> {
        let now = SystemTime::now();
        let mut units = Vec::new();

        for path in self.descriptor_paths() {
            match self.load_unit(&path, now) {
                Ok(unit) => {
                    self.warned.clear(&path);
                    units.push(unit);
                }
                Err(e) => {
                    if self.warned.first_time(&path) {
                        tracing::warn!(path = %path.display(), error = %e, "Cannot read job descriptor");
                    }
                }
            }
        }

        units
    }

    /// `<workdir>/*/<job_file>`, sorted. Hidden folders are not job folders.
    fn descriptor_paths(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.workdir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(workdir = %self.workdir.display(), error = %e, "Cannot list working directory");
                return Vec::new();
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
            .map(|entry| entry.path().join(&self.job_file))
            .filter(|path| path.is_file())
            .collect();
        paths.sort();
        paths
    }

    fn load_unit(&self, path: &Path, now: SystemTime) -> Result<JobUnit> {
        let descriptor_error = |source: BatonError| BatonError::Descriptor {
            path: path.to_path_buf(),
            source: Box::new(source),
        };

        let modified = fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|e| descriptor_error(BatonError::io("stat", e)))?;
        let text = fs::read_to_string(path).map_err(|e| descriptor_error(BatonError::io("read", e)))?;
        let descriptor: JobDescriptor =
            serde_yaml::from_str(&text).map_err(|e| descriptor_error(e.into()))?;

        let jobdir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.workdir.clone());
        let total_items = descriptor.manifest.len();
        let manifest = self.filter_manifest(&jobdir, descriptor.manifest);

        Ok(JobUnit {
            jobdir,
            descriptor_path: path.to_path_buf(),
            manifest,
            total_items,
            params: descriptor.params,
            modified,
            settled: is_settled(modified, now, self.settle_time),
        })
    }
}

/// A single normal path component: no separators, no `.` or `..`.
fn is_plain_name(item: &str) -> bool {
    !item.contains('/')
        && matches!(
            Path::new(item).components().collect::<Vec<_>>().as_slice(),
            [Component::Normal(_)]
        )
}
