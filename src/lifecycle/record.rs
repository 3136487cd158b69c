use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{BatonError, Result};

/// Whether an allocation currently owns the working directory.
///
/// `continuation` is false for the record written by the initial submission
/// and true for every record written by a preemption handoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleRecord {
    #[serde(alias = "jobid")]
    pub allocation_id: Option<String>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub continuation: bool,
}

impl LifecycleRecord {
    pub fn new(debug: bool) -> Self {
        Self {
            allocation_id: None,
            debug,
            continuation: false,
        }
    }

    /// Record for the allocation that takes over from this one.
    pub fn handoff(&self, allocation_id: String) -> Self {
        Self {
            allocation_id: Some(allocation_id),
            debug: self.debug,
            continuation: true,
        }
    }

    pub fn with_allocation(mut self, allocation_id: String) -> Self {
        self.allocation_id = Some(allocation_id);
        self
    }
}

/// The `jobinfo.yaml` file. Its presence alone means "an allocation is
/// active"; its absence means a fresh launch may submit.
#[derive(Debug, Clone)]
pub struct LifecycleFile {
    path: PathBuf,
}

impl LifecycleFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<LifecycleRecord> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BatonError::LifecycleMissing(self.path.clone()))
            }
            Err(e) => return Err(BatonError::io(format!("reading {}", self.path.display()), e)),
        };
        Ok(serde_yaml::from_str(&text)?)
    }

    /// Replace the record atomically: write a sibling temp file, then rename
    /// it over the old one.
    pub fn save(&self, record: &LifecycleRecord) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let text = serde_yaml::to_string(record)?;

        let mut tmp = NamedTempFile::new_in(dir)
            .map_err(|e| BatonError::io(format!("creating temp file in {}", dir.display()), e))?;
        tmp.write_all(text.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| BatonError::io("writing lifecycle record", e))?;
        tmp.persist(&self.path)
            .map_err(|e| BatonError::io(format!("replacing {}", self.path.display()), e.error))?;

        tracing::debug!(path = %self.path.display(), allocation_id = ?record.allocation_id, "Lifecycle record saved");
        Ok(())
    }

    /// Delete the record. Returns false if it was already gone.
    pub fn remove(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BatonError::io(format!("removing {}", self.path.display()), e)),
        }
    }
}
