use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::{BatonError, Result};

/// Outcome of trying to take the submission lock.
#[derive(Debug)]
pub enum LockAttempt {
    Acquired(SubmissionLock),
    /// Another process holds the lock.
    Held,
}

/// Zero-byte `submit.lock` created with create-if-absent semantics.
///
/// The file is removed when the guard drops, which covers normal returns,
/// `?` early exits and unwinding panics. Racing processes may live on
/// different hosts, so the filesystem is the only arbiter.
#[derive(Debug)]
pub struct SubmissionLock {
    path: PathBuf,
}

impl SubmissionLock {
    /// Try to create the lock file.
    ///
    /// A lock older than `stale_after` is assumed to belong to a crashed
    /// holder: it is removed and creation is retried once.
    pub fn try_acquire(path: &Path, stale_after: Option<Duration>) -> Result<LockAttempt> {
        if Self::create(path)? {
            return Ok(LockAttempt::Acquired(Self::guard(path)));
        }

        let Some(stale_after) = stale_after else {
            return Ok(LockAttempt::Held);
        };
        let Some(age) = lock_age(path) else {
            // Vanished between the create attempt and the stat; the holder
            // just released it. Treat as held rather than racing again.
            return Ok(LockAttempt::Held);
        };
        if age <= stale_after {
            return Ok(LockAttempt::Held);
        }

        tracing::warn!(
            path = %path.display(),
            age_secs = age.as_secs(),
            "Removing stale submission lock"
        );
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(BatonError::io(format!("removing {}", path.display()), e)),
        }

        if Self::create(path)? {
            Ok(LockAttempt::Acquired(Self::guard(path)))
        } else {
            Ok(LockAttempt::Held)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(path: &Path) -> Self {
        tracing::debug!(path = %path.display(), "Submission lock acquired");
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Returns false if the file already exists.
    fn create(path: &Path) -> Result<bool> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(BatonError::io(format!("creating {}", path.display()), e)),
        }
    }
}

impl Drop for SubmissionLock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Submission lock released"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "Failed to release submission lock")
            }
        }
    }
}

fn lock_age(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO),
    )
}
