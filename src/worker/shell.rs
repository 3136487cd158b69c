use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tempfile::NamedTempFile;
use tokio::process::Command;

use crate::config::ServiceConfig;
use crate::error::{BatonError, Result};
use crate::store::{JobUnit, WorkItem};
use crate::submit::template::substitute_names;
use crate::worker::processor::{ItemProcessor, DEFAULT_GROUP};

/// Descriptor key holding the per-item shell command.
pub const COMMAND_PARAM: &str = "command";
/// Descriptor key used as the group key.
pub const GROUP_PARAM: &str = "group";

/// Runs the job's `command` parameter through `sh -c` for every item.
///
/// `$item`, `$input`, `$jobdir` and `$workdir` are substituted before the
/// shell sees the command; anything else (`$HOME`, `$1`, `$$`) is left for
/// the shell. The command runs inside the job folder and its stdout becomes
/// the completion marker, written only when the command exits 0.
///
/// Each item runs in its own process group. If the item is abandoned, for
/// instance at a preemption handoff, the whole group is killed so nothing it
/// started keeps running on the allocation.
#[derive(Debug, Clone)]
pub struct ShellProcessor {
    workdir: PathBuf,
}

impl ShellProcessor {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            workdir: config.workdir.clone(),
        }
    }

    fn render(&self, job: &JobUnit, item: &WorkItem, command: &str) -> String {
        let mut vars = HashMap::new();
        vars.insert("item".to_string(), item.name.clone());
        vars.insert("input".to_string(), item.path.to_string_lossy().into_owned());
        vars.insert("jobdir".to_string(), job.jobdir.to_string_lossy().into_owned());
        vars.insert("workdir".to_string(), self.workdir.to_string_lossy().into_owned());
        substitute_names(command, &vars)
    }

    fn write_marker(item: &WorkItem, contents: &[u8]) -> Result<()> {
        let dir = item
            .marker
            .parent()
            .ok_or_else(|| BatonError::Processor(format!("marker {} has no parent", item.marker.display())))?;
        let mut tmp = NamedTempFile::new_in(dir)
            .map_err(|e| BatonError::io(format!("creating temp file in {}", dir.display()), e))?;
        tmp.write_all(contents)
            .map_err(|e| BatonError::io("writing completion marker", e))?;
        tmp.persist(&item.marker)
            .map_err(|e| BatonError::io(format!("persisting {}", item.marker.display()), e.error))?;
        Ok(())
    }
}

/// Kills an item's process group when dropped before the item finished.
struct ProcessGroup {
    pgid: Option<Pid>,
}

impl ProcessGroup {
    /// The child was started with `process_group(0)`, so its pid is the pgid.
    fn of(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|id| i32::try_from(id).ok()).map(Pid::from_raw),
        }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            tracing::warn!(pgid = pgid.as_raw(), "Killing abandoned item");
            if let Err(e) = killpg(pgid, Signal::SIGKILL) {
                tracing::debug!(pgid = pgid.as_raw(), error = %e, "Item process group already gone");
            }
        }
    }
}

impl ItemProcessor for ShellProcessor {
    fn group_key(&self, job: &JobUnit) -> String {
        job.param_str(GROUP_PARAM)
            .unwrap_or(DEFAULT_GROUP)
            .to_string()
    }

    async fn process(&mut self, job: &JobUnit, item: &WorkItem) -> Result<()> {
        let template = job.param_str(COMMAND_PARAM).ok_or_else(|| {
            BatonError::Processor(format!("job {} has no '{COMMAND_PARAM}' parameter", job.name()))
        })?;
        let command = self.render(job, item, template);
        tracing::info!(job = %job.name(), item = %item.name, %command, "Executing item");

        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&job.jobdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BatonError::io("spawning item command", e))?;
        let mut group = ProcessGroup::of(child.id());

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| BatonError::io("waiting for item command", e))?;
        group.disarm();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BatonError::Processor(if stderr.trim().is_empty() {
                format!("Exit code: {:?}", output.status.code())
            } else {
                stderr.trim().to_string()
            }));
        }

        Self::write_marker(item, &output.stdout)
    }
}
