use std::borrow::Cow;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use shell_escape::escape;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::ServiceConfig;
use crate::error::{BatonError, Result};
use crate::lifecycle::LifecycleRecord;
use crate::submit::template::substitute;

/// Hands this program back to the scheduler.
///
/// The `.submit` template is rendered against `$workdir` and the process
/// environment, then run through `sh -c` with a short batch script on its
/// stdin that re-invokes this executable as a continuation. Whatever the
/// command prints on stdout, trimmed, is the allocation id.
///
/// The script exports the resolved tunables before the re-invocation, so a
/// continuation runs with the settings of the launch that queued it.
#[derive(Debug, Clone)]
pub struct SubmissionGateway {
    workdir: PathBuf,
    template_path: PathBuf,
    program: PathBuf,
    exports: Vec<(&'static str, String)>,
}

impl SubmissionGateway {
    pub fn new(config: &ServiceConfig, program: impl Into<PathBuf>) -> Result<Self> {
        let workdir = std::path::absolute(&config.workdir)
            .map_err(|e| BatonError::io(format!("resolving {}", config.workdir.display()), e))?;
        Ok(Self {
            template_path: workdir.join(crate::config::SUBMIT_FILE),
            workdir,
            program: program.into(),
            exports: config.continuation_env(),
        })
    }

    /// Gateway that resubmits the currently running executable.
    pub fn for_current_exe(config: &ServiceConfig) -> Result<Self> {
        let program = std::env::current_exe()
            .map_err(|e| BatonError::io("locating current executable", e))?;
        Self::new(config, program)
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// `workdir` first, then the environment on top, so an exported
    /// `workdir` variable takes precedence.
    pub fn template_vars(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert(
            "workdir".to_string(),
            self.workdir.to_string_lossy().into_owned(),
        );
        vars.extend(std::env::vars());
        vars
    }

    /// Read `.submit` and resolve its placeholders.
    pub fn render_command(&self) -> Result<String> {
        let template = match std::fs::read_to_string(&self.template_path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BatonError::TemplateMissing(self.template_path.clone()))
            }
            Err(e) => {
                return Err(BatonError::io(
                    format!("reading {}", self.template_path.display()),
                    e,
                ))
            }
        };
        Ok(substitute(template.trim(), &self.template_vars()))
    }

    /// Script the scheduler runs inside the next allocation.
    pub fn batch_script(&self, debug: bool) -> String {
        let mut lines = vec!["#!/bin/bash".to_string()];
        lines.extend(
            self.exports
                .iter()
                .map(|(name, value)| format!("export {name}={}", quote_str(value))),
        );

        let mut command = vec![
            quote(&self.program),
            quote(&self.workdir),
            "--continuation".to_string(),
        ];
        if debug {
            command.push("--debug".to_string());
        }
        lines.push(command.join(" "));
        lines.push("exit $?".to_string());
        lines.join("\n")
    }

    /// Submit the next allocation and return its id.
    ///
    /// A failing submission command is not retried: a retry could queue a
    /// duplicate allocation if the first attempt partly succeeded.
    pub async fn submit(&self, record: &LifecycleRecord) -> Result<String> {
        let command = self.render_command()?;
        let script = self.batch_script(record.debug);
        tracing::debug!(%command, "Submission command");
        tracing::debug!(%script, "Submitting with batch script");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BatonError::io("spawning submission command", e))?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(script.as_bytes()).await {
                Ok(()) => {}
                // The command may legitimately ignore its input.
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                Err(e) => return Err(BatonError::io("writing batch script", e)),
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| BatonError::io("waiting for submission command", e))?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            tracing::error!(
                status = ?output.status.code(),
                %stderr,
                "Couldn't submit ourselves"
            );
            return Err(BatonError::SubmissionFailed {
                status: output.status.code(),
                stderr,
            });
        }

        let allocation_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if allocation_id.is_empty() {
            tracing::error!(%stderr, "Submission command printed no allocation id");
            return Err(BatonError::EmptyAllocationId);
        }

        tracing::debug!(%allocation_id, "Submission accepted");
        Ok(allocation_id)
    }
}

fn quote(path: &Path) -> String {
    quote_str(&path.to_string_lossy())
}

fn quote_str(value: &str) -> String {
    escape(Cow::Borrowed(value)).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(workdir: &str, program: &str) -> SubmissionGateway {
        SubmissionGateway::new(&ServiceConfig::new(workdir), program).unwrap()
    }

    #[test]
    fn batch_script_reinvokes_as_continuation() {
        let gw = gateway("/jobs/run1", "/opt/baton/bin/baton");
        assert_eq!(
            gw.batch_script(false),
            [
                "#!/bin/bash",
                "export BATON_SETTLE_SECS=300",
                "export BATON_JOB_FILE=baton.job",
                "export BATON_MARKER_SUFFIX=.result",
                "export BATON_LOCK_STALE_SECS=3600",
                "export BATON_PREEMPT_SIGNAL=usr1",
                "/opt/baton/bin/baton /jobs/run1 --continuation",
                "exit $?",
            ]
            .join("\n")
        );
    }

    #[test]
    fn batch_script_quotes_exported_values() {
        let config = ServiceConfig::new("/jobs/run1").with_job_file("my job.yaml");
        let gw = SubmissionGateway::new(&config, "baton").unwrap();
        assert!(gw
            .batch_script(false)
            .contains("\nexport BATON_JOB_FILE='my job.yaml'\n"));
    }

    #[test]
    fn batch_script_mirrors_debug() {
        let gw = gateway("/jobs/run1", "/opt/baton/bin/baton");
        assert!(gw
            .batch_script(true)
            .contains("/jobs/run1 --continuation --debug\n"));
    }

    #[test]
    fn batch_script_quotes_paths_with_spaces() {
        let gw = gateway("/jobs/my run", "/opt/baton/bin/baton");
        assert!(gw.batch_script(false).contains("'/jobs/my run' --continuation"));
    }

    #[test]
    fn template_vars_include_workdir() {
        let gw = gateway("/jobs/run1", "baton");
        let vars = gw.template_vars();
        assert!(vars.contains_key("workdir"));
        assert!(vars.contains_key("PATH"));
    }
}
