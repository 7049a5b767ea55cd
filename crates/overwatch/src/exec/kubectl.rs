//! kubectl-backed command executor.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ExecutorConfig;
use crate::error::ExecError;

use super::sanitize::{has_namespace_flag, CommandPolicy};
use super::CommandExecutor;

/// Runs validated commands against the cluster binary as an argument vector.
pub struct KubectlExecutor {
    policy: CommandPolicy,
    default_namespace: Option<String>,
    timeout: Duration,
}

impl KubectlExecutor {
    #[must_use]
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            policy: CommandPolicy::from_config(config),
            default_namespace: config.default_namespace.clone(),
            timeout: config.timeout(),
        }
    }

    /// Validate a command and inject the default namespace when missing.
    pub fn prepare(&self, command: &str) -> Result<Vec<String>, ExecError> {
        let mut argv = self.policy.validate(command)?;
        if let Some(ns) = &self.default_namespace {
            if !has_namespace_flag(&argv) {
                argv.push("-n".to_string());
                argv.push(ns.clone());
            }
        }
        Ok(argv)
    }

    async fn run(&self, cancel: &CancellationToken, argv: &[String]) -> Result<String, ExecError> {
        let child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::select! {
            () = cancel.cancelled() => return Err(ExecError::Cancelled),
            output = tokio::time::timeout(self.timeout, child.wait_with_output()) => match output {
                Ok(output) => output?,
                Err(_) => return Err(ExecError::Timeout { secs: self.timeout.as_secs() }),
            },
        };

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(ExecError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl CommandExecutor for KubectlExecutor {
    async fn execute(&self, cancel: &CancellationToken, command: &str) -> Result<String, ExecError> {
        let argv = self.prepare(command)?;
        info!(command = %argv.join(" "), "Executing command");

        let result = self.run(cancel, &argv).await;
        match &result {
            Ok(_) => info!(command = %argv.join(" "), "Command succeeded"),
            Err(e) => warn!(command = %argv.join(" "), error = %e, "Command failed"),
        }
        result
    }

    async fn dry_run(&self, _cancel: &CancellationToken, command: &str) -> Result<String, ExecError> {
        let argv = self.prepare(command)?;
        debug!(command = %argv.join(" "), "Dry run");
        Ok(format!("[dry-run] {}", argv.join(" ")))
    }
}
