//! Command-execution security boundary.
//!
//! Every cluster-mutating command passes two independent gates before it runs:
//! - the allow-list gate (designated binary, permitted verb, no scale-to-zero)
//! - the injection gate (no shell metacharacters, no path traversal)
//!
//! Commands then run as an argument vector against the binary directly.

pub mod kubectl;
pub mod safety;
pub mod sanitize;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{ExecError, SafetyError};
use crate::remediation::RemediationAction;

pub use kubectl::KubectlExecutor;
pub use safety::PolicySafetyChecker;
pub use sanitize::{CommandPolicy, SHELL_METACHARACTERS};

/// Runs commands against the cluster.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute a command and return its stdout.
    async fn execute(&self, cancel: &CancellationToken, command: &str) -> Result<String, ExecError>;

    /// Validate a command and report what would run, without running it.
    async fn dry_run(&self, cancel: &CancellationToken, command: &str) -> Result<String, ExecError>;
}

/// Decides whether actions and commands may run.
pub trait SafetyChecker: Send + Sync {
    /// `Ok(())` if the action may run, otherwise the reason it may not.
    fn is_safe(&self, action: &RemediationAction) -> Result<(), SafetyError>;

    /// Validate a single command.
    fn validate_command(&self, command: &str) -> Result<(), SafetyError>;
}
