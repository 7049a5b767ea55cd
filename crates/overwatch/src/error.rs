//! Error types for the control plane.
//!
//! Each boundary gets its own enum so callers can tell a circuit that is open
//! apart from a command that was refused or a provider that actually failed.

use thiserror::Error;

/// Errors returned by an analysis provider or the breaker-guarded client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The circuit breaker rejected the call without invoking the provider
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// The provider did not answer within the request timeout
    #[error("analysis timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The caller cancelled the request
    #[error("analysis cancelled")]
    Cancelled,

    /// The provider ran but reported a failure
    #[error("analysis provider failed: {details}")]
    Failed { details: String },

    /// The provider answered with something we could not parse
    #[error("failed to parse analysis response: {details}")]
    Parse { details: String },

    /// The provider binary or service is not available
    #[error("analysis provider unavailable: {details}")]
    Unavailable { details: String },
}

impl ProviderError {
    /// Check if this error came from caller-initiated cancellation.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Get error category as string
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::CircuitOpen => "circuit_open",
            Self::Timeout { .. } | Self::Cancelled => "cancellation",
            Self::Failed { .. } | Self::Unavailable { .. } => "provider_failure",
            Self::Parse { .. } => "parsing_failure",
        }
    }
}

/// Reasons a command or remediation action is refused before execution.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SafetyError {
    /// The command string was empty
    #[error("empty command")]
    Empty,

    /// The command does not invoke the designated binary
    #[error("command must start with '{expected}', got '{got}'")]
    WrongBinary { expected: String, got: String },

    /// The verb is not in the allow-list
    #[error("verb '{verb}' is not allowed")]
    NotAllowed { verb: String },

    /// An argument contains a shell metacharacter
    #[error("argument '{arg}' contains forbidden character '{ch}'")]
    Injection { arg: String, ch: char },

    /// An argument escapes the allowed path prefix
    #[error("argument '{arg}' contains a disallowed path")]
    PathTraversal { arg: String },

    /// Scaling a workload to zero replicas needs a separate approval path
    #[error("scaling to zero replicas is not allowed")]
    ScaleToZero,

    /// A high-risk action does not meet the confidence floor
    #[error("high-risk action requires confidence >= {required}, got {actual}")]
    HighRiskLowConfidence { required: f64, actual: f64 },

    /// Confidence outside `[0, 1]`
    #[error("confidence {value} is outside [0, 1]")]
    InvalidConfidence { value: f64 },

    /// The action carries no commands to run
    #[error("action has no commands")]
    NoCommands,

    /// The action must be approved before it can run for real
    #[error("action '{action_id}' requires approval")]
    ApprovalRequired { action_id: String },
}

/// Errors from executing a command against the cluster.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The command failed validation and never ran
    #[error("command rejected: {0}")]
    Rejected(#[from] SafetyError),

    /// The command exceeded its timeout
    #[error("command timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The caller cancelled the command
    #[error("command cancelled")]
    Cancelled,

    /// The command ran and exited unsuccessfully
    #[error("command failed (exit code {code:?}): {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    /// The binary could not be spawned
    #[error("failed to spawn command: {0}")]
    Spawn(#[from] std::io::Error),
}

impl ExecError {
    /// Check if this error came from caller-initiated cancellation.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if the command was refused before running.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Errors surfaced by the remediation engine.
#[derive(Error, Debug)]
pub enum RemediationError {
    /// The action failed the safety check
    #[error("remediation rejected: {0}")]
    Rejected(#[from] SafetyError),

    /// A command in the action failed
    #[error("remediation failed: {0}")]
    Execution(#[from] ExecError),

    /// The analysis provider could not produce actions
    #[error("remediation analysis failed: {0}")]
    Provider(#[from] ProviderError),

    /// No history record with this id
    #[error("unknown remediation record '{id}'")]
    UnknownRecord { id: String },
}

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for our schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_categories() {
        assert_eq!(ProviderError::CircuitOpen.category(), "circuit_open");
        assert_eq!(ProviderError::Cancelled.category(), "cancellation");
        assert_eq!(
            ProviderError::Failed {
                details: "boom".to_string()
            }
            .category(),
            "provider_failure"
        );
        assert!(ProviderError::Cancelled.is_cancellation());
        assert!(!ProviderError::Timeout { secs: 3 }.is_cancellation());
        assert!(ProviderError::Timeout { secs: 3 }.is_timeout());
    }

    #[test]
    fn test_circuit_open_message() {
        assert_eq!(
            ProviderError::CircuitOpen.to_string(),
            "circuit breaker is open"
        );
    }

    #[test]
    fn test_exec_error_from_safety() {
        let err: ExecError = SafetyError::ScaleToZero.into();
        assert!(err.is_rejection());
        assert!(!err.is_cancellation());
        assert!(err.to_string().contains("scaling to zero"));
    }
}
