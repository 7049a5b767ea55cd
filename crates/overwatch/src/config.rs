//! Configuration for the control plane.
//!
//! Values resolve in order: defaults, then an optional TOML file, then
//! `OVERWATCH_*` environment overrides. Components take owned copies, so a
//! config never changes after a component is built from it.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::alerts::AlertSeverity;
use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverwatchConfig {
    /// Circuit breaker around the analysis provider
    pub breaker: BreakerConfig,
    /// Analysis scheduling and rate limits
    pub scheduler: SchedulerConfig,
    /// Alert enrichment
    pub alerts: AlertConfig,
    /// Remediation engine
    pub remediation: RemediationConfig,
    /// Command execution boundary
    pub executor: ExecutorConfig,
    /// Analysis provider
    pub provider: ProviderConfig,
    /// Background task pool
    pub tasks: TaskPoolConfig,
}

impl OverwatchConfig {
    /// Load configuration from an optional TOML file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file. Missing keys fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    /// Parse TOML text.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `OVERWATCH_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Some(ns) = env_string("OVERWATCH_NAMESPACE") {
            self.executor.default_namespace = Some(ns);
        }
        if let Some(binary) = env_string("OVERWATCH_KUBECTL") {
            self.executor.binary = binary;
        }
        if let Some(dry_run) = env_bool("OVERWATCH_DRY_RUN") {
            self.remediation.dry_run = dry_run;
        }
        if let Some(max) = env_parse("OVERWATCH_MAX_DAILY_ANALYSES") {
            self.scheduler.max_daily_analyses = max;
        }
        if let Some(time) = env_string("OVERWATCH_DAILY_ANALYSIS_TIME") {
            self.scheduler.daily_analysis_time = time;
        }
        if let Some(secs) = env_parse("OVERWATCH_MIN_ANALYSIS_INTERVAL_SECS") {
            self.scheduler.min_analysis_interval_secs = secs;
        }
        if let Some(cli) = env_string("OVERWATCH_PROVIDER_CLI") {
            self.provider.cli = cli;
        }
        if let Some(max) = env_parse("OVERWATCH_BREAKER_MAX_FAILURES") {
            self.breaker.max_failures = max;
        }
    }

    /// Reject values the components cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.breaker.max_failures == 0 {
            return Err(ConfigError::invalid("breaker.max_failures", "must be > 0"));
        }
        self.scheduler.daily_time()?;
        if self.scheduler.event_queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "scheduler.event_queue_capacity",
                "must be > 0",
            ));
        }
        if self.scheduler.periodic_interval_secs == 0 || self.scheduler.batch_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "scheduler",
                "periodic and batch intervals must be > 0",
            ));
        }
        if !(0.0..=1.0).contains(&self.remediation.min_high_risk_confidence) {
            return Err(ConfigError::invalid(
                "remediation.min_high_risk_confidence",
                "must be within [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.scheduler.anomaly_threshold) {
            return Err(ConfigError::invalid(
                "scheduler.anomaly_threshold",
                "must be within [0, 1]",
            ));
        }
        if self.alerts.history_capacity == 0 || self.remediation.history_capacity == 0 {
            return Err(ConfigError::invalid(
                "history_capacity",
                "history capacities must be > 0",
            ));
        }
        if self.tasks.max_concurrent == 0 {
            return Err(ConfigError::invalid("tasks.max_concurrent", "must be > 0"));
        }
        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens
    pub max_failures: u32,
    /// Seconds the circuit stays open before a probe is allowed
    pub timeout_secs: u64,
    /// Seconds of quiet after which callers may reset counters
    pub reset_timeout_secs: u64,
    /// Count caller cancellations as failures
    pub count_cancellations: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            timeout_secs: 60,
            reset_timeout_secs: 30,
            count_cancellations: false,
        }
    }
}

impl BreakerConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }
}

/// Scheduling and rate-limit policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Wall-clock time of the daily comprehensive analysis (`HH:MM`, local)
    pub daily_analysis_time: String,
    /// Seconds between periodic health-trend analyses
    pub periodic_interval_secs: u64,
    /// Failure events in a batch that trigger analysis
    pub failure_threshold: usize,
    /// Anomaly score at or above which an anomaly event triggers analysis
    pub anomaly_threshold: f64,
    /// Minimum seconds between two runs of the same bucket
    pub min_analysis_interval_secs: u64,
    /// Maximum buckets that may run per calendar day
    pub max_daily_analyses: usize,
    /// Capacity of the event queue
    pub event_queue_capacity: usize,
    /// Seconds between batch flush ticks
    pub batch_interval_secs: u64,
    /// Run the daily analysis
    pub enable_daily: bool,
    /// Run the periodic analysis
    pub enable_periodic: bool,
    /// React to injected events
    pub enable_event_driven: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            daily_analysis_time: "09:00".to_string(),
            periodic_interval_secs: 3600,
            failure_threshold: 3,
            anomaly_threshold: 0.8,
            min_analysis_interval_secs: 300,
            max_daily_analyses: 10,
            event_queue_capacity: 100,
            batch_interval_secs: 60,
            enable_daily: true,
            enable_periodic: true,
            enable_event_driven: true,
        }
    }
}

impl SchedulerConfig {
    /// Parse `daily_analysis_time`.
    pub fn daily_time(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(&self.daily_analysis_time, "%H:%M").map_err(|e| {
            ConfigError::invalid(
                "scheduler.daily_analysis_time",
                format!("expected HH:MM, got '{}': {e}", self.daily_analysis_time),
            )
        })
    }

    #[must_use]
    pub fn periodic_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_interval_secs)
    }

    #[must_use]
    pub fn min_analysis_interval(&self) -> Duration {
        Duration::from_secs(self.min_analysis_interval_secs)
    }

    #[must_use]
    pub fn batch_interval(&self) -> Duration {
        Duration::from_secs(self.batch_interval_secs)
    }
}

/// Per-severity noise score above which an alert is suppressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseThresholds {
    pub info: Option<f64>,
    pub warning: Option<f64>,
    pub error: Option<f64>,
    pub critical: Option<f64>,
}

impl Default for NoiseThresholds {
    fn default() -> Self {
        Self {
            info: Some(0.8),
            warning: Some(0.6),
            error: None,
            critical: Some(0.3),
        }
    }
}

impl NoiseThresholds {
    #[must_use]
    pub fn for_severity(&self, severity: AlertSeverity) -> Option<f64> {
        match severity {
            AlertSeverity::Info => self.info,
            AlertSeverity::Warning => self.warning,
            AlertSeverity::Error => self.error,
            AlertSeverity::Critical => self.critical,
        }
    }
}

/// Alert enrichment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Alerts kept in history
    pub history_capacity: usize,
    /// Seconds around an alert scanned for correlations
    pub correlation_window_secs: u64,
    /// Seconds within which an identical alert counts as a duplicate
    pub duplicate_window_secs: u64,
    /// Suppression thresholds by severity
    pub noise_thresholds: NoiseThresholds,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            history_capacity: 1000,
            correlation_window_secs: 300,
            duplicate_window_secs: 60,
            noise_thresholds: NoiseThresholds::default(),
        }
    }
}

/// Remediation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediationConfig {
    /// Records kept in history
    pub history_capacity: usize,
    /// Only dry-run actions
    pub dry_run: bool,
    /// Confidence floor for high-risk actions
    pub min_high_risk_confidence: f64,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            dry_run: true,
            min_high_risk_confidence: 0.8,
        }
    }
}

/// Command execution boundary settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Binary every command must invoke
    pub binary: String,
    /// Seconds before a command is killed
    pub timeout_secs: u64,
    /// Namespace injected when a command carries none
    pub default_namespace: Option<String>,
    /// Verbs commands may use
    pub allowed_verbs: Vec<String>,
    /// Absolute paths must live under this prefix
    pub allowed_path_prefix: String,
}

/// Verbs allowed on the remediation path.
pub const DEFAULT_ALLOWED_VERBS: &[&str] = &[
    "get", "describe", "logs", "top", "scale", "restart", "rollout",
];

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            binary: "kubectl".to_string(),
            timeout_secs: 30,
            default_namespace: None,
            allowed_verbs: DEFAULT_ALLOWED_VERBS.iter().map(|v| (*v).to_string()).collect(),
            allowed_path_prefix: "/tmp/overwatch".to_string(),
        }
    }
}

impl ExecutorConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Analysis provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// AI CLI to invoke
    pub cli: String,
    /// Extra arguments placed before the prompt
    pub args: Vec<String>,
    /// Optional model override
    pub model: Option<String>,
    /// Seconds before an analysis request times out
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            cli: "claude".to_string(),
            args: vec!["-p".to_string(), "--output-format".to_string(), "text".to_string()],
            model: None,
            timeout_secs: 120,
        }
    }
}

impl ProviderConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Background task pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPoolConfig {
    /// Tasks allowed to run at once
    pub max_concurrent: usize,
    /// Seconds shutdown waits for in-flight tasks
    pub shutdown_grace_secs: u64,
}

impl Default for TaskPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            shutdown_grace_secs: 10,
        }
    }
}

impl TaskPoolConfig {
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
