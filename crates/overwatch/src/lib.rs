//! # Overwatch
//!
//! Adaptive operations control plane for Kubernetes clusters.
//!
//! This crate provides:
//! - A circuit breaker guarding every call to the AI analysis provider
//! - A scheduler deciding when analysis runs (events, daily, periodic) under
//!   a shared rate limit
//! - Alert enrichment with correlation, noise scoring, suppression and priority
//! - A remediation engine that risk-scores suggested actions and executes them
//!   through a safety-checked command executor
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use overwatch::{AnalysisClient, CircuitBreaker, CliAnalysisProvider, OverwatchConfig};
//!
//! let config = OverwatchConfig::load(None)?;
//! let breaker = Arc::new(CircuitBreaker::new("analysis", config.breaker.clone()));
//! let provider = Arc::new(CliAnalysisProvider::new(config.provider.clone()));
//! let client = AnalysisClient::new(provider, breaker, config.provider.timeout());
//! ```

pub mod alerts;
pub mod breaker;
pub mod config;
pub mod error;
pub mod events;
pub mod exec;
pub mod health;
pub mod provider;
pub mod remediation;
pub mod scheduler;
pub mod tasks;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use alerts::{AlertInsights, AlertSeverity, BasicAlert, SmartAlert, SmartAlertManager};
pub use breaker::{BreakerError, BreakerStats, CircuitBreaker, CircuitState};
pub use config::OverwatchConfig;
pub use error::{ConfigError, ExecError, ProviderError, RemediationError, SafetyError};
pub use events::{AIEvent, EventSeverity, EventType};
pub use exec::{CommandExecutor, CommandPolicy, KubectlExecutor, PolicySafetyChecker, SafetyChecker};
pub use health::{CheckResult, HealthReport};
pub use provider::{
    AnalysisClient, AnalysisProvider, AnalysisRequest, AnalysisResponse, AnalysisType,
    CliAnalysisProvider,
};
pub use remediation::{RemediationAction, RemediationEngine, RemediationRecord};
pub use scheduler::{Insight, ScheduleStatus, Scheduler};
pub use tasks::TaskPool;
