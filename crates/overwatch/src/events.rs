//! Events that feed the scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Event severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Kind of event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A health check reported unhealthy
    HealthCheckFailed,
    /// A pod is in `CrashLoopBackOff`
    PodCrashLoop,
    /// An anomaly detector fired
    AnomalyDetected,
    /// Resource pressure (CPU, memory, disk)
    ResourcePressure,
    /// Anything else an injector wants to report
    #[serde(untagged)]
    Other(String),
}

impl EventType {
    /// Whether this event type counts toward the failure threshold.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::HealthCheckFailed | Self::PodCrashLoop)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::HealthCheckFailed => "health_check_failed",
            Self::PodCrashLoop => "pod_crash_loop",
            Self::AnomalyDetected => "anomaly_detected",
            Self::ResourcePressure => "resource_pressure",
            Self::Other(name) => name,
        }
    }
}

/// A signal that may warrant analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub severity: EventSeverity,
    pub source: String,
    pub description: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl AIEvent {
    /// Create an event stamped now.
    pub fn new(
        event_type: EventType,
        severity: EventSeverity,
        source: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            severity,
            source: source.into(),
            description: description.into(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Attach a metadata value.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Anomaly score from metadata, if present.
    #[must_use]
    pub fn anomaly_score(&self) -> Option<f64> {
        self.metadata.get("score").and_then(serde_json::Value::as_f64)
    }
}
