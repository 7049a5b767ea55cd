//! Alert data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw alert as produced by a health check or external source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAlert {
    pub name: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub resource: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl BasicAlert {
    pub fn new(
        name: impl Into<String>,
        severity: AlertSeverity,
        message: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            severity,
            message: message.into(),
            resource: resource.into(),
            timestamp: Utc::now(),
            labels: HashMap::new(),
        }
    }

    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// An alert after enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartAlert {
    pub id: String,
    pub name: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub resource: String,
    pub timestamp: DateTime<Utc>,
    pub root_cause: String,
    pub impact: String,
    /// Ids of history alerts believed to share a cause
    pub correlation: BTreeSet<String>,
    pub suppressed: bool,
    /// 1 (lowest) to 100 (highest)
    pub priority: u8,
    /// 0 (signal) to 1 (noise)
    pub noise_score: f64,
    pub auto_resolve: bool,
    pub remediation: String,
    pub time_to_resolve_mins: Option<u64>,
}

impl SmartAlert {
    /// Whether two alerts share name and resource.
    #[must_use]
    pub fn same_source(&self, name: &str, resource: &str) -> bool {
        self.name == name && self.resource == resource
    }
}

/// Aggregate over every alert with the same name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPattern {
    pub name: String,
    pub occurrences: u64,
    pub last_seen: DateTime<Utc>,
    /// Most recent inter-arrival time; zero until a second occurrence
    #[serde(with = "duration_secs")]
    pub frequency: Duration,
    pub correlated_ids: BTreeSet<String>,
}

impl AlertPattern {
    /// Whether an inter-arrival time has been measured.
    #[must_use]
    pub fn has_frequency(&self) -> bool {
        self.occurrences >= 2
    }
}

/// Summary of alert history for dashboards.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AlertInsights {
    /// Patterns with more than five occurrences, most frequent first
    pub top_patterns: Vec<AlertPattern>,
    pub predictions: Vec<String>,
    pub recommendations: Vec<String>,
    /// Fraction of the last 24h of alerts that were suppressed
    pub noise_reduction: f64,
    /// Alerts in the last 24h by severity
    pub alert_volume: BTreeMap<AlertSeverity, usize>,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
