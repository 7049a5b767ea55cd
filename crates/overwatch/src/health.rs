//! Health-check results produced by the external check runner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::events::{AIEvent, EventSeverity, EventType};

/// Result of a single health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub healthy: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Vec<String>,
    #[serde(default)]
    pub critical: bool,
    #[serde(default = "Utc::now")]
    pub checked_at: DateTime<Utc>,
}

impl CheckResult {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy: true,
            message: String::new(),
            details: Vec::new(),
            critical: false,
            checked_at: Utc::now(),
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy: false,
            message: message.into(),
            details: Vec::new(),
            critical: false,
            checked_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }

    #[must_use]
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Whether the message or details mention `marker`.
    #[must_use]
    pub fn mentions(&self, marker: &str) -> bool {
        self.message.contains(marker) || self.details.iter().any(|d| d.contains(marker))
    }

    /// Convert an unhealthy result into a scheduler event.
    #[must_use]
    pub fn to_event(&self) -> Option<AIEvent> {
        if self.healthy {
            return None;
        }
        let event_type = if self.mentions("CrashLoopBackOff") {
            EventType::PodCrashLoop
        } else {
            EventType::HealthCheckFailed
        };
        let severity = if self.critical {
            EventSeverity::Critical
        } else {
            EventSeverity::High
        };
        Some(
            AIEvent::new(event_type, severity, self.name.clone(), self.message.clone())
                .with_metadata("details", serde_json::json!(self.details)),
        )
    }
}

/// A full round of health checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthReport {
    pub checks: HashMap<String, CheckResult>,
}

impl HealthReport {
    #[must_use]
    pub fn new(results: Vec<CheckResult>) -> Self {
        Self {
            checks: results.into_iter().map(|r| (r.name.clone(), r)).collect(),
        }
    }

    /// Unhealthy checks, sorted by name for stable output.
    #[must_use]
    pub fn unhealthy(&self) -> Vec<&CheckResult> {
        let mut failed: Vec<&CheckResult> = self.checks.values().filter(|c| !c.healthy).collect();
        failed.sort_by(|a, b| a.name.cmp(&b.name));
        failed
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.checks.values().all(|c| c.healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crash_loop_maps_to_event_type() {
        let check = CheckResult::unhealthy("pods", "2 pods failing")
            .with_details(vec!["api-7d9f: CrashLoopBackOff".to_string()]);
        let event = check.to_event().unwrap();
        assert_eq!(event.event_type, EventType::PodCrashLoop);
        assert_eq!(event.severity, EventSeverity::High);
    }

    #[test]
    fn test_critical_check_maps_to_critical_event() {
        let event = CheckResult::unhealthy("nodes", "node-1 NotReady")
            .critical()
            .to_event()
            .unwrap();
        assert_eq!(event.event_type, EventType::HealthCheckFailed);
        assert_eq!(event.severity, EventSeverity::Critical);
    }

    #[test]
    fn test_healthy_check_has_no_event() {
        assert!(CheckResult::healthy("dns").to_event().is_none());
    }

    #[test]
    fn test_report_unhealthy_sorted() {
        let report = HealthReport::new(vec![
            CheckResult::unhealthy("pods", "bad"),
            CheckResult::healthy("dns"),
            CheckResult::unhealthy("nodes", "bad"),
        ]);
        let names: Vec<&str> = report.unhealthy().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["nodes", "pods"]);
        assert!(!report.is_healthy());
    }
}
