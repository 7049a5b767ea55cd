//! Remediation actions and history records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of remediation action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Restart,
    Scale,
    Configuration,
    Investigate,
    #[serde(untagged)]
    Other(String),
}

impl ActionType {
    /// Parse the provider's free-form action type.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "restart" => Self::Restart,
            "scale" => Self::Scale,
            "configuration" | "config" => Self::Configuration,
            "investigate" | "investigation" => Self::Investigate,
            other => Self::Other(other.to_string()),
        }
    }

    /// Risk implied by the action type.
    #[must_use]
    pub fn risk(&self) -> RiskLevel {
        match self {
            Self::Restart | Self::Scale | Self::Other(_) => RiskLevel::Medium,
            Self::Configuration => RiskLevel::High,
            Self::Investigate => RiskLevel::Low,
        }
    }

    /// Human-readable impact of running this kind of action.
    #[must_use]
    pub fn impact(&self) -> &'static str {
        match self {
            Self::Restart => "Pods will be restarted; brief service interruption possible",
            Self::Scale => "Replica count changes; resource usage and capacity will shift",
            Self::Configuration => "Configuration change may alter application behavior",
            Self::Investigate => "Read-only investigation; no impact on running workloads",
            Self::Other(_) => "Impact unknown; review before executing",
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Restart => "restart",
            Self::Scale => "scale",
            Self::Configuration => "configuration",
            Self::Investigate => "investigate",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk of running an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(name)
    }
}

/// Best-effort undo command for an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rollback {
    pub command: String,
    /// The command holds a placeholder an operator must fill in
    pub requires_manual_value: bool,
}

/// A risk-scored, validated remediation step. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationAction {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub description: String,
    pub commands: Vec<String>,
    pub risk: RiskLevel,
    pub confidence: f64,
    pub impact: String,
    pub rollback: Option<Rollback>,
    pub requires_approval: bool,
}

impl RemediationAction {
    /// Primary command, if any.
    #[must_use]
    pub fn primary_command(&self) -> Option<&str> {
        self.commands.first().map(String::as_str)
    }
}

/// Immutable history entry for one remediation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub problem: String,
    pub action: RemediationAction,
    /// Combined command output or failure reason
    pub result: String,
    pub success: bool,
    pub dry_run: bool,
    pub rollback_cmd: Option<String>,
    pub rolled_back: bool,
}

/// Aggregates over remediation history.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RemediationStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub rolled_back: usize,
    pub success_rate: f64,
    pub by_type: std::collections::BTreeMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_by_type() {
        assert_eq!(ActionType::parse("restart").risk(), RiskLevel::Medium);
        assert_eq!(ActionType::parse("Scale").risk(), RiskLevel::Medium);
        assert_eq!(ActionType::parse("configuration").risk(), RiskLevel::High);
        assert_eq!(ActionType::parse("investigate").risk(), RiskLevel::Low);
        assert_eq!(ActionType::parse("drain").risk(), RiskLevel::Medium);
    }

    #[test]
    fn test_unknown_type_round_trips_name() {
        let action_type = ActionType::parse("cordon");
        assert_eq!(action_type, ActionType::Other("cordon".to_string()));
        assert_eq!(action_type.to_string(), "cordon");
        assert!(action_type.impact().contains("unknown"));
    }
}
