//! Suppression rules.

use chrono::Duration;
use std::fmt;
use std::sync::Arc;

use super::history::AlertHistory;
use super::types::SmartAlert;
use crate::config::NoiseThresholds;

type Predicate = Arc<dyn Fn(&SmartAlert, &AlertHistory) -> bool + Send + Sync>;

/// A named predicate over an enriched alert and the history before it.
#[derive(Clone)]
pub struct SuppressionRule {
    name: String,
    predicate: Predicate,
}

impl SuppressionRule {
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&SmartAlert, &AlertHistory) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn matches(&self, alert: &SmartAlert, history: &AlertHistory) -> bool {
        (self.predicate)(alert, history)
    }

    /// Same name and resource already seen within `window`.
    #[must_use]
    pub fn duplicate_within(window: Duration) -> Self {
        Self::new("duplicate", move |alert, history| {
            history
                .same_source_since(&alert.name, &alert.resource, alert.timestamp, window)
                .any(|prior| prior.timestamp <= alert.timestamp)
        })
    }

    /// Noise score above `threshold`.
    #[must_use]
    pub fn noise_above(threshold: f64) -> Self {
        Self::new("noisy", move |alert, _| alert.noise_score > threshold)
    }
}

impl fmt::Debug for SuppressionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuppressionRule")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Rules applied when none are configured.
#[must_use]
pub fn default_rules(duplicate_window: Duration) -> Vec<SuppressionRule> {
    vec![
        SuppressionRule::duplicate_within(duplicate_window),
        SuppressionRule::noise_above(0.8),
    ]
}

/// Name of the first reason to suppress `alert`, if any.
///
/// Configured rules are checked first, then the severity's noise threshold.
#[must_use]
pub fn suppression_reason<'a>(
    alert: &SmartAlert,
    history: &AlertHistory,
    rules: &'a [SuppressionRule],
    thresholds: &NoiseThresholds,
) -> Option<&'a str> {
    if let Some(rule) = rules.iter().find(|r| r.matches(alert, history)) {
        return Some(rule.name());
    }
    thresholds
        .for_severity(alert.severity)
        .filter(|threshold| alert.noise_score > *threshold)
        .map(|_| "severity_threshold")
}
