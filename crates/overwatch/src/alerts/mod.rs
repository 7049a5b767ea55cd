//! Alert enrichment.
//!
//! [`SmartAlertManager::process_alert`] turns a [`BasicAlert`] into a
//! [`SmartAlert`]: root cause and remediation text from the analysis
//! provider, then correlation, noise scoring, suppression, priority and
//! auto-resolve eligibility against the history as it stood before the alert
//! arrived. History and pattern tables are updated last.

pub mod history;
pub mod scoring;
pub mod suppression;
pub mod types;

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AlertConfig;
use crate::provider::{AnalysisProvider, AnalysisRequest, AnalysisType};

pub use history::AlertHistory;
pub use suppression::SuppressionRule;
pub use types::{AlertInsights, AlertPattern, AlertSeverity, BasicAlert, SmartAlert};

/// Root cause or impact when the provider cannot say.
pub const UNKNOWN: &str = "Unknown";

/// Window of recent alerts handed to the provider as context.
const CONTEXT_WINDOW: Duration = Duration::minutes(5);

#[derive(Debug)]
struct AlertState {
    history: AlertHistory,
    patterns: HashMap<String, AlertPattern>,
}

/// Enriches alerts and owns alert history.
pub struct SmartAlertManager {
    provider: Arc<dyn AnalysisProvider>,
    config: AlertConfig,
    rules: Vec<SuppressionRule>,
    state: Mutex<AlertState>,
}

impl SmartAlertManager {
    pub fn new(provider: Arc<dyn AnalysisProvider>, config: AlertConfig) -> Self {
        let rules = suppression::default_rules(Duration::seconds(config.duplicate_window_secs as i64));
        let history = AlertHistory::new(config.history_capacity);
        Self {
            provider,
            config,
            rules,
            state: Mutex::new(AlertState {
                history,
                patterns: HashMap::new(),
            }),
        }
    }

    /// Replace the suppression rules.
    #[must_use]
    pub fn with_rules(mut self, rules: Vec<SuppressionRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Append a suppression rule.
    pub fn add_rule(&mut self, rule: SuppressionRule) {
        self.rules.push(rule);
    }

    #[must_use]
    pub fn rules(&self) -> &[SuppressionRule] {
        &self.rules
    }

    fn correlation_window(&self) -> Duration {
        Duration::seconds(self.config.correlation_window_secs as i64)
    }

    /// Enrich an alert and record it.
    ///
    /// Provider failures degrade to `"Unknown"` root cause and empty
    /// remediation; this never fails.
    pub async fn process_alert(&self, cancel: &CancellationToken, alert: BasicAlert) -> SmartAlert {
        let recent = {
            let state = self.state.lock().await;
            state.history.recent(alert.timestamp, CONTEXT_WINDOW)
        };

        let (root_cause, impact) = self.root_cause(cancel, &alert, &recent).await;
        let (remediation, time_to_resolve_mins) = self.remediation(cancel, &alert, &root_cause).await;

        let mut enriched = SmartAlert {
            id: uuid::Uuid::new_v4().to_string(),
            name: alert.name,
            severity: alert.severity,
            message: alert.message,
            resource: alert.resource,
            timestamp: alert.timestamp,
            root_cause,
            impact,
            correlation: std::collections::BTreeSet::new(),
            suppressed: false,
            priority: 0,
            noise_score: 0.0,
            auto_resolve: false,
            remediation,
            time_to_resolve_mins,
        };

        let mut state = self.state.lock().await;
        let now = enriched.timestamp;

        enriched.correlation = scoring::correlate(&enriched, &state.history, self.correlation_window());
        let pattern = state.patterns.get(&enriched.name);
        enriched.noise_score = scoring::noise_score(&enriched, pattern, &state.history, now);

        let reason = suppression::suppression_reason(
            &enriched,
            &state.history,
            &self.rules,
            &self.config.noise_thresholds,
        );
        enriched.suppressed = reason.is_some();

        enriched.priority = scoring::priority(
            enriched.severity,
            enriched.noise_score,
            enriched.correlation.len(),
            pattern,
        );
        enriched.auto_resolve = scoring::auto_resolve_eligible(&enriched, &state.history, now);

        if let Some(reason) = reason {
            debug!(
                alert = %enriched.name,
                resource = %enriched.resource,
                rule = reason,
                noise = enriched.noise_score,
                "Alert suppressed"
            );
        } else {
            info!(
                alert = %enriched.name,
                resource = %enriched.resource,
                severity = %enriched.severity,
                priority = enriched.priority,
                correlated = enriched.correlation.len(),
                "Alert processed"
            );
        }

        update_pattern(&mut state.patterns, &enriched);
        state.history.push(enriched.clone());
        enriched
    }

    async fn root_cause(
        &self,
        cancel: &CancellationToken,
        alert: &BasicAlert,
        recent: &[SmartAlert],
    ) -> (String, String) {
        let mut context = format!(
            "Alert '{}' ({}) on {}: {}",
            alert.name, alert.severity, alert.resource, alert.message
        );
        if !recent.is_empty() {
            context.push_str("\n\nAlerts in the last 5 minutes:");
            for prior in recent {
                let _ = write!(
                    context,
                    "\n- {} {} on {}: {}",
                    prior.timestamp.format("%H:%M:%S"),
                    prior.name,
                    prior.resource,
                    prior.message
                );
            }
        }

        let request = AnalysisRequest::new(AnalysisType::RootCause, context);
        match self.provider.analyze(cancel, &request).await {
            Ok(response) => {
                let root_cause = [response.diagnosis.as_str(), response.summary.as_str()]
                    .into_iter()
                    .find(|s| !s.trim().is_empty())
                    .unwrap_or(UNKNOWN)
                    .to_string();
                let impact = if response.summary.trim().is_empty() {
                    UNKNOWN.to_string()
                } else {
                    response.summary
                };
                (root_cause, impact)
            }
            Err(e) => {
                warn!(alert = %alert.name, error = %e, "Root cause analysis failed");
                (UNKNOWN.to_string(), UNKNOWN.to_string())
            }
        }
    }

    async fn remediation(
        &self,
        cancel: &CancellationToken,
        alert: &BasicAlert,
        root_cause: &str,
    ) -> (String, Option<u64>) {
        let context = format!(
            "Suggest remediation for alert '{}' on {}: {}\nRoot cause: {root_cause}",
            alert.name, alert.resource, alert.message
        );
        let request = AnalysisRequest::new(AnalysisType::Remediation, context);
        match self.provider.analyze(cancel, &request).await {
            Ok(response) => {
                let text = if response.recommendations.is_empty() {
                    response.summary
                } else {
                    response.recommendations.join("; ")
                };
                (text, response.time_to_resolve_mins)
            }
            Err(e) => {
                debug!(alert = %alert.name, error = %e, "Remediation suggestion failed");
                (String::new(), None)
            }
        }
    }

    /// Alerts from the last `window`, newest first.
    pub async fn get_recent_alerts(&self, window: Duration) -> Vec<SmartAlert> {
        self.recent_alerts_at(Utc::now(), window).await
    }

    async fn recent_alerts_at(&self, now: DateTime<Utc>, window: Duration) -> Vec<SmartAlert> {
        self.state.lock().await.history.recent(now, window)
    }

    /// Pattern, noise and volume summary.
    pub async fn get_alert_insights(&self) -> AlertInsights {
        self.insights_at(Utc::now()).await
    }

    async fn insights_at(&self, now: DateTime<Utc>) -> AlertInsights {
        let state = self.state.lock().await;

        let top_patterns = scoring::identify_patterns(&state.patterns);
        let mut all: Vec<AlertPattern> = state.patterns.values().cloned().collect();
        all.sort_by(|a, b| a.frequency.cmp(&b.frequency).then_with(|| a.name.cmp(&b.name)));

        let mut alert_volume = std::collections::BTreeMap::new();
        for alert in state.history.since(now, Duration::hours(24)) {
            *alert_volume.entry(alert.severity).or_insert(0) += 1;
        }

        AlertInsights {
            predictions: scoring::predictions(&top_patterns),
            recommendations: scoring::frequency_recommendations(&all),
            noise_reduction: scoring::noise_reduction(&state.history, now),
            top_patterns,
            alert_volume,
        }
    }
}

fn update_pattern(patterns: &mut HashMap<String, AlertPattern>, alert: &SmartAlert) {
    patterns
        .entry(alert.name.clone())
        .and_modify(|p| {
            p.frequency = (alert.timestamp - p.last_seen).abs().to_std().unwrap_or_default();
            p.occurrences += 1;
            p.last_seen = p.last_seen.max(alert.timestamp);
            p.correlated_ids.extend(alert.correlation.iter().cloned());
        })
        .or_insert_with(|| AlertPattern {
            name: alert.name.clone(),
            occurrences: 1,
            last_seen: alert.timestamp,
            frequency: std::time::Duration::ZERO,
            correlated_ids: alert.correlation.clone(),
        });
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::AnalysisResponse;
    use crate::testing::ScriptedProvider;

    fn manager(provider: ScriptedProvider) -> (SmartAlertManager, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let manager = SmartAlertManager::new(provider.clone(), AlertConfig::default());
        (manager, provider)
    }

    fn diagnosis(text: &str) -> AnalysisResponse {
        AnalysisResponse {
            summary: "Checkout latency degraded".to_string(),
            diagnosis: text.to_string(),
            confidence: 0.9,
            recommendations: vec!["Increase memory limit".to_string()],
            time_to_resolve_mins: Some(15),
            ..AnalysisResponse::default()
        }
    }

    #[tokio::test]
    async fn test_enrichment_uses_provider() {
        let (manager, provider) = manager(ScriptedProvider::new(diagnosis("Memory leak")));
        let alert = BasicAlert::new("HighMemory", AlertSeverity::Error, "memory at 95%", "pod/api-0");

        let smart = manager.process_alert(&CancellationToken::new(), alert).await;
        assert_eq!(smart.root_cause, "Memory leak");
        assert_eq!(smart.impact, "Checkout latency degraded");
        assert_eq!(smart.remediation, "Increase memory limit");
        assert_eq!(smart.time_to_resolve_mins, Some(15));
        assert!(!smart.suppressed);
        // error +30, neutral noise 0.5 -> -15
        assert_eq!(smart.priority, 65);

        let kinds: Vec<AnalysisType> = provider.requests().iter().map(|r| r.analysis_type).collect();
        assert_eq!(kinds, vec![AnalysisType::RootCause, AnalysisType::Remediation]);
    }

    #[tokio::test]
    async fn test_provider_failure_degrades_to_unknown() {
        let (manager, _) = manager(ScriptedProvider::failing());
        let alert = BasicAlert::new("NodeDown", AlertSeverity::Critical, "node unreachable", "node/n1");

        let smart = manager.process_alert(&CancellationToken::new(), alert).await;
        assert_eq!(smart.root_cause, UNKNOWN);
        assert_eq!(smart.impact, UNKNOWN);
        assert!(smart.remediation.is_empty());
        assert_eq!(manager.state.lock().await.history.len(), 1);
    }

    #[tokio::test]
    async fn test_remediation_failure_keeps_root_cause() {
        let (manager, provider) = manager(
            ScriptedProvider::failing().with_response(AnalysisType::RootCause, diagnosis("Connection pool exhausted")),
        );
        let alert = BasicAlert::new("DbErrors", AlertSeverity::Error, "5xx from orders-db", "svc/orders");

        let smart = manager.process_alert(&CancellationToken::new(), alert).await;
        assert_eq!(smart.root_cause, "Connection pool exhausted");
        assert_eq!(smart.impact, "Checkout latency degraded");
        assert!(smart.remediation.is_empty());
        assert_eq!(smart.time_to_resolve_mins, None);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_second_identical_alert_suppressed() {
        let (manager, _) = manager(ScriptedProvider::failing());
        let cancel = CancellationToken::new();
        let now = Utc::now();

        let first = manager
            .process_alert(
                &cancel,
                BasicAlert::new("DiskFull", AlertSeverity::Error, "disk 99%", "node/n1")
                    .at(now - Duration::seconds(20)),
            )
            .await;
        let second = manager
            .process_alert(
                &cancel,
                BasicAlert::new("DiskFull", AlertSeverity::Error, "disk 99%", "node/n1").at(now),
            )
            .await;

        assert!(!first.suppressed);
        assert!(second.suppressed);
        assert!(second.correlation.contains(&first.id));
    }

    #[tokio::test]
    async fn test_pattern_tracking_and_insights() {
        let (manager, _) = manager(ScriptedProvider::failing());
        let cancel = CancellationToken::new();
        let start = Utc::now() - Duration::hours(1);

        for i in 0..7 {
            manager
                .process_alert(
                    &cancel,
                    BasicAlert::new("PodRestart", AlertSeverity::Warning, "restarted", format!("pod/api-{i}"))
                        .at(start + Duration::minutes(2 * i)),
                )
                .await;
        }

        let insights = manager.insights_at(start + Duration::minutes(20)).await;
        assert_eq!(insights.top_patterns.len(), 1);
        let pattern = &insights.top_patterns[0];
        assert_eq!(pattern.occurrences, 7);
        assert_eq!(pattern.frequency, std::time::Duration::from_secs(120));
        assert_eq!(insights.recommendations.len(), 1);
        assert_eq!(insights.predictions.len(), 1);
        assert_eq!(insights.alert_volume.get(&AlertSeverity::Warning), Some(&7));
    }

    #[tokio::test]
    async fn test_recent_alerts_descending() {
        let (manager, _) = manager(ScriptedProvider::failing());
        let cancel = CancellationToken::new();
        let now = Utc::now();
        for (name, mins) in [("a", 12), ("b", 1), ("c", 3)] {
            manager
                .process_alert(
                    &cancel,
                    BasicAlert::new(name, AlertSeverity::Info, "x", name).at(now - Duration::minutes(mins)),
                )
                .await;
        }

        let recent = manager.recent_alerts_at(now, Duration::minutes(10)).await;
        let names: Vec<&str> = recent.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_enrichment_reads_pre_update_state() {
        let (manager, _) = manager(ScriptedProvider::failing());
        let cancel = CancellationToken::new();
        let smart = manager
            .process_alert(&cancel, BasicAlert::new("Solo", AlertSeverity::Info, "x", "r"))
            .await;
        // first alert never correlates with itself
        assert!(smart.correlation.is_empty());
        assert!(!smart.auto_resolve);
    }
}
