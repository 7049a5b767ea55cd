//! Remediation engine.
//!
//! Turns provider suggestions into risk-scored [`RemediationAction`]s, drops
//! anything the [`SafetyChecker`] rejects, and executes the rest through the
//! [`CommandExecutor`] with rollback on first failure. Every execution attempt
//! leaves exactly one [`RemediationRecord`] in a bounded history.

pub mod rollback;
pub mod types;

use chrono::Utc;
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RemediationConfig;
use crate::error::{ExecError, RemediationError, SafetyError};
use crate::exec::{CommandExecutor, SafetyChecker};
use crate::health::HealthReport;
use crate::provider::{AnalysisProvider, AnalysisRequest, AnalysisResponse, AnalysisType, SuggestedAction};
use crate::tasks::TaskPool;

pub use types::{
    ActionType, RemediationAction, RemediationRecord, RemediationStats, RiskLevel, Rollback,
};

/// Health-check markers and the failure pattern each one names.
const FAILURE_MARKERS: [(&str, &str); 3] = [
    ("OOMKilled", "memory_issues"),
    ("CrashLoopBackOff", "crash_loops"),
    ("ImagePullBackOff", "image_issues"),
];

/// History records handed to the provider with recommendation requests.
const RECENT_RECORDS: usize = 10;

/// Generates, validates and executes remediation actions.
pub struct RemediationEngine {
    provider: Arc<dyn AnalysisProvider>,
    executor: Arc<dyn CommandExecutor>,
    safety: Arc<dyn SafetyChecker>,
    config: RemediationConfig,
    history: RwLock<VecDeque<RemediationRecord>>,
    pool: TaskPool,
}

impl RemediationEngine {
    pub fn new(
        provider: Arc<dyn AnalysisProvider>,
        executor: Arc<dyn CommandExecutor>,
        safety: Arc<dyn SafetyChecker>,
        config: RemediationConfig,
        pool: TaskPool,
    ) -> Self {
        let capacity = config.history_capacity.max(1);
        Self {
            provider,
            executor,
            safety,
            config,
            history: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            pool,
        }
    }

    /// Ask the provider for healing steps and keep the ones that pass the safety check.
    pub async fn generate_remediation(
        &self,
        cancel: &CancellationToken,
        issue: &str,
        diagnostic_context: serde_json::Value,
    ) -> Result<Vec<RemediationAction>, RemediationError> {
        let request = AnalysisRequest::new(
            AnalysisType::Healing,
            format!("Propose safe, minimal kubectl remediation steps for this issue:\n{issue}"),
        )
        .with_data(diagnostic_context);

        let response = self.provider.analyze(cancel, &request).await?;

        let mut actions = Vec::with_capacity(response.actions.len());
        for suggested in response.actions {
            let action = build_action(suggested);
            match self.safety.is_safe(&action) {
                Ok(()) => actions.push(action),
                Err(reason) => warn!(
                    action = %action.action_type,
                    description = %action.description,
                    %reason,
                    "Dropping unsafe remediation action"
                ),
            }
        }

        info!(issue = %issue, actions = actions.len(), "Generated remediation actions");
        Ok(actions)
    }

    /// Execute an action.
    ///
    /// Runs as a dry run when `dry_run` is set or remediation is configured
    /// dry-run only. An action that requires approval is rejected unless it
    /// is a dry run; use [`Self::execute_approved`] once it is approved.
    pub async fn execute_remediation(
        &self,
        cancel: &CancellationToken,
        action: &RemediationAction,
        dry_run: bool,
    ) -> Result<RemediationRecord, RemediationError> {
        self.run_action(cancel, action, dry_run, false).await
    }

    /// Execute an action an operator has approved.
    pub async fn execute_approved(
        &self,
        cancel: &CancellationToken,
        action: &RemediationAction,
    ) -> Result<RemediationRecord, RemediationError> {
        self.run_action(cancel, action, false, true).await
    }

    async fn run_action(
        &self,
        cancel: &CancellationToken,
        action: &RemediationAction,
        dry_run: bool,
        approved: bool,
    ) -> Result<RemediationRecord, RemediationError> {
        let dry_run = dry_run || self.config.dry_run;
        let mut record = RemediationRecord {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            problem: action.description.clone(),
            action: action.clone(),
            result: String::new(),
            success: false,
            dry_run,
            rollback_cmd: action.rollback.as_ref().map(|r| r.command.clone()),
            rolled_back: false,
        };

        let gate = if !dry_run && action.requires_approval && !approved {
            Err(SafetyError::ApprovalRequired {
                action_id: action.id.clone(),
            })
        } else {
            self.safety.is_safe(action)
        };
        if let Err(reason) = gate {
            warn!(action_id = %action.id, %reason, "Remediation rejected");
            record.result = format!("rejected: {reason}");
            self.append(record).await;
            return Err(reason.into());
        }

        info!(
            action_id = %action.id,
            action = %action.action_type,
            risk = %action.risk,
            dry_run,
            "Executing remediation"
        );

        let mut outputs = Vec::with_capacity(action.commands.len());
        let mut failure: Option<ExecError> = None;
        for command in &action.commands {
            let result = if dry_run {
                self.executor.dry_run(cancel, command).await
            } else {
                self.executor.execute(cancel, command).await
            };
            match result {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    error!(action_id = %action.id, command = %command, error = %e, "Remediation command failed");
                    outputs.push(format!("{command}: {e}"));
                    failure = Some(e);
                    break;
                }
            }
        }

        record.result = outputs.join("\n");
        record.success = failure.is_none();

        if let Some(e) = &failure {
            if !dry_run && !e.is_cancellation() {
                record.rolled_back = self.roll_back(cancel, action).await;
            }
        }

        self.append(record.clone()).await;

        match failure {
            Some(e) if e.is_cancellation() => Err(e.into()),
            _ => Ok(record),
        }
    }

    /// Attempt the action's rollback once. Errors are logged, never raised.
    async fn roll_back(&self, cancel: &CancellationToken, action: &RemediationAction) -> bool {
        let Some(rollback) = &action.rollback else {
            return false;
        };
        if rollback.requires_manual_value {
            warn!(
                action_id = %action.id,
                rollback = %rollback.command,
                "Rollback needs a manual value, skipping automatic rollback"
            );
            return false;
        }
        if let Err(reason) = self.safety.validate_command(&rollback.command) {
            error!(
                action_id = %action.id,
                rollback = %rollback.command,
                %reason,
                "Rollback rejected by safety policy"
            );
            return false;
        }

        match self.executor.execute(cancel, &rollback.command).await {
            Ok(_) => {
                info!(action_id = %action.id, rollback = %rollback.command, "Rolled back remediation");
                true
            }
            Err(e) => {
                error!(action_id = %action.id, rollback = %rollback.command, error = %e, "Rollback failed");
                false
            }
        }
    }

    async fn append(&self, record: RemediationRecord) {
        let mut history = self.history.write().await;
        if history.len() >= self.config.history_capacity.max(1) {
            history.pop_front();
        }
        history.push_back(record);
    }

    /// Ask the provider for proactive actions given current failure patterns.
    pub async fn get_smart_recommendations(
        &self,
        cancel: &CancellationToken,
        health: &HealthReport,
    ) -> Result<AnalysisResponse, RemediationError> {
        let patterns = failure_patterns(health);
        let recent: Vec<serde_json::Value> = {
            let history = self.history.read().await;
            history
                .iter()
                .rev()
                .take(RECENT_RECORDS)
                .map(|r| {
                    json!({
                        "type": r.action.action_type.as_str(),
                        "problem": r.problem,
                        "success": r.success,
                        "rolled_back": r.rolled_back,
                        "timestamp": r.timestamp,
                    })
                })
                .collect()
        };

        debug!(patterns = patterns.len(), history = recent.len(), "Requesting smart recommendations");

        let request = AnalysisRequest::new(
            AnalysisType::Recommendations,
            "Recommend proactive actions for the failure patterns below, taking past remediations into account.",
        )
        .with_data(json!({
            "patterns": patterns,
            "recent_remediations": recent,
        }));

        self.provider
            .analyze(cancel, &request)
            .await
            .map_err(RemediationError::from)
    }

    /// Send outcome feedback for a past remediation in the background.
    ///
    /// Returns as soon as the record is found; provider errors are only logged.
    pub async fn learn_from_outcome(
        &self,
        record_id: &str,
        outcome: &str,
        successful: bool,
    ) -> Result<(), RemediationError> {
        let record = self
            .record(record_id)
            .await
            .ok_or_else(|| RemediationError::UnknownRecord {
                id: record_id.to_string(),
            })?;

        let request = AnalysisRequest::new(
            AnalysisType::Feedback,
            format!(
                "Remediation '{}' for '{}' finished. Outcome: {outcome}",
                record.action.description, record.problem
            ),
        )
        .with_data(json!({
            "record_id": record.id,
            "action": record.action,
            "successful": successful,
        }));

        let provider = Arc::clone(&self.provider);
        let cancel = self.pool.cancellation();
        self.pool.spawn("remediation-feedback", async move {
            if let Err(e) = provider.analyze(&cancel, &request).await {
                debug!(record_id = %record.id, error = %e, "Outcome feedback not delivered");
            }
        });
        Ok(())
    }

    /// Look up a history record.
    pub async fn record(&self, id: &str) -> Option<RemediationRecord> {
        self.history.read().await.iter().find(|r| r.id == id).cloned()
    }

    /// Remediation history, oldest first.
    pub async fn history(&self) -> Vec<RemediationRecord> {
        self.history.read().await.iter().cloned().collect()
    }

    pub async fn get_remediation_stats(&self) -> RemediationStats {
        let history = self.history.read().await;
        let mut stats = RemediationStats {
            total: history.len(),
            ..RemediationStats::default()
        };
        let mut by_type = BTreeMap::new();
        for record in history.iter() {
            if record.success {
                stats.successful += 1;
            } else {
                stats.failed += 1;
            }
            if record.rolled_back {
                stats.rolled_back += 1;
            }
            *by_type.entry(record.action.action_type.to_string()).or_insert(0) += 1;
        }
        stats.by_type = by_type;
        if stats.total > 0 {
            stats.success_rate = stats.successful as f64 / stats.total as f64;
        }
        stats
    }
}

/// Score a provider suggestion into an action.
#[must_use]
pub fn build_action(suggested: SuggestedAction) -> RemediationAction {
    let action_type = ActionType::parse(&suggested.action_type);
    let risk = action_type.risk();
    let rollback = suggested.commands.first().and_then(|c| rollback::synthesize(c));
    RemediationAction {
        id: uuid::Uuid::new_v4().to_string(),
        impact: action_type.impact().to_string(),
        requires_approval: risk == RiskLevel::High || suggested.requires_approval,
        action_type,
        description: suggested.description,
        commands: suggested.commands,
        risk,
        confidence: suggested.confidence,
        rollback,
    }
}

/// Named failure patterns in a health report, each with the checks showing it.
#[must_use]
pub fn failure_patterns(health: &HealthReport) -> BTreeMap<&'static str, Vec<String>> {
    let mut patterns: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
    for check in health.unhealthy() {
        for (marker, pattern) in FAILURE_MARKERS {
            if check.mentions(marker) {
                patterns.entry(pattern).or_default().push(check.name.clone());
            }
        }
    }
    patterns
}
