//! Analysis provider interface and the breaker-guarded client.
//!
//! The core never looks at how a provider reasons; it only sends an
//! [`AnalysisRequest`] and reads back an [`AnalysisResponse`]. Production wires
//! a [`CliAnalysisProvider`] behind an [`AnalysisClient`], which adds the
//! circuit breaker, the per-request timeout and cancellation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::breaker::{BreakerError, BreakerStats, CircuitBreaker};
use crate::config::ProviderConfig;
use crate::error::ProviderError;

/// Kind of analysis being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    /// Once-a-day comprehensive review
    Comprehensive,
    /// Lightweight periodic trend check
    HealthTrend,
    /// Triggered by a batch of events
    EventDriven,
    /// Root cause of an alert
    RootCause,
    /// Remediation text for an alert
    Remediation,
    /// Actionable healing steps for an issue
    Healing,
    /// Proactive recommendations from failure patterns
    Recommendations,
    /// Outcome feedback for a past remediation
    Feedback,
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Comprehensive => "comprehensive",
            Self::HealthTrend => "health_trend",
            Self::EventDriven => "event_driven",
            Self::RootCause => "root_cause",
            Self::Remediation => "remediation",
            Self::Healing => "healing",
            Self::Recommendations => "recommendations",
            Self::Feedback => "feedback",
        };
        f.write_str(name)
    }
}

/// Request sent to a provider.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    pub analysis_type: AnalysisType,
    /// Free-form context for the provider
    pub context: String,
    /// Structured payload
    pub data: serde_json::Value,
    /// Overrides the client's default timeout
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl AnalysisRequest {
    pub fn new(analysis_type: AnalysisType, context: impl Into<String>) -> Self {
        Self {
            analysis_type,
            context: context.into(),
            data: serde_json::Value::Null,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// An action suggested by the provider, before risk scoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestedAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub description: String,
    pub commands: Vec<String>,
    pub confidence: f64,
    pub requires_approval: bool,
}

/// Response from a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisResponse {
    pub summary: String,
    pub diagnosis: String,
    pub confidence: f64,
    pub severity: String,
    pub recommendations: Vec<String>,
    pub actions: Vec<SuggestedAction>,
    /// Provider's estimate of minutes to resolve
    pub time_to_resolve_mins: Option<u64>,
}

impl AnalysisResponse {
    /// Wrap plain text that was not valid JSON.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        Self {
            summary: text.trim().to_string(),
            confidence: 0.5,
            ..Self::default()
        }
    }

    /// Clamp confidence into `[0, 1]`.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.confidence = self.confidence.clamp(0.0, 1.0);
        for action in &mut self.actions {
            action.confidence = action.confidence.clamp(0.0, 1.0);
        }
        self
    }
}

/// Anything that can analyse cluster state.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Run an analysis. Implementations should stop early when `cancel` fires.
    async fn analyze(
        &self,
        cancel: &CancellationToken,
        request: &AnalysisRequest,
    ) -> Result<AnalysisResponse, ProviderError>;
}

/// Provider wrapped in a circuit breaker and a per-request timeout.
pub struct AnalysisClient {
    provider: Arc<dyn AnalysisProvider>,
    breaker: Arc<CircuitBreaker>,
    default_timeout: Duration,
}

impl AnalysisClient {
    pub fn new(
        provider: Arc<dyn AnalysisProvider>,
        breaker: Arc<CircuitBreaker>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            breaker,
            default_timeout,
        }
    }

    /// The breaker guarding this client.
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Breaker state and counters.
    pub async fn circuit_breaker_stats(&self) -> BreakerStats {
        self.breaker.stats().await
    }
}

#[async_trait]
impl AnalysisProvider for AnalysisClient {
    fn name(&self) -> &str {
        self.provider.name()
    }

    async fn analyze(
        &self,
        cancel: &CancellationToken,
        request: &AnalysisRequest,
    ) -> Result<AnalysisResponse, ProviderError> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let child = cancel.child_token();
        let provider = Arc::clone(&self.provider);

        let result = self
            .breaker
            .execute(|| async {
                tokio::select! {
                    () = child.cancelled() => Err(ProviderError::Cancelled),
                    outcome = tokio::time::timeout(timeout, provider.analyze(&child, request)) => {
                        outcome.unwrap_or(Err(ProviderError::Timeout { secs: timeout.as_secs() }))
                    }
                }
            })
            .await;

        match result {
            Ok(response) => Ok(response.normalized()),
            Err(BreakerError::Open) => Err(ProviderError::CircuitOpen),
            Err(BreakerError::Inner(e)) => {
                debug!(provider = %self.provider.name(), analysis = %request.analysis_type, error = %e, "Analysis failed");
                Err(e)
            }
        }
    }
}

/// Provider that shells out to an AI CLI.
///
/// The prompt is passed as the final argument after `--`, never through a shell.
pub struct CliAnalysisProvider {
    config: ProviderConfig,
}

impl CliAnalysisProvider {
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, prompt: &str) -> Vec<String> {
        let mut args = self.config.args.clone();
        if let Some(model) = &self.config.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.push("--".to_string());
        args.push(prompt.to_string());
        args
    }
}

/// Render a request into the prompt handed to the CLI.
#[must_use]
pub fn render_prompt(request: &AnalysisRequest) -> String {
    let mut prompt = format!(
        "You are a Kubernetes operations analyst. Task: {} analysis.\n\n{}\n",
        request.analysis_type, request.context
    );
    if !request.data.is_null() {
        prompt.push_str("\nData:\n");
        prompt.push_str(&request.data.to_string());
        prompt.push('\n');
    }
    prompt.push_str(
        "\nRespond with JSON only: {\"summary\", \"diagnosis\", \"confidence\", \"severity\", \
         \"recommendations\": [..], \"actions\": [{\"type\", \"description\", \"commands\": [..], \
         \"confidence\", \"requires_approval\"}], \"time_to_resolve_mins\"}",
    );
    prompt
}

/// Parse provider output, accepting fenced JSON and falling back to plain text.
#[must_use]
pub fn parse_analysis_response(text: &str) -> AnalysisResponse {
    let text = text.trim();
    let json_text = if let Some(rest) = text.strip_prefix("```json") {
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else if let Some(rest) = text.strip_prefix("```") {
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else {
        text
    };

    match serde_json::from_str::<AnalysisResponse>(json_text) {
        Ok(response) => response.normalized(),
        Err(e) => {
            debug!(error = %e, "Analysis output is not JSON, using as summary");
            AnalysisResponse::from_text(text)
        }
    }
}

#[async_trait]
impl AnalysisProvider for CliAnalysisProvider {
    fn name(&self) -> &str {
        &self.config.cli
    }

    async fn analyze(
        &self,
        cancel: &CancellationToken,
        request: &AnalysisRequest,
    ) -> Result<AnalysisResponse, ProviderError> {
        let prompt = render_prompt(request);
        let args = self.build_args(&prompt);

        debug!(cli = %self.config.cli, analysis = %request.analysis_type, "Running analysis CLI");

        let child = Command::new(&self.config.cli)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProviderError::Unavailable {
                details: format!("{}: {e}", self.config.cli),
            })?;

        let output = tokio::select! {
            () = cancel.cancelled() => return Err(ProviderError::Cancelled),
            output = child.wait_with_output() => output.map_err(|e| ProviderError::Failed {
                details: e.to_string(),
            })?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(cli = %self.config.cli, status = ?output.status.code(), "Analysis CLI failed");
            return Err(ProviderError::Failed {
                details: stderr.trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Err(ProviderError::Parse {
                details: "empty output".to_string(),
            });
        }
        Ok(parse_analysis_response(&stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitState;
    use crate::config::BreakerConfig;
    use crate::testing::ScriptedProvider;

    fn client(provider: Arc<ScriptedProvider>, max_failures: u32) -> AnalysisClient {
        let breaker = CircuitBreaker::new(
            "analysis",
            BreakerConfig {
                max_failures,
                ..BreakerConfig::default()
            },
        );
        AnalysisClient::new(provider, Arc::new(breaker), Duration::from_secs(5))
    }

    #[test]
    fn test_parse_fenced_json() {
        let text = "```json\n{\"summary\":\"ok\",\"confidence\":1.7,\"actions\":[{\"type\":\"restart\",\"commands\":[\"kubectl rollout restart deployment/api\"],\"confidence\":0.9}]}\n```";
        let response = parse_analysis_response(text);
        assert_eq!(response.summary, "ok");
        assert!((response.confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(response.actions.len(), 1);
        assert_eq!(response.actions[0].action_type, "restart");
    }

    #[test]
    fn test_parse_plain_text_falls_back() {
        let response = parse_analysis_response("Cluster looks fine.");
        assert_eq!(response.summary, "Cluster looks fine.");
        assert!(response.actions.is_empty());
    }

    #[test]
    fn test_prompt_goes_after_separator() {
        let provider = CliAnalysisProvider::new(ProviderConfig::default());
        let args = provider.build_args("hello; rm -rf /");
        let sep = args.iter().position(|a| a == "--").unwrap();
        assert_eq!(args[sep + 1], "hello; rm -rf /");
    }

    #[tokio::test]
    async fn test_client_opens_circuit_on_failures() {
        let provider = Arc::new(ScriptedProvider::failing());
        let client = client(Arc::clone(&provider), 2);
        let cancel = CancellationToken::new();
        let request = AnalysisRequest::new(AnalysisType::RootCause, "ctx");

        for _ in 0..2 {
            assert!(matches!(
                client.analyze(&cancel, &request).await,
                Err(ProviderError::Failed { .. })
            ));
        }
        assert_eq!(client.breaker().state().await, CircuitState::Open);
        assert_eq!(
            client.analyze(&cancel, &request).await,
            Err(ProviderError::CircuitOpen)
        );
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_timeout_counts_as_failure() {
        let provider = Arc::new(ScriptedProvider::slow(Duration::from_secs(60)));
        let client = client(provider, 1);
        let request =
            AnalysisRequest::new(AnalysisType::HealthTrend, "ctx").with_timeout(Duration::from_secs(1));

        let err = client
            .analyze(&CancellationToken::new(), &request)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(client.breaker().state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_client_cancellation_is_distinct() {
        let provider = Arc::new(ScriptedProvider::slow(Duration::from_secs(60)));
        let client = client(provider, 1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client
            .analyze(&cancel, &AnalysisRequest::new(AnalysisType::Healing, "ctx"))
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::Cancelled);
        assert_eq!(client.breaker().state().await, CircuitState::Closed);
    }
}
