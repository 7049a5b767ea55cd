//! Hand-written fakes shared by unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{ExecError, ProviderError};
use crate::exec::CommandExecutor;
use crate::provider::{AnalysisProvider, AnalysisRequest, AnalysisResponse, AnalysisType};

enum Behaviour {
    Respond(AnalysisResponse),
    Fail,
    Slow(Duration),
}

/// Provider returning canned responses and recording every request.
pub struct ScriptedProvider {
    behaviour: Behaviour,
    by_type: HashMap<AnalysisType, AnalysisResponse>,
    calls: AtomicUsize,
    requests: Mutex<Vec<AnalysisRequest>>,
}

impl ScriptedProvider {
    fn with_behaviour(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            by_type: HashMap::new(),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn new(response: AnalysisResponse) -> Self {
        Self::with_behaviour(Behaviour::Respond(response))
    }

    pub fn failing() -> Self {
        Self::with_behaviour(Behaviour::Fail)
    }

    pub fn slow(delay: Duration) -> Self {
        Self::with_behaviour(Behaviour::Slow(delay))
    }

    /// Answer `analysis_type` with `response` regardless of the default behaviour.
    pub fn with_response(mut self, analysis_type: AnalysisType, response: AnalysisResponse) -> Self {
        self.by_type.insert(analysis_type, response);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<AnalysisRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalysisProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn analyze(
        &self,
        cancel: &CancellationToken,
        request: &AnalysisRequest,
    ) -> Result<AnalysisResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        if let Some(response) = self.by_type.get(&request.analysis_type) {
            return Ok(response.clone());
        }
        match &self.behaviour {
            Behaviour::Respond(response) => Ok(response.clone()),
            Behaviour::Fail => Err(ProviderError::Failed {
                details: "scripted failure".to_string(),
            }),
            Behaviour::Slow(delay) => {
                tokio::select! {
                    () = cancel.cancelled() => Err(ProviderError::Cancelled),
                    () = tokio::time::sleep(*delay) => Ok(AnalysisResponse::default()),
                }
            }
        }
    }
}

/// Executor that records commands and fails any containing a marker.
#[derive(Default)]
pub struct RecordingExecutor {
    fail_on: Vec<String>,
    executed: Mutex<Vec<String>>,
    dry_runs: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_on: vec![marker.to_string()],
            ..Self::default()
        }
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn dry_runs(&self) -> Vec<String> {
        self.dry_runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(&self, _cancel: &CancellationToken, command: &str) -> Result<String, ExecError> {
        self.executed.lock().unwrap().push(command.to_string());
        if self.fail_on.iter().any(|m| command.contains(m.as_str())) {
            return Err(ExecError::Failed {
                code: Some(1),
                stderr: format!("{command}: failed"),
            });
        }
        Ok(format!("ok: {command}"))
    }

    async fn dry_run(&self, _cancel: &CancellationToken, command: &str) -> Result<String, ExecError> {
        self.dry_runs.lock().unwrap().push(command.to_string());
        Ok(format!("[dry-run] {command}"))
    }
}
