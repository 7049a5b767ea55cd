//! Circuit breaker guarding calls to the analysis provider.
//!
//! The breaker is a tri-state machine:
//! - `Closed`: every call runs; failures are counted.
//! - `Open`: calls fail fast until `timeout` has passed since the last failure.
//! - `HalfOpen`: a single probe runs; success closes the circuit, failure reopens it.
//!
//! The wrapped call runs outside the lock so a slow provider never blocks
//! other callers from reading state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::BreakerConfig;
use crate::error::{ExecError, ProviderError};

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        };
        f.write_str(name)
    }
}

/// Error from a call through the breaker.
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    /// Rejected without calling the wrapped function
    #[error("circuit breaker is open")]
    Open,
    /// The wrapped function failed
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Check if the call was rejected by an open circuit.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Lets the breaker tell caller cancellation apart from real failures.
pub trait FailureKind {
    /// Whether this error came from the caller cancelling the call.
    fn is_cancellation(&self) -> bool {
        false
    }
}

impl FailureKind for ProviderError {
    fn is_cancellation(&self) -> bool {
        ProviderError::is_cancellation(self)
    }
}

impl FailureKind for ExecError {
    fn is_cancellation(&self) -> bool {
        ExecError::is_cancellation(self)
    }
}

impl FailureKind for anyhow::Error {
    fn is_cancellation(&self) -> bool {
        self.downcast_ref::<ProviderError>()
            .is_some_and(ProviderError::is_cancellation)
    }
}

impl FailureKind for std::io::Error {}
impl FailureKind for String {}
impl FailureKind for &'static str {}

/// Observer invoked on every state transition with `(from, to)`.
pub type TransitionObserver = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

/// Snapshot of breaker state and counters.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub failures: u32,
    pub max_failures: u32,
    pub timeout_secs: u64,
    pub reset_timeout_secs: u64,
    pub last_failure: Option<DateTime<Utc>>,
    pub total_calls: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    probe_in_flight: bool,
    total_calls: u64,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            last_failure_at: None,
            probe_in_flight: false,
            total_calls: 0,
            total_successes: 0,
            total_failures: 0,
            total_rejections: 0,
        }
    }

    /// Move to `to`, returning the transition if the state changed.
    fn transition(&mut self, to: CircuitState) -> Option<(CircuitState, CircuitState)> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        Some((from, to))
    }
}

/// Tri-state circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: RwLock<BreakerInner>,
    observer: Option<TransitionObserver>,
}

impl CircuitBreaker {
    /// Create a breaker with the given thresholds.
    #[must_use]
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: RwLock::new(BreakerInner::new()),
            observer: None,
        }
    }

    /// Attach a transition observer. It runs on a spawned task.
    #[must_use]
    pub fn with_observer(mut self, observer: TransitionObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Breaker name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `f` if the circuit allows it, recording the outcome.
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: FailureKind,
    {
        if !self.can_execute().await {
            debug!(breaker = %self.name, "Circuit open, rejecting call");
            return Err(BreakerError::Open);
        }

        let result = f().await;
        self.handle_result(result.as_ref().err()).await;
        result.map_err(BreakerError::Inner)
    }

    async fn can_execute(&self) -> bool {
        let mut transition = None;
        let allowed = {
            let mut inner = self.inner.write().await;
            let allowed = match inner.state {
                CircuitState::Closed => true,
                CircuitState::Open => {
                    let elapsed = inner
                        .last_failure
                        .is_none_or(|at| at.elapsed() > self.config.timeout());
                    if elapsed {
                        transition = inner.transition(CircuitState::HalfOpen);
                        inner.probe_in_flight = true;
                    }
                    elapsed
                }
                CircuitState::HalfOpen => {
                    if inner.probe_in_flight {
                        false
                    } else {
                        inner.probe_in_flight = true;
                        true
                    }
                }
            };
            if allowed {
                inner.total_calls += 1;
            } else {
                inner.total_rejections += 1;
            }
            allowed
        };
        self.notify(transition);
        allowed
    }

    async fn handle_result<E: FailureKind>(&self, err: Option<&E>) {
        let transition = {
            let mut inner = self.inner.write().await;
            let was_half_open = inner.state == CircuitState::HalfOpen;
            inner.probe_in_flight = false;

            match err {
                None => {
                    inner.failure_count = 0;
                    inner.total_successes += 1;
                    if was_half_open {
                        inner.transition(CircuitState::Closed)
                    } else {
                        None
                    }
                }
                Some(e) if e.is_cancellation() && !self.config.count_cancellations => {
                    // A cancelled probe settles nothing; reopen without counting it.
                    if was_half_open {
                        inner.last_failure = Some(Instant::now());
                        inner.transition(CircuitState::Open)
                    } else {
                        None
                    }
                }
                Some(_) => {
                    inner.failure_count += 1;
                    inner.total_failures += 1;
                    inner.last_failure = Some(Instant::now());
                    inner.last_failure_at = Some(Utc::now());
                    if was_half_open || inner.failure_count >= self.config.max_failures {
                        inner.transition(CircuitState::Open)
                    } else {
                        None
                    }
                }
            }
        };
        self.notify(transition);
    }

    fn notify(&self, transition: Option<(CircuitState, CircuitState)>) {
        let Some((from, to)) = transition else {
            return;
        };
        info!(breaker = %self.name, %from, %to, "Circuit breaker state change");

        let Some(observer) = self.observer.clone() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { observer(from, to) });
            }
            Err(_) => debug!(breaker = %self.name, "No runtime, skipping transition observer"),
        }
    }

    /// Current state.
    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    /// Consecutive failures counted so far.
    pub async fn failures(&self) -> u32 {
        self.inner.read().await.failure_count
    }

    /// Force the breaker back to `Closed`.
    pub async fn reset(&self) {
        let transition = {
            let mut inner = self.inner.write().await;
            inner.failure_count = 0;
            inner.last_failure = None;
            inner.probe_in_flight = false;
            inner.transition(CircuitState::Closed)
        };
        self.notify(transition);
    }

    /// Snapshot of state and counters.
    pub async fn stats(&self) -> BreakerStats {
        let inner = self.inner.read().await;
        BreakerStats {
            state: inner.state,
            failures: inner.failure_count,
            max_failures: self.config.max_failures,
            timeout_secs: self.config.timeout_secs,
            reset_timeout_secs: self.config.reset_timeout_secs,
            last_failure: inner.last_failure_at,
            total_calls: inner.total_calls,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
        }
    }
}
