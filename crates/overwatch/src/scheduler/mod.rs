//! Analysis scheduler.
//!
//! Decides when the analysis provider runs. Three sources feed one shared
//! [`RateLimiter`]:
//! - event-driven: injected [`AIEvent`]s are batched and analysed once a
//!   batch crosses a trigger rule, or flushed on the batch tick
//! - daily: a comprehensive analysis at a fixed local wall-clock time
//! - periodic: a lighter health-trend analysis on a fixed interval
//!
//! Analyses run on the [`TaskPool`] so trigger loops never wait on the
//! provider. Results reach the registered callbacks out of band.

pub mod rate_limit;

use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::ConfigError;
use crate::events::{AIEvent, EventSeverity, EventType};
use crate::health::HealthReport;
use crate::provider::{AnalysisProvider, AnalysisRequest, AnalysisResponse, AnalysisType};
use crate::tasks::TaskPool;

pub use rate_limit::{RateLimited, RateLimiter};

pub const BUCKET_DAILY: &str = "daily";
pub const BUCKET_PERIODIC: &str = "periodic";
pub const BUCKET_EVENT_DRIVEN: &str = "event-driven";

/// Result of one analysis, handed to the callbacks.
#[derive(Debug, Clone, Serialize)]
pub struct Insight {
    pub bucket: &'static str,
    pub analysis_type: AnalysisType,
    /// `None` when the provider failed or the analysis was rate limited
    pub response: Option<AnalysisResponse>,
    /// Events that triggered the analysis, if event-driven
    pub events: Vec<AIEvent>,
    pub generated_at: DateTime<Utc>,
}

pub type InsightCallback = Arc<dyn Fn(Insight) + Send + Sync>;

#[derive(Default, Clone)]
struct Callbacks {
    on_insights: Option<InsightCallback>,
    on_alert: Option<InsightCallback>,
}

/// Why a batch should be analysed now.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    Critical,
    Failures(usize),
    HighSeverity(usize),
    Anomaly(f64),
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => write!(f, "critical event"),
            Self::Failures(n) => write!(f, "{n} failure events"),
            Self::HighSeverity(n) => write!(f, "{n} high severity events"),
            Self::Anomaly(score) => write!(f, "anomaly score {score:.2}"),
        }
    }
}

/// Decide whether a batch warrants immediate analysis.
#[must_use]
pub fn should_trigger_analysis(batch: &[AIEvent], config: &SchedulerConfig) -> Option<Trigger> {
    if batch.iter().any(|e| e.severity == EventSeverity::Critical) {
        return Some(Trigger::Critical);
    }

    let failures = batch.iter().filter(|e| e.event_type.is_failure()).count();
    if failures >= config.failure_threshold {
        return Some(Trigger::Failures(failures));
    }

    let high = batch
        .iter()
        .filter(|e| e.severity == EventSeverity::High)
        .count();
    if high >= 2 {
        return Some(Trigger::HighSeverity(high));
    }

    batch
        .iter()
        .filter(|e| e.event_type == EventType::AnomalyDetected)
        .filter_map(AIEvent::anomaly_score)
        .find(|score| *score >= config.anomaly_threshold)
        .map(Trigger::Anomaly)
}

/// Next occurrence of `at` strictly after `now`.
#[must_use]
pub fn next_daily_run<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let today = now.date_naive();
    for offset in 0..=2 {
        let candidate = today
            .checked_add_days(chrono::Days::new(offset))
            .and_then(|date| tz.from_local_datetime(&date.and_time(at)).earliest());
        if let Some(candidate) = candidate {
            if candidate > *now {
                return candidate;
            }
        }
    }
    now.clone() + chrono::Duration::days(1)
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct ScheduleStatus {
    pub running: bool,
    pub next_daily_run: Option<DateTime<Local>>,
    pub last_runs: BTreeMap<String, DateTime<Local>>,
    pub runs_today: usize,
    pub max_daily_analyses: usize,
    /// Events waiting in the queue
    pub queued_events: usize,
    /// Events held in the current batch
    pub buffered_events: usize,
    pub in_flight_tasks: usize,
    pub enable_daily: bool,
    pub enable_periodic: bool,
    pub enable_event_driven: bool,
}

struct Inner {
    config: SchedulerConfig,
    daily_time: NaiveTime,
    provider: Arc<dyn AnalysisProvider>,
    limiter: Mutex<RateLimiter>,
    callbacks: RwLock<Callbacks>,
    events_tx: mpsc::Sender<AIEvent>,
    buffered: AtomicUsize,
    pool: TaskPool,
    cancel: CancellationToken,
}

/// Gates and dispatches analyses.
pub struct Scheduler {
    inner: Arc<Inner>,
    events_rx: Mutex<Option<mpsc::Receiver<AIEvent>>>,
    loops: TaskTracker,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        provider: Arc<dyn AnalysisProvider>,
        pool: TaskPool,
    ) -> Result<Self, ConfigError> {
        let daily_time = config.daily_time()?;
        let (events_tx, events_rx) = mpsc::channel(config.event_queue_capacity.max(1));
        let limiter = RateLimiter::new(config.min_analysis_interval(), config.max_daily_analyses);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                daily_time,
                provider,
                limiter: Mutex::new(limiter),
                callbacks: RwLock::new(Callbacks::default()),
                events_tx,
                buffered: AtomicUsize::new(0),
                pool,
                cancel: CancellationToken::new(),
            }),
            events_rx: Mutex::new(Some(events_rx)),
            loops: TaskTracker::new(),
        })
    }

    /// Register result callbacks. Callbacks run on background tasks.
    pub async fn set_callbacks(&self, on_insights: InsightCallback, on_alert: InsightCallback) {
        *self.inner.callbacks.write().await = Callbacks {
            on_insights: Some(on_insights),
            on_alert: Some(on_alert),
        };
    }

    /// Queue an event without blocking. Returns `false` if it was dropped.
    pub fn trigger_event(&self, event: AIEvent) -> bool {
        if !self.inner.config.enable_event_driven {
            debug!(event = %event.event_type.as_str(), "Event-driven analysis disabled, ignoring event");
            return false;
        }
        match self.inner.events_tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    event = %event.event_type.as_str(),
                    source = %event.source,
                    "Event queue full, dropping event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Scheduler stopped, dropping event");
                false
            }
        }
    }

    /// Turn unhealthy checks into events. Returns how many were queued.
    pub fn ingest_health(&self, report: &HealthReport) -> usize {
        report
            .unhealthy()
            .into_iter()
            .filter_map(|check| check.to_event())
            .map(|event| self.trigger_event(event))
            .filter(|queued| *queued)
            .count()
    }

    /// Start the trigger loops. Returns `false` if already started.
    pub async fn start(&self) -> bool {
        let Some(events_rx) = self.events_rx.lock().await.take() else {
            warn!("Scheduler already started");
            return false;
        };

        let config = &self.inner.config;
        info!(
            daily = config.enable_daily,
            daily_at = %self.inner.daily_time,
            periodic = config.enable_periodic,
            periodic_secs = config.periodic_interval_secs,
            event_driven = config.enable_event_driven,
            "Starting scheduler"
        );

        if config.enable_event_driven {
            self.loops.spawn(Arc::clone(&self.inner).event_loop(events_rx));
        }
        if config.enable_daily {
            self.loops.spawn(Arc::clone(&self.inner).daily_loop());
        }
        if config.enable_periodic {
            self.loops.spawn(Arc::clone(&self.inner).periodic_loop());
        }
        self.loops.close();
        true
    }

    pub async fn get_schedule_status(&self) -> ScheduleStatus {
        let now = Local::now();
        let (last_runs, runs_today) = {
            let limiter = self.inner.limiter.lock().await;
            (limiter.last_runs(), limiter.runs_on(now))
        };
        let config = &self.inner.config;
        let tx = &self.inner.events_tx;
        ScheduleStatus {
            running: self.loops.is_closed() && !self.inner.cancel.is_cancelled(),
            next_daily_run: config
                .enable_daily
                .then(|| next_daily_run(&now, self.inner.daily_time)),
            last_runs,
            runs_today,
            max_daily_analyses: config.max_daily_analyses,
            queued_events: tx.max_capacity() - tx.capacity(),
            buffered_events: self.inner.buffered.load(Ordering::Relaxed),
            in_flight_tasks: self.inner.pool.in_flight(),
            enable_daily: config.enable_daily,
            enable_periodic: config.enable_periodic,
            enable_event_driven: config.enable_event_driven,
        }
    }

    /// Stop the trigger loops and drain background analyses.
    ///
    /// Returns `true` if every analysis finished within `grace`.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        info!("Shutting down scheduler");
        self.inner.cancel.cancel();
        self.loops.close();
        self.loops.wait().await;
        self.inner.pool.shutdown(grace).await
    }
}

impl Inner {
    async fn event_loop(self: Arc<Self>, mut events_rx: mpsc::Receiver<AIEvent>) {
        let batch_interval = self.config.batch_interval();
        let mut tick = tokio::time::interval_at(Instant::now() + batch_interval, batch_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut batch: Vec<AIEvent> = Vec::new();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                received = events_rx.recv() => {
                    let Some(event) = received else { break };
                    debug!(event = %event.event_type.as_str(), severity = %event.severity, "Event received");
                    batch.push(event);
                    if let Some(trigger) = should_trigger_analysis(&batch, &self.config) {
                        info!(%trigger, events = batch.len(), "Triggering event-driven analysis");
                        self.dispatch_batch(&mut batch).await;
                    }
                }
                _ = tick.tick() => {
                    if batch.is_empty() {
                        continue;
                    }
                    let gate = self.limiter.lock().await.check(BUCKET_PERIODIC);
                    match gate {
                        Ok(()) => {
                            debug!(events = batch.len(), "Flushing event batch");
                            self.dispatch_batch(&mut batch).await;
                        }
                        Err(reason) => debug!(%reason, events = batch.len(), "Holding event batch"),
                    }
                }
            }

            let capacity = self.config.event_queue_capacity.max(1);
            if batch.len() > capacity {
                let dropped = batch.len() - capacity;
                warn!(dropped, "Event batch over capacity, dropping oldest events");
                batch.drain(..dropped);
            }
            self.buffered.store(batch.len(), Ordering::Relaxed);
        }
        debug!("Event loop stopped");
    }

    /// Dispatch the batch as one event-driven analysis, clearing it if accepted.
    async fn dispatch_batch(self: &Arc<Self>, batch: &mut Vec<AIEvent>) {
        let critical = batch.iter().any(|e| e.severity == EventSeverity::Critical);
        if self
            .dispatch(BUCKET_EVENT_DRIVEN, AnalysisType::EventDriven, batch.clone())
            .await
        {
            batch.clear();
        } else if critical {
            // the alert still goes out when the analysis is rate limited
            let events = std::mem::take(batch);
            self.notify(None, BUCKET_EVENT_DRIVEN, AnalysisType::EventDriven, events, true)
                .await;
        }
    }

    async fn daily_loop(self: Arc<Self>) {
        loop {
            let now = Local::now();
            let next = next_daily_run(&now, self.daily_time);
            let wait = (next - now).to_std().unwrap_or_default();
            debug!(next = %next, "Next daily analysis scheduled");

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(wait) => {
                    self.dispatch(BUCKET_DAILY, AnalysisType::Comprehensive, Vec::new()).await;
                }
            }
        }
        debug!("Daily loop stopped");
    }

    async fn periodic_loop(self: Arc<Self>) {
        let period = self.config.periodic_interval();
        let mut tick = tokio::time::interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = tick.tick() => {
                    self.dispatch(BUCKET_PERIODIC, AnalysisType::HealthTrend, Vec::new()).await;
                }
            }
        }
        debug!("Periodic loop stopped");
    }

    /// Acquire the bucket and run the analysis on the pool.
    ///
    /// The bucket's last run is recorded before dispatch so a slow analysis
    /// cannot be triggered twice.
    async fn dispatch(
        self: &Arc<Self>,
        bucket: &'static str,
        analysis_type: AnalysisType,
        events: Vec<AIEvent>,
    ) -> bool {
        if let Err(reason) = self.limiter.lock().await.try_acquire(bucket) {
            info!(bucket, %reason, "Analysis rate limited");
            return false;
        }

        let inner = Arc::clone(self);
        self.pool.spawn("analysis", async move {
            inner.analyze(bucket, analysis_type, events).await;
        })
    }

    async fn analyze(&self, bucket: &'static str, analysis_type: AnalysisType, events: Vec<AIEvent>) {
        let critical = events.iter().any(|e| e.severity == EventSeverity::Critical);
        let request = analysis_request(analysis_type, &events);
        let cancel = self.pool.cancellation();

        let response = match self.provider.analyze(&cancel, &request).await {
            Ok(response) => {
                info!(
                    bucket,
                    analysis = %analysis_type,
                    severity = %response.severity,
                    confidence = response.confidence,
                    "Analysis complete"
                );
                Some(response)
            }
            Err(e) => {
                warn!(bucket, analysis = %analysis_type, error = %e, "Analysis failed");
                None
            }
        };

        let alert = critical
            || response
                .as_ref()
                .is_some_and(|r| r.severity.eq_ignore_ascii_case("critical"));
        self.notify(response, bucket, analysis_type, events, alert).await;
    }

    async fn notify(
        &self,
        response: Option<AnalysisResponse>,
        bucket: &'static str,
        analysis_type: AnalysisType,
        events: Vec<AIEvent>,
        alert: bool,
    ) {
        let callbacks = self.callbacks.read().await.clone();
        let insight = Insight {
            bucket,
            analysis_type,
            response,
            events,
            generated_at: Utc::now(),
        };

        if alert {
            if let Some(on_alert) = &callbacks.on_alert {
                on_alert(insight.clone());
            }
        }
        if insight.response.is_some() {
            if let Some(on_insights) = &callbacks.on_insights {
                on_insights(insight);
            }
        }
    }
}

fn analysis_request(analysis_type: AnalysisType, events: &[AIEvent]) -> AnalysisRequest {
    match analysis_type {
        AnalysisType::Comprehensive => AnalysisRequest::new(
            analysis_type,
            "Daily comprehensive review: assess overall cluster health, recurring issues and capacity risks.",
        ),
        AnalysisType::HealthTrend => AnalysisRequest::new(
            analysis_type,
            "Periodic health trend check: report any degradation since the last check.",
        ),
        _ => {
            let mut context = format!("Analyse these {} operational events:", events.len());
            for event in events {
                context.push_str(&format!(
                    "\n- [{}] {} from {}: {}",
                    event.severity,
                    event.event_type.as_str(),
                    event.source,
                    event.description
                ));
            }
            AnalysisRequest::new(analysis_type, context).with_data(json!({ "events": events }))
        }
    }
}
