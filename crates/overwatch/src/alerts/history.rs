//! Bounded, append-only alert history.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

use super::types::SmartAlert;

/// Ring buffer of enriched alerts; the oldest entry is evicted when full.
#[derive(Debug, Clone)]
pub struct AlertHistory {
    entries: VecDeque<SmartAlert>,
    capacity: usize,
}

impl AlertHistory {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, alert: SmartAlert) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(alert);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SmartAlert> {
        self.entries.iter()
    }

    /// Alerts no older than `now - window`.
    pub fn since(&self, now: DateTime<Utc>, window: Duration) -> impl Iterator<Item = &SmartAlert> {
        let cutoff = now - window;
        self.entries.iter().filter(move |a| a.timestamp >= cutoff)
    }

    /// Alerts with this name and resource no older than `now - window`.
    pub fn same_source_since<'a>(
        &'a self,
        name: &'a str,
        resource: &'a str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> impl Iterator<Item = &'a SmartAlert> + 'a {
        self.since(now, window)
            .filter(move |a| a.same_source(name, resource))
    }

    /// Alerts within `window` of `now`, newest first.
    #[must_use]
    pub fn recent(&self, now: DateTime<Utc>, window: Duration) -> Vec<SmartAlert> {
        let mut recent: Vec<SmartAlert> = self.since(now, window).cloned().collect();
        recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        recent
    }
}
