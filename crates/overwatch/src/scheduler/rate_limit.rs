//! Shared analysis rate limiter.
//!
//! Each analysis source ("daily", "periodic", "event-driven") is a bucket. A
//! bucket may run if its last run is at least the minimum interval ago and
//! fewer than the daily maximum of buckets have run today (local date).

use chrono::{DateTime, Local};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use thiserror::Error;

/// Why a bucket may not run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimited {
    #[error("bucket '{bucket}' ran {elapsed_secs}s ago, minimum interval is {min_secs}s")]
    TooSoon {
        bucket: String,
        elapsed_secs: i64,
        min_secs: u64,
    },

    #[error("{ran_today} analyses already ran today (limit {limit})")]
    DailyLimit { ran_today: usize, limit: usize },
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval: Duration,
    max_daily: usize,
    last_run: HashMap<String, DateTime<Local>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(min_interval: Duration, max_daily: usize) -> Self {
        Self {
            min_interval,
            max_daily,
            last_run: HashMap::new(),
        }
    }

    /// Check whether `bucket` may run at `now` without recording anything.
    pub fn check_at(&self, bucket: &str, now: DateTime<Local>) -> Result<(), RateLimited> {
        if let Some(last) = self.last_run.get(bucket) {
            let elapsed = now.signed_duration_since(*last);
            // negative when the wall clock stepped back
            let too_soon = match elapsed.to_std() {
                Ok(elapsed) => elapsed < self.min_interval,
                Err(_) => true,
            };
            if too_soon {
                return Err(RateLimited::TooSoon {
                    bucket: bucket.to_string(),
                    elapsed_secs: elapsed.num_seconds(),
                    min_secs: self.min_interval.as_secs(),
                });
            }
        }

        let ran_today = self.runs_on(now);
        if ran_today >= self.max_daily {
            return Err(RateLimited::DailyLimit {
                ran_today,
                limit: self.max_daily,
            });
        }
        Ok(())
    }

    pub fn check(&self, bucket: &str) -> Result<(), RateLimited> {
        self.check_at(bucket, Local::now())
    }

    /// Check and, if allowed, record a run of `bucket` at `now`.
    pub fn try_acquire_at(&mut self, bucket: &str, now: DateTime<Local>) -> Result<(), RateLimited> {
        self.check_at(bucket, now)?;
        self.last_run.insert(bucket.to_string(), now);
        Ok(())
    }

    pub fn try_acquire(&mut self, bucket: &str) -> Result<(), RateLimited> {
        self.try_acquire_at(bucket, Local::now())
    }

    /// Buckets whose last run falls on the same local date as `now`.
    #[must_use]
    pub fn runs_on(&self, now: DateTime<Local>) -> usize {
        let today = now.date_naive();
        self.last_run
            .values()
            .filter(|last| last.date_naive() == today)
            .count()
    }

    /// Last run of every bucket.
    #[must_use]
    pub fn last_runs(&self) -> BTreeMap<String, DateTime<Local>> {
        self.last_run
            .iter()
            .map(|(bucket, at)| (bucket.clone(), *at))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn at(day: u32, hour: u32, min: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, day, hour, min, 0).single().unwrap()
    }

    #[test]
    fn test_min_interval() {
        let mut limiter = RateLimiter::new(Duration::from_secs(300), 10);
        assert!(limiter.try_acquire_at("periodic", at(10, 10, 0)).is_ok());

        let err = limiter.try_acquire_at("periodic", at(10, 10, 4)).unwrap_err();
        assert!(matches!(err, RateLimited::TooSoon { elapsed_secs: 240, .. }));

        // other buckets are independent
        assert!(limiter.try_acquire_at("daily", at(10, 10, 4)).is_ok());
        assert!(limiter.try_acquire_at("periodic", at(10, 10, 5)).is_ok());
    }

    #[test]
    fn test_clock_going_backwards_is_too_soon() {
        let mut limiter = RateLimiter::new(Duration::from_secs(60), 10);
        limiter.try_acquire_at("periodic", at(10, 12, 0)).unwrap();
        assert!(limiter.check_at("periodic", at(10, 11, 0)).is_err());
    }

    #[test]
    fn test_daily_limit_counts_buckets_run_today() {
        let mut limiter = RateLimiter::new(Duration::from_secs(60), 2);
        limiter.try_acquire_at("daily", at(10, 9, 0)).unwrap();
        limiter.try_acquire_at("periodic", at(10, 10, 0)).unwrap();

        assert_eq!(limiter.runs_on(at(10, 11, 0)), 2);
        assert_eq!(
            limiter.check_at("event-driven", at(10, 11, 0)),
            Err(RateLimited::DailyLimit {
                ran_today: 2,
                limit: 2
            })
        );

        // a new local day resets the count
        let tomorrow = at(10, 11, 0) + ChronoDuration::days(1);
        assert_eq!(limiter.runs_on(tomorrow), 0);
        assert!(limiter.try_acquire_at("event-driven", tomorrow).is_ok());
    }

    #[test]
    fn test_denied_acquire_records_nothing() {
        let mut limiter = RateLimiter::new(Duration::from_secs(300), 10);
        limiter.try_acquire_at("periodic", at(10, 10, 0)).unwrap();
        limiter.try_acquire_at("periodic", at(10, 10, 1)).unwrap_err();
        assert_eq!(limiter.last_runs()["periodic"], at(10, 10, 0));
    }
}
