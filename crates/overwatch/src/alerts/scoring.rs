//! Noise, priority, correlation and auto-resolve scoring.
//!
//! Everything here is a pure function over an alert and read-only history so
//! the manager can run it under one lock and tests can run it directly.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use super::history::AlertHistory;
use super::types::{AlertPattern, AlertSeverity, SmartAlert};

/// Messages that usually describe a transient condition.
static TRANSIENT_PATTERNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)connection reset|timeout|temporary failure|being terminated|is starting")
        .unwrap()
});

/// Alerts closer than this are correlated by time alone.
pub const TIME_PROXIMITY: Duration = Duration::seconds(30);

/// Inter-arrival time under which a pattern counts as noisy.
const NOISY_FREQUENCY: std::time::Duration = std::time::Duration::from_secs(5 * 60);

/// Inter-arrival time under which insights recommend tuning.
const FREQUENT_PATTERN: std::time::Duration = std::time::Duration::from_secs(10 * 60);

/// Whether a message matches a transient-issue keyword.
#[must_use]
pub fn is_transient(message: &str) -> bool {
    TRANSIENT_PATTERNS.is_match(message)
}

/// Ids of history alerts correlated with `target`.
///
/// A history alert correlates if it falls within `window` of the target and
/// shares its resource, shares a non-empty root cause, or is within 30 seconds.
#[must_use]
pub fn correlate(target: &SmartAlert, history: &AlertHistory, window: Duration) -> BTreeSet<String> {
    history
        .iter()
        .filter(|h| h.id != target.id)
        .filter_map(|h| {
            let gap = (target.timestamp - h.timestamp).abs();
            if gap > window {
                return None;
            }
            let same_resource = h.resource == target.resource;
            let same_cause = !target.root_cause.is_empty() && h.root_cause == target.root_cause;
            let close_in_time = gap <= TIME_PROXIMITY;
            (same_resource || same_cause || close_in_time).then(|| h.id.clone())
        })
        .collect()
}

/// Noise score in `[0, 1]`, averaged over the factors that apply.
///
/// Factors: a noisy pattern (0.8), the auto-resolve rate of the same
/// name/resource over 24h, a low severity (0.5), a transient message (0.9).
/// With no applicable factor the score is a neutral 0.5.
#[must_use]
pub fn noise_score(
    alert: &SmartAlert,
    pattern: Option<&AlertPattern>,
    history: &AlertHistory,
    now: DateTime<Utc>,
) -> f64 {
    let mut factors: Vec<f64> = Vec::with_capacity(4);

    if let Some(p) = pattern {
        if p.has_frequency() && p.frequency < NOISY_FREQUENCY {
            factors.push(0.8);
        }
    }

    let (total, auto_resolved) = history
        .same_source_since(&alert.name, &alert.resource, now, Duration::hours(24))
        .fold((0usize, 0usize), |(total, resolved), a| {
            (total + 1, resolved + usize::from(a.auto_resolve))
        });
    if total > 0 {
        factors.push(auto_resolved as f64 / total as f64);
    }

    if matches!(alert.severity, AlertSeverity::Info | AlertSeverity::Warning) {
        factors.push(0.5);
    }

    if is_transient(&alert.message) {
        factors.push(0.9);
    }

    if factors.is_empty() {
        return 0.5;
    }
    let score = factors.iter().sum::<f64>() / factors.len() as f64;
    score.clamp(0.0, 1.0)
}

/// Priority in `[1, 100]`.
#[must_use]
pub fn priority(
    severity: AlertSeverity,
    noise_score: f64,
    correlated: usize,
    pattern: Option<&AlertPattern>,
) -> u8 {
    let mut score = 50.0;
    score += match severity {
        AlertSeverity::Critical => 40.0,
        AlertSeverity::Error => 30.0,
        AlertSeverity::Warning => 10.0,
        AlertSeverity::Info => 0.0,
    };
    score -= noise_score.clamp(0.0, 1.0) * 30.0;
    score += 5.0 * correlated as f64;
    if pattern.is_some_and(|p| p.occurrences > 10) {
        score -= 10.0;
    }
    score.round().clamp(1.0, 100.0) as u8
}

/// Whether history shows this alert reliably clears on its own.
///
/// Requires at least three same name/resource alerts in the last seven days,
/// more than 80% of which auto-resolved.
#[must_use]
pub fn auto_resolve_eligible(alert: &SmartAlert, history: &AlertHistory, now: DateTime<Utc>) -> bool {
    let (total, resolved) = history
        .same_source_since(&alert.name, &alert.resource, now, Duration::days(7))
        .fold((0usize, 0usize), |(total, resolved), a| {
            (total + 1, resolved + usize::from(a.auto_resolve))
        });
    total >= 3 && resolved as f64 / total as f64 > 0.8
}

/// Patterns with more than five occurrences, most frequent first.
#[must_use]
pub fn identify_patterns(patterns: &HashMap<String, AlertPattern>) -> Vec<AlertPattern> {
    let mut top: Vec<AlertPattern> = patterns
        .values()
        .filter(|p| p.occurrences > 5)
        .cloned()
        .collect();
    top.sort_by(|a, b| a.frequency.cmp(&b.frequency).then_with(|| a.name.cmp(&b.name)));
    top
}

/// Fraction of alerts from the last 24h that were suppressed.
#[must_use]
pub fn noise_reduction(history: &AlertHistory, now: DateTime<Utc>) -> f64 {
    let (total, suppressed) = history
        .since(now, Duration::hours(24))
        .fold((0usize, 0usize), |(total, suppressed), a| {
            (total + 1, suppressed + usize::from(a.suppressed))
        });
    if total == 0 {
        return 0.0;
    }
    suppressed as f64 / total as f64
}

/// Tuning advice for patterns firing more often than every ten minutes.
#[must_use]
pub fn frequency_recommendations(patterns: &[AlertPattern]) -> Vec<String> {
    patterns
        .iter()
        .filter(|p| p.has_frequency() && p.frequency < FREQUENT_PATTERN)
        .map(|p| {
            format!(
                "Alert '{}' fires every {} minutes ({} occurrences); tune its threshold or fix the underlying cause",
                p.name,
                p.frequency.as_secs() / 60,
                p.occurrences
            )
        })
        .collect()
}

/// Expected next occurrence of each measured pattern.
#[must_use]
pub fn predictions(patterns: &[AlertPattern]) -> Vec<String> {
    patterns
        .iter()
        .filter(|p| p.has_frequency())
        .filter_map(|p| {
            let interval = Duration::from_std(p.frequency).ok()?;
            Some(format!(
                "Alert '{}' expected again around {}",
                p.name,
                (p.last_seen + interval).format("%Y-%m-%d %H:%M UTC")
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::testing::{pattern, smart_alert};

    #[test]
    fn test_transient_keywords() {
        assert!(is_transient("upstream connection reset by peer"));
        assert!(is_transient("Request TIMEOUT after 30s"));
        assert!(is_transient("pod api-0 is being terminated"));
        assert!(!is_transient("OOMKilled"));
    }

    #[test]
    fn test_noise_defaults_to_neutral() {
        let now = Utc::now();
        let mut alert = smart_alert("disk", "node-1", now);
        alert.severity = AlertSeverity::Error;
        alert.message = "disk full".to_string();
        let score = noise_score(&alert, None, &AlertHistory::new(10), now);
        assert!((score - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_noise_averages_factors() {
        let now = Utc::now();
        let mut alert = smart_alert("probe", "pod/api", now);
        alert.severity = AlertSeverity::Warning;
        alert.message = "readiness probe timeout".to_string();

        // warning 0.5 + transient 0.9
        let score = noise_score(&alert, None, &AlertHistory::new(10), now);
        assert!((score - 0.7).abs() < 1e-9);

        // plus noisy pattern 0.8 and 1.0 auto-resolve rate
        let mut history = AlertHistory::new(10);
        let mut previous = smart_alert("probe", "pod/api", now - Duration::minutes(2));
        previous.auto_resolve = true;
        history.push(previous);
        let p = pattern("probe", 4, std::time::Duration::from_secs(120));
        let score = noise_score(&alert, Some(&p), &history, now);
        assert!((score - (0.8 + 1.0 + 0.5 + 0.9) / 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_first_occurrence_has_no_frequency_factor() {
        let now = Utc::now();
        let mut alert = smart_alert("x", "y", now);
        alert.severity = AlertSeverity::Critical;
        alert.message = "down".to_string();
        let p = pattern("x", 1, std::time::Duration::ZERO);
        let score = noise_score(&alert, Some(&p), &AlertHistory::new(10), now);
        assert!((score - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_noise_always_in_unit_range() {
        let now = Utc::now();
        for severity in [
            AlertSeverity::Info,
            AlertSeverity::Warning,
            AlertSeverity::Error,
            AlertSeverity::Critical,
        ] {
            for message in ["timeout", "fine"] {
                let mut alert = smart_alert("n", "r", now);
                alert.severity = severity;
                alert.message = message.to_string();
                let p = pattern("n", 50, std::time::Duration::from_secs(1));
                let score = noise_score(&alert, Some(&p), &AlertHistory::new(1), now);
                assert!((0.0..=1.0).contains(&score));
            }
        }
    }

    #[test]
    fn test_priority_rules() {
        assert_eq!(priority(AlertSeverity::Critical, 0.0, 0, None), 90);
        assert_eq!(priority(AlertSeverity::Error, 0.5, 0, None), 65);
        assert_eq!(priority(AlertSeverity::Warning, 1.0, 2, None), 40);
        let frequent = pattern("x", 11, std::time::Duration::from_secs(60));
        assert_eq!(priority(AlertSeverity::Info, 0.0, 0, Some(&frequent)), 40);
    }

    #[test]
    fn test_priority_clamped() {
        assert_eq!(priority(AlertSeverity::Critical, 0.0, 50, None), 100);
        let frequent = pattern("x", 100, std::time::Duration::from_secs(60));
        assert_eq!(priority(AlertSeverity::Info, 1.0, 0, Some(&frequent)), 10);
        for severity in [AlertSeverity::Info, AlertSeverity::Critical] {
            for noise in [-1.0, 0.0, 0.5, 1.0, 2.0] {
                for correlated in [0, 3, 30] {
                    let p = priority(severity, noise, correlated, Some(&frequent));
                    assert!((1..=100).contains(&p));
                }
            }
        }
    }

    #[test]
    fn test_correlation_rules() {
        let now = Utc::now();
        let mut target = smart_alert("cpu", "pod/api", now);
        target.root_cause = "noisy neighbour".to_string();

        let mut history = AlertHistory::new(10);
        let same_resource = smart_alert("mem", "pod/api", now - Duration::minutes(4));
        let mut same_cause = smart_alert("lat", "svc/web", now - Duration::minutes(3));
        same_cause.root_cause = "noisy neighbour".to_string();
        let close = smart_alert("dns", "svc/dns", now - Duration::seconds(20));
        let unrelated = smart_alert("disk", "node-2", now - Duration::minutes(2));
        let too_old = smart_alert("cpu", "pod/api", now - Duration::minutes(6));
        for a in [&same_resource, &same_cause, &close, &unrelated, &too_old] {
            history.push(a.clone());
        }

        let correlated = correlate(&target, &history, Duration::minutes(5));
        let expected: BTreeSet<String> = [&same_resource, &same_cause, &close]
            .iter()
            .map(|a| a.id.clone())
            .collect();
        assert_eq!(correlated, expected);
    }

    #[test]
    fn test_placeholder_root_cause_correlates_but_empty_does_not() {
        let now = Utc::now();
        let mut target = smart_alert("a", "r1", now);
        target.root_cause = "Unknown".to_string();
        let mut other = smart_alert("b", "r2", now - Duration::minutes(2));
        other.root_cause = "Unknown".to_string();
        let other_id = other.id.clone();
        let mut history = AlertHistory::new(4);
        history.push(other);
        assert_eq!(
            correlate(&target, &history, Duration::minutes(5)),
            BTreeSet::from([other_id])
        );

        // fixtures carry an empty root cause
        let blank = smart_alert("c", "r3", now);
        let mut blank_history = AlertHistory::new(4);
        blank_history.push(smart_alert("d", "r4", now - Duration::minutes(2)));
        assert!(correlate(&blank, &blank_history, Duration::minutes(5)).is_empty());
    }

    #[test]
    fn test_auto_resolve_eligibility() {
        let now = Utc::now();
        let target = smart_alert("flap", "pod/a", now);
        let mut history = AlertHistory::new(10);
        for i in 0..4 {
            let mut a = smart_alert("flap", "pod/a", now - Duration::hours(i + 1));
            a.auto_resolve = true;
            history.push(a);
        }
        assert!(auto_resolve_eligible(&target, &history, now));

        history.push(smart_alert("flap", "pod/a", now - Duration::hours(10)));
        // 4 of 5 is exactly 80%, not more
        assert!(!auto_resolve_eligible(&target, &history, now));
    }

    #[test]
    fn test_auto_resolve_needs_three() {
        let now = Utc::now();
        let mut history = AlertHistory::new(10);
        for i in 0..2 {
            let mut a = smart_alert("flap", "pod/a", now - Duration::hours(i + 1));
            a.auto_resolve = true;
            history.push(a);
        }
        assert!(!auto_resolve_eligible(&smart_alert("flap", "pod/a", now), &history, now));
    }

    #[test]
    fn test_identify_patterns_scenario() {
        let mut patterns = HashMap::new();
        patterns.insert("a".to_string(), pattern("a", 10, std::time::Duration::from_secs(300)));
        patterns.insert("b".to_string(), pattern("b", 3, std::time::Duration::from_secs(3600)));
        patterns.insert("c".to_string(), pattern("c", 20, std::time::Duration::from_secs(120)));

        let top = identify_patterns(&patterns);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].occurrences, 20);
        assert_eq!(top[0].frequency, std::time::Duration::from_secs(120));
        assert_eq!(top[1].occurrences, 10);
        assert_eq!(top[1].frequency, std::time::Duration::from_secs(300));
    }

    #[test]
    fn test_noise_reduction_scenario() {
        let now = Utc::now();
        let mut history = AlertHistory::new(10);
        for (i, suppressed) in [true, false, true, false].into_iter().enumerate() {
            let mut a = smart_alert("n", "r", now - Duration::minutes(i as i64));
            a.suppressed = suppressed;
            history.push(a);
        }
        assert!((noise_reduction(&history, now) - 0.5).abs() < f64::EPSILON);
        assert!(noise_reduction(&AlertHistory::new(1), now).abs() < f64::EPSILON);
    }

    #[test]
    fn test_frequency_recommendations() {
        let patterns = vec![
            pattern("chatty", 30, std::time::Duration::from_secs(120)),
            pattern("calm", 8, std::time::Duration::from_secs(3600)),
        ];
        let recs = frequency_recommendations(&patterns);
        assert_eq!(recs.len(), 1);
        assert!(recs[0].contains("chatty"));
        assert!(recs[0].contains("every 2 minutes"));
        assert_eq!(predictions(&patterns).len(), 2);
    }
}
