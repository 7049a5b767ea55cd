//! Best-effort rollback synthesis.
//!
//! Rollbacks are derived by rewriting the primary command. Scale and image
//! changes cannot know the prior value, so they carry a placeholder and are
//! flagged with `requires_manual_value`.

use regex::Regex;
use std::sync::LazyLock;

use super::types::Rollback;

/// Placeholder for a replica count we do not know.
pub const PREVIOUS_REPLICAS: &str = "<previous>";

/// Placeholder for an image or value we do not know.
pub const PREVIOUS_VALUE: &str = "<previous-value>";

static REPLICAS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(--)?replicas(=|\s+)\d+").unwrap());

static APPLY_VERB: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bapply\b").unwrap());

/// Derive a rollback for `command`, if a pattern applies.
#[must_use]
pub fn synthesize(command: &str) -> Option<Rollback> {
    let tokens: Vec<&str> = command.split_whitespace().collect();
    let verb = tokens.get(1).copied().unwrap_or_default();

    if verb == "scale" && REPLICAS.is_match(command) {
        let rewritten = REPLICAS.replace(command, |caps: &regex::Captures<'_>| {
            format!(
                "{}replicas{}{PREVIOUS_REPLICAS}",
                caps.get(1).map_or("", |m| m.as_str()),
                &caps[2]
            )
        });
        return Some(Rollback {
            command: rewritten.into_owned(),
            requires_manual_value: true,
        });
    }

    if verb == "set" && tokens.get(2) == Some(&"image") {
        let rewritten: Vec<String> = tokens
            .iter()
            .enumerate()
            .map(|(i, token)| match token.split_once('=') {
                // tokens[3] is the target resource
                Some((name, _)) if i > 3 && !token.starts_with('-') => {
                    format!("{name}={PREVIOUS_VALUE}")
                }
                _ => (*token).to_string(),
            })
            .collect();
        return Some(Rollback {
            command: rewritten.join(" "),
            requires_manual_value: true,
        });
    }

    if verb == "apply" {
        return Some(Rollback {
            command: APPLY_VERB.replace(command, "delete").into_owned(),
            requires_manual_value: false,
        });
    }

    None
}
