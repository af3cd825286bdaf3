//! Alert composition.

use downwatch_core::{ReconciliationResult, Settings};
use serde::Serialize;

/// Subjects longer than this are cut, not rejected.
pub const MAX_SUBJECT_CHARS: usize = 100;

/// Subject prefixes for the two kinds of alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertPrefixes {
    /// Used when at least one notified target is exceptional.
    pub downtime_detected: String,
    /// Used when every notified target is healthy.
    pub state_changed: String,
}

impl From<&Settings> for AlertPrefixes {
    fn from(settings: &Settings) -> Self {
        Self {
            downtime_detected: settings.downtime_detected_prefix.clone(),
            state_changed: settings.state_changed_prefix.clone(),
        }
    }
}

/// One message per run, however many targets changed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub topic: String,
    pub subject: String,
    pub body: String,
}

impl Alert {
    /// Build the alert for `notified`, or `None` when nothing needs telling.
    ///
    /// Results are listed in the order given. `origin`, when set, is
    /// appended to the body as a footer line.
    pub fn compose(
        topic: &str,
        notified: &[ReconciliationResult],
        prefixes: &AlertPrefixes,
        origin: Option<&str>,
    ) -> Option<Self> {
        if notified.is_empty() {
            return None;
        }

        let prefix = if notified.iter().any(|r| r.current_outcome.is_exceptional) {
            &prefixes.downtime_detected
        } else {
            &prefixes.state_changed
        };
        let names: Vec<&str> = notified.iter().map(|r| r.target.name.as_str()).collect();
        let subject = truncate_chars(&format!("{prefix} {}", names.join(", ")), MAX_SUBJECT_CHARS);

        let mut lines: Vec<String> = notified
            .iter()
            .enumerate()
            .map(|(i, r)| {
                format!(
                    "{}) {} ({}): {}",
                    i + 1,
                    r.target.name,
                    r.target.url,
                    r.current_outcome.message()
                )
            })
            .collect();
        if let Some(origin) = origin {
            lines.push(format!("origin: {origin}"));
        }

        Some(Self {
            topic: topic.to_string(),
            subject,
            body: lines.join("\n\n"),
        })
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
