//! Domain types shared across downwatch.
//!
//! A [`Target`] is loaded once per run from configuration, each probe of it
//! produces exactly one [`Outcome`], and reconciling that outcome against the
//! stored history yields an ephemeral [`ReconciliationResult`].

use serde::{Deserialize, Serialize};

/// Status code a target is expected to answer with when none is configured.
pub const DEFAULT_EXPECTED_STATUS: u16 = 200;

fn default_expected_status() -> u16 {
    DEFAULT_EXPECTED_STATUS
}

// ── Target ─────────────────────────────────────────────────────────

/// One monitored HTTP endpoint and what a healthy answer looks like.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Target {
    /// Unique name; the partition key of the outcome history.
    pub name: String,
    pub url: String,
    #[serde(default = "default_expected_status")]
    pub expected_status_code: u16,
    /// Substring the response body must contain, if set.
    #[serde(default)]
    pub expected_body_text: Option<String>,
}

impl Target {
    /// A target expecting `200` and no particular body.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            expected_status_code: DEFAULT_EXPECTED_STATUS,
            expected_body_text: None,
        }
    }

    pub fn with_expected_status(mut self, code: u16) -> Self {
        self.expected_status_code = code;
        self
    }

    pub fn with_expected_text(mut self, text: impl Into<String>) -> Self {
        self.expected_body_text = Some(text.into());
        self
    }
}

// ── Outcome ────────────────────────────────────────────────────────

/// The recorded result of probing a target once.
///
/// Identified in the store by `(target_name, timestamp)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Outcome {
    pub target_name: String,
    pub target_url: String,
    /// Unix timestamp (milliseconds) of the probe.
    pub timestamp: u64,
    pub is_exceptional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Outcome {
    /// A healthy outcome for `target` with a confirmation message.
    pub fn healthy(target: &Target, timestamp: u64, message: impl Into<String>) -> Self {
        Self {
            target_name: target.name.clone(),
            target_url: target.url.clone(),
            timestamp,
            is_exceptional: false,
            message: Some(message.into()),
        }
    }

    /// An exceptional outcome for `target` explaining what went wrong.
    pub fn exceptional(target: &Target, timestamp: u64, message: impl Into<String>) -> Self {
        Self {
            target_name: target.name.clone(),
            target_url: target.url.clone(),
            timestamp,
            is_exceptional: true,
            message: Some(message.into()),
        }
    }

    /// The message, or an empty string when none was recorded.
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }
}

// ── Reconciliation ─────────────────────────────────────────────────

/// Result of comparing a fresh outcome with the stored history. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationResult {
    pub target: Target,
    pub current_outcome: Outcome,
    pub should_notify: bool,
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
