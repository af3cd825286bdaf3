//! downwatch.toml configuration parser.
//!
//! A base file is optionally overlaid by a sibling `<stem>.local.toml`; tables
//! are merged key by key with the local file winning. Values written as
//! `env:NAME` are read from the process environment at load time.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{DEFAULT_EXPECTED_STATUS, Target};

/// Prefix marking a value that is resolved from the environment.
const ENV_PREFIX: &str = "env:";

/// Webhook request limit when `[notify] timeout` is not set.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("no targets configured")]
    NoTargets,
    #[error("target `{0}` has an empty name")]
    EmptyName(String),
    #[error("duplicate target name `{0}`")]
    DuplicateName(String),
    #[error("target `{target}` has an invalid url `{url}` (expected http:// or https://)")]
    InvalidUrl { target: String, url: String },
    #[error("invalid duration for `{field}`: `{value}`")]
    InvalidDuration { field: &'static str, value: String },
    #[error("invalid probe settings: {0}")]
    InvalidProbe(String),
    #[error("`{0}` must not be empty")]
    EmptySetting(&'static str),
    #[error("`{field}` refers to environment variable `{var}`, which is not set")]
    MissingSecret { field: &'static str, var: String },
}

// ── File layout ────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    settings: Settings,
    #[serde(default)]
    probe: ProbeSection,
    #[serde(default)]
    notify: NotifySection,
    #[serde(default)]
    targets: BTreeMap<String, TargetEntry>,
}

/// Operational settings resolved once at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Location of the outcome store.
    pub store_path: PathBuf,
    /// Notifier topic the alert is published under.
    pub topic: String,
    #[serde(default = "default_downtime_prefix")]
    pub downtime_detected_prefix: String,
    #[serde(default = "default_state_changed_prefix")]
    pub state_changed_prefix: String,
    /// Where alerts are POSTed. Alerts are only logged when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Deployment or account label appended to alerts.
    #[serde(default)]
    pub origin: Option<String>,
}

fn default_downtime_prefix() -> String {
    "[DOWN]".to_string()
}

fn default_state_changed_prefix() -> String {
    "[STATE CHANGED]".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct ProbeSection {
    #[serde(default = "default_timeout")]
    timeout: String,
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
    #[serde(default = "default_base_delay")]
    base_delay: String,
    #[serde(default = "default_multiplier")]
    multiplier: u32,
    #[serde(default = "default_max_delay")]
    max_delay: String,
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            multiplier: default_multiplier(),
            max_delay: default_max_delay(),
        }
    }
}

fn default_timeout() -> String {
    "10s".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> String {
    "500ms".to_string()
}

fn default_multiplier() -> u32 {
    2
}

fn default_max_delay() -> String {
    "5s".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct NotifySection {
    #[serde(default = "default_notify_timeout")]
    timeout: String,
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            timeout: default_notify_timeout(),
        }
    }
}

fn default_notify_timeout() -> String {
    "10s".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct TargetEntry {
    url: String,
    name: Option<String>,
    expected_status_code: Option<u16>,
    expected_body_text: Option<String>,
}

// ── Resolved configuration ─────────────────────────────────────────

/// Probe timing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Hard limit for a single attempt.
    pub timeout: Duration,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
    /// Cap applied to every individual backoff wait.
    pub max_delay: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            multiplier: 2,
            max_delay: Duration::from_millis(5000),
        }
    }
}

/// Alert delivery parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyConfig {
    /// Limit for one webhook request, connect to response.
    pub timeout: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_NOTIFY_TIMEOUT,
        }
    }
}

/// Fully validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub settings: Settings,
    pub probe: ProbeConfig,
    pub notify: NotifyConfig,
    /// Targets ordered by their configuration key.
    pub targets: Vec<Target>,
}

impl Config {
    /// Load `path`, overlay `<stem>.local.toml` if it exists, then validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut value = read_toml(path)?;

        let local = local_override_path(path);
        if local.exists() {
            merge_values(&mut value, read_toml(&local)?);
        }

        let file: ConfigFile = value.try_into().map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Self::resolve(file)
    }

    /// Parse a single configuration document without any override file.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        Self::resolve(file)
    }

    fn resolve(file: ConfigFile) -> Result<Self, ConfigError> {
        let mut settings = file.settings;
        if settings.topic.trim().is_empty() {
            return Err(ConfigError::EmptySetting("settings.topic"));
        }
        if settings.downtime_detected_prefix.trim().is_empty() {
            return Err(ConfigError::EmptySetting("settings.downtime_detected_prefix"));
        }
        if settings.state_changed_prefix.trim().is_empty() {
            return Err(ConfigError::EmptySetting("settings.state_changed_prefix"));
        }
        settings.webhook_url = settings
            .webhook_url
            .map(|v| resolve_env("settings.webhook_url", v))
            .transpose()?;

        let probe = resolve_probe(&file.probe)?;
        let notify = resolve_notify(&file.notify)?;
        let targets = resolve_targets(file.targets)?;

        Ok(Self {
            settings,
            probe,
            notify,
            targets,
        })
    }
}

/// `downwatch.toml` → `downwatch.local.toml`.
pub fn local_override_path(path: &Path) -> PathBuf {
    path.with_extension("local.toml")
}

fn read_toml(path: &Path) -> Result<toml::Value, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Merge `overlay` into `base`: tables recurse, everything else is replaced.
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn resolve_env(field: &'static str, value: String) -> Result<String, ConfigError> {
    match value.strip_prefix(ENV_PREFIX) {
        Some(var) => std::env::var(var).map_err(|_| ConfigError::MissingSecret {
            field,
            var: var.to_string(),
        }),
        None => Ok(value),
    }
}

fn resolve_probe(section: &ProbeSection) -> Result<ProbeConfig, ConfigError> {
    let duration = |field: &'static str, value: &str| {
        parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
            field,
            value: value.to_string(),
        })
    };

    let probe = ProbeConfig {
        timeout: duration("probe.timeout", &section.timeout)?,
        max_attempts: section.max_attempts,
        base_delay: duration("probe.base_delay", &section.base_delay)?,
        multiplier: section.multiplier,
        max_delay: duration("probe.max_delay", &section.max_delay)?,
    };

    if probe.max_attempts == 0 {
        return Err(ConfigError::InvalidProbe("max_attempts must be at least 1".into()));
    }
    if probe.multiplier == 0 {
        return Err(ConfigError::InvalidProbe("multiplier must be at least 1".into()));
    }
    if probe.timeout.is_zero() {
        return Err(ConfigError::InvalidProbe("timeout must be non-zero".into()));
    }
    Ok(probe)
}

fn resolve_notify(section: &NotifySection) -> Result<NotifyConfig, ConfigError> {
    let timeout = parse_duration(&section.timeout)
        .filter(|d| !d.is_zero())
        .ok_or_else(|| ConfigError::InvalidDuration {
            field: "notify.timeout",
            value: section.timeout.clone(),
        })?;
    Ok(NotifyConfig { timeout })
}

fn resolve_targets(entries: BTreeMap<String, TargetEntry>) -> Result<Vec<Target>, ConfigError> {
    if entries.is_empty() {
        return Err(ConfigError::NoTargets);
    }

    let mut seen = HashSet::new();
    let mut targets = Vec::with_capacity(entries.len());
    for (key, entry) in entries {
        let name = entry.name.unwrap_or_else(|| key.clone());
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyName(key));
        }
        if !seen.insert(name.clone()) {
            return Err(ConfigError::DuplicateName(name));
        }
        if !(entry.url.starts_with("http://") || entry.url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl {
                target: name,
                url: entry.url,
            });
        }
        targets.push(Target {
            name,
            url: entry.url,
            expected_status_code: entry.expected_status_code.unwrap_or(DEFAULT_EXPECTED_STATUS),
            expected_body_text: entry.expected_body_text.filter(|t| !t.is_empty()),
        });
    }
    Ok(targets)
}

/// Parse a duration string like "5s", "500ms", "1m". A bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
