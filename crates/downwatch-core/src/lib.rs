//! downwatch-core — shared data model and configuration for downwatch.
//!
//! Holds the types every other crate speaks in ([`Target`], [`Outcome`],
//! [`ReconciliationResult`]) and the TOML configuration loader that turns
//! `downwatch.toml` (plus an optional `downwatch.local.toml` override) into
//! validated targets, probe parameters and operational settings.

pub mod config;
pub mod types;

pub use config::{
    Config, ConfigError, DEFAULT_NOTIFY_TIMEOUT, NotifyConfig, ProbeConfig, Settings, parse_duration,
};
pub use types::*;
