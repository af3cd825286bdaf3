//! downwatch-state — durable outcome history for downwatch.
//!
//! Backed by [redb](https://docs.rs/redb). Every probe outcome is appended
//! to a single table keyed by `(target_name, timestamp_ms)`; nothing is ever
//! updated or deleted. The most recent outcome for a target is the last key
//! in that target's range, so "latest" is a reverse range scan.
//!
//! Reads run in their own transaction after every committed write, which
//! gives the strongly-consistent "last outcome" view reconciliation needs.
//!
//! The engine talks to the store through the [`OutcomeStore`] trait so that
//! reconciliation can be exercised against fakes.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::{OpenStore, OutcomeStore, StorePath, StateStore};
