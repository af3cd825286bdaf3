//! downwatch-engine — edge-triggered reconciliation and the per-run flow.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator::run(targets)
//!   ├── one tokio task per target → Probe::probe() → Outcome
//!   ├── join every task
//!   ├── ReconciliationEngine::reconcile() per target
//!   │     ├── OutcomeStore::last_outcome()   (read first)
//!   │     ├── should_notify(previous, fresh)
//!   │     └── OutcomeStore::append()         (always)
//!   └── Alert::compose() → Notifier::publish()   (at most once)
//! ```
//!
//! Alerts are edge-triggered: a target is reported on its first observation
//! and whenever its exceptional flag flips, never while it stays put.
//! A failure on one target (storage down, probe task panicked) is logged
//! and reported without affecting the others.

pub mod orchestrator;
pub mod reconcile;

pub use orchestrator::{DispatchStatus, Orchestrator, RunReport, TargetFailure};
pub use reconcile::{ReconcileError, ReconciliationEngine, should_notify};
