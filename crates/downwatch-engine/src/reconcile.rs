//! Compare a fresh outcome with the last recorded one and persist it.

use std::sync::Arc;

use downwatch_core::{Outcome, ReconciliationResult, Target};
use downwatch_state::{OutcomeStore, StateError};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The store could not be read or written; neither history nor the
    /// notify decision exist for this target in this run.
    #[error("storage unavailable while reconciling `{target}`: {source}")]
    StorageUnavailable { target: String, source: StateError },

    /// Another writer already recorded an outcome for this target at the
    /// same timestamp. The store itself is healthy.
    #[error("outcome for `{target}` at {timestamp} was already recorded by another writer")]
    DuplicateOutcome { target: String, timestamp: u64 },
}

/// Whether moving from `previous` to `current` deserves an alert.
///
/// True on first observation and whenever the exceptional flag flips.
pub fn should_notify(previous: Option<&Outcome>, current: &Outcome) -> bool {
    match previous {
        None => true,
        Some(previous) => previous.is_exceptional != current.is_exceptional,
    }
}

/// Reconciles one target at a time against the outcome store.
#[derive(Clone)]
pub struct ReconciliationEngine {
    store: Arc<dyn OutcomeStore>,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn OutcomeStore>) -> Self {
        Self { store }
    }

    /// Read the previous outcome, decide, then append `fresh`.
    ///
    /// The read completes before the write, so the decision is always made
    /// against the state that existed before this call. `fresh` is stamped
    /// after the previous outcome if the clock has gone backwards, so the
    /// outcome written here is always the one read back next time.
    pub fn reconcile(
        &self,
        target: &Target,
        mut fresh: Outcome,
    ) -> Result<ReconciliationResult, ReconcileError> {
        let storage = |source: StateError| match source {
            StateError::Conflict { target, timestamp } => {
                ReconcileError::DuplicateOutcome { target, timestamp }
            }
            source => ReconcileError::StorageUnavailable {
                target: target.name.clone(),
                source,
            },
        };

        let previous = self.store.last_outcome(&target.name).map_err(storage)?;
        let notify = should_notify(previous.as_ref(), &fresh);

        if let Some(previous) = &previous {
            if fresh.timestamp <= previous.timestamp {
                let adjusted = previous.timestamp.saturating_add(1);
                warn!(
                    target_name = %target.name,
                    probed_at = fresh.timestamp,
                    last_recorded = previous.timestamp,
                    stored_at = adjusted,
                    "probe timestamp not after last outcome; clock moved backwards?"
                );
                fresh.timestamp = adjusted;
            }
        }

        self.store.append(&fresh).map_err(storage)?;

        debug!(
            target_name = %target.name,
            first = previous.is_none(),
            exceptional = fresh.is_exceptional,
            notify,
            "reconciled"
        );

        Ok(ReconciliationResult {
            target: target.clone(),
            current_outcome: fresh,
            should_notify: notify,
        })
    }
}
