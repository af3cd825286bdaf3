//! Orchestrator — one run: probe everything, reconcile, alert at most once.

use std::sync::Arc;
use std::time::Duration;

use downwatch_core::{Outcome, ReconciliationResult, Target};
use downwatch_notify::{Alert, AlertPrefixes, Notifier};
use downwatch_probe::Probe;
use downwatch_state::{OpenStore, OutcomeStore};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::reconcile::ReconciliationEngine;

/// A target that could not be fully processed in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFailure {
    pub target: String,
    pub error: String,
}

/// What happened to the run's alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchStatus {
    /// No target changed state.
    NotNeeded,
    Sent,
    /// The notifier failed; outcomes are already persisted.
    Failed(String),
}

/// Summary of a single run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Targets whose probe completed.
    pub probed: usize,
    pub results: Vec<ReconciliationResult>,
    pub failures: Vec<TargetFailure>,
    pub alert: Option<Alert>,
    pub dispatch: DispatchStatus,
}

impl RunReport {
    /// Results that were flagged for notification.
    pub fn notified(&self) -> impl Iterator<Item = &ReconciliationResult> {
        self.results.iter().filter(|r| r.should_notify)
    }

    /// Targets currently exceptional.
    pub fn exceptional(&self) -> impl Iterator<Item = &ReconciliationResult> {
        self.results.iter().filter(|r| r.current_outcome.is_exceptional)
    }
}

/// Runs probes for every target and turns state changes into one alert.
pub struct Orchestrator {
    prober: Arc<dyn Probe>,
    /// Opened after the probes settle and dropped once reconciliation ends.
    stores: Arc<dyn OpenStore>,
    notifier: Arc<dyn Notifier>,
    topic: String,
    prefixes: AlertPrefixes,
    /// Deployment label appended to alerts.
    origin: Option<String>,
}

impl Orchestrator {
    /// Reconcile every run against the same, already-open store.
    pub fn new(
        prober: Arc<dyn Probe>,
        store: Arc<dyn OutcomeStore>,
        notifier: Arc<dyn Notifier>,
        topic: impl Into<String>,
        prefixes: AlertPrefixes,
    ) -> Self {
        Self::opening(prober, Arc::new(store), notifier, topic, prefixes)
    }

    /// Open a store through `stores` for each run and release it afterwards.
    pub fn opening(
        prober: Arc<dyn Probe>,
        stores: Arc<dyn OpenStore>,
        notifier: Arc<dyn Notifier>,
        topic: impl Into<String>,
        prefixes: AlertPrefixes,
    ) -> Self {
        Self {
            prober,
            stores,
            notifier,
            topic: topic.into(),
            prefixes,
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: Option<String>) -> Self {
        self.origin = origin;
        self
    }

    /// Perform one complete run over `targets`.
    pub async fn run(&self, targets: &[Target]) -> RunReport {
        info!(targets = targets.len(), "run starting");

        let mut failures = Vec::new();

        // ── Probe phase: one task per target, joined before anything else ──
        let handles: Vec<_> = targets
            .iter()
            .cloned()
            .map(|target| {
                let prober = Arc::clone(&self.prober);
                tokio::spawn(async move {
                    let outcome = prober.probe(&target).await;
                    (target, outcome)
                })
            })
            .collect();

        let mut probed: Vec<(Target, Outcome)> = Vec::with_capacity(handles.len());
        for (target, handle) in targets.iter().zip(handles) {
            match handle.await {
                Ok(pair) => probed.push(pair),
                Err(e) => {
                    error!(target_name = %target.name, error = %e, "probe task failed");
                    failures.push(TargetFailure {
                        target: target.name.clone(),
                        error: format!("probe task failed: {e}"),
                    });
                }
            }
        }

        // ── Reconcile phase ───────────────────────────────────────────
        let probed_count = probed.len();
        let mut results = Vec::with_capacity(probed_count);
        match self.stores.open_store() {
            Ok(store) => {
                let engine = ReconciliationEngine::new(store);
                for (target, outcome) in probed {
                    debug!(
                        target_name = %target.name,
                        exceptional = outcome.is_exceptional,
                        message = %outcome.message(),
                        "probe finished"
                    );
                    match engine.reconcile(&target, outcome) {
                        Ok(result) => results.push(result),
                        Err(e) => {
                            error!(target_name = %target.name, error = %e, "reconciliation failed");
                            failures.push(TargetFailure {
                                target: target.name.clone(),
                                error: e.to_string(),
                            });
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, targets = probed_count, "outcome store unavailable; nothing reconciled");
                for (target, _) in probed {
                    failures.push(TargetFailure {
                        target: target.name,
                        error: format!("storage unavailable: {e}"),
                    });
                }
            }
        }

        // ── Notify phase ──────────────────────────────────────────────
        let notified: Vec<ReconciliationResult> =
            results.iter().filter(|r| r.should_notify).cloned().collect();
        let alert = Alert::compose(
            &self.topic,
            &notified,
            &self.prefixes,
            self.origin.as_deref(),
        );

        let dispatch = match &alert {
            None => {
                info!(
                    probed = probed_count,
                    failures = failures.len(),
                    "all checks settled; no state changes"
                );
                DispatchStatus::NotNeeded
            }
            Some(alert) => match self.notifier.publish(alert).await {
                Ok(()) => {
                    info!(
                        subject = %alert.subject,
                        notified = notified.len(),
                        "alert dispatched"
                    );
                    DispatchStatus::Sent
                }
                Err(e) => {
                    error!(
                        subject = %alert.subject,
                        error = %e,
                        "failed to dispatch alert; it will not be retried"
                    );
                    DispatchStatus::Failed(e.to_string())
                }
            },
        };

        RunReport {
            probed: probed_count,
            results,
            failures,
            alert,
            dispatch,
        }
    }

    /// Run every `interval` until `shutdown` flips to true.
    ///
    /// The first run starts immediately. A run that overruns the interval
    /// delays the next tick instead of bunching runs together.
    pub async fn run_periodically(
        &self,
        targets: &[Target],
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run(targets).await;
                    if !report.failures.is_empty() {
                        warn!(failures = report.failures.len(), "run finished with failures");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("periodic runs shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    use downwatch_notify::{NotifyError, PublishFuture};
    use downwatch_probe::ProbeFuture;
    use downwatch_state::{StateError, StateResult, StateStore, StorePath};

    /// Healthy for every target, counting calls.
    struct CountingProbe {
        calls: AtomicUsize,
        clock: AtomicU64,
    }

    impl Probe for CountingProbe {
        fn probe<'a>(&'a self, target: &'a Target) -> ProbeFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let ts = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move { Outcome::healthy(target, ts, "up") })
        }
    }

    #[derive(Default)]
    struct CountingNotifier {
        alerts: Mutex<Vec<Alert>>,
    }

    impl Notifier for CountingNotifier {
        fn publish<'a>(&'a self, alert: &'a Alert) -> PublishFuture<'a> {
            self.alerts.lock().unwrap().push(alert.clone());
            Box::pin(async { Ok::<(), NotifyError>(()) })
        }
    }

    fn prefixes() -> AlertPrefixes {
        AlertPrefixes {
            downtime_detected: "[DOWN]".into(),
            state_changed: "[RECOVERED]".into(),
        }
    }

    #[tokio::test]
    async fn empty_target_list_sends_nothing() {
        let notifier = Arc::new(CountingNotifier::default());
        let orchestrator = Orchestrator::new(
            Arc::new(CountingProbe {
                calls: AtomicUsize::new(0),
                clock: AtomicU64::new(0),
            }),
            Arc::new(StateStore::open_in_memory().unwrap()),
            notifier.clone(),
            "ops",
            prefixes(),
        );

        let report = orchestrator.run(&[]).await;
        assert_eq!(report.probed, 0);
        assert_eq!(report.dispatch, DispatchStatus::NotNeeded);
        assert!(notifier.alerts.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_runs_until_shutdown() {
        let probe = Arc::new(CountingProbe {
            calls: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
        });
        let notifier = Arc::new(CountingNotifier::default());
        let orchestrator = Arc::new(Orchestrator::new(
            probe.clone(),
            Arc::new(StateStore::open_in_memory().unwrap()),
            notifier.clone(),
            "ops",
            prefixes(),
        ));
        let targets = vec![Target::new("api", "http://api")];
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runner = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .run_periodically(&targets, Duration::from_secs(60), shutdown_rx)
                    .await;
            })
        };

        // Ticks at 0s, 60s and 120s.
        tokio::time::sleep(Duration::from_secs(150)).await;
        shutdown_tx.send(true).unwrap();
        runner.await.unwrap();

        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
        // Healthy throughout: only the baseline is reported.
        assert_eq!(notifier.alerts.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn store_file_is_free_between_periodic_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outcomes.redb");
        let probe = Arc::new(CountingProbe {
            calls: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
        });
        let orchestrator = Arc::new(Orchestrator::opening(
            probe.clone(),
            Arc::new(StorePath::new(&path)),
            Arc::new(CountingNotifier::default()),
            "ops",
            prefixes(),
        ));
        let targets = vec![Target::new("api", "http://api")];
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runner = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .run_periodically(&targets, Duration::from_secs(60), shutdown_rx)
                    .await;
            })
        };

        // Between the first and second tick another process can read history.
        tokio::time::sleep(Duration::from_secs(30)).await;
        {
            let reader = StateStore::open(&path).unwrap();
            assert_eq!(reader.history("api", 10).unwrap().len(), 1);
        }

        // And between the second and third.
        tokio::time::sleep(Duration::from_secs(60)).await;
        {
            let reader = StateStore::open(&path).unwrap();
            assert_eq!(reader.history("api", 10).unwrap().len(), 2);
        }

        shutdown_tx.send(true).unwrap();
        runner.await.unwrap();
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    struct LockedStores;

    impl OpenStore for LockedStores {
        fn open_store(&self) -> StateResult<Arc<dyn OutcomeStore>> {
            Err(StateError::Unavailable("database is already open elsewhere".into()))
        }
    }

    #[tokio::test]
    async fn unopenable_store_fails_every_probed_target() {
        let notifier = Arc::new(CountingNotifier::default());
        let orchestrator = Orchestrator::opening(
            Arc::new(CountingProbe {
                calls: AtomicUsize::new(0),
                clock: AtomicU64::new(0),
            }),
            Arc::new(LockedStores),
            notifier.clone(),
            "ops",
            prefixes(),
        );
        let targets = vec![Target::new("a", "http://a"), Target::new("b", "http://b")];

        let report = orchestrator.run(&targets).await;

        assert_eq!(report.probed, 2);
        assert!(report.results.is_empty());
        let failed: Vec<&str> = report.failures.iter().map(|f| f.target.as_str()).collect();
        assert_eq!(failed, vec!["a", "b"]);
        assert!(report.failures[0].error.starts_with("storage unavailable"));
        assert_eq!(report.dispatch, DispatchStatus::NotNeeded);
        assert!(notifier.alerts.lock().unwrap().is_empty());
    }
}
