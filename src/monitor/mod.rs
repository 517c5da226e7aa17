//! The monitoring engine: timers, the check executor and the glue that
//! keeps the schedule in step with the target store.

pub mod backoff;
pub mod executor;
pub mod models;
pub mod scheduler;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::alerting::AlertController;
use crate::db::{StoreError, StoreEvent, TargetStore};
use crate::fetch::detector::SignalDetector;
use crate::fetch::PageFetcher;
use crate::notifications::Notifier;

use executor::Executor;
use models::now_millis;
use scheduler::{CheckRequest, ReconcileReport, Scheduler};

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub fetch_timeout: Duration,
    pub max_concurrent_checks: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: crate::fetch::DEFAULT_FETCH_TIMEOUT,
            max_concurrent_checks: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckNowSummary {
    pub enqueued: usize,
    /// Targets whose check was already running.
    pub skipped: usize,
}

pub struct Monitor {
    store: Arc<dyn TargetStore>,
    scheduler: Scheduler,
    executor: Arc<Executor>,
    alerts: Arc<AlertController>,
    requests: Mutex<Option<mpsc::UnboundedReceiver<CheckRequest>>>,
    tasks: Mutex<Vec<(JoinHandle<()>, oneshot::Sender<()>)>>,
    settings: MonitorSettings,
}

impl Monitor {
    pub fn new(
        store: Arc<dyn TargetStore>,
        fetcher: Arc<dyn PageFetcher>,
        detector: Arc<dyn SignalDetector>,
        notifier: Arc<dyn Notifier>,
        settings: MonitorSettings,
    ) -> Self {
        let (scheduler, requests) = Scheduler::new();
        let alerts = Arc::new(AlertController::new(notifier, store.clone()));
        let executor = Arc::new(Executor::new(
            store.clone(),
            fetcher,
            detector,
            alerts.clone(),
            scheduler.clone(),
            settings.fetch_timeout,
        ));
        Self {
            store,
            scheduler,
            executor,
            alerts,
            requests: Mutex::new(Some(requests)),
            tasks: Mutex::new(Vec::new()),
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn TargetStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn alerts(&self) -> &Arc<AlertController> {
        &self.alerts
    }

    /// Starts the worker pool and the store listener, then arms every
    /// active target through [`Monitor::reconcile`].
    pub async fn start(&self) -> Result<ReconcileReport, StoreError> {
        let requests = self
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(requests) = requests {
            let (pool_tx, pool_rx) = oneshot::channel();
            let pool = self.executor.clone().spawn_pool(
                requests,
                self.settings.max_concurrent_checks,
                pool_rx,
            );

            // Subscribe before reconciling so no creation slips through.
            let (listener_tx, listener_rx) = oneshot::channel();
            let listener = tokio::spawn(listen_for_changes(
                self.store.clone(),
                self.scheduler.clone(),
                self.store.subscribe(),
                listener_rx,
            ));

            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            tasks.push((pool, pool_tx));
            tasks.push((listener, listener_tx));
        } else {
            warn!("Monitor already started.");
        }
        self.reconcile().await
    }

    /// Arms active targets that have no pending timer with delay 0.
    pub async fn reconcile(&self) -> Result<ReconcileReport, StoreError> {
        let active = self.store.get_active().await?;
        Ok(self.scheduler.reconcile(&active))
    }

    /// Enqueues an immediate check of every active target. Pending timers
    /// keep their schedule.
    pub async fn check_now(&self) -> Result<CheckNowSummary, StoreError> {
        let mut summary = CheckNowSummary::default();
        for target in self.store.get_active().await? {
            if self.scheduler.trigger_now(target.id) {
                summary.enqueued += 1;
            } else {
                summary.skipped += 1;
            }
        }
        info!(enqueued = summary.enqueued, skipped = summary.skipped, "Manual check requested.");
        Ok(summary)
    }

    pub async fn shutdown(&self) {
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for (handle, shutdown_tx) in tasks {
            if shutdown_tx.send(()).is_err() {
                warn!("Monitor task already finished.");
            }
            if let Err(e) = handle.await {
                error!(error = %e, "Monitor task ended abnormally.");
            }
        }
        self.scheduler.shutdown();
        info!("Monitor stopped.");
    }
}

/// Keeps timers in step with user edits.
async fn listen_for_changes(
    store: Arc<dyn TargetStore>,
    scheduler: Scheduler,
    mut events: broadcast::Receiver<StoreEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            event = events.recv() => event,
        };
        match event {
            Ok(StoreEvent::TargetCreated(target)) if target.active => {
                info!(target_id = target.id, "New target, checking now.");
                scheduler.arm(target.id, Duration::ZERO);
            }
            Ok(StoreEvent::TargetUpdated(target)) => {
                if target.active {
                    scheduler.arm(target.id, target.delay_until_due(now_millis()));
                } else {
                    scheduler.disarm(target.id);
                }
            }
            Ok(StoreEvent::TargetDeleted(id)) => {
                scheduler.disarm(id);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "Store events lagged, reconciling schedule.");
                match store.get_active().await {
                    Ok(active) => {
                        scheduler.reconcile(&active);
                    }
                    Err(e) => error!(error = %e, "Reconcile after lag failed."),
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
    info!("Store listener stopped.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::detector::PhraseSignalDetector;
    use crate::monitor::models::{NewTarget, TargetPatch};
    use crate::test_utils::{memory_store, page, RecordingNotifier, ScriptedFetcher};

    async fn monitor(fetcher: Arc<ScriptedFetcher>) -> Monitor {
        let store: Arc<dyn TargetStore> = Arc::new(memory_store().await);
        Monitor::new(
            store,
            fetcher,
            Arc::new(PhraseSignalDetector),
            Arc::new(RecordingNotifier::default()),
            MonitorSettings::default(),
        )
    }

    fn new_target(active: bool) -> NewTarget {
        NewTarget {
            locator: "https://tickets.example/e".into(),
            interval_minutes: 5,
            active,
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..300 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn start_checks_never_checked_targets_immediately() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![page(false), page(false)]));
        let monitor = monitor(fetcher.clone()).await;
        let a = monitor.store().create(new_target(true)).await.unwrap();
        monitor.store().create(new_target(false)).await.unwrap();

        let report = monitor.start().await.unwrap();
        assert_eq!(report.armed, 1);

        wait_until(|| fetcher.calls() == 1 && !monitor.scheduler().is_in_flight(a.id)).await;
        let delay = monitor.scheduler().pending_delay(a.id).unwrap();
        assert!(delay > Duration::from_secs(290));
        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn lifecycle_events_arm_and_disarm() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![]));
        let monitor = monitor(fetcher.clone()).await;
        monitor.start().await.unwrap();

        let target = monitor.store().create(new_target(true)).await.unwrap();
        wait_until(|| fetcher.calls() == 1 && monitor.scheduler().pending_delay(target.id).is_some()).await;

        let patch = TargetPatch {
            active: Some(false),
            ..Default::default()
        };
        monitor.store().update(target.id, patch).await.unwrap();
        wait_until(|| monitor.scheduler().pending_delay(target.id).is_none()).await;

        let patch = TargetPatch {
            active: Some(true),
            ..Default::default()
        };
        monitor.store().update(target.id, patch).await.unwrap();
        wait_until(|| monitor.scheduler().pending_delay(target.id).is_some()).await;

        monitor.store().delete(target.id).await.unwrap();
        wait_until(|| monitor.scheduler().pending_count() == 0).await;
        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn check_now_enqueues_active_targets_only() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![]));
        let monitor = monitor(fetcher.clone()).await;
        monitor.store().create(new_target(true)).await.unwrap();
        monitor.store().create(new_target(true)).await.unwrap();
        monitor.store().create(new_target(false)).await.unwrap();

        // Not started: requests queue up without being run.
        let summary = monitor.check_now().await.unwrap();
        assert_eq!(summary, CheckNowSummary { enqueued: 2, skipped: 0 });
        let summary = monitor.check_now().await.unwrap();
        assert_eq!(summary, CheckNowSummary { enqueued: 0, skipped: 2 });

        monitor.start().await.unwrap();
        wait_until(|| fetcher.calls() == 2).await;
        monitor.shutdown().await;
    }
}
