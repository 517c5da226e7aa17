//! Runs one check for one target and decides when it runs next.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backoff::{BackoffPolicy, RetryDecision, BASE_RETRY_DELAY};
use super::models::{
    now_millis, recovery_note, CheckOutcome, EventCategory, EventMetadata, Target,
};
use super::scheduler::{CheckOrigin, CheckRequest, Scheduler};
use crate::alerting::{AlertController, AlertTransition};
use crate::db::{StoreError, TargetStore};
use crate::fetch::detector::{Detection, SignalDetector};
use crate::fetch::{FetchError, PageFetcher};

/// What a completed check did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub target_id: i32,
    pub outcome: CheckOutcome,
    pub consecutive_failures: i32,
    /// `None` when the target will not be checked again.
    pub next_delay: Option<Duration>,
    pub alert: Option<AlertTransition>,
}

pub struct Executor {
    store: Arc<dyn TargetStore>,
    fetcher: Arc<dyn PageFetcher>,
    detector: Arc<dyn SignalDetector>,
    alerts: Arc<AlertController>,
    scheduler: Scheduler,
    backoff: BackoffPolicy,
    fetch_timeout: Duration,
}

enum Liveness {
    Live(Target),
    Gone,
    Unavailable(StoreError),
}

impl Executor {
    pub fn new(
        store: Arc<dyn TargetStore>,
        fetcher: Arc<dyn PageFetcher>,
        detector: Arc<dyn SignalDetector>,
        alerts: Arc<AlertController>,
        scheduler: Scheduler,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            store,
            fetcher,
            detector,
            alerts,
            scheduler,
            backoff: BackoffPolicy::default(),
            fetch_timeout,
        }
    }

    /// Checks the target, persists the outcome, then reports the re-arm
    /// decision to the scheduler. Returns `None` when nothing was checked.
    pub async fn run_check(&self, target_id: i32, origin: CheckOrigin) -> Option<CheckReport> {
        let (report, next_delay) = match self.check(target_id).await {
            Ok(Some(report)) => {
                let delay = report.next_delay;
                (Some(report), delay)
            }
            Ok(None) => (None, None),
            Err((e, delay)) => {
                error!(target_id, error = %e, "Failed to persist check result.");
                (None, Some(delay))
            }
        };
        self.scheduler.finish(target_id, next_delay, origin);
        report
    }

    async fn load_live(&self, target_id: i32) -> Liveness {
        match self.store.get_by_id(target_id).await {
            Ok(target) if target.active => Liveness::Live(target),
            Ok(_) => {
                debug!(target_id, "Target inactive, not checking.");
                Liveness::Gone
            }
            Err(StoreError::NotFound(_)) => {
                debug!(target_id, "Target no longer exists.");
                Liveness::Gone
            }
            Err(e) => Liveness::Unavailable(e),
        }
    }

    /// `Err` carries the store failure and the delay to retry after.
    async fn check(&self, target_id: i32) -> Result<Option<CheckReport>, (StoreError, Duration)> {
        let target = match self.load_live(target_id).await {
            Liveness::Live(target) => target,
            Liveness::Gone => return Ok(None),
            Liveness::Unavailable(e) => return Err((e, BASE_RETRY_DELAY)),
        };
        let interval = target.interval();

        debug!(target_id, locator = %target.locator, "Checking target.");
        let fetched = self
            .fetcher
            .fetch(&target.locator, self.fetch_timeout)
            .await;

        // The target may have been edited, disabled or removed during the fetch.
        let target = match self.load_live(target_id).await {
            Liveness::Live(target) => target,
            Liveness::Gone => {
                info!(target_id, "Target disabled during check, result discarded.");
                return Ok(None);
            }
            Liveness::Unavailable(e) => return Err((e, interval)),
        };
        let interval = target.interval();

        let result = match fetched {
            Ok(content) => {
                let detection = self.detector.detect(&content);
                self.record_success(target, detection).await
            }
            Err(e) => self.record_failure(target, e).await,
        };
        result.map(Some).map_err(|e| (e, interval))
    }

    async fn record_success(
        &self,
        mut target: Target,
        detection: Detection,
    ) -> Result<CheckReport, StoreError> {
        let id = target.id;

        if !target.has_metadata() && (detection.name.is_some() || detection.date.is_some()) {
            let name = detection.name;
            let date = target.metadata.date.clone().or(detection.date);
            let category = match name.as_deref() {
                Some(name) => EventCategory::classify(Some(name), &target.locator),
                None => target.metadata.category,
            };
            info!(target_id = id, name = ?name, date = ?date, %category, "Event details discovered.");
            target = self
                .store
                .update_metadata(id, EventMetadata { name, date, category })
                .await?;
        }

        if target.consecutive_failures > 0 {
            let failures = target.consecutive_failures;
            self.store.update_failure_count(id, 0).await?;
            self.store.append_history(id, recovery_note(failures)).await?;
            info!(target_id = id, failures, "Connection restored.");
        }

        let was_signalled = target.signal_active;
        let updated = self
            .store
            .update_check_state(id, now_millis(), detection.signal_present)
            .await?;

        let alert = if detection.signal_present && !was_signalled {
            Some(self.alerts.on_signal_found(&updated).await)
        } else {
            None
        };

        let outcome = if detection.signal_present {
            CheckOutcome::SignalFound(updated.metadata.clone())
        } else {
            CheckOutcome::SignalAbsent
        };
        debug!(target_id = id, signal = detection.signal_present, "Check complete.");

        Ok(CheckReport {
            target_id: id,
            outcome,
            consecutive_failures: 0,
            next_delay: Some(updated.interval()),
            alert,
        })
    }

    async fn record_failure(
        &self,
        target: Target,
        error: FetchError,
    ) -> Result<CheckReport, StoreError> {
        let id = target.id;
        let cause = error.cause();
        let failures = target.consecutive_failures.saturating_add(1);
        warn!(target_id = id, failures, error = %error, "Check failed.");

        if failures == 1 {
            self.store
                .append_history(id, cause.history_note().to_string())
                .await?;
        }

        let attempts = u32::try_from(failures).unwrap_or(u32::MAX);
        let (persisted, delay) = match self.backoff.decide(attempts) {
            RetryDecision::Retry { delay, .. } => (failures, delay),
            RetryDecision::GiveUp => {
                info!(
                    target_id = id,
                    max_attempts = self.backoff.max_attempts(),
                    "Retry limit reached, back to the normal interval."
                );
                (0, target.interval())
            }
        };

        self.store.update_failure_count(id, persisted).await?;
        self.store
            .update_check_state(id, now_millis(), target.signal_active)
            .await?;

        Ok(CheckReport {
            target_id: id,
            outcome: CheckOutcome::TransientFailure(cause),
            consecutive_failures: persisted,
            next_delay: Some(delay),
            alert: None,
        })
    }

    /// Drains the scheduler's dispatch queue, running up to
    /// `max_concurrent` checks at once.
    pub fn spawn_pool(
        self: Arc<Self>,
        mut requests: mpsc::UnboundedReceiver<CheckRequest>,
        max_concurrent: usize,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
        tokio::spawn(async move {
            info!(max_concurrent, "Check worker pool started.");
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    request = requests.recv() => {
                        let Some(request) = request else { break };
                        let Ok(permit) = permits.clone().acquire_owned().await else { break };
                        let executor = self.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            executor.run_check(request.target_id, request.origin).await;
                        });
                    }
                }
            }
            info!("Check worker pool stopped.");
        })
    }
}
