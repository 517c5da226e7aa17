//! Per-target timers.
//!
//! Each target owns at most one pending timer and at most one in-flight
//! check. A firing timer never runs the check itself: it marks the target
//! in flight and hands a [`CheckRequest`] to the executor pool. The executor
//! reports back through [`Scheduler::finish`], which is the only place a
//! timer is re-armed after a check.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::models::Target;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOrigin {
    Timer,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckRequest {
    pub target_id: i32,
    pub origin: CheckOrigin,
}

struct Timer {
    generation: u64,
    due: Instant,
    cancel_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Timer {
    fn cancel(self) {
        // The task may have fired already.
        let _ = self.cancel_tx.send(());
        self.handle.abort();
    }
}

#[derive(Default)]
struct Slot {
    timer: Option<Timer>,
    in_flight: bool,
    /// Disarmed while a check was running; dropped when it finishes.
    disarmed: bool,
    /// Armed while a check was running; applied when it finishes.
    pending_arm: Option<Duration>,
}

struct Inner {
    slots: Mutex<HashMap<i32, Slot>>,
    next_generation: AtomicU64,
    dispatch_tx: mpsc::UnboundedSender<CheckRequest>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub armed: usize,
    pub disarmed: usize,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Returns the scheduler and the receiving end of its dispatch queue.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CheckRequest>) {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                dispatch_tx,
            }),
        };
        (scheduler, dispatch_rx)
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<i32, Slot>> {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedules the next check of `target_id` after `delay`, replacing any
    /// pending timer.
    ///
    /// Returns `false` when a check is in flight. The request is kept and
    /// applied once the executor reports back.
    pub fn arm(&self, target_id: i32, delay: Duration) -> bool {
        let mut slots = self.slots();
        let slot = slots.entry(target_id).or_default();
        slot.disarmed = false;
        if slot.in_flight {
            slot.pending_arm = Some(delay);
            debug!(target_id, "Check in flight, re-arm deferred.");
            return false;
        }
        self.set_timer(slot, target_id, delay);
        true
    }

    fn set_timer(&self, slot: &mut Slot, target_id: i32, delay: Duration) {
        if let Some(previous) = slot.timer.take() {
            previous.cancel();
        }
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let due = Instant::now() + delay;
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let handle = tokio::spawn(run_timer(
            self.inner.clone(),
            target_id,
            generation,
            due,
            cancel_rx,
        ));
        slot.timer = Some(Timer {
            generation,
            due,
            cancel_tx,
            handle,
        });
        debug!(target_id, delay_ms = delay.as_millis() as u64, "Timer armed.");
    }

    /// Cancels any pending timer. Idempotent.
    ///
    /// Returns whether the scheduler knew the target.
    pub fn disarm(&self, target_id: i32) -> bool {
        let mut slots = self.slots();
        let Some(slot) = slots.get_mut(&target_id) else {
            return false;
        };
        if let Some(timer) = slot.timer.take() {
            timer.cancel();
        }
        slot.pending_arm = None;
        if slot.in_flight {
            slot.disarmed = true;
        } else {
            slots.remove(&target_id);
        }
        info!(target_id, "Target disarmed.");
        true
    }

    /// Arms every active target that has neither a pending timer nor a
    /// running check with delay 0, and disarms targets no longer active.
    pub fn reconcile(&self, active: &[Target]) -> ReconcileReport {
        let active_ids: HashSet<i32> = active.iter().map(|t| t.id).collect();
        let mut report = ReconcileReport::default();

        let orphans: Vec<i32> = self
            .slots()
            .keys()
            .filter(|id| !active_ids.contains(id))
            .copied()
            .collect();
        for id in orphans {
            if self.disarm(id) {
                report.disarmed += 1;
            }
        }

        for target in active {
            let idle = self
                .slots()
                .get(&target.id)
                .is_none_or(|slot| slot.timer.is_none() && !slot.in_flight);
            if idle && self.arm(target.id, Duration::ZERO) {
                report.armed += 1;
            }
        }
        info!(armed = report.armed, disarmed = report.disarmed, "Schedule reconciled.");
        report
    }

    /// Dispatches an immediate check without touching the pending timer.
    ///
    /// Returns `false` if a check for the target is already running.
    pub fn trigger_now(&self, target_id: i32) -> bool {
        let mut slots = self.slots();
        let slot = slots.entry(target_id).or_default();
        if slot.in_flight {
            return false;
        }
        slot.in_flight = true;
        slot.disarmed = false;
        let request = CheckRequest {
            target_id,
            origin: CheckOrigin::Manual,
        };
        if self.inner.dispatch_tx.send(request).is_err() {
            warn!(target_id, "Executor is gone, manual check dropped.");
            slot.in_flight = false;
            return false;
        }
        true
    }

    /// Called by the executor once the outcome is persisted.
    ///
    /// `next_delay` of `None` means the target should not be checked again.
    /// An `arm` or `disarm` issued while the check ran overrides it.
    pub fn finish(&self, target_id: i32, next_delay: Option<Duration>, origin: CheckOrigin) {
        let mut slots = self.slots();
        let Some(slot) = slots.get_mut(&target_id) else {
            return;
        };
        slot.in_flight = false;

        if let Some(delay) = slot.pending_arm.take() {
            self.set_timer(slot, target_id, delay);
            return;
        }
        let next_delay = if slot.disarmed { None } else { next_delay };
        match next_delay {
            None => {
                if let Some(timer) = slot.timer.take() {
                    timer.cancel();
                }
                slots.remove(&target_id);
            }
            // A manual check leaves the regular schedule alone.
            Some(_) if origin == CheckOrigin::Manual && slot.timer.is_some() => {}
            Some(delay) => self.set_timer(slot, target_id, delay),
        }
    }

    /// Time left on the pending timer.
    pub fn pending_delay(&self, target_id: i32) -> Option<Duration> {
        self.slots()
            .get(&target_id)
            .and_then(|slot| slot.timer.as_ref())
            .map(|timer| timer.due.saturating_duration_since(Instant::now()))
    }

    pub fn is_in_flight(&self, target_id: i32) -> bool {
        self.slots()
            .get(&target_id)
            .is_some_and(|slot| slot.in_flight)
    }

    pub fn pending_count(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| slot.timer.is_some())
            .count()
    }

    /// Cancels every timer. In-flight checks finish but are not re-armed.
    pub fn shutdown(&self) {
        let mut slots = self.slots();
        for (_, mut slot) in slots.drain() {
            if let Some(timer) = slot.timer.take() {
                timer.cancel();
            }
        }
        info!("Scheduler stopped.");
    }
}

impl Inner {
    fn fire(&self, target_id: i32, generation: u64) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = slots.get_mut(&target_id) else {
            return;
        };
        if slot.timer.as_ref().map(|t| t.generation) != Some(generation) {
            // Superseded by a later arm.
            return;
        }
        slot.timer = None;
        if slot.in_flight {
            debug!(target_id, "Timer fired during a running check, skipped.");
            return;
        }
        slot.in_flight = true;
        let request = CheckRequest {
            target_id,
            origin: CheckOrigin::Timer,
        };
        if self.dispatch_tx.send(request).is_err() {
            warn!(target_id, "Executor is gone, scheduled check dropped.");
            slot.in_flight = false;
        }
    }
}

async fn run_timer(
    inner: Arc<Inner>,
    target_id: i32,
    generation: u64,
    due: Instant,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    tokio::select! {
        biased;
        _ = &mut cancel_rx => {}
        _ = tokio::time::sleep_until(due) => inner.fire(target_id, generation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::target;
    use tokio::sync::mpsc::error::TryRecvError;

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    fn timer_request(target_id: i32) -> CheckRequest {
        CheckRequest {
            target_id,
            origin: CheckOrigin::Timer,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn armed_timer_fires_once_after_delay() {
        let (scheduler, mut rx) = Scheduler::new();
        assert!(scheduler.arm(1, Duration::from_secs(10)));
        assert_eq!(scheduler.pending_delay(1), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(9)).await;
        settle().await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(rx.recv().await, Some(timer_request(1)));
        assert!(scheduler.is_in_flight(1));
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_replaces_pending_timer() {
        let (scheduler, mut rx) = Scheduler::new();
        scheduler.arm(1, Duration::from_secs(10));
        scheduler.arm(1, Duration::from_secs(30));
        scheduler.arm(1, Duration::from_secs(30));
        assert_eq!(scheduler.pending_count(), 1);

        tokio::time::advance(Duration::from_secs(15)).await;
        settle().await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(rx.recv().await, Some(timer_request(1)));

        tokio::time::advance(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn disarm_cancels_and_is_idempotent() {
        let (scheduler, mut rx) = Scheduler::new();
        scheduler.arm(1, Duration::from_secs(5));
        assert!(scheduler.disarm(1));
        assert!(!scheduler.disarm(1));

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_blocks_second_dispatch_and_arm() {
        let (scheduler, mut rx) = Scheduler::new();
        assert!(scheduler.trigger_now(1));
        assert!(!scheduler.trigger_now(1));
        assert!(!scheduler.arm(1, Duration::ZERO));
        assert_eq!(
            rx.recv().await,
            Some(CheckRequest {
                target_id: 1,
                origin: CheckOrigin::Manual
            })
        );
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        // The deferred arm replaces the executor's delay.
        scheduler.finish(1, Some(Duration::from_secs(5)), CheckOrigin::Manual);
        assert!(!scheduler.is_in_flight(1));
        assert_eq!(scheduler.pending_delay(1), Some(Duration::ZERO));
        assert_eq!(rx.recv().await, Some(timer_request(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_check_keeps_pending_timer() {
        let (scheduler, mut rx) = Scheduler::new();
        scheduler.arm(1, Duration::from_secs(60));
        tokio::time::advance(Duration::from_secs(20)).await;

        assert!(scheduler.trigger_now(1));
        assert_eq!(rx.recv().await.map(|r| r.origin), Some(CheckOrigin::Manual));
        scheduler.finish(1, Some(Duration::from_secs(120)), CheckOrigin::Manual);
        assert_eq!(scheduler.pending_delay(1), Some(Duration::from_secs(40)));

        tokio::time::advance(Duration::from_secs(40)).await;
        assert_eq!(rx.recv().await, Some(timer_request(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_firing_during_manual_check_is_skipped_then_rearmed() {
        let (scheduler, mut rx) = Scheduler::new();
        scheduler.arm(1, Duration::from_secs(10));
        scheduler.trigger_now(1);
        assert_eq!(rx.recv().await.map(|r| r.origin), Some(CheckOrigin::Manual));

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(scheduler.pending_count(), 0);

        scheduler.finish(1, Some(Duration::from_secs(120)), CheckOrigin::Manual);
        assert_eq!(scheduler.pending_delay(1), Some(Duration::from_secs(120)));
    }

    #[tokio::test(start_paused = true)]
    async fn disarm_during_check_drops_rearm() {
        let (scheduler, mut rx) = Scheduler::new();
        scheduler.arm(1, Duration::ZERO);
        assert_eq!(rx.recv().await, Some(timer_request(1)));

        assert!(scheduler.disarm(1));
        scheduler.finish(1, Some(Duration::from_secs(5)), CheckOrigin::Timer);
        assert_eq!(scheduler.pending_count(), 0);
        assert!(!scheduler.is_in_flight(1));

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn arm_during_check_survives_finish_without_delay() {
        let (scheduler, mut rx) = Scheduler::new();
        assert!(scheduler.trigger_now(1));
        rx.recv().await;

        // Re-enabled while the check saw the target inactive.
        assert!(!scheduler.arm(1, Duration::from_secs(60)));
        scheduler.finish(1, None, CheckOrigin::Manual);
        assert_eq!(scheduler.pending_count(), 1);
        assert_eq!(scheduler.pending_delay(1), Some(Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(rx.recv().await, Some(timer_request(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_arm_takes_priority_over_executor_delay() {
        let (scheduler, mut rx) = Scheduler::new();
        scheduler.arm(1, Duration::from_secs(300));
        assert!(scheduler.trigger_now(1));
        rx.recv().await;

        assert!(!scheduler.arm(1, Duration::from_secs(30)));
        scheduler.finish(1, Some(Duration::from_secs(5)), CheckOrigin::Manual);
        assert_eq!(scheduler.pending_count(), 1);
        assert_eq!(scheduler.pending_delay(1), Some(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn last_of_arm_and_disarm_during_check_wins() {
        let (scheduler, mut rx) = Scheduler::new();
        scheduler.trigger_now(1);
        rx.recv().await;
        scheduler.arm(1, Duration::from_secs(60));
        scheduler.disarm(1);
        scheduler.finish(1, Some(Duration::from_secs(5)), CheckOrigin::Manual);
        assert_eq!(scheduler.pending_count(), 0);

        scheduler.trigger_now(2);
        rx.recv().await;
        scheduler.disarm(2);
        scheduler.arm(2, Duration::from_secs(60));
        scheduler.finish(2, None, CheckOrigin::Manual);
        assert_eq!(scheduler.pending_delay(2), Some(Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_counts_from_arm_time() {
        let (scheduler, mut rx) = Scheduler::new();
        scheduler.arm(1, Duration::from_secs(10));
        // The timer task has not been polled yet.
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(rx.recv().await, Some(timer_request(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn finish_without_delay_forgets_target() {
        let (scheduler, mut rx) = Scheduler::new();
        scheduler.trigger_now(3);
        rx.recv().await;
        scheduler.finish(3, None, CheckOrigin::Manual);
        assert!(!scheduler.disarm(3));
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_catches_up_and_drops_orphans() {
        let (scheduler, mut rx) = Scheduler::new();
        scheduler.arm(1, Duration::from_secs(300));
        scheduler.arm(9, Duration::from_secs(300));

        let report = scheduler.reconcile(&[target(1, 5), target(2, 5), target(3, 5)]);
        assert_eq!(report, ReconcileReport { armed: 2, disarmed: 1 });
        assert_eq!(scheduler.pending_delay(2), Some(Duration::ZERO));
        assert_eq!(scheduler.pending_delay(1), Some(Duration::from_secs(300)));
        assert_eq!(scheduler.pending_delay(9), None);

        let mut fired = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        fired.sort_by_key(|r| r.target_id);
        assert_eq!(fired, vec![timer_request(2), timer_request(3)]);

        // Running checks are not armed a second time.
        let report = scheduler.reconcile(&[target(1, 5), target(2, 5), target(3, 5)]);
        assert_eq!(report, ReconcileReport::default());
        assert_eq!(scheduler.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_everything() {
        let (scheduler, mut rx) = Scheduler::new();
        scheduler.arm(1, Duration::from_secs(1));
        scheduler.arm(2, Duration::from_secs(2));
        scheduler.shutdown();
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }
}
