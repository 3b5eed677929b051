//! Delayed phase-two confirmation.
//!
//! A min-heap of fire times drained by one background thread. Each registration is keyed by
//! `(audience_id, cabinet, fire_at)` and fires exactly once, at or after its fire time.
//!
//! ## Task lifecycle
//!
//! `Scheduled -> Firing -> Confirmed | ConfirmFailed`
//!
//! - Re-registering a key that is still `Scheduled` or `Firing` is a no-op.
//! - Once a task finishes its key leaves the live table; the final state stays visible
//!   through [`ConfirmationScheduler::state_of`] for a bounded number of recent tasks.
//! - `ConfirmFailed` is terminal: the failure is logged and counted, nothing is retried.
//! - Callbacks run without the scheduler lock held, so scheduling never waits on a
//!   platform call.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use audsync_core::{AudienceId, Cabinet, ExternalId, PlatformError};

/// How many finished tasks keep their final state for [`ConfirmationScheduler::state_of`].
const FINISHED_HISTORY: usize = 256;

/// A scheduled phase-two confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConfirmation {
    pub audience_id: AudienceId,
    pub audience_name: String,
    pub external_id: ExternalId,
    pub cabinet: Cabinet,
    pub scheduled_time: DateTime<Utc>,
}

impl PendingConfirmation {
    pub fn key(&self) -> ConfirmationKey {
        ConfirmationKey {
            audience_id: self.audience_id.clone(),
            cabinet: self.cabinet,
            fire_at: self.scheduled_time,
        }
    }
}

/// Identity of a pending confirmation. The fire time keeps full precision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfirmationKey {
    pub audience_id: AudienceId,
    pub cabinet: Cabinet,
    pub fire_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationState {
    Scheduled,
    Firing,
    Confirmed,
    ConfirmFailed { error: String },
}

/// Scheduler counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub scheduled: u64,
    pub duplicates: u64,
    pub confirmed: u64,
    pub failed: u64,
    pub pending: usize,
}

/// The callback fired for a confirmation.
pub type ConfirmTask = Box<dyn FnOnce(&PendingConfirmation) -> Result<(), PlatformError> + Send>;

struct QueueItem {
    fire_at: DateTime<Utc>,
    seq: u64,
    key: ConfirmationKey,
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueItem {}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.fire_at, self.seq).cmp(&(other.fire_at, other.seq))
    }
}

struct Slot {
    job: PendingConfirmation,
    task: Option<ConfirmTask>,
    state: ConfirmationState,
}

#[derive(Default)]
struct State {
    queue: BinaryHeap<Reverse<QueueItem>>,
    tasks: HashMap<ConfirmationKey, Slot>,
    finished: VecDeque<(ConfirmationKey, ConfirmationState)>,
    next_seq: u64,
    stats: SchedulerStats,
    shutdown: bool,
}

impl State {
    fn finish(&mut self, key: ConfirmationKey, state: ConfirmationState) {
        self.tasks.remove(&key);
        match state {
            ConfirmationState::Confirmed => self.stats.confirmed += 1,
            ConfirmationState::ConfirmFailed { .. } => self.stats.failed += 1,
            _ => {}
        }
        if self.finished.len() == FINISHED_HISTORY {
            self.finished.pop_front();
        }
        self.finished.push_back((key, state));
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    wakeup: Condvar,
}

/// Shareable handle to the confirmation queue.
///
/// Registering works before [`ConfirmationScheduler::spawn`]; nothing fires until the timer
/// thread runs.
#[derive(Clone, Default)]
pub struct ConfirmationScheduler {
    shared: Arc<Shared>,
}

impl core::fmt::Debug for ConfirmationScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConfirmationScheduler")
            .field("stats", &self.stats())
            .finish()
    }
}

impl ConfirmationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `task` to run at `job.scheduled_time`.
    ///
    /// Returns `false` when an identical key is still pending or firing, or after shutdown.
    pub fn schedule<F>(&self, job: PendingConfirmation, task: F) -> bool
    where
        F: FnOnce(&PendingConfirmation) -> Result<(), PlatformError> + Send + 'static,
    {
        let key = job.key();
        let mut state = self.lock();

        if state.shutdown {
            warn!(audience_id = %key.audience_id, cabinet = %key.cabinet, "scheduler stopped; confirmation dropped");
            return false;
        }

        if state.tasks.contains_key(&key) {
            state.stats.duplicates += 1;
            debug!(
                audience_id = %key.audience_id,
                cabinet = %key.cabinet,
                fire_at = %job.scheduled_time,
                "confirmation already scheduled"
            );
            return false;
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(Reverse(QueueItem {
            fire_at: job.scheduled_time,
            seq,
            key: key.clone(),
        }));

        info!(
            audience_id = %key.audience_id,
            cabinet = %key.cabinet,
            fire_at = %job.scheduled_time,
            "confirmation scheduled"
        );

        state.tasks.insert(
            key,
            Slot {
                job,
                task: Some(Box::new(task)),
                state: ConfirmationState::Scheduled,
            },
        );
        state.stats.scheduled += 1;
        drop(state);

        self.shared.wakeup.notify_all();
        true
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.lock();
        SchedulerStats {
            pending: state.tasks.len(),
            ..state.stats.clone()
        }
    }

    /// Current state of a live task, or the final state of a recently finished one.
    pub fn state_of(&self, key: &ConfirmationKey) -> Option<ConfirmationState> {
        let state = self.lock();
        if let Some(slot) = state.tasks.get(key) {
            return Some(slot.state.clone());
        }
        state
            .finished
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, s)| s.clone())
    }

    /// Start the timer thread.
    pub fn spawn(&self, name: &str) -> std::io::Result<SchedulerHandle> {
        let scheduler = self.clone();
        let thread_name = name.to_string();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || scheduler.run(&thread_name))?;

        Ok(SchedulerHandle {
            scheduler: self.clone(),
            join: Some(join),
        })
    }

    fn run(&self, name: &str) {
        let mut state = self.lock();

        loop {
            if state.shutdown {
                break;
            }

            let now = Utc::now();
            match state.queue.peek().map(|Reverse(item)| item.fire_at) {
                None => {
                    state = self
                        .shared
                        .wakeup
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                    continue;
                }
                Some(fire_at) if fire_at > now => {
                    let wait = (fire_at - now).to_std().unwrap_or(Duration::ZERO);
                    state = self
                        .shared
                        .wakeup
                        .wait_timeout(state, wait)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                    continue;
                }
                Some(_) => {}
            }

            let Some(Reverse(item)) = state.queue.pop() else {
                continue;
            };
            let Some(slot) = state.tasks.get_mut(&item.key) else {
                continue;
            };
            let Some(task) = slot.task.take() else {
                continue;
            };
            slot.state = ConfirmationState::Firing;
            let job = slot.job.clone();
            drop(state);

            let outcome = match catch_unwind(AssertUnwindSafe(|| task(&job))) {
                Ok(Ok(())) => {
                    info!(
                        worker = name,
                        audience_id = %job.audience_id,
                        cabinet = %job.cabinet,
                        external_id = %job.external_id,
                        "audience confirmed"
                    );
                    ConfirmationState::Confirmed
                }
                Ok(Err(err)) => {
                    error!(
                        worker = name,
                        audience_id = %job.audience_id,
                        cabinet = %job.cabinet,
                        external_id = %job.external_id,
                        error = %err,
                        "audience confirmation failed"
                    );
                    ConfirmationState::ConfirmFailed {
                        error: err.to_string(),
                    }
                }
                Err(_) => {
                    error!(
                        worker = name,
                        audience_id = %job.audience_id,
                        cabinet = %job.cabinet,
                        "confirmation callback panicked"
                    );
                    ConfirmationState::ConfirmFailed {
                        error: "confirmation callback panicked".to_string(),
                    }
                }
            };

            state = self.lock();
            state.finish(item.key, outcome);
        }

        let dropped = state.tasks.len();
        state.tasks.clear();
        state.queue.clear();
        if dropped > 0 {
            warn!(worker = name, dropped, "scheduler stopped with unfired confirmations");
        }
    }
}

/// Handle to stop and join the timer thread.
#[derive(Debug)]
pub struct SchedulerHandle {
    scheduler: ConfirmationScheduler,
    join: Option<thread::JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn scheduler(&self) -> &ConfirmationScheduler {
        &self.scheduler
    }

    /// Stop the timer thread. Unfired tasks are dropped; further registrations are refused.
    pub fn shutdown(mut self) {
        self.scheduler.lock().shutdown = true;
        self.scheduler.shared.wakeup.notify_all();
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}
