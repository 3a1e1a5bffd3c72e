// Execution scheduling: one wall-clock timer over the entry cache.
//
// The loop picks the next due entry, sleeps until its effective time,
// fires the user callback and prunes entries whose dates are entirely
// past. Every cache change re-arms the timer through `schedule()`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rpdb_api::model::time::local_now;
use rpdb_api::model::{DateTime, Entry, ExecutionResponse, Update};
use rpdb_api::ApiClient;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bus::UpdateBus;
use crate::store::EntryStore;

/// Placeholder deadline when no entry is due.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Why an entry is handed to the executor callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionType {
    /// The execution time of the entry has been reached.
    Default,

    /// A not-yet-executed entry was deleted remotely; the entry data is
    /// the last known state.
    Delete,
}

/// Callback invoked for every entry execution. Runs on its own task,
/// so a slow or panicking callback never stalls the scheduler.
pub type Executor = Arc<dyn Fn(Entry, ExecutionType) + Send + Sync>;

/// Callback for entries whose attribute expects an execution response.
/// Runs synchronously; the returned response is sent back to the
/// server over the socket.
pub type ExecResponseExecutor = Arc<dyn Fn(Entry) -> Option<ExecutionResponse> + Send + Sync>;

/// Tuning switches of the scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerOptions {
    /// Drop entries from the cache as soon as `date_time` is past,
    /// ignoring a later `date_time_execution`.
    pub ignore_execution_time: bool,

    /// Also emit an (empty) update when only the plain `date_time` of
    /// an entry passed while its execution time is still ahead.
    pub trigger_update_on_date_time_changes: bool,
}

/// Outcome of one `pick_next` walk.
enum Pick {
    /// Past entries were pruned; the cache changed, walk again.
    Retry,
    /// Nothing to schedule.
    None,
    /// The entry to execute next.
    Next(Arc<Entry>),
}

pub struct Scheduler {
    entries: Arc<EntryStore>,
    bus: Arc<UpdateBus>,
    api: Arc<ApiClient>,
    options: SchedulerOptions,
    executor: Option<Executor>,
    exec_response_executor: Option<ExecResponseExecutor>,

    base_cancel: CancellationToken,
    /// Cancellation scope of the currently running loop.
    run: Mutex<Option<CancellationToken>>,
    /// Wakes the loop to re-arm after a cache change.
    rearm: Notify,
    /// Id of the entry the live timer was armed for (0 = none).
    next_entry: AtomicI64,
}

impl Scheduler {
    pub fn new(
        entries: Arc<EntryStore>,
        bus: Arc<UpdateBus>,
        api: Arc<ApiClient>,
        options: SchedulerOptions,
        executor: Option<Executor>,
        exec_response_executor: Option<ExecResponseExecutor>,
        base_cancel: CancellationToken,
    ) -> Self {
        Scheduler {
            entries,
            bus,
            api,
            options,
            executor,
            exec_response_executor,
            base_cancel,
            run: Mutex::new(None),
            rearm: Notify::new(),
            next_entry: AtomicI64::new(0),
        }
    }

    /// Start (or restart) the scheduling loop. A previous loop is
    /// cancelled first; the new one arms its timer immediately.
    pub fn start_scheduling(self: &Arc<Self>) {
        let token = {
            let mut run = self.run.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(previous) = run.take() {
                previous.cancel();
            }
            let token = self.base_cancel.child_token();
            *run = Some(token.clone());
            token
        };

        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.run_loop(token).await });
    }

    /// Re-arm the timer. Called after every observed cache change.
    pub fn schedule(&self) {
        self.rearm.notify_one();
    }

    /// Stop the current loop without cancelling the base scope.
    pub fn stop(&self) {
        let mut run = self.run.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(token) = run.take() {
            token.cancel();
        }
    }

    async fn run_loop(self: Arc<Self>, cancel: CancellationToken) {
        // Set after a fire that did not advance time; the loop then
        // waits for an external `schedule()` instead of re-picking the
        // same entry in a tight cycle.
        let mut parked = false;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let deadline = if parked {
                Instant::now() + FAR_FUTURE
            } else {
                match self.pick_next() {
                    Pick::Retry => continue,
                    Pick::None => {
                        debug!("clearing timer for execution");
                        self.next_entry.store(0, Ordering::Release);
                        Instant::now() + FAR_FUTURE
                    }
                    Pick::Next(entry) => {
                        self.next_entry.store(entry.id, Ordering::Release);
                        let fire_at = self.fire_time(&entry);
                        debug!(
                            entry = entry.id,
                            in_seconds =
                                format!("{:.1}", fire_at.seconds_until(local_now())),
                            "scheduled next execution"
                        );
                        deadline_for(fire_at)
                    }
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.rearm.notified() => {
                    parked = false;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    parked = !self.handle_fire();
                }
            }
        }

        debug!("scheduler loop exited");
    }

    /// Find the entry to execute next.
    ///
    /// Entries that are due right now are executed on the spot; after
    /// an on-the-spot execution the walk restarts because an earlier
    /// entry may have become the next candidate. Entries whose dates
    /// are entirely past are pruned from the cache, which triggers an
    /// update and a retry.
    fn pick_next(&self) -> Pick {
        let ignore = self.options.ignore_execution_time;
        let mut pruned: Vec<i64> = Vec::new();

        let best = 'walk: loop {
            let mut best: Option<Arc<Entry>> = None;

            for entry in self.entries.get_all() {
                if pruned.contains(&entry.id) {
                    continue;
                }

                if entry.should_execute_now() {
                    self.execute(&entry);
                    if entry.is_past(ignore) {
                        pruned.push(entry.id);
                    } else {
                        // This entry might still be the next one, e.g.
                        // with a pending execution time. Reconsider all.
                        continue 'walk;
                    }
                } else if entry.is_past(ignore) {
                    pruned.push(entry.id);
                } else if self.is_better(&entry, best.as_deref()) {
                    best = Some(entry);
                }
            }

            break best;
        };

        if !pruned.is_empty() {
            debug!(count = pruned.len(), "removing past entries from cache");
            let update = Update::with_entries(pruned, Vec::new(), Vec::new());
            self.entries.apply_update(&update.entry);
            self.bus.notify(Some(&update));
            // The update observer re-arms us; picking again right away
            // is also correct when nobody listens.
            return Pick::Retry;
        }

        match best {
            Some(entry) => Pick::Next(entry),
            None => Pick::None,
        }
    }

    /// Whether `entry` should fire before the current `best` candidate.
    fn is_better(&self, entry: &Entry, best: Option<&Entry>) -> bool {
        let Some(best) = best else { return true };

        let ignore = self.options.ignore_execution_time;
        let entry_at = entry.execution_time(ignore);
        let best_at = best.execution_time(ignore);

        // Plain earlier effective time, neither fired yet.
        if entry_at < best_at && !entry.was_executed() && !best.was_executed() {
            return true;
        }
        // The candidate already fired and only waits for its dates to
        // pass; an unfired entry due before that wins.
        if best.was_executed() && !entry.was_executed() && entry_at < best.date_time {
            return true;
        }
        if entry.date_time < best_at {
            return true;
        }
        entry.date_time < best.date_time
    }

    /// The instant the timer should fire at for the given entry.
    fn fire_time(&self, entry: &Entry) -> DateTime {
        let execution = entry.date_time_execution;
        if !entry.was_executed()
            && execution.is_set()
            && execution < entry.date_time
            && !execution.before(local_now())
        {
            return execution;
        }
        entry.execution_time(self.options.ignore_execution_time)
    }

    /// The timer elapsed: execute the armed entry if it is still due.
    ///
    /// Returns whether the loop should re-arm right away. `false` means
    /// the fire did not advance time (only the plain date passed); an
    /// empty update is emitted instead and the loop parks until the
    /// update observer calls `schedule()`.
    fn handle_fire(&self) -> bool {
        let id = self.next_entry.load(Ordering::Acquire);
        if id == 0 {
            warn!("should execute an entry now but couldn't determine the next one");
            return true;
        }

        let Some(entry) = self.entries.get(id) else {
            warn!(entry = id, "should execute an entry now but it is gone");
            return true;
        };

        if entry.should_execute_now() {
            self.execute(&entry);
        }

        if entry.is_past(self.options.ignore_execution_time) {
            // The next pick prunes it.
            true
        } else if self.options.trigger_update_on_date_time_changes && !entry.should_execute_now() {
            debug!(entry = id, "the entry's plain date passed, triggering an update");
            self.bus.notify(None);
            false
        } else {
            true
        }
    }

    /// Execute an entry: mark it, register the execution server-side
    /// for execute-always attributes and invoke the user callback.
    pub(crate) fn execute(&self, entry: &Entry) {
        let attribute = entry.attribute.get();
        debug!(
            entry = entry.id,
            attribute = %attribute.name,
            at = %entry.date_time,
            "executing entry"
        );

        entry.set_executed(true);

        if attribute.execute_always {
            let api = Arc::clone(&self.api);
            let id = entry.id;
            tokio::spawn(async move {
                if let Err(e) = api.mark_entry_executed(id).await {
                    warn!(entry = id, error = %e, "failed to register entry as executed");
                }
            });
        }

        if let Some(executor) = &self.executor {
            let executor = Arc::clone(executor);
            let entry = entry.clone();
            tokio::spawn(async move { executor(entry, ExecutionType::Default) });
        }
    }

    /// Invoke the delete hook for an entry that was removed remotely
    /// before it ran.
    pub(crate) fn execute_delete(&self, entry: &Entry) {
        debug!(
            entry = entry.id,
            attribute = %entry.attribute.get().name,
            "executing delete hook for entry"
        );

        if let Some(executor) = &self.executor {
            let executor = Arc::clone(executor);
            let entry = entry.clone();
            tokio::spawn(async move { executor(entry, ExecutionType::Delete) });
        }
    }

    /// Run the execution-response callback for an entry. Blocks until
    /// the callback returns; `None` when no callback is configured.
    pub(crate) fn execute_exec_response(&self, entry: &Entry) -> Option<ExecutionResponse> {
        self.exec_response_executor
            .as_ref()
            .and_then(|executor| executor(entry.clone()))
    }
}

/// Convert a wall-clock instant into a timer deadline. An unset instant
/// never fires.
fn deadline_for(at: DateTime) -> Instant {
    let Some(target) = at.get() else {
        return Instant::now() + FAR_FUTURE;
    };

    let delta = target.signed_duration_since(local_now());
    match delta.to_std() {
        Ok(wait) => Instant::now() + wait,
        // Already due.
        Err(_) => Instant::now(),
    }
}
