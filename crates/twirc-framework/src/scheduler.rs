//! Time-triggered tasks.
//!
//! The [`Scheduler`] keeps one-shot and periodic tasks and fires those that
//! are due. It can be driven two ways:
//!
//! - [`Scheduler::run_pending`]: fire everything due at a given instant.
//!   Suitable for a host loop that ticks the scheduler itself.
//! - [`Scheduler::run`]: a background loop that sleeps until the next task
//!   is due and stops when its cancellation token fires.
//!
//! # Ordering and drift
//!
//! Due tasks fire in ascending next-fire order, ties broken by registration
//! order. A periodic task's next fire time is its previous *scheduled* time
//! plus its interval, so a late run does not push later runs back.
//!
//! # Failures
//!
//! A task that returns an error or panics is logged and stays scheduled.
//! With [`Scheduler::with_failure_limit`] a task is disabled after that many
//! consecutive failures.
//!
//! ```rust,ignore
//! let scheduler = Scheduler::new(outbox, injector);
//! scheduler.every(Duration::from_secs(600), |ctx: TaskContext| async move {
//!     ctx.outbox().say("mychannel", "Remember to hydrate!")
//! });
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};
use twirc_core::{Message, SendError, SendResult, SharedOutbox};

use crate::error::{HandlerError, HandlerResult, SchedulerError, SchedulerResult};
use crate::handler::{BoxFuture, IntoHandlerResult};

// =============================================================================
// Task plumbing
// =============================================================================

/// Identifies a scheduled task. Ids grow with registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Pushes synthetic messages onto the inbound dispatch path.
#[derive(Debug, Clone)]
pub struct Injector {
    tx: mpsc::UnboundedSender<Message>,
}

impl Injector {
    /// Creates an injector and the receiver the dispatch loop reads from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn inject(&self, message: Message) -> SendResult<()> {
        self.tx.send(message).map_err(|_| SendError::Closed)
    }
}

/// Context handed to a task when it fires.
#[derive(Clone)]
pub struct TaskContext {
    id: TaskId,
    scheduled_for: Instant,
    outbox: SharedOutbox,
    injector: Injector,
}

impl TaskContext {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The instant this run was due, which may be earlier than now.
    pub fn scheduled_for(&self) -> Instant {
        self.scheduled_for
    }

    pub fn outbox(&self) -> &SharedOutbox {
        &self.outbox
    }

    /// Enqueues an outbound message.
    pub fn send(&self, message: Message) -> SendResult<()> {
        self.outbox.send(message)
    }

    /// Dispatches `message` as if it had been received.
    pub fn inject(&self, message: Message) -> SendResult<()> {
        self.injector.inject(message)
    }
}

/// A scheduled callback.
///
/// Implemented for every `Fn(TaskContext) -> impl Future` whose output
/// implements [`IntoHandlerResult`].
pub trait Task: Send + Sync + 'static {
    fn run(&self, ctx: TaskContext) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> Task for F
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoHandlerResult,
{
    fn run(&self, ctx: TaskContext) -> BoxFuture<'static, HandlerResult> {
        let fut = (self)(ctx);
        Box::pin(async move { fut.await.into_handler_result() })
    }
}

struct Entry {
    task: Arc<dyn Task>,
    interval: Option<Duration>,
    next_fire: Instant,
    enabled: bool,
    failures: u32,
}

/// Summary of one [`Scheduler::run_pending`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub fired: usize,
    pub failed: usize,
    /// Tasks disabled by the failure limit during this pass.
    pub disabled: usize,
}

// =============================================================================
// Scheduler
// =============================================================================

/// Registry of timed tasks.
pub struct Scheduler {
    tasks: Mutex<HashMap<TaskId, Entry>>,
    next_id: AtomicU64,
    changed: Notify,
    max_failures: Option<u32>,
    outbox: SharedOutbox,
    injector: Injector,
}

impl Scheduler {
    /// Creates a scheduler whose tasks send through `outbox` and inject
    /// through `injector`.
    pub fn new(outbox: SharedOutbox, injector: Injector) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            changed: Notify::new(),
            max_failures: None,
            outbox,
            injector,
        }
    }

    /// Disables a task after `limit` consecutive failures. `None` (the
    /// default) never disables.
    pub fn with_failure_limit(mut self, limit: Option<u32>) -> Self {
        self.max_failures = limit.filter(|l| *l > 0);
        self
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Schedules `task` to first fire after `delay`, then every `interval`
    /// if one is given. Without an interval the task fires once and is
    /// removed.
    pub fn schedule<T: Task>(&self, delay: Duration, interval: Option<Duration>, task: T) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Entry {
            task: Arc::new(task),
            interval: interval.filter(|i| !i.is_zero()),
            next_fire: Instant::now() + delay,
            enabled: true,
            failures: 0,
        };
        debug!(%id, ?delay, ?interval, "Scheduling task");
        self.tasks.lock().insert(id, entry);
        self.changed.notify_one();
        id
    }

    /// Fires `task` once after `delay`.
    pub fn once<T: Task>(&self, delay: Duration, task: T) -> TaskId {
        self.schedule(delay, None, task)
    }

    /// Fires `task` every `interval`, starting one interval from now.
    pub fn every<T: Task>(&self, interval: Duration, task: T) -> TaskId {
        self.schedule(interval, Some(interval), task)
    }

    /// Removes a task.
    pub fn cancel(&self, id: TaskId) -> SchedulerResult<()> {
        let removed = self.tasks.lock().remove(&id);
        match removed {
            Some(_) => {
                debug!(%id, "Task cancelled");
                self.changed.notify_one();
                Ok(())
            }
            None => Err(SchedulerError::UnknownTask(id)),
        }
    }

    /// Pauses or resumes a task. Resuming clears its failure count and moves
    /// a periodic task to its first slot after now, so missed slots are
    /// skipped rather than replayed.
    pub fn set_enabled(&self, id: TaskId, enabled: bool) -> SchedulerResult<()> {
        let mut tasks = self.tasks.lock();
        let entry = tasks.get_mut(&id).ok_or(SchedulerError::UnknownTask(id))?;
        let resumed = enabled && !entry.enabled;
        entry.enabled = enabled;
        if enabled {
            entry.failures = 0;
        }
        if resumed {
            if let Some(interval) = entry.interval {
                let now = Instant::now();
                if entry.next_fire <= now {
                    entry.next_fire = next_slot_after(entry.next_fire, interval, now);
                }
            }
        }
        drop(tasks);
        self.changed.notify_one();
        Ok(())
    }

    pub fn is_enabled(&self, id: TaskId) -> Option<bool> {
        self.tasks.lock().get(&id).map(|e| e.enabled)
    }

    /// When the task is next due.
    pub fn next_fire(&self, id: TaskId) -> Option<Instant> {
        self.tasks.lock().get(&id).map(|e| e.next_fire)
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// The earliest next-fire time among enabled tasks.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks
            .lock()
            .values()
            .filter(|e| e.enabled)
            .map(|e| e.next_fire)
            .min()
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Fires every enabled task due at `now`, each at most once.
    pub async fn run_pending(&self, now: Instant) -> RunReport {
        let due = self.take_due(now);
        let mut report = RunReport::default();

        for (id, scheduled_for, task) in due {
            report.fired += 1;
            let ctx = TaskContext {
                id,
                scheduled_for,
                outbox: Arc::clone(&self.outbox),
                injector: self.injector.clone(),
            };
            trace!(%id, "Running task");
            let outcome = std::panic::AssertUnwindSafe(async move { task.run(ctx).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(HandlerError::from_panic(panic)));

            match outcome {
                Ok(()) => {
                    if let Some(entry) = self.tasks.lock().get_mut(&id) {
                        entry.failures = 0;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    error!(%id, error = %e, "Scheduled task failed");
                    if self.record_failure(id) {
                        report.disabled += 1;
                    }
                }
            }
        }
        report
    }

    /// Collects due tasks in firing order and advances their schedule.
    fn take_due(&self, now: Instant) -> Vec<(TaskId, Instant, Arc<dyn Task>)> {
        let mut tasks = self.tasks.lock();
        let mut due: Vec<(Instant, TaskId)> = tasks
            .iter()
            .filter(|(_, e)| e.enabled && e.next_fire <= now)
            .map(|(id, e)| (e.next_fire, *id))
            .collect();
        due.sort();

        let mut out = Vec::with_capacity(due.len());
        for (scheduled_for, id) in due {
            let Some(entry) = tasks.get_mut(&id) else {
                continue;
            };
            let task = Arc::clone(&entry.task);
            match entry.interval {
                Some(interval) => entry.next_fire = scheduled_for + interval,
                None => {
                    tasks.remove(&id);
                }
            }
            out.push((id, scheduled_for, task));
        }
        out
    }

    /// Returns true if this failure disabled the task.
    fn record_failure(&self, id: TaskId) -> bool {
        let mut tasks = self.tasks.lock();
        let Some(entry) = tasks.get_mut(&id) else {
            return false;
        };
        entry.failures += 1;
        match self.max_failures {
            Some(limit) if entry.failures >= limit && entry.enabled => {
                entry.enabled = false;
                warn!(%id, failures = entry.failures, "Task disabled after consecutive failures");
                true
            }
            _ => false,
        }
    }

    /// Runs tasks as they come due until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        debug!("Scheduler started");
        loop {
            let deadline = self.next_deadline();
            let sleep = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.changed.notified() => continue,
                _ = sleep => {
                    self.run_pending(Instant::now()).await;
                }
            }
        }
        debug!("Scheduler stopped");
    }
}

/// The first `from + k * interval` (k >= 1) strictly after `now`.
fn next_slot_after(from: Instant, interval: Duration, now: Instant) -> Instant {
    let skipped = (now - from).as_nanos() / interval.as_nanos() + 1;
    u32::try_from(skipped)
        .ok()
        .and_then(|k| interval.checked_mul(k))
        .and_then(|offset| from.checked_add(offset))
        .unwrap_or(now + interval)
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.len())
            .field("max_failures", &self.max_failures)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use twirc_core::MemoryOutbox;

    fn scheduler() -> (Scheduler, Arc<MemoryOutbox>, mpsc::UnboundedReceiver<Message>) {
        let memory = Arc::new(MemoryOutbox::new());
        let (injector, rx) = Injector::channel();
        (Scheduler::new(memory.clone(), injector), memory, rx)
    }

    fn counter() -> (Arc<AtomicUsize>, impl Task) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let task = move |_ctx: TaskContext| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        };
        (count, task)
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_fires_once_and_is_removed() {
        let (scheduler, _, _rx) = scheduler();
        let (count, task) = counter();
        let start = Instant::now();
        let id = scheduler.once(Duration::from_secs(5), task);

        assert_eq!(scheduler.run_pending(start + Duration::from_secs(4)).await.fired, 0);
        assert_eq!(scheduler.run_pending(start + Duration::from_secs(5)).await.fired, 1);
        assert_eq!(scheduler.run_pending(start + Duration::from_secs(60)).await.fired, 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.cancel(id), Err(SchedulerError::UnknownTask(id)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_task_does_not_drift() {
        let (scheduler, _, _rx) = scheduler();
        let (count, task) = counter();
        let start = Instant::now();
        let period = Duration::from_secs(10);
        let id = scheduler.every(period, task);

        // The first run happens 5s late.
        scheduler.run_pending(start + Duration::from_secs(15)).await;
        assert_eq!(scheduler.next_fire(id), Some(start + Duration::from_secs(20)));

        scheduler.run_pending(start + Duration::from_secs(20)).await;
        assert_eq!(scheduler.next_fire(id), Some(start + Duration::from_secs(30)));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_due_tasks_fire_in_order() {
        let (scheduler, memory, _rx) = scheduler();
        let start = Instant::now();
        for (delay, text) in [(3, "c"), (1, "a"), (3, "d"), (2, "b")] {
            scheduler.once(Duration::from_secs(delay), move |ctx: TaskContext| async move {
                ctx.outbox().say("chan", text)
            });
        }

        scheduler.run_pending(start + Duration::from_secs(10)).await;
        let order: Vec<_> = memory
            .take()
            .iter()
            .map(|m| m.text().unwrap_or_default().to_string())
            .collect();
        assert_eq!(order, ["a", "b", "c", "d"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_keep_task_unless_limit_reached() {
        let (scheduler, _, _rx) = scheduler();
        let start = Instant::now();
        let id = scheduler.every(Duration::from_secs(1), |_ctx: TaskContext| async {
            Err::<(), _>("nope")
        });
        for s in 1..=5 {
            let report = scheduler.run_pending(start + Duration::from_secs(s)).await;
            assert_eq!(report.failed, 1);
        }
        assert_eq!(scheduler.is_enabled(id), Some(true));

        let (scheduler, _, _rx) = self::scheduler();
        let scheduler = scheduler.with_failure_limit(Some(2));
        let start = Instant::now();
        let id = scheduler.every(Duration::from_secs(1), |_ctx: TaskContext| async {
            panic!("task bug") as ()
        });
        scheduler.run_pending(start + Duration::from_secs(1)).await;
        let report = scheduler.run_pending(start + Duration::from_secs(2)).await;
        assert_eq!(report.disabled, 1);
        assert_eq!(scheduler.is_enabled(id), Some(false));
        assert_eq!(scheduler.run_pending(start + Duration::from_secs(3)).await.fired, 0);

        scheduler.set_enabled(id, true).unwrap();
        assert_eq!(scheduler.is_enabled(id), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumed_task_skips_missed_slots() {
        let (scheduler, _, _rx) = scheduler();
        let (count, task) = counter();
        let start = Instant::now();
        let id = scheduler.every(Duration::from_secs(1), task);

        scheduler.set_enabled(id, false).unwrap();
        tokio::time::advance(Duration::from_millis(10_500)).await;
        scheduler.set_enabled(id, true).unwrap();
        assert_eq!(scheduler.next_fire(id), Some(start + Duration::from_secs(11)));

        let now = Instant::now();
        assert_eq!(scheduler.run_pending(now).await.fired, 0);
        assert_eq!(scheduler.run_pending(start + Duration::from_secs(11)).await.fired, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Enabling an already enabled task leaves its schedule alone.
        scheduler.set_enabled(id, true).unwrap();
        assert_eq!(scheduler.next_fire(id), Some(start + Duration::from_secs(12)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_is_pending_until_cancelled() {
        let (scheduler, _, _rx) = scheduler();
        let token = CancellationToken::new();
        let mut run = tokio_test::task::spawn(scheduler.run(token.clone()));

        tokio_test::assert_pending!(run.poll());
        token.cancel();
        assert!(run.is_woken());
        tokio_test::assert_ready!(run.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_loop_and_injection() {
        let (scheduler, _, mut rx) = scheduler();
        let scheduler = Arc::new(scheduler);
        scheduler.once(Duration::from_secs(2), |ctx: TaskContext| async move {
            ctx.inject(Message::chat("chan", "!tick")?)
        });

        let token = CancellationToken::new();
        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            let token = token.clone();
            async move { scheduler.run(token).await }
        });

        let injected = rx.recv().await.unwrap();
        assert_eq!(injected.text(), Some("!tick"));
        assert!(scheduler.is_empty());

        token.cancel();
        handle.await.unwrap();
    }
}
