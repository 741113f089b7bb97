//! Priority task queue for background agent work.
//!
//! Entries wait in a max-heap ordered by priority, then by arrival. A single
//! scheduler task starts entries while fewer than `max_concurrency` are
//! running. A finished task frees its slot and admits the next entry at once;
//! new arrivals are admitted on the following tick, so entries enqueued
//! together are ordered by priority rather than by which enqueue the
//! scheduler happened to observe first. An idle queue parks the scheduler
//! until the next signal.
//!
//! A failing (or panicking) task is logged and counted; it never affects other
//! entries. Started tasks are not cancelled by [`TaskQueue::close`].

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::agent::SharedAgent;
use crate::config::QueueConfig;
use crate::error::{DispatchError, DispatchResult, ErrorKind};
use crate::otel;
use crate::registry::normalize_key;
use crate::types::{AgentResult, Task};

/// Called once per finished entry, from the task that ran it.
pub type CompletionHook = Arc<dyn Fn(&QueueOutcome) + Send + Sync>;

/// What happened to one queued entry.
#[derive(Debug, Clone, Serialize)]
pub struct QueueOutcome {
    pub task_id: Uuid,
    pub agent_key: String,
    pub priority: i32,
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    /// Highest number of entries observed running at once.
    pub peak_running: usize,
}

struct QueueEntry {
    agent_key: String,
    agent: SharedAgent,
    task: Task,
    priority: i32,
    seq: u64,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // Max-heap: higher priority first, earlier arrival first among equals.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Shared {
    pending: Mutex<BinaryHeap<QueueEntry>>,
    running: AtomicUsize,
    peak_running: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    next_seq: AtomicU64,
    closed: AtomicBool,
    /// Slot released.
    wake: Notify,
    /// Entry enqueued.
    arrived: Notify,
    idle: Notify,
    max_concurrency: usize,
    max_pending: usize,
    tick: Duration,
    task_timeout: Option<Duration>,
    hook: Option<CompletionHook>,
}

impl Shared {
    fn lock_pending(&self) -> std::sync::MutexGuard<'_, BinaryHeap<QueueEntry>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_idle(&self) -> bool {
        let pending = self.lock_pending();
        pending.is_empty() && self.running.load(AtomicOrdering::SeqCst) == 0
    }

    /// Pop the next entry if a slot is free. The running count is raised under
    /// the heap lock so an observer never sees the entry in neither place.
    fn next_ready(&self) -> Option<QueueEntry> {
        let mut pending = self.lock_pending();
        if self.running.load(AtomicOrdering::SeqCst) >= self.max_concurrency {
            return None;
        }
        let entry = pending.pop()?;
        let now_running = self.running.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        self.peak_running.fetch_max(now_running, AtomicOrdering::SeqCst);
        Some(entry)
    }

    async fn run_entry(&self, entry: QueueEntry) -> QueueOutcome {
        let start = Instant::now();
        let work = AssertUnwindSafe(entry.agent.process(&entry.task)).catch_unwind();
        let caught = match self.task_timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(caught) => caught,
                Err(_) => Ok(Err(DispatchError::timeout(limit))),
            },
            None => work.await,
        };
        let result = match caught {
            Ok(result) => result.and_then(AgentResult::into_result),
            Err(_) => Err(DispatchError::execution(format!(
                "queued task for '{}' panicked",
                entry.agent_key
            ))),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let span = tracing::Span::current();
        match &result {
            Ok(_) => {
                self.completed.fetch_add(1, AtomicOrdering::SeqCst);
                otel::record_queue_task_result(&span, true, duration_ms);
                info!(task = %entry.task.id, agent = %entry.agent_key, duration_ms, "Queued task completed");
            }
            Err(err) => {
                self.failed.fetch_add(1, AtomicOrdering::SeqCst);
                otel::record_queue_task_result(&span, false, duration_ms);
                otel::record_error_kind(&span, err.kind());
                warn!(task = %entry.task.id, agent = %entry.agent_key, kind = %err.kind(), "Queued task failed: {err}");
            }
        }

        QueueOutcome {
            task_id: entry.task.id,
            agent_key: entry.agent_key,
            priority: entry.priority,
            success: result.is_ok(),
            error_kind: result.as_ref().err().map(DispatchError::kind),
            error: result.as_ref().err().map(ToString::to_string),
            duration_ms,
        }
    }
}

/// Releases a running slot when a task finishes, however it finishes.
struct SlotGuard(Arc<Shared>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, AtomicOrdering::SeqCst);
        self.0.wake.notify_one();
        if self.0.is_idle() {
            self.0.idle.notify_waiters();
        }
    }
}

pub struct TaskQueue {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl TaskQueue {
    /// Start a queue and its scheduler on the current runtime.
    pub fn start(config: &QueueConfig) -> Self {
        Self::start_with(config, None, None)
    }

    /// Like [`TaskQueue::start`], with a per-task timeout and a completion hook.
    pub fn start_with(
        config: &QueueConfig,
        task_timeout: Option<Duration>,
        hook: Option<CompletionHook>,
    ) -> Self {
        let shared = Arc::new(Shared {
            pending: Mutex::new(BinaryHeap::new()),
            running: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            next_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            wake: Notify::new(),
            arrived: Notify::new(),
            idle: Notify::new(),
            max_concurrency: config.max_concurrency.max(1),
            max_pending: config.max_pending,
            tick: config.tick(),
            task_timeout,
            hook,
        });
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        tracker.spawn(schedule(shared.clone(), tracker.clone(), cancel.clone()));
        info!(
            max_concurrency = shared.max_concurrency,
            max_pending = shared.max_pending,
            "Task queue started"
        );
        Self {
            shared,
            cancel,
            tracker,
        }
    }

    /// Queue `task` for `agent`. Higher `priority` runs first.
    pub fn enqueue(&self, agent: SharedAgent, task: Task, priority: i32) -> DispatchResult<Uuid> {
        let agent_key = normalize_key(agent.name());
        if self.shared.closed.load(AtomicOrdering::SeqCst) {
            self.shared.rejected.fetch_add(1, AtomicOrdering::SeqCst);
            return Err(DispatchError::execution("task queue is closed"));
        }
        let task_id = task.id;
        {
            let mut pending = self.shared.lock_pending();
            if pending.len() >= self.shared.max_pending {
                self.shared.rejected.fetch_add(1, AtomicOrdering::SeqCst);
                warn!(agent = %agent_key, capacity = self.shared.max_pending, "Task queue full");
                return Err(DispatchError::rate_limit(format!(
                    "task queue full ({} pending)",
                    self.shared.max_pending
                ))
                .with_retryable(false));
            }
            let seq = self.shared.next_seq.fetch_add(1, AtomicOrdering::SeqCst);
            pending.push(QueueEntry {
                agent_key: agent_key.clone(),
                agent,
                task,
                priority,
                seq,
            });
        }
        debug!(task = %task_id, agent = %agent_key, priority, "Task enqueued");
        self.shared.arrived.notify_one();
        Ok(task_id)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.shared.lock_pending().len(),
            running: self.shared.running.load(AtomicOrdering::SeqCst),
            completed: self.shared.completed.load(AtomicOrdering::SeqCst),
            failed: self.shared.failed.load(AtomicOrdering::SeqCst),
            rejected: self.shared.rejected.load(AtomicOrdering::SeqCst),
            peak_running: self.shared.peak_running.load(AtomicOrdering::SeqCst),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.shared.max_concurrency
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(AtomicOrdering::SeqCst)
    }

    /// Resolve once nothing is pending or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting work, discard pending entries and wait for running ones.
    ///
    /// Returns the number of discarded entries.
    pub async fn close(&self) -> usize {
        self.shared.closed.store(true, AtomicOrdering::SeqCst);
        let discarded = {
            let mut pending = self.shared.lock_pending();
            let n = pending.len();
            pending.clear();
            n
        };
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.shared.idle.notify_waiters();
        info!(discarded, "Task queue closed");
        discarded
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn schedule(shared: Arc<Shared>, tracker: TaskTracker, cancel: CancellationToken) {
    loop {
        while let Some(entry) = shared.next_ready() {
            let span = otel::queue_task_span(&entry.task.id.to_string(), &entry.agent_key, entry.priority);
            let worker = shared.clone();
            tracker.spawn(
                async move {
                    let _slot = SlotGuard(worker.clone());
                    let outcome = worker.run_entry(entry).await;
                    if let Some(hook) = &worker.hook {
                        hook(&outcome);
                    }
                }
                .instrument(span),
            );
        }

        let has_pending = !shared.lock_pending().is_empty();
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = shared.wake.notified() => {}
            _ = shared.arrived.notified() => {
                // Batch arrivals over one tick before admitting any of them.
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(shared.tick) => {}
                }
            }
            _ = tokio::time::sleep(shared.tick), if has_pending => {}
        }
    }
    debug!("Task queue scheduler stopped");
}
