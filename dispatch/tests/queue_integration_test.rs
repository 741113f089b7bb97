//! Integration tests for the TaskQueue
//!
//! Concurrency bound and priority ordering under a live scheduler.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dispatch::config::QueueConfig;
use dispatch::{Agent, AgentResult, Capability, DispatchResult, Task, TaskContext, TaskQueue};
use tokio::sync::Notify;

/// Tracks how many of its tasks run at once.
struct Gauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

#[async_trait]
impl Agent for Gauge {
    fn name(&self) -> &str {
        "Gauge"
    }

    fn capabilities(&self) -> Vec<Capability> {
        Vec::new()
    }

    async fn process(&self, task: &Task) -> DispatchResult<AgentResult> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(AgentResult::success(task.input.clone(), 1.0))
    }
}

/// Records the order tasks start in; "blocker" waits on a gate.
struct Recorder {
    order: Mutex<Vec<String>>,
    started: Notify,
    gate: Notify,
}

#[async_trait]
impl Agent for Recorder {
    fn name(&self) -> &str {
        "Recorder"
    }

    fn capabilities(&self) -> Vec<Capability> {
        Vec::new()
    }

    async fn process(&self, task: &Task) -> DispatchResult<AgentResult> {
        self.order.lock().unwrap().push(task.input.clone());
        if task.input == "blocker" {
            self.started.notify_one();
            self.gate.notified().await;
        }
        Ok(AgentResult::success(task.input.clone(), 1.0))
    }
}

fn task(input: &str) -> Task {
    Task::new("follow_up", input, TaskContext::new())
}

/// Test: Five tasks at concurrency three never exceed three running
#[tokio::test(start_paused = true)]
async fn test_concurrency_bound_and_completion() {
    let queue = TaskQueue::start(&QueueConfig {
        max_concurrency: 3,
        ..QueueConfig::default()
    });
    let gauge = Arc::new(Gauge {
        current: AtomicUsize::new(0),
        max: AtomicUsize::new(0),
    });

    for i in 0..5 {
        queue
            .enqueue(gauge.clone(), task(&format!("t{i}")), 0)
            .unwrap();
    }
    queue.wait_idle().await;

    assert_eq!(gauge.max.load(Ordering::SeqCst), 3);
    let stats = queue.stats();
    assert_eq!(stats.completed, 5);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.peak_running, 3);
    assert_eq!(stats.running, 0);
    queue.close().await;
}

/// Test: Higher priority runs first; equal priorities keep arrival order
#[tokio::test]
async fn test_priority_order_with_fifo_ties() {
    let queue = TaskQueue::start(&QueueConfig {
        max_concurrency: 1,
        ..QueueConfig::default()
    });
    let recorder = Arc::new(Recorder {
        order: Mutex::new(Vec::new()),
        started: Notify::new(),
        gate: Notify::new(),
    });

    queue.enqueue(recorder.clone(), task("blocker"), 0).unwrap();
    recorder.started.notified().await;

    queue.enqueue(recorder.clone(), task("low-1"), 1).unwrap();
    queue.enqueue(recorder.clone(), task("low-2"), 1).unwrap();
    queue.enqueue(recorder.clone(), task("high"), 10).unwrap();
    queue.enqueue(recorder.clone(), task("low-3"), 1).unwrap();
    assert_eq!(queue.stats().pending, 4);

    recorder.gate.notify_one();
    queue.wait_idle().await;

    let order = recorder.order.lock().unwrap().clone();
    assert_eq!(order, vec!["blocker", "high", "low-1", "low-2", "low-3"]);
}

/// Test: Entries enqueued back to back on a multi-threaded runtime start by
/// priority, not by which enqueue the scheduler saw first
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_priority_holds_for_back_to_back_enqueues() {
    for _ in 0..20 {
        let queue = TaskQueue::start(&QueueConfig {
            max_concurrency: 1,
            tick_ms: 50,
            ..QueueConfig::default()
        });
        let recorder = Arc::new(Recorder {
            order: Mutex::new(Vec::new()),
            started: Notify::new(),
            gate: Notify::new(),
        });

        queue.enqueue(recorder.clone(), task("low"), 0).unwrap();
        queue.enqueue(recorder.clone(), task("high"), 10).unwrap();
        queue.wait_idle().await;

        let order = recorder.order.lock().unwrap().clone();
        assert_eq!(order, vec!["high", "low"]);
        queue.close().await;
    }
}
