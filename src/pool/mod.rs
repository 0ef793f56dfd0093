//! Worker pool and performance-aware scheduler.
//!
//! Independent transformation jobs run concurrently across a fixed-size
//! pool of worker threads, each executing its own sequential pipeline
//! instance. Workers share no mutable state with each other or with the
//! scheduler: tasks go out through per-worker mailboxes, results come back
//! on a single completion channel, and only the pool mutates the queue,
//! the registry and the result cache.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::pipeline::{PipelineOptions, TransformationPipeline};
use crate::timing;

/// What kind of work a task carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Structural,
    Textual,
    Analysis,
}

/// A unit of independent work queued for a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub submitted_at_ms: u64,
}

/// Payload understood by the default pipeline runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineJob {
    pub code: String,
    #[serde(default)]
    pub layers: Vec<u32>,
    #[serde(default)]
    pub path_hint: Option<String>,
}

/// Completed task output, cached until retrieved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub success: bool,
    pub output: serde_json::Value,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// Per-worker performance counters. Reset only on respawn after a crash.
#[derive(Debug, Clone, Default)]
pub struct WorkerState {
    pub busy: bool,
    pub completed_count: u64,
    pub last_dispatch_ms: u64,
    pub avg_processing_time_ms: f64,
    pub success_rate: f64,
    pub memory_usage_bytes: u64,
}

impl WorkerState {
    fn fresh() -> Self {
        Self {
            success_rate: 1.0,
            ..Default::default()
        }
    }

    /// Selection score: favors fast, reliable, low-footprint workers. The
    /// `+1` terms bound each reciprocal at 1.0, so a fresh worker scores
    /// exactly 1.0 instead of dividing by zero.
    fn score(&self) -> f64 {
        let speed = 1.0 / (self.avg_processing_time_ms.max(0.0) + 1.0);
        let footprint = 1.0 / (self.memory_usage_bytes as f64 + 1.0);
        speed * self.success_rate.clamp(0.0, 1.0) * footprint
    }

    fn record_completion(&mut self, elapsed_ms: u64, success: bool, memory_bytes: u64) {
        self.busy = false;
        self.completed_count += 1;
        let n = self.completed_count as f64;
        self.avg_processing_time_ms =
            (self.avg_processing_time_ms * (n - 1.0) + elapsed_ms as f64) / n;
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate = (self.success_rate * (n - 1.0) + outcome) / n;
        self.memory_usage_bytes = memory_bytes;
    }
}

/// Executes one task inside a worker thread.
pub trait JobRunner: Send + Sync + 'static {
    fn run(&self, task: &Task) -> Result<serde_json::Value, String>;
}

/// Default runner: one private sequential pipeline per task.
pub struct PipelineRunner;

impl JobRunner for PipelineRunner {
    fn run(&self, task: &Task) -> Result<serde_json::Value, String> {
        let job: PipelineJob =
            serde_json::from_value(task.payload.clone()).map_err(|e| e.to_string())?;
        let options = PipelineOptions {
            layers: job.layers,
            path_hint: job.path_hint,
            ..Default::default()
        };
        let report = TransformationPipeline::new().run(&job.code, &options);
        serde_json::to_value(report).map_err(|e| e.to_string())
    }
}

enum WorkerEvent {
    Completed {
        slot: usize,
        result: TaskResult,
        memory_bytes: u64,
    },
    Crashed {
        slot: usize,
        task_id: Uuid,
    },
}

struct WorkerHandle {
    tx: Option<Sender<Task>>,
    join: Option<JoinHandle<()>>,
    state: WorkerState,
}

fn worker_loop(
    slot: usize,
    runner: Arc<dyn JobRunner>,
    rx: Receiver<Task>,
    events: Sender<WorkerEvent>,
) {
    while let Ok(task) = rx.recv() {
        let task_id = task.id;
        let memory_bytes = serde_json::to_string(&task.payload)
            .map(|s| s.len() as u64)
            .unwrap_or(0);
        let timer = timing::start_timer();
        let outcome = catch_unwind(AssertUnwindSafe(|| runner.run(&task)));
        let elapsed_ms = timing::elapsed_ms(timer);
        let result = match outcome {
            Ok(Ok(output)) => TaskResult {
                task_id,
                success: true,
                output,
                error: None,
                elapsed_ms,
            },
            Ok(Err(message)) => TaskResult {
                task_id,
                success: false,
                output: serde_json::Value::Null,
                error: Some(message),
                elapsed_ms,
            },
            Err(_) => {
                // A panic poisons nothing outside this thread; report the
                // crash and let the pool respawn the slot.
                let _ = events.send(WorkerEvent::Crashed { slot, task_id });
                return;
            }
        };
        if events
            .send(WorkerEvent::Completed {
                slot,
                result,
                memory_bytes,
            })
            .is_err()
        {
            return;
        }
    }
}

/// Fixed-size pool of worker threads with priority dispatch.
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    queue: Vec<Task>,
    results: HashMap<Uuid, TaskResult>,
    in_flight: HashMap<usize, Uuid>,
    events_tx: Sender<WorkerEvent>,
    events_rx: Receiver<WorkerEvent>,
    runner: Arc<dyn JobRunner>,
    default_timeout: Duration,
}

impl WorkerPool {
    /// Pool sized to available hardware parallelism minus one (min 1),
    /// running the default pipeline runner.
    pub fn new() -> Self {
        let size = thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1).max(1))
            .unwrap_or(1);
        Self::with_runner(size, Arc::new(PipelineRunner))
    }

    pub fn with_size(size: usize) -> Self {
        Self::with_runner(size.max(1), Arc::new(PipelineRunner))
    }

    /// Pool sized and timed per the configuration's pool section.
    pub fn from_config(config: &crate::config::PoolConfig) -> Self {
        let mut pool = if config.workers == 0 {
            Self::new()
        } else {
            Self::with_size(config.workers)
        };
        pool.default_timeout = Duration::from_millis(config.wait_timeout_ms);
        pool
    }

    pub fn with_runner(size: usize, runner: Arc<dyn JobRunner>) -> Self {
        let (events_tx, events_rx) = unbounded();
        let mut pool = Self {
            workers: Vec::with_capacity(size),
            queue: Vec::new(),
            results: HashMap::new(),
            in_flight: HashMap::new(),
            events_tx,
            events_rx,
            runner,
            default_timeout: Duration::from_millis(30_000),
        };
        for slot in 0..size.max(1) {
            pool.workers.push(pool.spawn_worker(slot));
        }
        info!(size = pool.workers.len(), "worker pool started");
        pool
    }

    fn spawn_worker(&self, slot: usize) -> WorkerHandle {
        let (tx, rx) = unbounded();
        let runner = Arc::clone(&self.runner);
        let events = self.events_tx.clone();
        match thread::Builder::new()
            .name(format!("renovar-worker-{slot}"))
            .spawn(move || worker_loop(slot, runner, rx, events))
        {
            Ok(join) => WorkerHandle {
                tx: Some(tx),
                join: Some(join),
                state: WorkerState::fresh(),
            },
            Err(e) => {
                // A slot without a thread keeps tx unset so the scheduler
                // never selects it.
                warn!(slot, error = %e, "worker thread failed to spawn");
                WorkerHandle {
                    tx: None,
                    join: None,
                    state: WorkerState::fresh(),
                }
            }
        }
    }

    /// Queue a task. Non-blocking; the queue is unbounded by design, so a
    /// slow pool delays dispatch latency but never blocks submission.
    pub fn submit(&mut self, kind: TaskKind, payload: serde_json::Value, priority: i32) -> Uuid {
        let task = Task {
            id: Uuid::new_v4(),
            kind,
            payload,
            priority,
            submitted_at_ms: timing::unix_ms(),
        };
        let id = task.id;
        debug!(task = %id, ?kind, priority, "task submitted");
        self.queue.push(task);
        self.poll();
        id
    }

    /// Drain pending worker events and dispatch queued tasks to idle
    /// workers. Called from every public entry point; may also be called
    /// directly by an event-loop owner.
    pub fn poll(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
        self.dispatch_ready();
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Completed {
                slot,
                result,
                memory_bytes,
            } => {
                debug!(task = %result.task_id, slot, success = result.success, "task completed");
                if let Some(worker) = self.workers.get_mut(slot) {
                    worker
                        .state
                        .record_completion(result.elapsed_ms, result.success, memory_bytes);
                }
                self.in_flight.remove(&slot);
                self.results.insert(result.task_id, result);
            }
            WorkerEvent::Crashed { slot, task_id } => {
                warn!(slot, task = %task_id, "worker crashed; respawning slot");
                // In-flight state is lost: no automatic re-submission.
                self.in_flight.remove(&slot);
                self.respawn(slot);
            }
        }
    }

    fn respawn(&mut self, slot: usize) {
        if slot >= self.workers.len() {
            return;
        }
        let fresh = self.spawn_worker(slot);
        let old = std::mem::replace(&mut self.workers[slot], fresh);
        drop(old.tx);
        if let Some(join) = old.join {
            let _ = join.join();
        }
    }

    /// Order the queue by (priority desc, submission asc) and hand tasks to
    /// the best idle workers.
    fn dispatch_ready(&mut self) {
        self.queue
            .sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.submitted_at_ms.cmp(&b.submitted_at_ms))
            });
        while !self.queue.is_empty() {
            let Some(slot) = self.best_idle_worker() else {
                break;
            };
            let task = self.queue.remove(0);
            let task_id = task.id;
            let worker = &mut self.workers[slot];
            let sent = worker
                .tx
                .as_ref()
                .map(|tx| tx.send(task.clone()).is_ok())
                .unwrap_or(false);
            if sent {
                worker.state.busy = true;
                worker.state.last_dispatch_ms = timing::unix_ms();
                self.in_flight.insert(slot, task_id);
                debug!(task = %task_id, slot, "task dispatched");
            } else {
                // Mailbox gone without a crash event yet: re-queue and
                // rebuild the slot.
                self.queue.insert(0, task);
                self.respawn(slot);
            }
        }
    }

    fn best_idle_worker(&self) -> Option<usize> {
        self.workers
            .iter()
            .enumerate()
            .filter(|(_, w)| !w.state.busy && w.tx.is_some())
            .max_by(|(_, a), (_, b)| {
                a.state
                    .score()
                    .partial_cmp(&b.state.score())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(slot, _)| slot)
    }

    /// Block until the task's result is available or the timeout elapses.
    /// A retrieved result is evicted from the cache.
    pub fn wait(&mut self, task_id: Uuid, timeout: Duration) -> Result<TaskResult> {
        let deadline = Instant::now() + timeout;
        loop {
            self.poll();
            if let Some(result) = self.results.remove(&task_id) {
                return Ok(result);
            }
            let now = Instant::now();
            if now >= deadline {
                bail!("timed out waiting for task {task_id}");
            }
            match self.events_rx.recv_timeout(deadline - now) {
                Ok(event) => self.handle_event(event),
                Err(RecvTimeoutError::Timeout) => {
                    bail!("timed out waiting for task {task_id}")
                }
                Err(RecvTimeoutError::Disconnected) => bail!("worker pool shut down"),
            }
        }
    }

    /// Convenience wrapper with the pool's default timeout (30s unless
    /// configured otherwise).
    pub fn wait_default(&mut self, task_id: Uuid) -> Result<TaskResult> {
        self.wait(task_id, self.default_timeout)
    }

    /// Terminate all workers, clearing the queue and the result cache.
    pub fn shutdown(&mut self) {
        for worker in &mut self.workers {
            worker.tx = None;
        }
        for worker in &mut self.workers {
            if let Some(join) = worker.join.take() {
                let _ = join.join();
            }
            worker.state.busy = false;
        }
        self.queue.clear();
        self.results.clear();
        self.in_flight.clear();
        info!("worker pool shut down");
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn busy_count(&self) -> usize {
        self.workers.iter().filter(|w| w.state.busy).count()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn worker_state(&self, slot: usize) -> Option<&WorkerState> {
        self.workers.get(slot).map(|w| &w.state)
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Echoes its payload back; panics when asked to.
    struct TestRunner {
        delay: Duration,
    }

    impl JobRunner for TestRunner {
        fn run(&self, task: &Task) -> Result<serde_json::Value, String> {
            if task.payload.get("panic").is_some() {
                panic!("injected worker crash");
            }
            if task.payload.get("fail").is_some() {
                return Err("injected failure".to_string());
            }
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            Ok(task.payload.clone())
        }
    }

    fn test_pool(size: usize, delay_ms: u64) -> WorkerPool {
        WorkerPool::with_runner(
            size,
            Arc::new(TestRunner {
                delay: Duration::from_millis(delay_ms),
            }),
        )
    }

    #[test]
    fn test_submit_and_wait_round_trip() {
        let mut pool = test_pool(2, 0);
        let id = pool.submit(TaskKind::Textual, json!({"n": 1}), 0);
        let result = pool.wait(id, Duration::from_secs(5)).unwrap();
        assert!(result.success);
        assert_eq!(result.output, json!({"n": 1}));
    }

    #[test]
    fn test_more_tasks_than_workers_all_complete() {
        let mut pool = test_pool(2, 5);
        let ids: Vec<Uuid> = (0..10)
            .map(|n| pool.submit(TaskKind::Analysis, json!({"n": n}), 0))
            .collect();
        for id in ids {
            let result = pool.wait(id, Duration::from_secs(10)).unwrap();
            assert!(result.success);
        }
        assert_eq!(pool.queue_len(), 0);
    }

    #[test]
    fn test_busy_worker_is_never_double_dispatched() {
        let mut pool = test_pool(1, 30);
        let first = pool.submit(TaskKind::Textual, json!({"n": 1}), 0);
        let second = pool.submit(TaskKind::Textual, json!({"n": 2}), 0);
        // One worker, two tasks: the second must still be queued.
        assert_eq!(pool.busy_count(), 1);
        assert_eq!(pool.queue_len(), 1);
        pool.wait(first, Duration::from_secs(5)).unwrap();
        pool.wait(second, Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_priority_beats_submission_order() {
        // Single busy worker; a later high-priority task must dispatch
        // before an earlier low-priority one.
        let mut pool = test_pool(1, 30);
        let _blocker = pool.submit(TaskKind::Textual, json!({"n": 0}), 0);
        let low = pool.submit(TaskKind::Textual, json!({"n": 1}), 1);
        let high = pool.submit(TaskKind::Textual, json!({"n": 2}), 9);
        let high_result = pool.wait(high, Duration::from_secs(5)).unwrap();
        assert!(high_result.success);
        // The low-priority task is either still queued or ran after; its
        // result must still arrive.
        pool.wait(low, Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_wait_times_out_for_unknown_task() {
        let mut pool = test_pool(1, 0);
        let err = pool
            .wait(Uuid::new_v4(), Duration::from_millis(50))
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_result_is_evicted_after_retrieval() {
        let mut pool = test_pool(1, 0);
        let id = pool.submit(TaskKind::Textual, json!({"n": 1}), 0);
        pool.wait(id, Duration::from_secs(5)).unwrap();
        let err = pool.wait(id, Duration::from_millis(50)).unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_crashed_worker_is_replaced_preserving_pool_size() {
        let mut pool = test_pool(2, 0);
        let before = pool.worker_count();
        let crash = pool.submit(TaskKind::Textual, json!({"panic": true}), 0);
        // The crashed task never completes; waiting for it times out while
        // the crash event replaces the worker.
        let err = pool.wait(crash, Duration::from_millis(200)).unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert_eq!(pool.worker_count(), before);
        // The replacement worker is functional.
        let ok = pool.submit(TaskKind::Textual, json!({"n": 3}), 0);
        let result = pool.wait(ok, Duration::from_secs(5)).unwrap();
        assert!(result.success);
    }

    #[test]
    fn test_failed_task_updates_success_rate() {
        let mut pool = test_pool(1, 0);
        let id = pool.submit(TaskKind::Textual, json!({"fail": true}), 0);
        let result = pool.wait(id, Duration::from_secs(5)).unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("injected failure"));
        let state = pool.worker_state(0).unwrap();
        assert_eq!(state.completed_count, 1);
        assert!(state.success_rate < 1.0);
    }

    #[test]
    fn test_fresh_worker_score_is_bounded() {
        let state = WorkerState::fresh();
        assert_eq!(state.score(), 1.0);
        let mut loaded = WorkerState::fresh();
        loaded.record_completion(10, true, 1024);
        assert!(loaded.score() < 1.0);
        assert!(loaded.score() > 0.0);
    }

    #[test]
    fn test_shutdown_clears_queue_and_cache() {
        let mut pool = test_pool(1, 30);
        let _a = pool.submit(TaskKind::Textual, json!({"n": 1}), 0);
        let _b = pool.submit(TaskKind::Textual, json!({"n": 2}), 0);
        pool.shutdown();
        assert_eq!(pool.queue_len(), 0);
        assert_eq!(pool.busy_count(), 0);
    }

    #[test]
    fn test_pool_from_config() {
        let config = crate::config::PoolConfig {
            workers: 3,
            wait_timeout_ms: 50,
        };
        let mut pool = WorkerPool::from_config(&config);
        assert_eq!(pool.worker_count(), 3);
        // The configured timeout governs wait_default.
        let err = pool.wait_default(Uuid::new_v4()).unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_default_runner_executes_pipeline() {
        let mut pool = WorkerPool::with_runner(1, Arc::new(PipelineRunner));
        let payload = serde_json::to_value(PipelineJob {
            code: r#"{ "compilerOptions": { "target": "es5" } }"#.to_string(),
            layers: vec![1],
            path_hint: Some("tsconfig.json".to_string()),
        })
        .unwrap();
        let id = pool.submit(TaskKind::Structural, payload, 0);
        let result = pool.wait(id, Duration::from_secs(10)).unwrap();
        assert!(result.success);
        let report: crate::pipeline::PipelineReport =
            serde_json::from_value(result.output).unwrap();
        assert!(report.code.contains("ES2022"));
    }
}
