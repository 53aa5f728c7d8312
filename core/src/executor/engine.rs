use std::collections::HashSet;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::batch::Batch;
use crate::config::EngineConfig;
use crate::error::{EngineError, GraphError};
use crate::task::{TaskGraph, TaskId};

use super::queue::TaskQueue;
use super::scheduler;
use super::types::{EngineEvent, RunReport, RunStats};
use super::worker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WorkerId(pub(crate) usize);

/// Registered workers and every engine thread still waiting to be joined.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    next_id: usize,
    pub(crate) active: HashSet<WorkerId>,
    handles: Vec<JoinHandle<()>>,
    peak: usize,
}

impl Registry {
    fn enlist(&mut self) -> WorkerId {
        let id = WorkerId(self.next_id);
        self.next_id += 1;
        self.active.insert(id);
        id
    }

    fn note_peak(&mut self) {
        self.peak = self.peak.max(self.active.len());
    }
}

/// State shared by the engine handle, its workers and the scaling supervisor.
///
/// Lock order: `queue`, then `registry`, then the graph's read lock.
pub(crate) struct Shared {
    pub(crate) graph: TaskGraph,
    pub(crate) config: EngineConfig,
    queue: Mutex<TaskQueue>,
    /// Workers wait here for completions, admissions and stop requests.
    pub(crate) progress: Condvar,
    /// The supervisor waits here for queue growth and worker exits.
    pub(crate) demand: Condvar,
    registry: Mutex<Registry>,
    /// Joiners wait here for workers to deregister.
    idle: Condvar,
    running: AtomicBool,
    max_workers: AtomicUsize,
    events: Mutex<Batch<EngineEvent>>,
}

impl Shared {
    pub(crate) fn lock_queue(&self) -> MutexGuard<'_, TaskQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn max_workers(&self) -> usize {
        self.max_workers.load(Ordering::Acquire)
    }

    fn thread_builder(&self, suffix: &str) -> thread::Builder {
        let mut builder = thread::Builder::new().name(format!("{}-{}", self.config.thread_name, suffix));
        if let Some(size) = self.config.thread_stack_size {
            builder = builder.stack_size(size);
        }
        builder
    }

    /// Register and start one more worker thread.
    pub(crate) fn spawn_worker(self: &Arc<Self>, registry: &mut Registry) -> io::Result<WorkerId> {
        let id = registry.enlist();
        let shared = Arc::clone(self);
        match self
            .thread_builder(&id.0.to_string())
            .spawn(move || worker::work(&shared, id))
        {
            Ok(handle) => {
                registry.handles.push(handle);
                registry.note_peak();
                Ok(id)
            }
            Err(e) => {
                registry.active.remove(&id);
                Err(e)
            }
        }
    }

    fn spawn_supervisor(self: &Arc<Self>, registry: &mut Registry) -> io::Result<()> {
        let shared = Arc::clone(self);
        let handle = self
            .thread_builder("scaler")
            .spawn(move || scheduler::supervise(shared))?;
        registry.handles.push(handle);
        Ok(())
    }

    /// Deregister `worker`. The last worker out stops the engine and closes
    /// the run report.
    pub(crate) fn retire(&self, worker: WorkerId, mut queue: MutexGuard<'_, TaskQueue>) {
        let mut registry = self.lock_registry();
        registry.active.remove(&worker);
        let last = registry.active.is_empty();

        if last {
            self.running.store(false, Ordering::Release);
            queue.stats.report.peak_workers = registry.peak;
            queue.stats.finish();
            let report = &queue.stats.report;
            info!(
                executed = report.executed.len(),
                failed = report.failed.len(),
                stalled = report.stalled.len(),
                requeues = report.requeues,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "engine drained"
            );
            let event = EngineEvent::Drained {
                executed: report.executed.len(),
                failed: report.failed.len(),
                stalled: report.stalled.len(),
            };
            queue.outbox.push(event);
        }
        debug!(worker = worker.0, remaining = registry.active.len(), "worker exiting");

        drop(registry);
        self.progress.notify_all();
        self.demand.notify_all();
        self.idle.notify_all();
        self.release(queue);
    }

    /// Drop the queue lock, then deliver whatever events were queued under it.
    pub(crate) fn release(&self, mut queue: MutexGuard<'_, TaskQueue>) {
        let events = std::mem::take(&mut queue.outbox);
        drop(queue);
        self.dispatch(&events);
    }

    fn dispatch(&self, events: &[EngineEvent]) {
        if events.is_empty() {
            return;
        }
        let listeners = self
            .events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if listeners.is_empty() {
            return;
        }
        for event in events {
            if panic::catch_unwind(AssertUnwindSafe(|| listeners.run(event, 1))).is_err() {
                warn!(?event, "engine event listener panicked");
            }
        }
    }

    /// Join every engine thread until no worker remains registered.
    ///
    /// Returns how many joined threads had panicked.
    fn join_all(&self) -> usize {
        let mut panicked = 0;
        loop {
            let handles = {
                let mut registry = self.lock_registry();
                loop {
                    if !registry.handles.is_empty() {
                        break std::mem::take(&mut registry.handles);
                    }
                    if registry.active.is_empty() {
                        return panicked;
                    }
                    registry = self.idle.wait(registry).unwrap_or_else(|e| e.into_inner());
                }
            };

            for handle in handles {
                if handle.join().is_err() {
                    panicked += 1;
                }
            }
        }
    }
}

/// Concurrent scheduler driving a [`TaskGraph`].
///
/// Tasks are admitted into an ordered pending queue, then a self-scaling pool
/// of OS threads executes them, each at most once, respecting dependencies.
/// The pool shrinks to zero and the engine stops by itself once the queue
/// drains.
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use taskflow_core::{TaskEngine, TaskGraph};
///
/// let graph = TaskGraph::new();
/// let log = Arc::new(Mutex::new(Vec::new()));
///
/// let l = log.clone();
/// let a = graph.create(move || l.lock().unwrap().push("a"), 0);
/// let l = log.clone();
/// let b = graph.create(move || l.lock().unwrap().push("b"), 0);
/// graph.depend_add(b, a).unwrap();
///
/// let engine = TaskEngine::new(graph.clone());
/// engine.add(b).unwrap();
/// let report = engine.start(2, true).unwrap().unwrap();
///
/// assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
/// assert_eq!(report.executed, vec![a, b]);
/// ```
pub struct TaskEngine {
    shared: Arc<Shared>,
}

impl TaskEngine {
    pub fn new(graph: TaskGraph) -> Self {
        Self::with_config(graph, EngineConfig::default())
    }

    pub fn with_config(graph: TaskGraph, config: EngineConfig) -> Self {
        let max_workers = config.max_workers;
        Self {
            shared: Arc::new(Shared {
                graph,
                config,
                queue: Mutex::new(TaskQueue::default()),
                progress: Condvar::new(),
                demand: Condvar::new(),
                registry: Mutex::new(Registry::default()),
                idle: Condvar::new(),
                running: AtomicBool::new(false),
                max_workers: AtomicUsize::new(max_workers),
                events: Mutex::new(Batch::new()),
            }),
        }
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.shared.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Queue `id` unless it is executed, already queued, or (transitively)
    /// disabled. Returns whether it was admitted.
    pub fn add(&self, id: TaskId) -> Result<bool, EngineError> {
        let shared = &self.shared;
        let mut queue = shared.lock_queue();
        let arena = shared.graph.read();
        if !arena.contains(id) {
            return Err(GraphError::UnknownTask(id).into());
        }

        let admitted = queue.admit(&arena, id);
        if admitted {
            queue.sort(&arena);
            debug!(task = %id, pending = queue.len(), "task queued");
            shared.progress.notify_all();
            shared.demand.notify_all();
        }
        Ok(admitted)
    }

    /// Queue every admissible task of `ids`. The admission check runs in
    /// parallel across `batch_threads` threads for large batches; unknown
    /// handles are skipped. Returns the number admitted.
    pub fn add_batch(&self, ids: &[TaskId]) -> usize {
        let shared = &self.shared;
        let threads = shared.config.batch_threads_for(ids.len());
        let mut queue = shared.lock_queue();
        let arena = shared.graph.read();

        let admitted = queue.admit_batch(&arena, ids, threads).len();
        if admitted > 0 {
            queue.sort(&arena);
            debug!(admitted, offered = ids.len(), pending = queue.len(), "batch queued");
            shared.progress.notify_all();
            shared.demand.notify_all();
        }
        admitted
    }

    /// Remove every queued occurrence of `id`.
    pub fn remove(&self, id: TaskId) -> usize {
        self.shared.lock_queue().remove_all(id)
    }

    pub fn remove_batch(&self, ids: &[TaskId]) -> usize {
        let mut queue = self.shared.lock_queue();
        ids.iter().map(|id| queue.remove_all(*id)).sum()
    }

    pub fn is_queued(&self, id: TaskId) -> bool {
        self.shared.lock_queue().contains(id)
    }

    /// Pending tasks in scheduling order.
    pub fn queued(&self) -> Vec<TaskId> {
        self.shared.lock_queue().snapshot()
    }

    pub fn pending_len(&self) -> usize {
        self.shared.lock_queue().len()
    }

    /// Start executing the queue with at most `max_workers` threads.
    ///
    /// With `wait`, the calling thread becomes the first worker and the call
    /// returns the run report once every worker has exited. Without it, a new
    /// thread becomes the first worker and the call returns `Ok(None)` at
    /// once; use [`wait`](Self::wait) or [`stop`](Self::stop) later.
    pub fn start(&self, max_workers: usize, wait: bool) -> Result<Option<RunReport>, EngineError> {
        if max_workers == 0 {
            return Err(EngineError::InvalidWorkerCount);
        }

        let shared = &self.shared;
        let mut queue = shared.lock_queue();
        let first = {
            let mut registry = shared.lock_registry();
            if shared.is_running() || !registry.active.is_empty() {
                return Err(EngineError::AlreadyRunning);
            }

            shared.max_workers.store(max_workers, Ordering::Release);
            shared.running.store(true, Ordering::Release);
            queue.stats = RunStats::begin();

            let first = if wait {
                let id = registry.enlist();
                registry.note_peak();
                id
            } else {
                match shared.spawn_worker(&mut registry) {
                    Ok(id) => id,
                    Err(e) => {
                        shared.running.store(false, Ordering::Release);
                        return Err(EngineError::Spawn(e));
                    }
                }
            };

            if let Err(e) = shared.spawn_supervisor(&mut registry) {
                warn!(error = %e, "could not start pool supervisor; running with a single worker");
            }
            first
        };

        info!(max_workers, pending = queue.len(), wait, "engine started");
        queue.outbox.push(EngineEvent::Started { max_workers });
        shared.release(queue);

        if !wait {
            return Ok(None);
        }

        worker::work(shared, first);
        self.wait().map(Some)
    }

    /// Join a run started without `wait` and return its report.
    pub fn wait(&self) -> Result<RunReport, EngineError> {
        if worker::on_engine_thread(&self.shared) {
            warn!("wait() called from an engine thread; returning the report so far");
            return Ok(self.report());
        }
        match self.shared.join_all() {
            0 => Ok(self.report()),
            n => Err(EngineError::WorkerPanicked(n)),
        }
    }

    /// Ask every worker to exit at its next loop boundary. Running callbacks
    /// are never interrupted. With `wait`, block until all threads exit.
    pub fn stop(&self, wait: bool) -> Result<(), EngineError> {
        let shared = &self.shared;
        {
            let _queue = shared.lock_queue();
            shared.running.store(false, Ordering::Release);
            shared.progress.notify_all();
            shared.demand.notify_all();
        }
        debug!(wait, "engine stop requested");

        if !wait {
            return Ok(());
        }
        if worker::on_engine_thread(shared) {
            warn!("stop(wait=true) called from an engine thread; not waiting for itself");
            return Ok(());
        }
        match shared.join_all() {
            0 => Ok(()),
            n => Err(EngineError::WorkerPanicked(n)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn worker_count(&self) -> usize {
        self.shared.lock_registry().active.len()
    }

    /// Report of the current or most recent run.
    pub fn report(&self) -> RunReport {
        let mut report = self.shared.lock_queue().stats.report.clone();
        report.peak_workers = report.peak_workers.max(self.shared.lock_registry().peak);
        report
    }

    /// Register `func` to be called with `context` for every [`EngineEvent`].
    /// Returns `false` if the pair is already registered.
    pub fn subscribe<C>(&self, func: fn(&C, &EngineEvent), context: Arc<C>) -> bool
    where
        C: Send + Sync + 'static,
    {
        self.lock_events().add(func, context)
    }

    pub fn unsubscribe<C>(&self, func: fn(&C, &EngineEvent), context: &Arc<C>) -> usize {
        self.lock_events().remove(func, context)
    }

    pub fn unsubscribe_func<C>(&self, func: fn(&C, &EngineEvent)) -> usize {
        self.lock_events().remove_by_func(func)
    }

    pub fn unsubscribe_context<C>(&self, context: &Arc<C>) -> usize {
        self.lock_events().remove_by_context(context)
    }

    fn lock_events(&self) -> MutexGuard<'_, Batch<EngineEvent>> {
        self.shared
            .events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for TaskEngine {
    fn drop(&mut self) {
        if let Err(e) = self.stop(true) {
            warn!(error = %e, "engine threads panicked during shutdown");
        }
    }
}
