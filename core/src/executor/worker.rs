use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, debug_span, error, warn};

use super::engine::{Shared, WorkerId};
use super::queue::TaskQueue;
use super::types::EngineEvent;
use crate::task::{Arena, Claim, TaskId, TaskState};

thread_local! {
    /// Address of the engine whose thread this is, or 0.
    static CURRENT_ENGINE: Cell<usize> = const { Cell::new(0) };
}

fn engine_key(shared: &Shared) -> usize {
    shared as *const Shared as usize
}

/// Marks the current thread as belonging to an engine until dropped.
pub(crate) struct EngineThread {
    previous: usize,
}

impl Drop for EngineThread {
    fn drop(&mut self) {
        CURRENT_ENGINE.with(|c| c.set(self.previous));
    }
}

pub(crate) fn enter(shared: &Shared) -> EngineThread {
    let previous = CURRENT_ENGINE.with(|c| c.replace(engine_key(shared)));
    EngineThread { previous }
}

/// Whether the calling thread is one of `shared`'s workers or its supervisor.
pub(crate) fn on_engine_thread(shared: &Shared) -> bool {
    CURRENT_ENGINE.with(|c| c.get()) == engine_key(shared)
}

pub(crate) struct Job {
    id: TaskId,
    claim: Claim,
}

enum Outcome {
    Completed(TaskId),
    Panicked {
        id: TaskId,
        attempts: u32,
        message: String,
    },
}

enum Selection {
    Run(Job),
    /// Nothing runnable right now, but something in flight or busy may change
    /// that. `external` means a claim is held outside the engine, which sends
    /// no completion notification.
    Wait { external: bool },
    /// Nothing runnable and nothing that could ever make it so.
    Stalled,
}

/// Who holds the claims an entry is waiting on.
#[derive(Default, Clone, Copy)]
struct Busy {
    engine: bool,
    external: bool,
}

impl Busy {
    fn note(&mut self, queue: &TaskQueue, id: TaskId) {
        if queue.running.contains(&id) {
            self.engine = true;
        } else {
            self.external = true;
        }
    }

    fn any(self) -> bool {
        self.engine || self.external
    }

    fn merge(&mut self, other: Busy) {
        self.engine |= other.engine;
        self.external |= other.external;
    }
}

enum Check {
    Eligible,
    /// Executed or disabled since it was queued.
    Stale,
    Blocked { busy: Busy, unmet: Vec<TaskId> },
}

/// Worker body: take runnable tasks until the queue is empty or the engine is
/// stopped, then deregister.
pub(crate) fn work(shared: &Arc<Shared>, worker: WorkerId) {
    let _thread = enter(shared);
    let span = debug_span!("worker", id = worker.0);
    let _span = span.enter();
    debug!("worker started");

    let mut queue = shared.lock_queue();
    loop {
        let (guard, job) = next_job(shared, queue);
        let Some(job) = job else {
            shared.retire(worker, guard);
            return;
        };
        shared.release(guard);

        let outcome = execute(job);

        let mut guard = shared.lock_queue();
        finish(shared, &mut guard, outcome);
        shared.release(guard);

        queue = shared.lock_queue();
    }
}

fn next_job<'a>(
    shared: &'a Shared,
    mut queue: MutexGuard<'a, TaskQueue>,
) -> (MutexGuard<'a, TaskQueue>, Option<Job>) {
    let poll = Duration::from_millis(shared.config.idle_poll_ms.max(1));

    loop {
        if !shared.is_running() || queue.is_empty() {
            return (queue, None);
        }

        match select(shared, &mut queue) {
            Selection::Run(job) => {
                queue.running.insert(job.id);
                return (queue, Some(job));
            }
            Selection::Wait { external } => {
                if queue.is_empty() {
                    continue;
                }
                // In-flight engine tasks notify `progress` when they finish;
                // claims taken through `TaskGraph::run` do not.
                queue = if external {
                    match shared.progress.wait_timeout(queue, poll) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    }
                } else {
                    shared
                        .progress
                        .wait(queue)
                        .unwrap_or_else(|e| e.into_inner())
                };
            }
            Selection::Stalled => {
                let stuck = queue.take_all();
                warn!(
                    count = stuck.len(),
                    tasks = ?stuck,
                    "queued tasks can never become runnable; dropping them"
                );
                queue.stats.report.stalled.extend(stuck);
                return (queue, None);
            }
        }
    }
}

/// Scan the queue for a runnable task.
///
/// A blocked entry stays where it is; its unmet idle dependencies are
/// admitted behind it. Later passes look only at those fresh admissions,
/// since nothing else changed under the lock, and the queue is re-sorted once
/// at the end. An entry whose unmet dependency cannot be admitted is
/// transitively disabled and leaves the queue.
fn select(shared: &Shared, queue: &mut TaskQueue) -> Selection {
    let arena = shared.graph.read();
    let mut busy = Busy::default();
    let mut admitted_any = false;
    let mut scan = queue.snapshot();

    for _ in 0..=arena.len() {
        let mut fresh = Vec::new();

        for id in scan {
            if !queue.contains(id) {
                continue;
            }
            let state = match arena.state(id) {
                Ok(state) => Arc::clone(state),
                Err(_) => {
                    warn!(task = %id, "dropping removed task from queue");
                    queue.remove_all(id);
                    continue;
                }
            };
            let Some(claim) = state.try_claim() else {
                busy.note(queue, id);
                continue;
            };

            match check(&arena, queue, id, &state) {
                Check::Eligible => {
                    queue.remove_all(id);
                    if admitted_any {
                        queue.sort(&arena);
                    }
                    debug!(task = %id, "task selected");
                    return Selection::Run(Job { id, claim });
                }
                Check::Stale => {
                    drop(claim);
                    queue.remove_all(id);
                    debug!(task = %id, "dropped from queue: executed or disabled");
                }
                Check::Blocked {
                    busy: waiting_on,
                    unmet,
                } => {
                    drop(claim);
                    busy.merge(waiting_on);
                    if unmet.is_empty() {
                        continue;
                    }

                    let threads = shared.config.batch_threads_for(unmet.len());
                    let admitted = queue.admit_batch(&arena, &unmet, threads);
                    if !unmet.iter().all(|dep| queue.contains(*dep)) {
                        queue.remove_all(id);
                        debug!(task = %id, "dropped from queue: a dependency is disabled");
                        continue;
                    }
                    if !admitted.is_empty() {
                        queue.stats.report.requeues += 1;
                        queue.outbox.push(EngineEvent::Requeued(id));
                        fresh.extend(admitted);
                    }
                }
            }
        }

        if fresh.is_empty() {
            break;
        }
        admitted_any = true;
        scan = fresh;
    }

    if admitted_any {
        queue.sort(&arena);
    }

    if busy.any() || queue.in_flight() > 0 || queue.is_empty() {
        Selection::Wait {
            external: busy.external,
        }
    } else {
        Selection::Stalled
    }
}

/// A claimed task may run once every dependency is executed, or is itself
/// queued and depends back on the task (a cycle the queue order resolves).
fn check(arena: &Arena, queue: &TaskQueue, id: TaskId, state: &TaskState) -> Check {
    if state.is_executed() || !state.is_enabled() {
        return Check::Stale;
    }
    let Ok(node) = arena.node(id) else {
        return Check::Stale;
    };

    let mut busy = Busy::default();
    let mut unmet = Vec::new();
    for &dep in &node.depend {
        let Ok(dep_state) = arena.state(dep) else {
            continue;
        };
        let Some(_held) = dep_state.try_claim() else {
            busy.note(queue, dep);
            continue;
        };
        if dep_state.is_executed() {
            continue;
        }
        if queue.contains(dep) && depends_back(arena, dep, id) {
            continue;
        }
        unmet.push(dep);
    }

    if busy.any() || !unmet.is_empty() {
        Check::Blocked { busy, unmet }
    } else {
        Check::Eligible
    }
}

/// `dep` (a direct dependency of `id`) transitively depends on `id`. Both
/// then share a cycle, so the cached cycle set rules most pairs out before
/// any walk.
fn depends_back(arena: &Arena, dep: TaskId, id: TaskId) -> bool {
    arena.on_cycle(id) && arena.on_cycle(dep) && arena.is_dependent(dep, id).unwrap_or(false)
}

fn execute(job: Job) -> Outcome {
    let Job { id, claim } = job;
    let state = Arc::clone(claim.state());
    let started = Instant::now();

    match panic::catch_unwind(AssertUnwindSafe(|| state.invoke())) {
        Ok(()) => {
            state.mark_executed();
            drop(claim);
            debug!(
                task = %id,
                elapsed_us = started.elapsed().as_micros() as u64,
                "task executed"
            );
            Outcome::Completed(id)
        }
        Err(payload) => {
            let attempts = state.bump_attempts();
            drop(claim);
            Outcome::Panicked {
                id,
                attempts,
                message: panic_message(payload.as_ref()),
            }
        }
    }
}

fn finish(shared: &Shared, queue: &mut TaskQueue, outcome: Outcome) {
    match outcome {
        Outcome::Completed(id) => {
            queue.running.remove(&id);
            queue.stats.report.executed.push(id);
            queue.outbox.push(EngineEvent::Completed(id));
        }
        Outcome::Panicked {
            id,
            attempts,
            message,
        } => {
            queue.running.remove(&id);
            let max_attempts = shared.config.retry.max_attempts;
            let arena = shared.graph.read();
            if attempts < max_attempts {
                warn!(task = %id, attempts, max_attempts, panic = %message, "task panicked; retrying");
                if queue.admit(&arena, id) {
                    queue.sort(&arena);
                    queue.stats.report.requeues += 1;
                    queue.outbox.push(EngineEvent::Requeued(id));
                }
            } else {
                error!(task = %id, attempts, panic = %message, "task failed; disabling it");
                if let Ok(state) = arena.state(id) {
                    state.set_enabled(false);
                }
                queue.stats.report.failed.push(id);
                queue.outbox.push(EngineEvent::Failed { task: id, attempts });
            }
        }
    }

    shared.progress.notify_all();
    shared.demand.notify_all();
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
