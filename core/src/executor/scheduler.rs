use std::sync::Arc;

use tracing::{debug, warn};

use super::engine::Shared;
use super::worker;

/// Workers worth having for the current backlog.
///
/// One per pending or in-flight task, capped at `max_workers`.
pub(crate) fn desired_workers(max_workers: usize, pending: usize, in_flight: usize) -> usize {
    max_workers.min(pending.saturating_add(in_flight))
}

/// Pool supervisor: grows the worker pool toward [`desired_workers`] whenever
/// the queue changes, until the engine stops.
///
/// Workers never spawn siblings themselves; shrinking happens as idle workers
/// find the queue empty and exit.
///
/// # Spawn failure
///
/// A failed thread spawn is logged and caps the pool at its current size for
/// the rest of the run.
pub(crate) fn supervise(shared: Arc<Shared>) {
    let _thread = worker::enter(&shared);
    let mut ceiling = usize::MAX;
    let mut queue = shared.lock_queue();

    while shared.is_running() {
        let want = desired_workers(shared.max_workers(), queue.len(), queue.in_flight()).min(ceiling);

        let mut registry = shared.lock_registry();
        while registry.active.len() < want {
            match shared.spawn_worker(&mut registry) {
                Ok(id) => debug!(
                    worker = id.0,
                    workers = registry.active.len(),
                    want,
                    "worker spawned"
                ),
                Err(e) => {
                    ceiling = registry.active.len();
                    warn!(
                        error = %e,
                        workers = ceiling,
                        "could not spawn worker; pool stays at its current size"
                    );
                    break;
                }
            }
        }
        drop(registry);

        queue = shared.demand.wait(queue).unwrap_or_else(|e| e.into_inner());
    }
    debug!("pool supervisor exiting");
}
