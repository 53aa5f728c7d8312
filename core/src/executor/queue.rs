use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use super::types::{EngineEvent, RunStats};
use crate::task::{Arena, TaskId};
use crate::util::par_filter;

/// Below this many candidates a batch is filtered on the calling thread.
const PARALLEL_ADMIT_MIN: usize = 64;

/// Pending tasks plus the bookkeeping guarded by the same lock.
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    pending: Vec<TaskId>,
    /// Mirror of `pending` for constant-time membership.
    queued: HashSet<TaskId>,
    /// Tasks taken off the queue whose callbacks are running.
    pub(crate) running: HashSet<TaskId>,
    /// Events produced under the lock, dispatched once it is released.
    pub(crate) outbox: Vec<EngineEvent>,
    pub(crate) stats: RunStats,
}

impl TaskQueue {
    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.running.len()
    }

    pub(crate) fn contains(&self, id: TaskId) -> bool {
        self.queued.contains(&id)
    }

    pub(crate) fn snapshot(&self) -> Vec<TaskId> {
        self.pending.clone()
    }

    pub(crate) fn take_all(&mut self) -> Vec<TaskId> {
        self.queued.clear();
        std::mem::take(&mut self.pending)
    }

    /// Push `id` if it passes the admission predicate. Does not re-sort.
    pub(crate) fn admit(&mut self, arena: &Arena, id: TaskId) -> bool {
        if !admissible(arena, &self.queued, id) {
            return false;
        }
        self.push(id);
        true
    }

    /// Filter `ids` through the admission predicate (in parallel for large
    /// batches) and append the survivors. Returns the newly queued ids, in
    /// input order. Does not re-sort.
    pub(crate) fn admit_batch(&mut self, arena: &Arena, ids: &[TaskId], threads: usize) -> Vec<TaskId> {
        let threads = if ids.len() < PARALLEL_ADMIT_MIN {
            1
        } else {
            threads
        };

        let queued = &self.queued;
        let survivors = par_filter(ids, threads, |id| admissible(arena, queued, *id));

        let mut admitted = Vec::with_capacity(survivors.len());
        for id in survivors {
            if self.queued.insert(id) {
                self.pending.push(id);
                admitted.push(id);
            }
        }
        admitted
    }

    fn push(&mut self, id: TaskId) {
        if self.queued.insert(id) {
            self.pending.push(id);
        }
    }

    /// Remove every occurrence of `id`.
    pub(crate) fn remove_all(&mut self, id: TaskId) -> usize {
        if !self.queued.remove(&id) {
            return 0;
        }
        let before = self.pending.len();
        self.pending.retain(|t| *t != id);
        before - self.pending.len()
    }

    /// Restore the scheduling order.
    ///
    /// Adjacent pairs are compared and exchanged until no neighbour violates
    /// [`SortKeys::order`]. The comparator is not guaranteed to be transitive,
    /// so the number of passes is bounded by the queue length.
    pub(crate) fn sort(&mut self, arena: &Arena) {
        let n = self.pending.len();
        if n < 2 {
            return;
        }

        let keys = SortKeys::build(arena, &self.pending);
        for _ in 0..n {
            let mut swapped = false;
            for i in 0..n - 1 {
                if keys.order(self.pending[i], self.pending[i + 1]) == Ordering::Greater {
                    self.pending.swap(i, i + 1);
                    swapped = true;
                }
            }
            if !swapped {
                break;
            }
        }
    }
}

/// Not executed, not already queued, and transitively enabled. The cheap
/// flag checks run before the dependency walk.
fn admissible(arena: &Arena, queued: &HashSet<TaskId>, id: TaskId) -> bool {
    let state = match arena.state(id) {
        Ok(state) => state,
        Err(e) => {
            warn!(task = %id, error = %e, "refusing to queue unknown task");
            return false;
        }
    };
    if state.is_executed() || queued.contains(&id) {
        return false;
    }
    match arena.is_enabled(id) {
        Ok(true) => true,
        Ok(false) => {
            debug!(task = %id, "not queued: task or a dependency is disabled");
            false
        }
        Err(_) => false,
    }
}

struct Key {
    executed: bool,
    enabled: bool,
    priority: i16,
    reach: HashSet<TaskId>,
}

/// Per-sort snapshot of everything the comparator looks at, so each task's
/// reachable set is walked once per sort rather than once per comparison.
struct SortKeys {
    keys: HashMap<TaskId, Key>,
}

impl SortKeys {
    fn build(arena: &Arena, ids: &[TaskId]) -> Self {
        let keys = ids
            .iter()
            .filter_map(|id| {
                let state = arena.state(*id).ok()?;
                let reach = arena
                    .reachable(*id)
                    .map(|r| r.into_iter().skip(1).collect())
                    .unwrap_or_default();
                Some((
                    *id,
                    Key {
                        executed: state.is_executed(),
                        enabled: arena.is_enabled(*id).unwrap_or(false),
                        priority: state.priority(),
                        reach,
                    },
                ))
            })
            .collect();
        Self { keys }
    }

    /// `Less` means `a` should be scheduled before `b`. First decisive rule
    /// wins:
    ///
    /// 1. unexecuted before executed
    /// 2. a dependency before its (one-directional) dependent
    /// 3. higher priority before lower
    /// 4. enabled before disabled
    fn order(&self, a: TaskId, b: TaskId) -> Ordering {
        let (ka, kb) = match (self.keys.get(&a), self.keys.get(&b)) {
            (Some(ka), Some(kb)) => (ka, kb),
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (None, None) => return Ordering::Equal,
        };

        if ka.executed != kb.executed {
            return ka.executed.cmp(&kb.executed);
        }

        let a_needs_b = ka.reach.contains(&b);
        let b_needs_a = kb.reach.contains(&a);
        if a_needs_b != b_needs_a {
            return if a_needs_b {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        match kb.priority.cmp(&ka.priority) {
            Ordering::Equal => {}
            decided => return decided,
        }

        kb.enabled.cmp(&ka.enabled)
    }
}
