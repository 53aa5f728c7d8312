use std::fmt;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use super::builder::TaskBuilder;
use super::id::TaskId;
use super::node::{Callback, Node, TaskState};
use super::walk::{self, Edge, Flow};
use crate::error::GraphError;

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Slot storage behind the graph lock.
///
/// Queries live here so the engine can answer several of them under one
/// read guard.
#[derive(Default)]
pub(crate) struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    /// Tasks on a cycle; computed on demand, dropped by every edge change.
    cyclic: OnceLock<HashSet<TaskId>>,
}

impl Arena {
    pub(crate) fn node(&self, id: TaskId) -> Result<&Node, GraphError> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_ref())
            .ok_or(GraphError::UnknownTask(id))
    }

    fn node_mut(&mut self, id: TaskId) -> Result<&mut Node, GraphError> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_mut())
            .ok_or(GraphError::UnknownTask(id))
    }

    pub(crate) fn state(&self, id: TaskId) -> Result<&Arc<TaskState>, GraphError> {
        Ok(&self.node(id)?.state)
    }

    pub(crate) fn contains(&self, id: TaskId) -> bool {
        self.node(id).is_ok()
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.node
                .as_ref()
                .map(|_| TaskId::new(index as u32, slot.generation))
        })
    }

    /// Whether `id` lies on a dependency cycle. Amortised O(1) between edge
    /// changes.
    pub(crate) fn on_cycle(&self, id: TaskId) -> bool {
        self.cyclic
            .get_or_init(|| walk::cyclic_tasks(self))
            .contains(&id)
    }

    /// `id` followed by every task it transitively depends on.
    pub(crate) fn reachable(&self, id: TaskId) -> Result<Vec<TaskId>, GraphError> {
        let mut order = walk::collect(self, id)?;
        order.reverse();
        Ok(order)
    }

    fn insert(&mut self, state: TaskState) -> TaskId {
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(Node::new(state));
                TaskId::new(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(Node::new(state)),
                });
                TaskId::new(index, 0)
            }
        }
    }

    fn depend_add(&mut self, target: TaskId, dep: TaskId) -> Result<(), GraphError> {
        if target == dep {
            self.node(target)?;
            return Err(GraphError::SelfDependency(target));
        }
        self.node(dep)?;
        self.node_mut(target)?.depend.push(dep);
        self.node_mut(dep)?.blocks.push(target);
        self.cyclic = OnceLock::new();
        Ok(())
    }

    fn depend_del(&mut self, target: TaskId, dep: TaskId) -> Result<usize, GraphError> {
        self.node(dep)?;
        let t = self.node_mut(target)?;
        let before = t.depend.len();
        t.depend.retain(|d| *d != dep);
        let removed = before - t.depend.len();

        self.node_mut(dep)?.blocks.retain(|b| *b != target);
        self.cyclic = OnceLock::new();
        Ok(removed)
    }

    /// Sever every edge of `id` in both directions, then free its slot.
    fn remove(&mut self, id: TaskId) -> Result<(), GraphError> {
        let (depend, blocks) = {
            let node = self.node(id)?;
            node.state.set_enabled(false);
            (node.depend.clone(), node.blocks.clone())
        };

        for dep in depend {
            self.depend_del(id, dep)?;
        }
        for dependent in blocks {
            self.depend_del(dependent, id)?;
        }

        let slot = &mut self.slots[id.index()];
        slot.node = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index() as u32);
        self.live -= 1;
        Ok(())
    }

    /// True iff `id` and everything it transitively depends on is enabled.
    pub(crate) fn is_enabled(&self, id: TaskId) -> Result<bool, GraphError> {
        if !self.state(id)?.is_enabled() {
            return Ok(false);
        }
        let stopped = walk::walk(
            self,
            id,
            |_, _, _| Flow::Continue,
            |_, node| {
                if node.state.is_enabled() {
                    Flow::Continue
                } else {
                    Flow::Stop
                }
            },
        )?;
        Ok(!stopped)
    }

    pub(crate) fn has_circular_dependency(&self, id: TaskId) -> Result<bool, GraphError> {
        walk::walk(
            self,
            id,
            |_, _, kind| {
                if kind == Edge::OnStack {
                    Flow::Stop
                } else {
                    Flow::Continue
                }
            },
            |_, _| Flow::Continue,
        )
    }

    /// True iff `target` is reachable from `start` over one or more edges.
    pub(crate) fn is_dependent(&self, start: TaskId, target: TaskId) -> Result<bool, GraphError> {
        self.node(target)?;
        walk::walk(
            self,
            start,
            |_, to, _| {
                if to == target {
                    Flow::Stop
                } else {
                    Flow::Continue
                }
            },
            |_, _| Flow::Continue,
        )
    }

    /// Direct-edge readiness: enabled, not executed, every dependency executed.
    pub(crate) fn is_ready(&self, id: TaskId) -> Result<bool, GraphError> {
        let node = self.node(id)?;
        if !node.state.is_enabled() || node.state.is_executed() {
            return Ok(false);
        }
        for dep in &node.depend {
            if !self.state(*dep)?.is_executed() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn reset_tree(&self, id: TaskId) -> Result<usize, GraphError> {
        let mut count = 0;
        walk::walk(
            self,
            id,
            |_, _, _| Flow::Continue,
            |_, node| {
                node.state.reset();
                count += 1;
                Flow::Continue
            },
        )?;
        Ok(count)
    }
}

/// Arena-backed dependency graph of tasks.
///
/// Cloning is cheap and yields another handle to the same graph, which is how
/// a [`TaskEngine`](crate::executor::TaskEngine) shares it with its workers.
/// Task lifetime is managed here, never by the engine.
#[derive(Clone, Default)]
pub struct TaskGraph {
    arena: Arc<RwLock<Arena>>,
}

impl fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGraph").field("len", &self.len()).finish()
    }
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Arena> {
        self.arena.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arena> {
        self.arena.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a task. The callback owns (or shares) whatever context it needs.
    pub fn create<F>(&self, callback: F, priority: i16) -> TaskId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.insert(Box::new(callback), priority, None)
    }

    /// Start building a task with a name, priority and dependencies.
    pub fn task<F>(&self, callback: F) -> TaskBuilder<'_>
    where
        F: Fn() + Send + Sync + 'static,
    {
        TaskBuilder::new(self, Box::new(callback))
    }

    pub(crate) fn insert(&self, callback: Callback, priority: i16, name: Option<String>) -> TaskId {
        let id = self
            .write()
            .insert(TaskState::new(callback, priority, name));
        debug!(task = %id, priority, "task created");
        id
    }

    /// Insert a task already wired to `deps`, all under one write lock, so a
    /// concurrent removal can never leave it half connected.
    pub(crate) fn insert_with_deps(
        &self,
        callback: Callback,
        priority: i16,
        name: Option<String>,
        deps: &[TaskId],
    ) -> Result<TaskId, GraphError> {
        let mut arena = self.write();
        for dep in deps {
            arena.node(*dep)?;
        }

        let id = arena.insert(TaskState::new(callback, priority, name));
        for dep in deps {
            arena.depend_add(id, *dep)?;
        }
        debug!(task = %id, priority, deps = deps.len(), "task created");
        Ok(id)
    }

    /// Destroy a task, severing every edge that touches it. Dependencies and
    /// dependents are left in place.
    pub fn remove(&self, id: TaskId) -> Result<(), GraphError> {
        self.write().remove(id)?;
        debug!(task = %id, "task removed");
        Ok(())
    }

    /// Destroy a task together with everything it transitively depends on.
    ///
    /// Returns the number of tasks removed.
    pub fn remove_tree(&self, id: TaskId) -> Result<usize, GraphError> {
        let mut arena = self.write();
        let doomed = walk::collect(&arena, id)?;
        for task in &doomed {
            arena.remove(*task)?;
        }
        Ok(doomed.len())
    }

    /// Make `target` depend on `dep`. Duplicate edges are kept.
    pub fn depend_add(&self, target: TaskId, dep: TaskId) -> Result<(), GraphError> {
        self.write().depend_add(target, dep)
    }

    /// Remove every `target -> dep` edge, returning how many were removed.
    pub fn depend_del(&self, target: TaskId, dep: TaskId) -> Result<usize, GraphError> {
        self.write().depend_del(target, dep)
    }

    /// Checks the task's own flag and, iteratively, every transitive
    /// dependency's flag.
    ///
    /// # Time Complexity
    ///
    /// O(V + E) over the reachable subgraph
    pub fn is_enabled(&self, id: TaskId) -> Result<bool, GraphError> {
        self.read().is_enabled(id)
    }

    /// Detect a cycle reachable from `id`.
    ///
    /// # Time Complexity
    ///
    /// O(V + E) over the reachable subgraph
    pub fn has_circular_dependency(&self, id: TaskId) -> Result<bool, GraphError> {
        self.read().has_circular_dependency(id)
    }

    /// Does `start` (transitively) depend on `target`?
    pub fn is_dependent(&self, start: TaskId, target: TaskId) -> Result<bool, GraphError> {
        self.read().is_dependent(start, target)
    }

    pub fn is_ready(&self, id: TaskId) -> Result<bool, GraphError> {
        self.read().is_ready(id)
    }

    /// Set the task's own flag; dependents pick the change up through
    /// [`is_enabled`](Self::is_enabled).
    pub fn set_enabled(&self, id: TaskId, value: bool) -> Result<(), GraphError> {
        self.read().state(id)?.set_enabled(value);
        Ok(())
    }

    pub fn enable(&self, id: TaskId) -> Result<(), GraphError> {
        self.set_enabled(id, true)
    }

    pub fn disable(&self, id: TaskId) -> Result<(), GraphError> {
        self.set_enabled(id, false)
    }

    pub fn reset(&self, id: TaskId) -> Result<(), GraphError> {
        self.read().state(id)?.reset();
        Ok(())
    }

    /// Reset `id` and every transitive dependency. Returns how many tasks
    /// were reset.
    pub fn reset_tree(&self, id: TaskId) -> Result<usize, GraphError> {
        self.read().reset_tree(id)
    }

    /// Run the task on the calling thread if it is ready and nobody else holds
    /// its execution claim.
    ///
    /// `Ok(false)` means "not runnable yet" and leaves the task untouched. A
    /// panicking callback unwinds to the caller with the claim released and
    /// the task still unexecuted.
    pub fn run(&self, id: TaskId) -> Result<bool, GraphError> {
        let state = {
            let arena = self.read();
            if !arena.is_ready(id)? {
                return Ok(false);
            }
            Arc::clone(arena.state(id)?)
        };

        let Some(_claim) = state.try_claim() else {
            return Ok(false);
        };
        if state.is_executed() {
            return Ok(false);
        }

        state.invoke();
        state.mark_executed();
        Ok(true)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.read().contains(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dependencies(&self, id: TaskId) -> Result<Vec<TaskId>, GraphError> {
        Ok(self.read().node(id)?.depend.clone())
    }

    pub fn dependents(&self, id: TaskId) -> Result<Vec<TaskId>, GraphError> {
        Ok(self.read().node(id)?.blocks.clone())
    }

    pub fn priority(&self, id: TaskId) -> Result<i16, GraphError> {
        Ok(self.read().state(id)?.priority())
    }

    pub fn is_executed(&self, id: TaskId) -> Result<bool, GraphError> {
        Ok(self.read().state(id)?.is_executed())
    }

    pub fn name(&self, id: TaskId) -> Result<Option<String>, GraphError> {
        Ok(self.read().state(id)?.name().map(str::to_string))
    }
}
