use super::graph::TaskGraph;
use super::id::TaskId;
use super::node::Callback;
use crate::error::GraphError;

/// Fluent construction of a task and its dependency edges.
///
/// ```
/// use taskflow_core::task::TaskGraph;
///
/// let graph = TaskGraph::new();
/// let fetch = graph.create(|| println!("fetch"), 0);
/// let build = graph
///     .task(|| println!("build"))
///     .name("build")
///     .priority(5)
///     .depends_on(&[fetch])
///     .create()
///     .unwrap();
/// assert!(graph.is_dependent(build, fetch).unwrap());
/// ```
pub struct TaskBuilder<'g> {
    graph: &'g TaskGraph,
    callback: Callback,
    priority: i16,
    name: Option<String>,
    depends: Vec<TaskId>,
}

impl<'g> TaskBuilder<'g> {
    pub(crate) fn new(graph: &'g TaskGraph, callback: Callback) -> Self {
        Self {
            graph,
            callback,
            priority: 0,
            name: None,
            depends: Vec::new(),
        }
    }

    pub fn priority(mut self, priority: i16) -> Self {
        self.priority = priority;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn depends_on(mut self, deps: &[TaskId]) -> Self {
        self.depends.extend_from_slice(deps);
        self
    }

    /// Insert the task and wire its dependencies atomically.
    ///
    /// An unknown dependency leaves the graph untouched.
    pub fn create(self) -> Result<TaskId, GraphError> {
        self.graph
            .insert_with_deps(self.callback, self.priority, self.name, &self.depends)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builder_sets_fields_and_edges() {
        let g = TaskGraph::new();
        let a = g.create(|| {}, 0);
        let b = g.create(|| {}, 0);
        let c = g
            .task(|| {})
            .name("c")
            .priority(-3)
            .depends_on(&[a, b])
            .create()
            .unwrap();

        assert_eq!(g.name(c).unwrap().as_deref(), Some("c"));
        assert_eq!(g.priority(c).unwrap(), -3);
        assert_eq!(g.dependencies(c).unwrap(), vec![a, b]);
        assert_eq!(g.dependents(a).unwrap(), vec![c]);
    }

    #[test]
    fn unknown_dependency_leaves_graph_untouched() {
        let g = TaskGraph::new();
        let gone = g.create(|| {}, 0);
        g.remove(gone).unwrap();

        let err = g.task(|| {}).depends_on(&[gone]).create().unwrap_err();
        assert_eq!(err, GraphError::UnknownTask(gone));
        assert!(g.is_empty());
    }

    #[test]
    fn concurrent_dependency_removal_never_leaves_a_partial_task() {
        let g = TaskGraph::new();
        for _ in 0..200 {
            let dep = g.create(|| {}, 0);
            let remover = {
                let g = g.clone();
                std::thread::spawn(move || g.remove(dep).unwrap())
            };
            let created = g.task(|| {}).depends_on(&[dep, dep]).create();
            remover.join().unwrap();

            match created {
                Ok(id) => {
                    // Created first: the removal then severed both edges.
                    assert_eq!(g.len(), 1);
                    assert!(g.dependencies(id).unwrap().is_empty());
                    g.remove(id).unwrap();
                }
                Err(e) => {
                    assert_eq!(e, GraphError::UnknownTask(dep));
                    assert!(g.is_empty());
                }
            }
        }
    }
}
