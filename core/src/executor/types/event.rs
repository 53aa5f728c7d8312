use crate::task::TaskId;

/// Lifecycle notifications delivered to engine subscribers.
///
/// Subscribers run on engine threads after every engine lock has been
/// released, so they may call back into the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A run began with the given worker bound.
    Started { max_workers: usize },

    /// The task's callback returned and the task is marked executed.
    Completed(TaskId),

    /// The task was not runnable yet and went back into the queue.
    Requeued(TaskId),

    /// The task's callback panicked on its final permitted attempt. The task
    /// has been disabled.
    Failed { task: TaskId, attempts: u32 },

    /// The last worker exited, either because the queue drained or because
    /// the engine was stopped.
    Drained {
        executed: usize,
        failed: usize,
        stalled: usize,
    },
}
