use thiserror::Error;

use crate::task::TaskId;

/// Errors raised by task graph queries and mutations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphError {
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("task {0} cannot depend on itself")]
    SelfDependency(TaskId),
}
