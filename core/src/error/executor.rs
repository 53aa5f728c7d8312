use thiserror::Error;

use super::graph::GraphError;

/// Engine-specific errors for admission and lifecycle control
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine is already running")]
    AlreadyRunning,

    #[error("max_workers must be at least 1")]
    InvalidWorkerCount,

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("{0} engine thread(s) panicked")]
    WorkerPanicked(usize),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
