//! Stable re-exports for consumers.
//!
//! Prefer importing from `taskflow_core::api` instead of reaching into internal modules.

pub use crate::batch::Batch;
pub use crate::config::{load, EngineConfig, LoggingConfig, RetryConfig};
pub use crate::error::{ConfigError, EngineError, GraphError};
pub use crate::executor::{EngineEvent, RunReport, TaskEngine};
pub use crate::task::{TaskBuilder, TaskGraph, TaskId};
pub use crate::util::init_tracing;
