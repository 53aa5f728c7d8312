//! Concurrent task engine
//!
//! This module runs the tasks of a [`TaskGraph`](crate::task::TaskGraph) on a
//! self-scaling pool of OS threads. It supports:
//! - An ordered pending queue (dependencies first, then priority)
//! - Batched admission filtered in parallel
//! - At-most-once execution per task through a non-blocking claim
//! - Cycle tolerance: mutually dependent queued tasks run in queue order
//! - Pool growth on demand and shrink-to-zero when the queue drains
//! - Retry of panicking callbacks and lifecycle events for subscribers
//!
//! # Architecture
//!
//! ```text
//! TaskEngine::add / add_batch
//!   ↓
//! TaskQueue { pending, running, stats }   (sorted on every admission)
//!   ↓
//! TaskEngine::start(max_workers, wait)
//!   ├─ supervisor: grows the pool to min(max_workers, backlog)
//!   └─ workers: select → claim → run callback → mark executed
//!        ↓ blocked? re-admit unmet dependencies, requeue, re-sort
//!        ↓ queue empty? deregister; the last one stops the engine
//!   ↓
//! RunReport + EngineEvent::Drained
//! ```

mod engine;
mod queue;
mod scheduler;
pub mod types;
mod worker;

pub use engine::TaskEngine;
pub use types::{EngineEvent, RunReport};
