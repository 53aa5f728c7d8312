//! Dependency-aware task graph with a self-scaling thread-pool scheduler.
//!
//! Build a [`TaskGraph`], queue tasks on a [`TaskEngine`], and start it. See
//! [`api`] for the stable surface.

pub mod api;
pub mod batch;
pub mod config;
pub mod error;
pub mod executor;
pub mod task;
pub mod util;

pub use api::*;
