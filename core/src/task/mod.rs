//! Task dependency graph.
//!
//! Tasks live in an arena owned by [`TaskGraph`] and are addressed through
//! copyable [`TaskId`] handles. Each task keeps two mirrored edge lists:
//! `depend` (tasks it needs) and `blocks` (tasks that need it). Adding or
//! removing an edge always updates both sides.
//!
//! ```text
//! depend_add(C, A)      C.depend = [A]      A.blocks = [C]
//! depend_add(C, B)      C.depend = [A, B]   B.blocks = [C]
//!
//! is_enabled(C)   C and every transitive dependency enabled
//! is_ready(C)     C enabled, not executed, A and B executed
//! ```
//!
//! Every transitive query walks iteratively with an explicit frame stack, so
//! cycles and very deep chains are safe to inspect.

mod builder;
mod graph;
mod id;
mod node;
mod walk;

pub use builder::TaskBuilder;
pub use graph::TaskGraph;
pub use id::TaskId;

pub(crate) use graph::Arena;
pub(crate) use node::{Claim, TaskState};
