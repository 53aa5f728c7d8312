use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use super::id::TaskId;

pub(crate) type Callback = Box<dyn Fn() + Send + Sync>;

/// Shared per-task state. Flags are atomics so workers can inspect and flip
/// them without holding the graph lock.
pub(crate) struct TaskState {
    callback: Callback,
    name: Option<String>,
    priority: i16,
    enabled: AtomicBool,
    executed: AtomicBool,
    claimed: AtomicBool,
    attempts: AtomicU32,
}

impl TaskState {
    pub(crate) fn new(callback: Callback, priority: i16, name: Option<String>) -> Self {
        Self {
            callback,
            name,
            priority,
            enabled: AtomicBool::new(true),
            executed: AtomicBool::new(false),
            claimed: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
        }
    }

    pub(crate) fn priority(&self) -> i16 {
        self.priority
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn set_enabled(&self, value: bool) {
        self.enabled.store(value, Ordering::Release);
    }

    pub(crate) fn is_executed(&self) -> bool {
        self.executed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_executed(&self) {
        self.executed.store(true, Ordering::Release);
    }

    pub(crate) fn reset(&self) {
        self.executed.store(false, Ordering::Release);
        self.attempts.store(0, Ordering::Release);
    }

    pub(crate) fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Non-blocking acquisition of the execution claim.
    pub(crate) fn try_claim(self: &Arc<Self>) -> Option<Claim> {
        self.claimed
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Claim {
                state: Arc::clone(self),
            })
    }

    /// Record one more callback attempt, returning the new total.
    pub(crate) fn bump_attempts(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn invoke(&self) {
        (self.callback)()
    }
}

impl fmt::Debug for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskState")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("enabled", &self.is_enabled())
            .field("executed", &self.is_executed())
            .field("claimed", &self.is_claimed())
            .finish()
    }
}

/// Held execution claim; released on drop.
#[derive(Debug)]
pub(crate) struct Claim {
    state: Arc<TaskState>,
}

impl Claim {
    pub(crate) fn state(&self) -> &Arc<TaskState> {
        &self.state
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.state.claimed.store(false, Ordering::Release);
    }
}

/// Arena entry: shared state plus the two mirrored edge lists.
#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) state: Arc<TaskState>,
    pub(crate) depend: Vec<TaskId>,
    pub(crate) blocks: Vec<TaskId>,
}

impl Node {
    pub(crate) fn new(state: TaskState) -> Self {
        Self {
            state: Arc::new(state),
            depend: Vec::new(),
            blocks: Vec::new(),
        }
    }
}
