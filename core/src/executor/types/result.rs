use std::time::{Duration, Instant};

use crate::task::TaskId;

/// Outcome of one engine run (from `start` until the last worker exits)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Tasks whose callbacks completed, in completion order
    pub executed: Vec<TaskId>,

    /// Tasks disabled after exhausting their attempts
    pub failed: Vec<TaskId>,

    /// Tasks left queued that could never become runnable
    pub stalled: Vec<TaskId>,

    /// Number of times a task went back into the queue
    pub requeues: usize,

    /// Largest number of simultaneously registered workers
    pub peak_workers: usize,

    /// Wall time from start until the last worker exited
    pub elapsed: Duration,
}

impl RunReport {
    /// No failures and nothing stalled.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.stalled.is_empty()
    }
}

/// Running counters kept under the queue lock.
#[derive(Debug, Clone, Default)]
pub(crate) struct RunStats {
    pub(crate) report: RunReport,
    started_at: Option<Instant>,
}

impl RunStats {
    pub(crate) fn begin() -> Self {
        Self {
            report: RunReport::default(),
            started_at: Some(Instant::now()),
        }
    }

    pub(crate) fn finish(&mut self) {
        if let Some(started) = self.started_at {
            self.report.elapsed = started.elapsed();
        }
    }
}
