#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use taskflow_core::{TaskGraph, TaskId};

/// Shared execution-order log written by task callbacks.
#[derive(Clone, Default)]
pub struct OrderLog {
    entries: Arc<Mutex<Vec<&'static str>>>,
}

impl OrderLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<&'static str> {
        self.entries.lock().unwrap().clone()
    }

    pub fn position(&self, tag: &str) -> Option<usize> {
        self.entries().iter().position(|t| *t == tag)
    }

    pub fn count(&self, tag: &str) -> usize {
        self.entries().iter().filter(|t| **t == tag).count()
    }

    /// A task that appends `tag` to this log when it runs.
    pub fn task(&self, graph: &TaskGraph, tag: &'static str, priority: i16) -> TaskId {
        let entries = Arc::clone(&self.entries);
        graph
            .task(move || entries.lock().unwrap().push(tag))
            .name(tag)
            .priority(priority)
            .create()
            .unwrap()
    }
}

/// A task that bumps `counter` each time it runs.
pub fn counting_task(graph: &TaskGraph, counter: &Arc<AtomicUsize>) -> TaskId {
    let counter = Arc::clone(counter);
    graph.create(
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        0,
    )
}

/// Graph for the three-task diamond: C depends on A and B.
pub fn diamond(log: &OrderLog) -> (TaskGraph, TaskId, TaskId, TaskId) {
    let graph = TaskGraph::new();
    let a = log.task(&graph, "A", 0);
    let b = log.task(&graph, "B", 0);
    let c = log.task(&graph, "C", 0);
    graph.depend_add(c, a).unwrap();
    graph.depend_add(c, b).unwrap();
    (graph, a, b, c)
}
