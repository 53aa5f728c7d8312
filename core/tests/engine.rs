mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use common::{counting_task, OrderLog};
use pretty_assertions::assert_eq;
use taskflow_core::{EngineConfig, EngineError, EngineEvent, GraphError, TaskEngine, TaskGraph};

fn config_with_attempts(max_attempts: u32) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry.max_attempts = max_attempts;
    config
}

#[test]
fn every_task_runs_exactly_once_under_contention() {
    let graph = TaskGraph::new();
    let counters: Vec<Arc<AtomicUsize>> = (0..200).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let ids: Vec<_> = counters.iter().map(|c| counting_task(&graph, c)).collect();

    // Every odd task depends on its even neighbour.
    for pair in ids.chunks(2) {
        graph.depend_add(pair[1], pair[0]).unwrap();
    }

    let engine = TaskEngine::new(graph.clone());
    assert_eq!(engine.add_batch(&ids), 200);
    let report = engine.start(8, true).unwrap().unwrap();

    for counter in &counters {
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
    assert_eq!(report.executed.len(), 200);
    assert!(report.peak_workers >= 1 && report.peak_workers <= 8);
    assert!(report.is_clean());
}

#[test]
fn direct_runs_and_engine_never_double_execute() {
    let graph = TaskGraph::new();
    let counters: Vec<Arc<AtomicUsize>> = (0..100).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let ids: Vec<_> = counters.iter().map(|c| counting_task(&graph, c)).collect();

    let engine = TaskEngine::new(graph.clone());
    engine.add_batch(&ids);
    engine.start(4, false).unwrap();

    let direct = {
        let graph = graph.clone();
        let ids = ids.clone();
        thread::spawn(move || ids.iter().filter(|id| graph.run(**id).unwrap()).count())
    };
    let ran_directly = direct.join().unwrap();
    let report = engine.wait().unwrap();

    for counter in &counters {
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
    assert_eq!(ran_directly + report.executed.len(), 100);
}

#[test]
fn queueing_the_tail_of_a_chain_runs_it_in_order() {
    let log = OrderLog::new();
    let graph = TaskGraph::new();
    const TAGS: [&str; 6] = ["t0", "t1", "t2", "t3", "t4", "t5"];
    let ids: Vec<_> = TAGS.into_iter().map(|tag| log.task(&graph, tag, 0)).collect();
    for pair in ids.windows(2) {
        graph.depend_add(pair[1], pair[0]).unwrap();
    }

    let engine = TaskEngine::new(graph);
    assert!(engine.add(ids[5]).unwrap());
    let report = engine.start(3, true).unwrap().unwrap();

    assert_eq!(log.entries(), TAGS.to_vec());
    assert_eq!(report.executed, ids);
    assert!(report.requeues >= 5);
}

#[test]
fn long_chain_queued_from_its_tail_runs_promptly() {
    const LEN: usize = 300;
    let order = Arc::new(Mutex::new(Vec::with_capacity(LEN)));
    let graph = TaskGraph::new();
    let ids: Vec<_> = (0..LEN)
        .map(|n| {
            let order = Arc::clone(&order);
            graph.create(move || order.lock().unwrap().push(n), 0)
        })
        .collect();
    for pair in ids.windows(2) {
        graph.depend_add(pair[1], pair[0]).unwrap();
    }

    let engine = TaskEngine::new(graph);
    assert!(engine.add(ids[LEN - 1]).unwrap());
    let started = Instant::now();
    let report = engine.start(4, true).unwrap().unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_secs(5), "chain took {elapsed:?}");
    assert_eq!(*order.lock().unwrap(), (0..LEN).collect::<Vec<_>>());
    assert_eq!(report.executed, ids);
    // One requeue per link: each blocked entry admits its dependency once.
    assert_eq!(report.requeues, LEN - 1);
}

#[test]
fn dependents_of_a_slow_task_wait_without_requeueing() {
    fn record(seen: &Mutex<Vec<EngineEvent>>, event: &EngineEvent) {
        seen.lock().unwrap().push(event.clone());
    }

    let counter = Arc::new(AtomicUsize::new(0));
    let graph = TaskGraph::new();
    let root = graph.create(|| thread::sleep(Duration::from_millis(300)), 0);
    let mut ids = vec![root];
    for _ in 0..50 {
        let dependent = counting_task(&graph, &counter);
        graph.depend_add(dependent, root).unwrap();
        ids.push(dependent);
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let engine = TaskEngine::new(graph);
    assert!(engine.subscribe(record, Arc::clone(&seen)));
    assert_eq!(engine.add_batch(&ids), 51);
    let report = engine.start(4, true).unwrap().unwrap();

    assert_eq!(report.executed.len(), 51);
    assert_eq!(report.executed[0], root);
    assert_eq!(counter.load(Ordering::SeqCst), 50);
    assert_eq!(report.requeues, 0);
    let requeued = seen
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, EngineEvent::Requeued(_)))
        .count();
    assert_eq!(requeued, 0);
}

#[test]
fn mutually_dependent_tasks_both_run_once() {
    let log = OrderLog::new();
    let graph = TaskGraph::new();
    let a = log.task(&graph, "a", 0);
    let b = log.task(&graph, "b", 0);
    graph.depend_add(a, b).unwrap();
    graph.depend_add(b, a).unwrap();

    let engine = TaskEngine::new(graph.clone());
    engine.add(a).unwrap();
    let report = engine.start(2, true).unwrap().unwrap();

    assert_eq!(log.count("a"), 1);
    assert_eq!(log.count("b"), 1);
    assert_eq!(report.executed.len(), 2);
    assert!(report.stalled.is_empty());
}

#[test]
fn single_worker_runs_higher_priority_first() {
    let log = OrderLog::new();
    let graph = TaskGraph::new();
    let low = log.task(&graph, "low", -3);
    let mid = log.task(&graph, "mid", 0);
    let high = log.task(&graph, "high", 7);

    let engine = TaskEngine::new(graph);
    engine.add_batch(&[low, mid, high]);
    assert_eq!(engine.queued(), vec![high, mid, low]);

    engine.start(1, true).unwrap();
    assert_eq!(log.entries(), vec!["high", "mid", "low"]);
}

#[test]
fn worker_pool_never_exceeds_its_bound() {
    let graph = TaskGraph::new();
    let live = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let ids: Vec<_> = (0..32)
        .map(|_| {
            let (live, peak) = (Arc::clone(&live), Arc::clone(&peak));
            graph.create(
                move || {
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(2));
                    live.fetch_sub(1, Ordering::SeqCst);
                },
                0,
            )
        })
        .collect();

    let engine = TaskEngine::new(graph);
    engine.add_batch(&ids);
    let report = engine.start(4, true).unwrap().unwrap();

    assert!(peak.load(Ordering::SeqCst) <= 4);
    assert!(report.peak_workers <= 4);
    assert_eq!(report.executed.len(), 32);
}

#[test]
fn panicking_task_is_retried_until_it_succeeds() {
    let graph = TaskGraph::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let flaky = {
        let calls = Arc::clone(&calls);
        graph.create(
            move || {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    panic!("transient failure");
                }
            },
            0,
        )
    };

    let engine = TaskEngine::with_config(graph.clone(), config_with_attempts(3));
    engine.add(flaky).unwrap();
    let report = engine.start(2, true).unwrap().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(graph.is_executed(flaky).unwrap());
    assert_eq!(report.executed, vec![flaky]);
    assert_eq!(report.requeues, 2);
    assert!(report.failed.is_empty());
}

#[test]
fn exhausted_task_is_disabled_and_its_dependent_dropped() {
    let log = OrderLog::new();
    let graph = TaskGraph::new();
    let broken = graph.create(|| panic!("always fails"), 0);
    let after = log.task(&graph, "after", 0);
    graph.depend_add(after, broken).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let engine = TaskEngine::with_config(graph.clone(), config_with_attempts(2));
    engine.subscribe(
        |seen: &Mutex<Vec<EngineEvent>>, event: &EngineEvent| seen.lock().unwrap().push(event.clone()),
        Arc::clone(&seen),
    );
    engine.add(after).unwrap();
    let report = engine.start(2, true).unwrap().unwrap();

    assert_eq!(report.failed, vec![broken]);
    assert!(report.executed.is_empty());
    assert!(log.entries().is_empty());
    assert!(!graph.is_enabled(broken).unwrap());
    assert!(!graph.is_executed(after).unwrap());
    assert!(seen.lock().unwrap().contains(&EngineEvent::Failed {
        task: broken,
        attempts: 2,
    }));
}

#[test]
fn background_run_can_be_waited_on() {
    let counter = Arc::new(AtomicUsize::new(0));
    let graph = TaskGraph::new();
    let ids: Vec<_> = (0..10).map(|_| counting_task(&graph, &counter)).collect();

    let engine = TaskEngine::new(graph);
    engine.add_batch(&ids);
    assert!(engine.start(3, false).unwrap().is_none());

    let report = engine.wait().unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 10);
    assert_eq!(report.executed.len(), 10);
    assert!(!engine.is_running());
    assert_eq!(engine.worker_count(), 0);
}

#[test]
fn start_rejects_zero_workers_and_double_start() {
    let graph = TaskGraph::new();
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let started_tx = Mutex::new(started_tx);
    let release_rx = Mutex::new(release_rx);
    let gate = graph.create(
        move || {
            started_tx.lock().unwrap().send(()).unwrap();
            release_rx.lock().unwrap().recv().unwrap();
        },
        0,
    );

    let engine = TaskEngine::new(graph);
    assert!(matches!(engine.start(0, false), Err(EngineError::InvalidWorkerCount)));

    engine.add(gate).unwrap();
    engine.start(1, false).unwrap();
    started_rx.recv().unwrap();

    assert!(engine.is_running());
    assert!(matches!(engine.start(2, true), Err(EngineError::AlreadyRunning)));

    release_tx.send(()).unwrap();
    let report = engine.wait().unwrap();
    assert_eq!(report.executed, vec![gate]);
}

#[test]
fn stop_leaves_unstarted_tasks_queued() {
    let log = OrderLog::new();
    let graph = TaskGraph::new();
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let started_tx = Mutex::new(started_tx);
    let release_rx = Mutex::new(release_rx);
    let first = graph.create(
        move || {
            started_tx.lock().unwrap().send(()).unwrap();
            release_rx.lock().unwrap().recv().unwrap();
        },
        100,
    );
    let rest: Vec<_> = ["r1", "r2", "r3"].into_iter().map(|t| log.task(&graph, t, 0)).collect();

    let engine = TaskEngine::new(graph.clone());
    engine.add(first).unwrap();
    engine.add_batch(&rest);
    engine.start(1, false).unwrap();
    started_rx.recv().unwrap();

    engine.stop(false).unwrap();
    release_tx.send(()).unwrap();
    engine.stop(true).unwrap();

    assert!(graph.is_executed(first).unwrap());
    assert!(log.entries().is_empty());
    assert_eq!(engine.pending_len(), 3);

    // A later run picks the remainder up.
    let report = engine.start(2, true).unwrap().unwrap();
    assert_eq!(report.executed.len(), 3);
    assert_eq!(engine.pending_len(), 0);
}

#[test]
fn events_bracket_the_run() {
    fn record(seen: &Mutex<Vec<EngineEvent>>, event: &EngineEvent) {
        seen.lock().unwrap().push(event.clone());
    }

    let log = OrderLog::new();
    let graph = TaskGraph::new();
    let ids: Vec<_> = ["a", "b", "c"].into_iter().map(|t| log.task(&graph, t, 0)).collect();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let engine = TaskEngine::new(graph);
    assert!(engine.subscribe(record, Arc::clone(&seen)));
    assert!(!engine.subscribe(record, Arc::clone(&seen)));

    engine.add_batch(&ids);
    engine.start(1, true).unwrap();

    let events = seen.lock().unwrap().clone();
    assert_eq!(events.first(), Some(&EngineEvent::Started { max_workers: 1 }));
    assert_eq!(
        events.last(),
        Some(&EngineEvent::Drained {
            executed: 3,
            failed: 0,
            stalled: 0,
        })
    );
    let completed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Completed(id) => Some(*id),
            _ => None,
        })
        .collect();
    assert_eq!(completed, ids);

    assert_eq!(engine.unsubscribe(record, &seen), 1);
    assert_eq!(engine.unsubscribe_func(record), 0);
}

#[test]
fn queue_removal_and_stale_handles() {
    let graph = TaskGraph::new();
    let a = graph.create(|| {}, 0);
    let b = graph.create(|| {}, 0);
    let gone = graph.create(|| {}, 0);
    graph.remove(gone).unwrap();

    let engine = TaskEngine::new(graph);
    assert!(matches!(
        engine.add(gone),
        Err(EngineError::Graph(GraphError::UnknownTask(id))) if id == gone
    ));
    assert_eq!(engine.add_batch(&[a, b, gone]), 2);

    assert!(engine.is_queued(a));
    assert_eq!(engine.remove(a), 1);
    assert_eq!(engine.remove(a), 0);
    assert_eq!(engine.remove_batch(&[a, b]), 1);
    assert_eq!(engine.pending_len(), 0);
}
