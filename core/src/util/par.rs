//! Data-parallel helpers over a dedicated rayon pool.
//!
//! Each call builds a pool of exactly `threads` workers and runs the
//! iteration inside it, so admission filtering never competes with the
//! global rayon pool. `threads <= 1` (or a pool that fails to build) runs
//! inline on the caller.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::warn;

fn pool(threads: usize) -> Option<ThreadPool> {
    match ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("taskflow-par-{i}"))
        .build()
    {
        Ok(pool) => Some(pool),
        Err(e) => {
            warn!(error = %e, threads, "could not build parallel pool; running inline");
            None
        }
    }
}

/// Invoke `f` once for every item using up to `threads` threads.
pub fn par_for_each<T, F>(items: &[T], threads: usize, f: F)
where
    T: Sync,
    F: Fn(&T) + Sync + Send,
{
    let threads = threads.min(items.len());
    match (threads > 1).then(|| pool(threads)).flatten() {
        Some(pool) => pool.install(|| items.par_iter().for_each(|item| f(item))),
        None => items.iter().for_each(f),
    }
}

/// Return clones of the items matching `pred`, in input order.
pub fn par_filter<T, F>(items: &[T], threads: usize, pred: F) -> Vec<T>
where
    T: Sync + Send + Clone,
    F: Fn(&T) -> bool + Sync + Send,
{
    let threads = threads.min(items.len());
    match (threads > 1).then(|| pool(threads)).flatten() {
        Some(pool) => pool.install(|| {
            items
                .par_iter()
                .filter(|item| pred(*item))
                .cloned()
                .collect()
        }),
        None => items.iter().filter(|item| pred(*item)).cloned().collect(),
    }
}
