//! Identity-keyed callback batches.
//!
//! A [`Batch`] holds `(function, context)` pairs and invokes all of them with
//! one shared payload. Entries are identified by the function address and the
//! context allocation, so the same function may be registered once per
//! context and removed by either half of the key.

use std::fmt;
use std::sync::Arc;

use crate::util::par_for_each;

type Call<P> = Arc<dyn Fn(&P) + Send + Sync>;

struct Entry<P> {
    func: usize,
    context: usize,
    call: Call<P>,
}

impl<P> Clone for Entry<P> {
    fn clone(&self) -> Self {
        Self {
            func: self.func,
            context: self.context,
            call: Arc::clone(&self.call),
        }
    }
}

pub struct Batch<P> {
    entries: Vec<Entry<P>>,
}

impl<P> Clone for Batch<P> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<P> Default for Batch<P> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<P> fmt::Debug for Batch<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("entries", &self.entries.len())
            .finish()
    }
}

fn func_key<C, P>(func: fn(&C, &P)) -> usize {
    func as usize
}

fn context_key<C>(context: &Arc<C>) -> usize {
    Arc::as_ptr(context) as *const () as usize
}

impl<P: 'static> Batch<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `func` with `context`. Returns `false` if the exact pair is
    /// already present.
    pub fn add<C>(&mut self, func: fn(&C, &P), context: Arc<C>) -> bool
    where
        C: Send + Sync + 'static,
    {
        let func_id = func_key(func);
        let context_id = context_key(&context);
        if self
            .entries
            .iter()
            .any(|e| e.func == func_id && e.context == context_id)
        {
            return false;
        }

        let call: Call<P> = Arc::new(move |payload: &P| func(&context, payload));
        self.entries.insert(
            0,
            Entry {
                func: func_id,
                context: context_id,
                call,
            },
        );
        true
    }

    pub fn remove<C>(&mut self, func: fn(&C, &P), context: &Arc<C>) -> usize {
        let func_id = func_key(func);
        let context_id = context_key(context);
        self.retain(|e| !(e.func == func_id && e.context == context_id))
    }

    pub fn remove_by_func<C>(&mut self, func: fn(&C, &P)) -> usize {
        let func_id = func_key(func);
        self.retain(|e| e.func != func_id)
    }

    pub fn remove_by_context<C>(&mut self, context: &Arc<C>) -> usize {
        let context_id = context_key(context);
        self.retain(|e| e.context != context_id)
    }

    fn retain(&mut self, keep: impl Fn(&Entry<P>) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| keep(e));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<P: Sync + 'static> Batch<P> {
    /// Invoke every entry with `payload`, spreading entries over `threads`.
    pub fn run(&self, payload: &P, threads: usize) {
        par_for_each(&self.entries, threads, |e| (e.call)(payload));
    }
}
