//! Lazy Completion
//!
//! Materialization of lazy groups and graphs:
//!
//! - `Completion`: shared promise of a node's contents, with listeners.
//! - `LazySlot`: per-node single-flight state. Its lock only covers the
//!   lookup-or-insert of the in-flight completion, never the load itself.
//! - `Executor`: where completion tasks run (a rayon pool by default).
//!
//! A slot holds its contents weakly. Once every user drops them the node
//! is back to `Pending` and the next request parses the region again.

mod context;

pub use context::{LoadContext, LoadStats, StatsSnapshot};
pub(crate) use context::ReleaseGuard;

use crate::error::{Error, Result};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Pending,
    Loading,
    Complete,
    Failed,
}

// ============================================================================
// Executors
// ============================================================================

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs completion tasks.
pub trait Executor: Send + Sync {
    fn execute(&self, task: Task);
}

impl Executor for rayon::ThreadPool {
    fn execute(&self, task: Task) {
        self.spawn(task);
    }
}

/// The global rayon pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalPool;

impl Executor for GlobalPool {
    fn execute(&self, task: Task) {
        rayon::spawn(task);
    }
}

/// Runs tasks on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct Inline;

impl Executor for Inline {
    fn execute(&self, task: Task) {
        task();
    }
}

// ============================================================================
// Completion
// ============================================================================

pub type CompletionListener<T> = Box<dyn FnOnce(&Result<Arc<T>>) + Send>;

struct CompletionState<T> {
    result: Option<Result<Arc<T>>>,
    listeners: Vec<CompletionListener<T>>,
}

struct CompletionInner<T> {
    state: Mutex<CompletionState<T>>,
    ready: Condvar,
}

/// Shared handle on the outcome of one load.
pub struct Completion<T> {
    inner: Arc<CompletionInner<T>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Completion {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("done", &self.is_done())
            .finish()
    }
}

impl<T> Completion<T> {
    pub(crate) fn pending() -> Self {
        Completion {
            inner: Arc::new(CompletionInner {
                state: Mutex::new(CompletionState {
                    result: None,
                    listeners: Vec::new(),
                }),
                ready: Condvar::new(),
            }),
        }
    }

    pub(crate) fn resolved(result: Result<Arc<T>>) -> Self {
        let completion = Self::pending();
        completion.resolve(result);
        completion
    }

    fn lock(&self) -> MutexGuard<'_, CompletionState<T>> {
        self.inner.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Settle the completion. Later calls are ignored.
    pub(crate) fn resolve(&self, result: Result<Arc<T>>) {
        let listeners = {
            let mut state = self.lock();
            if state.result.is_some() {
                return;
            }
            state.result = Some(result.clone());
            self.inner.ready.notify_all();
            std::mem::take(&mut state.listeners)
        };
        for listener in listeners {
            listener(&result);
        }
    }

    pub fn is_done(&self) -> bool {
        self.lock().result.is_some()
    }

    /// Outcome if already settled.
    pub fn try_get(&self) -> Option<Result<Arc<T>>> {
        self.lock().result.clone()
    }

    /// Block until settled.
    pub fn wait(&self) -> Result<Arc<T>> {
        let mut state = self.lock();
        loop {
            if let Some(result) = &state.result {
                return result.clone();
            }
            state = self
                .inner
                .ready
                .wait(state)
                .unwrap_or_else(|p| p.into_inner());
        }
    }

    /// Block until settled or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Arc<T>>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(result) = &state.result {
                return Some(result.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = match self.inner.ready.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(p) => p.into_inner().0,
            };
        }
    }

    /// Call `listener` once when settled (immediately if already settled).
    pub fn on_complete(&self, listener: impl FnOnce(&Result<Arc<T>>) + Send + 'static) {
        let result = {
            let mut state = self.lock();
            match &state.result {
                Some(result) => result.clone(),
                None => {
                    state.listeners.push(Box::new(listener));
                    return;
                }
            }
        };
        listener(&result);
    }

    /// True if both handles refer to the same load.
    pub fn same_load(&self, other: &Completion<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

// ============================================================================
// Single-flight slot
// ============================================================================

struct SlotState<T> {
    complete: Weak<T>,
    inflight: Option<Completion<T>>,
    failure: Option<Error>,
}

pub(crate) struct LazySlot<T> {
    state: Mutex<SlotState<T>>,
}

/// Result of asking a slot for its contents.
pub(crate) enum Begin<T> {
    /// Contents are alive; the handle is already resolved.
    Ready(Completion<T>),
    /// Another caller is loading; share its handle.
    Joined(Completion<T>),
    /// The caller must run the load and `finish` the handle.
    Started(Completion<T>),
}

impl<T> Default for LazySlot<T> {
    fn default() -> Self {
        LazySlot {
            state: Mutex::new(SlotState {
                complete: Weak::new(),
                inflight: None,
                failure: None,
            }),
        }
    }
}

impl<T> LazySlot<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn current(&self) -> Option<Arc<T>> {
        self.lock().complete.upgrade()
    }

    pub(crate) fn status(&self) -> LoadStatus {
        let state = self.lock();
        if state.complete.strong_count() > 0 {
            LoadStatus::Complete
        } else if state.inflight.is_some() {
            LoadStatus::Loading
        } else if state.failure.is_some() {
            LoadStatus::Failed
        } else {
            LoadStatus::Pending
        }
    }

    /// Record contents built elsewhere (by the scanner).
    pub(crate) fn install(&self, contents: &Arc<T>) {
        let mut state = self.lock();
        state.complete = Arc::downgrade(contents);
        state.failure = None;
    }

    pub(crate) fn begin(&self) -> Begin<T> {
        let mut state = self.lock();
        if let Some(contents) = state.complete.upgrade() {
            return Begin::Ready(Completion::resolved(Ok(contents)));
        }
        if let Some(handle) = &state.inflight {
            return Begin::Joined(handle.clone());
        }
        let handle = Completion::pending();
        state.inflight = Some(handle.clone());
        state.failure = None;
        Begin::Started(handle)
    }

    /// Publish the outcome of the load started for `handle`.
    pub(crate) fn finish(&self, handle: &Completion<T>, result: Result<Arc<T>>) {
        {
            let mut state = self.lock();
            match &result {
                Ok(contents) => {
                    state.complete = Arc::downgrade(contents);
                    state.failure = None;
                }
                Err(e) => state.failure = Some(e.clone()),
            }
            if state
                .inflight
                .as_ref()
                .is_some_and(|h| h.same_load(handle))
            {
                state.inflight = None;
            }
        }
        handle.resolve(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_completion_listeners_fire_once() {
        let completion: Completion<u32> = Completion::pending();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        completion.on_complete(move |r| {
            assert_eq!(**r.as_ref().unwrap(), 7);
            c.fetch_add(1, Ordering::SeqCst);
        });
        completion.resolve(Ok(Arc::new(7)));
        completion.resolve(Ok(Arc::new(8)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*completion.wait().unwrap(), 7);

        // Late listeners run immediately.
        let c = calls.clone();
        completion.on_complete(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_wait_across_threads() {
        let completion: Completion<String> = Completion::pending();
        let waiter = {
            let c = completion.clone();
            thread::spawn(move || c.wait().map(|s| s.len()))
        };
        assert!(completion.wait_timeout(Duration::from_millis(10)).is_none());
        completion.resolve(Ok(Arc::new("done".to_string())));
        assert_eq!(waiter.join().unwrap().unwrap(), 4);
    }

    #[test]
    fn test_slot_single_flight() {
        let slot: LazySlot<u32> = LazySlot::new();
        assert_eq!(slot.status(), LoadStatus::Pending);
        let Begin::Started(first) = slot.begin() else {
            panic!("first caller must start the load");
        };
        let Begin::Joined(second) = slot.begin() else {
            panic!("second caller must join");
        };
        assert!(first.same_load(&second));
        assert_eq!(slot.status(), LoadStatus::Loading);

        let contents = Arc::new(5);
        slot.finish(&first, Ok(contents.clone()));
        assert_eq!(slot.status(), LoadStatus::Complete);
        assert!(matches!(slot.begin(), Begin::Ready(_)));
        assert_eq!(*second.wait().unwrap(), 5);

        drop(contents);
        drop(first);
        drop(second);
        assert_eq!(slot.status(), LoadStatus::Pending);
    }

    #[test]
    fn test_slot_failure_then_retry() {
        let slot: LazySlot<u32> = LazySlot::new();
        let Begin::Started(handle) = slot.begin() else {
            panic!("expected start");
        };
        slot.finish(&handle, Err(Error::Cancelled));
        assert_eq!(slot.status(), LoadStatus::Failed);
        assert!(matches!(handle.wait(), Err(Error::Cancelled)));
        assert!(matches!(slot.begin(), Begin::Started(_)));
    }

    #[test]
    fn test_rayon_pool_executor() {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let done: Completion<usize> = Completion::pending();
        let d = done.clone();
        pool.execute(Box::new(move || d.resolve(Ok(Arc::new(42)))));
        assert_eq!(*done.wait().unwrap(), 42);
    }
}
