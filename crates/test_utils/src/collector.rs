//! Thread-safe collection of things observed during a test.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// A clonable list that producers push to and a test waits on.
#[derive(Debug)]
pub struct Collector<T> {
    inner: Arc<(Mutex<Vec<T>>, Condvar)>,
}

impl<T> Clone for Collector<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Collector<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new((Mutex::new(Vec::new()), Condvar::new())),
        }
    }
}

impl<T: Clone> Collector<T> {
    /// An empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an item and wake waiters.
    pub fn push(&self, item: T) {
        self.inner.0.lock().unwrap().push(item);
        self.inner.1.notify_all();
    }

    /// How many items have been recorded.
    pub fn len(&self) -> usize {
        self.inner.0.lock().unwrap().len()
    }

    /// Nothing recorded yet?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of everything recorded so far.
    pub fn items(&self) -> Vec<T> {
        self.inner.0.lock().unwrap().clone()
    }

    /// Remove and return everything recorded so far.
    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.inner.0.lock().unwrap())
    }

    /// Block until at least `count` items were recorded. Returns false
    /// on timeout.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut lock = self.inner.0.lock().unwrap();
        while lock.len() < count {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            lock = self.inner.1.wait_timeout(lock, deadline - now).unwrap().0;
        }
        true
    }
}
