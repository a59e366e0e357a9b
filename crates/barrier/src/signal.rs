//! Thread wake-up primitives.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct SignalState {
    raised: bool,
    closed: bool,
}

/// An auto-reset event.
///
/// `send` raises the signal, waking one waiter, which lowers it again.
/// Sends with nobody waiting are remembered, but do not accumulate.
/// Once closed, every wait returns immediately.
#[derive(Debug, Default)]
pub struct Signal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl Signal {
    /// A lowered, open signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal.
    pub fn send(&self) {
        self.state.lock().unwrap().raised = true;
        self.cond.notify_one();
    }

    /// Block until raised (or closed), then lower it.
    pub fn wait(&self) {
        let mut lock = self.state.lock().unwrap();
        while !lock.raised && !lock.closed {
            lock = self.cond.wait(lock).unwrap();
        }
        lock.raised = false;
    }

    /// Like [Signal::wait], giving up after `timeout`.
    /// Returns false on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let lock = self.state.lock().unwrap();
        let (mut lock, res) = self
            .cond
            .wait_timeout_while(lock, timeout, |s| !s.raised && !s.closed)
            .unwrap();
        if res.timed_out() {
            return false;
        }
        lock.raised = false;
        true
    }

    /// Permanently release every current and future waiter.
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.cond.notify_all();
    }

    /// Has [Signal::close] been called?
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}
