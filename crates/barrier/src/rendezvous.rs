//! The two-party hand-off used by the in-process consumer.

use std::sync::{Condvar, Mutex};

/// Where one side of the hand-off stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RendezvousState {
    /// Not ready.
    #[default]
    Idle,

    /// Ready, waiting to be picked up.
    Ready,

    /// Shutting down. Final, wakes every waiter.
    Stopping,
}

/// One readiness flag plus the condition variable waiters park on.
#[derive(Debug, Default)]
pub struct Rendezvous {
    state: Mutex<RendezvousState>,
    cond: Condvar,
}

impl Rendezvous {
    /// An idle rendezvous.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark ready. Returns false if stopping.
    pub fn signal_ready(&self) -> bool {
        let mut lock = self.state.lock().unwrap();
        if *lock == RendezvousState::Stopping {
            return false;
        }
        *lock = RendezvousState::Ready;
        self.cond.notify_all();
        true
    }

    /// Block until ready, and consume the readiness.
    /// Returns false if stopping.
    pub fn wait_ready(&self) -> bool {
        let mut lock = self.state.lock().unwrap();
        loop {
            match *lock {
                RendezvousState::Idle => lock = self.cond.wait(lock).unwrap(),
                RendezvousState::Ready => {
                    *lock = RendezvousState::Idle;
                    return true;
                }
                RendezvousState::Stopping => return false,
            }
        }
    }

    /// Enter the final stopping state.
    pub fn stop(&self) {
        *self.state.lock().unwrap() = RendezvousState::Stopping;
        self.cond.notify_all();
    }

    /// Current state.
    pub fn state(&self) -> RendezvousState {
        *self.state.lock().unwrap()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn ready_is_consumed_once() {
        let r = Rendezvous::new();
        assert!(r.signal_ready());
        assert_eq!(RendezvousState::Ready, r.state());
        assert!(r.wait_ready());
        assert_eq!(RendezvousState::Idle, r.state());
    }

    #[test]
    fn stop_is_final_and_wakes_waiters() {
        let r = Arc::new(Rendezvous::new());
        let r2 = r.clone();
        let t = std::thread::spawn(move || r2.wait_ready());
        r.stop();
        assert!(!t.join().unwrap());
        assert!(!r.signal_ready());
        assert!(!r.wait_ready());
        assert_eq!(RendezvousState::Stopping, r.state());
    }
}
