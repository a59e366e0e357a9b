//! The frame barrier.
//!
//! Every participant (the local production loop plus each remote
//! renderer) arrives once per frame. When the last one arrives the round
//! is released and everyone may start the next frame.

use crate::*;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Signals the barrier raises on behalf of the local production loop.
#[derive(Debug, Clone)]
pub struct BarrierSignals {
    /// Raised on release, and to prime the first swap when the first
    /// remote peer joins.
    pub swap_trigger: Arc<Signal>,

    /// If set, raised on release instead of `swap_trigger`.
    pub release: Option<Arc<Signal>>,
}

/// Paces the send thread against the rest of the cluster.
pub trait FrameBarrier: 'static + Send + Sync + std::fmt::Debug {
    /// Add the local production loop to the group.
    fn register_local(&self, signals: BarrierSignals);

    /// The local loop has finished a frame. Blocks until the round is
    /// released, but never indefinitely.
    fn local_sync(&self);

    /// Release every waiter, now and from now on.
    fn stop(&self);
}

/// Trait-object [FrameBarrier].
pub type DynFrameBarrier = Arc<dyn FrameBarrier>;

#[derive(Debug, Default)]
struct BarrierState {
    waiting: usize,
    generation: u64,
    local: Option<BarrierSignals>,
    remote: usize,
    pump_priming: bool,
    exit: bool,
}

impl BarrierState {
    fn total(&self) -> usize {
        self.remote + usize::from(self.local.is_some())
    }

    fn release(&mut self) {
        self.waiting = 0;
        self.generation += 1;
        if let Some(local) = &self.local {
            match &local.release {
                Some(release) => release.send(),
                None => local.swap_trigger.send(),
            }
        }
    }

    /// Release if everyone is in. Returns true if released.
    fn try_release(&mut self) -> bool {
        let total = self.total();
        if total > 0 && self.waiting >= total {
            self.release();
            true
        } else {
            false
        }
    }
}

/// An in-process [FrameBarrier] with any number of remote peers.
#[derive(Debug)]
pub struct BarrierServer {
    state: Mutex<BarrierState>,
    cond: Condvar,
    barrier_timeout: Duration,
    idle_sync_interval: Duration,
}

impl BarrierServer {
    /// A barrier with the timing of `config`.
    pub fn new(config: &SyncConfig) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BarrierState {
                pump_priming: true,
                ..Default::default()
            }),
            cond: Condvar::new(),
            barrier_timeout: config.barrier_timeout(),
            idle_sync_interval: config.idle_sync_interval(),
        })
    }

    /// Join a remote participant. It leaves the group when the returned
    /// handle is dropped.
    pub fn register_remote(self: &Arc<Self>) -> BarrierPeer {
        let mut st = self.state.lock().unwrap();
        if st.remote == 0 && st.pump_priming {
            // nothing is sent until a swap happens and no swap happens
            // until a round is released, so kick off the first frame
            if let Some(local) = &st.local {
                local.swap_trigger.send();
                st.pump_priming = false;
            }
        }
        st.remote += 1;
        tracing::debug!(remote = st.remote, "barrier peer joined");
        BarrierPeer {
            server: self.clone(),
            arrived: None,
        }
    }

    /// Remote participants in the group.
    pub fn remote_count(&self) -> usize {
        self.state.lock().unwrap().remote
    }

    /// Completed rounds.
    pub fn generation(&self) -> u64 {
        self.state.lock().unwrap().generation
    }

    fn wait_generation(&self, gen: u64, timeout: Duration) -> bool {
        let st = self.state.lock().unwrap();
        let (st, res) = self
            .cond
            .wait_timeout_while(st, timeout, |s| s.generation == gen && !s.exit)
            .unwrap();
        !res.timed_out() || st.generation != gen || st.exit
    }
}

impl FrameBarrier for BarrierServer {
    fn register_local(&self, signals: BarrierSignals) {
        self.state.lock().unwrap().local = Some(signals);
    }

    fn local_sync(&self) {
        let idle = {
            let st = self.state.lock().unwrap();
            if st.exit {
                return;
            }
            st.remote == 0
        };

        if idle {
            std::thread::sleep(self.idle_sync_interval);
        }

        let mut st = self.state.lock().unwrap();
        if st.exit {
            return;
        }

        let gen = st.generation;
        st.waiting += 1;
        if st.try_release() {
            self.cond.notify_all();
            return;
        }

        let deadline = Instant::now() + self.barrier_timeout;
        while st.generation == gen && !st.exit {
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    waiting = st.waiting,
                    total = st.total(),
                    "barrier round timed out, releasing"
                );
                st.release();
                self.cond.notify_all();
                return;
            }
            st = self.cond.wait_timeout(st, deadline - now).unwrap().0;
        }
    }

    fn stop(&self) {
        let mut st = self.state.lock().unwrap();
        st.exit = true;
        if let Some(local) = &st.local {
            local.swap_trigger.send();
            if let Some(release) = &local.release {
                release.send();
            }
        }
        self.cond.notify_all();
    }
}

/// A remote participant's handle on a [BarrierServer].
#[derive(Debug)]
pub struct BarrierPeer {
    server: Arc<BarrierServer>,
    arrived: Option<u64>,
}

impl BarrierPeer {
    /// This peer has finished its frame. Arriving twice in one round
    /// counts once.
    pub fn arrive(&mut self) {
        let mut st = self.server.state.lock().unwrap();
        if st.exit || self.arrived == Some(st.generation) {
            return;
        }
        self.arrived = Some(st.generation);
        st.waiting += 1;
        if st.try_release() {
            self.server.cond.notify_all();
        }
    }

    /// Block until the round this peer arrived in is released.
    /// Returns false on timeout.
    pub fn wait_release(&self, timeout: Duration) -> bool {
        match self.arrived {
            None => true,
            Some(gen) => self.server.wait_generation(gen, timeout),
        }
    }
}

impl Drop for BarrierPeer {
    fn drop(&mut self) {
        let mut st = self.server.state.lock().unwrap();
        st.remote -= 1;
        if self.arrived == Some(st.generation) {
            st.waiting = st.waiting.saturating_sub(1);
        }
        if st.remote == 0 {
            st.pump_priming = true;
        }
        if st.waiting > 0 && st.try_release() {
            self.server.cond.notify_all();
        }
        tracing::debug!(remote = st.remote, "barrier peer left");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn local(barrier: &BarrierServer) -> Arc<Signal> {
        let swap = Arc::new(Signal::new());
        barrier.register_local(BarrierSignals {
            swap_trigger: swap.clone(),
            release: None,
        });
        swap
    }

    #[test]
    fn local_alone_releases_after_idle_pause() {
        let b = BarrierServer::new(&SyncConfig::testing());
        let swap = local(&b);

        let start = Instant::now();
        b.local_sync();
        assert!(start.elapsed() >= Duration::from_millis(10));
        assert_eq!(1, b.generation());
        assert!(swap.wait_timeout(Duration::ZERO));
    }

    #[test]
    fn round_waits_for_every_peer() {
        let b = BarrierServer::new(&SyncConfig {
            barrier_timeout_ms: 10_000,
            ..SyncConfig::testing()
        });
        let swap = local(&b);

        let mut p1 = b.register_remote();
        // the first peer primes the pump
        assert!(swap.wait_timeout(Duration::ZERO));
        let mut p2 = b.register_remote();
        assert!(!swap.wait_timeout(Duration::ZERO));

        p1.arrive();
        p1.arrive();

        let b2 = b.clone();
        let t = std::thread::spawn(move || b2.local_sync());

        syzygy_test_utils::iter_check!(5000, {
            if b.state.lock().unwrap().waiting == 2 {
                return;
            }
        });
        assert_eq!(0, b.generation());

        p2.arrive();
        t.join().unwrap();
        assert_eq!(1, b.generation());
        assert!(p1.wait_release(Duration::from_secs(5)));
        assert!(swap.wait_timeout(Duration::ZERO));
    }

    #[test]
    fn straggler_is_timed_out() {
        let b = BarrierServer::new(&SyncConfig {
            barrier_timeout_ms: 20,
            ..SyncConfig::testing()
        });
        let release = Arc::new(Signal::new());
        b.register_local(BarrierSignals {
            swap_trigger: Arc::new(Signal::new()),
            release: Some(release.clone()),
        });

        let _silent = b.register_remote();
        let start = Instant::now();
        b.local_sync();
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(1, b.generation());
        assert!(release.wait_timeout(Duration::ZERO));
    }

    #[test]
    fn leaving_peer_completes_round() {
        let b = BarrierServer::new(&SyncConfig {
            barrier_timeout_ms: 10_000,
            ..SyncConfig::testing()
        });
        let swap = local(&b);

        let mut p1 = b.register_remote();
        let p2 = b.register_remote();
        swap.wait_timeout(Duration::ZERO);

        p1.arrive();
        assert!(!p1.wait_release(Duration::from_millis(1)));

        let b2 = b.clone();
        let t = std::thread::spawn(move || b2.local_sync());
        syzygy_test_utils::iter_check!(5000, {
            if b.state.lock().unwrap().waiting == 2 {
                return;
            }
        });

        drop(p2);
        t.join().unwrap();
        assert_eq!(1, b.generation());
        assert_eq!(1, b.remote_count());

        // an arrived peer leaving takes its arrival with it
        p1.arrive();
        drop(p1);
        assert_eq!(0, b.state.lock().unwrap().waiting);
        assert_eq!(1, b.generation());
    }

    #[test]
    fn stop_releases_everyone() {
        let b = BarrierServer::new(&SyncConfig {
            barrier_timeout_ms: 60_000,
            ..SyncConfig::testing()
        });
        local(&b);
        let _silent = b.register_remote();

        let b2 = b.clone();
        let t = std::thread::spawn(move || b2.local_sync());
        syzygy_test_utils::iter_check!(5000, {
            if b.state.lock().unwrap().waiting == 1 {
                return;
            }
        });
        b.stop();
        t.join().unwrap();

        // a stopped barrier never blocks
        b.local_sync();
    }
}
