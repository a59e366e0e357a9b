//! An in-memory [FrameSocket] for tests.

use crate::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use syzygy_test_utils::Collector;

#[derive(Debug)]
pub struct MemSocket {
    id: SocketId,
    failing: AtomicBool,
    frames: Collector<Vec<u8>>,
}

impl MemSocket {
    pub fn create(id: SocketId) -> Arc<Self> {
        Arc::new(Self {
            id,
            failing: AtomicBool::new(false),
            frames: Collector::new(),
        })
    }

    /// Make every further write fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.items()
    }

    /// Decoded records of every frame received so far.
    pub fn records(&self) -> Vec<Vec<Vec<u8>>> {
        self.frames()
            .into_iter()
            .map(|f| {
                decode_frame(&f.into(), ByteOrder::native())
                    .unwrap()
                    .into_iter()
                    .map(|r| r.to_vec())
                    .collect()
            })
            .collect()
    }

    /// Block until at least `count` frames arrived.
    pub fn wait_frames(&self, count: usize) -> bool {
        self.frames
            .wait_for(count, std::time::Duration::from_secs(5))
    }
}

impl FrameSocket for MemSocket {
    fn id(&self) -> SocketId {
        self.id
    }

    fn write_frame(&self, frame: &[u8]) -> std::io::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mem socket closed",
            ));
        }
        self.frames.push(frame.to_vec());
        Ok(())
    }
}
