//! Connected frame sockets.
//!
//! Accepted sockets start out passive: they have received the stream
//! handshake but no data. The send thread activates them at a frame
//! boundary, sending them a full state dump, after which they receive
//! every frame.

use crate::*;
use bytes::Bytes;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use syzygy_api::SzgResult;

/// Told when a socket is dropped after a failed write.
pub trait DisconnectHandler: 'static + Send + Sync {
    /// `socket` is gone.
    fn socket_disconnected(&self, socket: SocketId);
}

/// Trait-object [DisconnectHandler].
pub type DynDisconnectHandler = Arc<dyn DisconnectHandler>;

#[derive(Default)]
struct SocketLists {
    passive: Vec<DynFrameSocket>,
    active: Vec<DynFrameSocket>,
}

/// Passive and active sockets, and the handshake new ones receive.
pub struct DataServer {
    lists: Mutex<SocketLists>,
    next_id: AtomicU64,
    handshake: Bytes,
    disconnect: Option<DynDisconnectHandler>,
}

impl std::fmt::Debug for DataServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataServer")
            .field("passive", &self.passive_count())
            .field("active", &self.active_count())
            .finish()
    }
}

impl DataServer {
    /// A server greeting each accepted connection with `handshake`.
    pub fn new(
        handshake: Bytes,
        disconnect: Option<DynDisconnectHandler>,
    ) -> Self {
        Self {
            lists: Mutex::new(SocketLists::default()),
            next_id: AtomicU64::new(1),
            handshake,
            disconnect,
        }
    }

    /// Allocate an id for a new socket.
    pub fn next_socket_id(&self) -> SocketId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Bind a listener.
    pub fn listen(addr: SocketAddr) -> std::io::Result<TcpListener> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(listener)
    }

    /// Accept one pending connection from a non-blocking listener, send
    /// it the handshake and park it as passive. `Ok(None)` if nobody
    /// was waiting.
    pub fn accept_connection(
        &self,
        listener: &TcpListener,
    ) -> SzgResult<Option<SocketId>> {
        let (stream, peer) = match listener.accept() {
            Ok(r) => r,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };

        stream.set_nonblocking(false)?;
        let socket = TcpFrameSocket::new(self.next_socket_id(), stream)?;
        socket.write_frame(&self.handshake)?;

        let id = socket.id();
        tracing::info!(%peer, socket = id, "accepted data connection");
        self.add_passive(Arc::new(socket));
        Ok(Some(id))
    }

    /// Park a socket until the next frame boundary.
    pub fn add_passive(&self, socket: DynFrameSocket) {
        self.lists.lock().unwrap().passive.push(socket);
    }

    /// Are sockets waiting for activation?
    pub fn has_passive(&self) -> bool {
        !self.lists.lock().unwrap().passive.is_empty()
    }

    /// Sockets waiting for activation.
    pub fn passive_count(&self) -> usize {
        self.lists.lock().unwrap().passive.len()
    }

    /// Sockets receiving frames.
    pub fn active_count(&self) -> usize {
        self.lists.lock().unwrap().active.len()
    }

    /// A copy of the active list.
    pub fn active_sockets(&self) -> Vec<DynFrameSocket> {
        self.lists.lock().unwrap().active.clone()
    }

    /// Move every passive socket to the active list.
    ///
    /// Returns the sockets that were already active and the ones that
    /// just became active, as of the same instant.
    pub fn activate_passive(
        &self,
    ) -> (Vec<DynFrameSocket>, Vec<DynFrameSocket>) {
        let mut lists = self.lists.lock().unwrap();
        let previous = lists.active.clone();
        let fresh = std::mem::take(&mut lists.passive);
        lists.active.extend(fresh.iter().cloned());
        (previous, fresh)
    }

    /// Send a frame to every active socket. Returns how many got it.
    pub fn broadcast(&self, frame: &[u8]) -> usize {
        let active = self.active_sockets();
        self.send_to(&active, frame)
    }

    /// Send a frame to each of `sockets`. A socket whose write fails is
    /// dropped without affecting the others. Returns how many got it.
    pub fn send_to(&self, sockets: &[DynFrameSocket], frame: &[u8]) -> usize {
        let mut sent = 0;
        for socket in sockets {
            match socket.write_frame(frame) {
                Ok(()) => sent += 1,
                Err(err) => {
                    tracing::warn!(
                        socket = socket.id(),
                        ?err,
                        "dropping data connection"
                    );
                    self.remove(socket.id());
                }
            }
        }
        sent
    }

    /// Forget a socket. Notifies the disconnect handler if it was known.
    pub fn remove(&self, id: SocketId) {
        let found = {
            let mut lists = self.lists.lock().unwrap();
            let before = lists.active.len() + lists.passive.len();
            lists.active.retain(|s| s.id() != id);
            lists.passive.retain(|s| s.id() != id);
            before != lists.active.len() + lists.passive.len()
        };

        if found {
            if let Some(handler) = &self.disconnect {
                handler.socket_disconnected(id);
            }
        }
    }
}
