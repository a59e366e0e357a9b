//! The synchronized data server.
//!
//! One application thread feeds records in with
//! [SyncDataServer::receive_message]. They collect in the back buffer of
//! a [QueuedData] while the send thread ships the front buffer, either to
//! remote sockets (paced by a [FrameBarrier]) or to one in-process
//! [LocalSyncClient].

use crate::*;
use bytes::Bytes;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use syzygy_api::{ServiceRegistrar, SzgError, SzgResult};

/// Print out a message if this thread dies.
struct ThreadGuard(&'static str);

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        tracing::debug!("{}", self.0);
    }
}

/// The application state a [SyncDataServer] distributes.
pub trait SyncHandler: 'static + Send + Sync {
    /// What applying a record produces, e.g. the node it created.
    type Node;

    /// Apply a record to application state before it is queued. The
    /// record may be rewritten (e.g. to carry a freshly assigned id);
    /// the rewritten bytes are what get sent.
    fn on_message(&self, record: &mut Vec<u8>) -> Option<Self::Node>;

    /// Write the full current state, for sockets joining mid-stream.
    /// Sockets whose dump fails are dropped.
    fn dump_state(&self, frame: &mut FrameBuffer) -> SzgResult<()>;

    /// The record dictionary sent in the stream handshake.
    fn dictionary(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// A remote consumer went away.
    fn socket_disconnected(&self, _socket: SocketId) {}
}

struct HandlerDisconnects<H: SyncHandler>(Arc<H>);

impl<H: SyncHandler> DisconnectHandler for HandlerDisconnects<H> {
    fn socket_disconnected(&self, socket: SocketId) {
        self.0.socket_disconnected(socket);
    }
}

struct Queue {
    data: QueuedData,
    full: bool,
}

struct Inner<H: SyncHandler> {
    config: SyncConfig,
    handler: Arc<H>,
    queue: Mutex<Queue>,
    queue_cv: Condvar,
    exit: AtomicBool,
    swap_trigger: Arc<Signal>,
    release: Arc<Signal>,
    consumer_ready: Rendezvous,
    producer_ready: Rendezvous,
    local_attached: AtomicBool,
    data_server: Arc<DataServer>,
    barrier: DynFrameBarrier,
}

impl<H: SyncHandler> Inner<H> {
    fn exiting(&self) -> bool {
        self.exit.load(Ordering::SeqCst)
    }

    /// Swap under the queue lock and ship the new front buffer.
    fn swap_and_send(&self) {
        let mut queue = self.queue.lock().unwrap();
        queue.data.swap_buffers();
        queue.full = false;
        self.queue_cv.notify_all();

        if self.data_server.has_passive() {
            let (previous, fresh) = self.data_server.activate_passive();
            let front = queue.data.front_buffer();
            self.data_server.send_to(&previous, &front);

            let mut dump = FrameBuffer::new();
            match self.handler.dump_state(&mut dump) {
                Ok(()) => {
                    let records = dump.record_count();
                    let sent =
                        self.data_server.send_to(&fresh, &dump.finish());
                    tracing::debug!(sent, records, "sent state dump");
                }
                Err(err) => {
                    tracing::warn!(?err, "state dump failed");
                    for socket in fresh {
                        self.data_server.remove(socket.id());
                    }
                }
            }

            drop(queue);
        } else {
            let front = queue.data.front_buffer();
            drop(queue);
            self.data_server.broadcast(&front);
        }
    }
}

/// Distributes records from one producer thread as whole frames.
pub struct SyncDataServer<H: SyncHandler> {
    inner: Arc<Inner<H>>,
    listener: Mutex<Option<TcpListener>>,
    local_addr: Option<SocketAddr>,
    service_name: Option<String>,
    started: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl<H: SyncHandler> std::fmt::Debug for SyncDataServer<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncDataServer")
            .field("mode", &self.inner.config.mode)
            .field("service_name", &self.service_name)
            .field("local_addr", &self.local_addr)
            .field("data_server", &self.inner.data_server)
            .finish()
    }
}

impl<H: SyncHandler> Drop for SyncDataServer<H> {
    fn drop(&mut self) {
        let _g = ThreadGuard("SyncDataServer Shutdown Complete!");
        self.stop();
    }
}

impl<H: SyncHandler> SyncDataServer<H> {
    /// A stopped server distributing `handler`'s records, paced by
    /// `barrier`.
    pub fn new(
        config: SyncConfig,
        handler: Arc<H>,
        barrier: DynFrameBarrier,
    ) -> SzgResult<Self> {
        let handshake = StreamConfig::native(handler.dictionary()).encode()?;
        let data_server = Arc::new(DataServer::new(
            handshake,
            Some(Arc::new(HandlerDisconnects(handler.clone()))),
        ));

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                handler,
                queue: Mutex::new(Queue {
                    data: QueuedData::new(),
                    full: false,
                }),
                queue_cv: Condvar::new(),
                exit: AtomicBool::new(false),
                swap_trigger: Arc::new(Signal::new()),
                release: Arc::new(Signal::new()),
                consumer_ready: Rendezvous::new(),
                producer_ready: Rendezvous::new(),
                local_attached: AtomicBool::new(false),
                data_server,
                barrier,
            }),
            listener: Mutex::new(None),
            local_addr: None,
            service_name: None,
            started: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Attach the in-process consumer. Must come before [Self::init] and
    /// [Self::start], and rules out remote consumers.
    pub fn connect_local(&self) -> SzgResult<LocalSyncClient<H>> {
        if self.started.load(Ordering::SeqCst) {
            return Err(SzgError::other("cannot connect locally once started"));
        }
        if self.listener.lock().unwrap().is_some() {
            return Err(SzgError::other(
                "cannot connect locally to a networked server",
            ));
        }
        if self.inner.local_attached.swap(true, Ordering::SeqCst) {
            return Err(SzgError::other("already locally connected"));
        }
        Ok(LocalSyncClient {
            inner: self.inner.clone(),
        })
    }

    /// Offer the service on `channel`: get a brokered port, listen on it
    /// and confirm it. Returns the bound address.
    pub fn init(
        &mut self,
        registrar: &dyn ServiceRegistrar,
        service_name: &str,
        channel: &str,
    ) -> SzgResult<SocketAddr> {
        if self.inner.local_attached.load(Ordering::SeqCst) {
            return Err(SzgError::other(
                "locally connected server cannot listen",
            ));
        }
        if !syzygy_api::is_valid_channel(channel) {
            return Err(SzgError::other(format!("invalid channel {channel}")));
        }

        let interface: IpAddr =
            self.inner.config.interface.parse().map_err(|e| {
                SzgError::other_src("invalid listen interface", e)
            })?;

        let name = registrar.create_complex_service_name(service_name);
        let mut ports = registrar.register_service(&name, channel, 1)?;

        let mut tries = 0;
        let listener = loop {
            let port = ports.first().copied().ok_or_else(|| {
                SzgError::other("registrar returned no ports")
            })?;
            match DataServer::listen(SocketAddr::new(interface, port)) {
                Ok(listener) => break listener,
                Err(err) => {
                    tries += 1;
                    if tries >= self.inner.config.listen_tries {
                        return Err(SzgError::other_src(
                            format!("no brokered port to listen on for {name}"),
                            err,
                        ));
                    }
                    tracing::warn!(
                        port,
                        ?err,
                        "retrying to listen on brokered port"
                    );
                    ports = registrar.request_new_ports(&name, channel, 1)?;
                }
            }
        };

        registrar.confirm_ports(&name, channel, &ports)?;

        let addr = listener.local_addr()?;
        tracing::info!(service = %name, %addr, "sync data server listening");

        *self.listener.lock().unwrap() = Some(listener);
        self.local_addr = Some(addr);
        self.service_name = Some(name);
        Ok(addr)
    }

    /// Start the worker threads.
    pub fn start(&self) -> SzgResult<()> {
        if self.inner.exiting() {
            return Err(SzgError::other("cannot restart a stopped server"));
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SzgError::other("already started"));
        }

        let mut threads = self.threads.lock().unwrap();

        if self.inner.local_attached.load(Ordering::SeqCst) {
            let inner = self.inner.clone();
            threads.push(std::thread::spawn(move || local_send_loop(inner)));
            tracing::debug!("sync data server started for local consumer");
            return Ok(());
        }

        let mode = self.inner.config.mode;
        if mode != SyncMode::NoSyncManual {
            self.inner.barrier.register_local(BarrierSignals {
                swap_trigger: self.inner.swap_trigger.clone(),
                release: if mode == SyncMode::Auto {
                    None
                } else {
                    Some(self.inner.release.clone())
                },
            });
        }

        if let Some(listener) = self.listener.lock().unwrap().take() {
            let inner = self.inner.clone();
            threads.push(std::thread::spawn(move || {
                accept_loop(inner, listener)
            }));
        }

        let inner = self.inner.clone();
        threads.push(std::thread::spawn(move || remote_send_loop(inner)));

        tracing::debug!(?mode, "sync data server started");
        Ok(())
    }

    /// Stop and join every thread, releasing anyone blocked on this
    /// server. Safe to call more than once.
    pub fn stop(&self) {
        let inner = &self.inner;
        inner.exit.store(true, Ordering::SeqCst);

        inner.swap_trigger.close();
        inner.release.close();
        {
            let mut queue = inner.queue.lock().unwrap();
            queue.full = false;
            inner.queue_cv.notify_all();
        }
        inner.consumer_ready.stop();
        inner.producer_ready.stop();
        inner.barrier.stop();

        let threads = std::mem::take(&mut *self.threads.lock().unwrap());
        for thread in threads {
            if thread.join().is_err() {
                tracing::warn!("sync data server thread panicked");
            }
        }
    }

    /// Hand the current frame to the send thread. Blocks until the frame
    /// has been sent and the barrier round is over, unless the mode is
    /// [SyncMode::NoSyncManual]. Does nothing in [SyncMode::Auto].
    pub fn swap_buffers(&self) {
        let mode = self.inner.config.mode;
        if mode == SyncMode::Auto {
            tracing::debug!("ignoring swap_buffers in auto mode");
            return;
        }
        if !self.started.load(Ordering::SeqCst) || self.inner.exiting() {
            tracing::debug!("ignoring swap_buffers, server not running");
            return;
        }

        self.inner.swap_trigger.send();
        if mode != SyncMode::NoSyncManual {
            self.inner.release.wait();
        }
    }

    /// Apply a record and queue it for the next frame.
    ///
    /// Calls must come from one thread at a time. In auto mode, with a
    /// remote consumer connected, this blocks while the back buffer is
    /// over the send limit. With no consumer at all the record is
    /// applied but not queued.
    pub fn receive_message(&self, mut record: Vec<u8>) -> Option<H::Node> {
        let inner = &self.inner;
        let mut queue = inner.queue.lock().unwrap();

        if queue.data.back_buffer_size() > inner.config.send_limit
            && inner.data_server.active_count() > 0
            && inner.config.mode == SyncMode::Auto
        {
            queue.full = true;
            while queue.full && !inner.exiting() {
                queue = inner.queue_cv.wait(queue).unwrap();
            }
        }

        // apply before queueing, new sockets get their dump from state
        let node = inner.handler.on_message(&mut record);

        if inner.data_server.active_count() > 0
            || inner.local_attached.load(Ordering::SeqCst)
        {
            if let Err(err) = queue.data.queue_record(&record) {
                tracing::warn!(?err, "dropping record that fits no frame");
            }
        }

        node
    }

    /// Bytes waiting in the back buffer.
    pub fn back_buffer_size(&self) -> usize {
        self.inner.queue.lock().unwrap().data.back_buffer_size()
    }

    /// Records waiting in the back buffer.
    pub fn back_buffer_records(&self) -> usize {
        self.inner.queue.lock().unwrap().data.back_buffer_records()
    }

    /// The remote socket lists.
    pub fn data_server(&self) -> &Arc<DataServer> {
        &self.inner.data_server
    }

    /// The pacing barrier.
    pub fn barrier(&self) -> &DynFrameBarrier {
        &self.inner.barrier
    }

    /// The address [Self::init] bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// The location-qualified name [Self::init] registered.
    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// The configuration in use.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }
}

/// The consuming end of a locally connected [SyncDataServer].
pub struct LocalSyncClient<H: SyncHandler> {
    inner: Arc<Inner<H>>,
}

impl<H: SyncHandler> std::fmt::Debug for LocalSyncClient<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSyncClient").finish()
    }
}

impl<H: SyncHandler> LocalSyncClient<H> {
    /// Take the next frame. Blocks until the server has swapped for us.
    /// `None` once the server stops.
    pub fn consume(&self) -> Option<Bytes> {
        if !self.inner.consumer_ready.signal_ready() {
            return None;
        }
        if !self.inner.producer_ready.wait_ready() {
            return None;
        }
        Some(self.inner.queue.lock().unwrap().data.front_buffer())
    }
}

fn local_send_loop<H: SyncHandler>(inner: Arc<Inner<H>>) {
    let _g = ThreadGuard("WARN: local send thread ended!");
    let manual = inner.config.mode != SyncMode::Auto;

    while !inner.exiting() {
        if !inner.consumer_ready.wait_ready() {
            break;
        }

        if manual {
            inner.swap_trigger.wait();
            if inner.exiting() {
                break;
            }
        }

        {
            let mut queue = inner.queue.lock().unwrap();
            queue.data.swap_buffers();
            queue.full = false;
            inner.queue_cv.notify_all();
        }

        if !inner.producer_ready.signal_ready() {
            break;
        }

        if manual {
            inner.release.send();
        }
    }

    // never leave the consumer parked
    inner.producer_ready.stop();
}

fn remote_send_loop<H: SyncHandler>(inner: Arc<Inner<H>>) {
    let _g = ThreadGuard("WARN: send thread ended!");
    let sync = inner.config.mode != SyncMode::NoSyncManual;

    while !inner.exiting() {
        inner.swap_trigger.wait();
        if inner.exiting() {
            break;
        }

        inner.swap_and_send();

        if sync {
            inner.barrier.local_sync();
        }
    }
}

fn accept_loop<H: SyncHandler>(inner: Arc<Inner<H>>, listener: TcpListener) {
    let _g = ThreadGuard("WARN: accept thread ended!");
    let poll = inner.config.accept_poll_interval();

    while !inner.exiting() {
        match inner.data_server.accept_connection(&listener) {
            Ok(Some(socket)) => {
                if inner.config.mode == SyncMode::Auto
                    && inner.data_server.active_count() == 0
                {
                    tracing::debug!(socket, "priming swap for first consumer");
                    inner.swap_trigger.send();
                }
            }
            Ok(None) => std::thread::sleep(poll),
            Err(err) => {
                tracing::warn!(?err, "failed to accept data connection");
                std::thread::sleep(poll);
            }
        }
    }
}
