//! broker request dispatcher types.

use crate::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use syzygy_api::{ComponentId, MatchTag, Port, SzgError, SzgResult};

/// Print out a message if this thread dies.
struct ThreadGuard(&'static str);

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        tracing::debug!("{}", self.0);
    }
}

/// A request a component makes of the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerRequest {
    /// Reserve ports for a new service.
    RegisterService {
        /// Correlation tag echoed in the reply.
        tag: MatchTag,
        /// What to reserve.
        request: PortRequest,
    },

    /// The reserved ports could not be bound; get new ones.
    RetryPorts {
        /// Correlation tag echoed in the reply.
        tag: MatchTag,
        /// The temporary service.
        service_name: String,
    },

    /// The reserved ports are bound; go live.
    ConfirmPorts {
        /// Correlation tag echoed in the reply.
        tag: MatchTag,
        /// The temporary service.
        service_name: String,
    },

    /// Where can this service be reached?
    RequestService {
        /// Correlation tag echoed in the reply.
        tag: MatchTag,
        /// Host the requester runs on.
        host: String,
        /// The wanted service.
        service_name: String,
        /// Networks the requester can use, most preferred first.
        networks: Vec<String>,
        /// Wait for the service to appear instead of failing.
        is_async: bool,
    },

    /// Tell me when this service goes away.
    WatchRelease {
        /// Correlation tag echoed in the release reply.
        tag: MatchTag,
        /// Host the requester runs on.
        host: String,
        /// The watched service.
        service_name: String,
    },

    /// Read a service's info string.
    GetServiceInfo {
        /// Correlation tag echoed in the reply.
        tag: MatchTag,
        /// The service.
        service_name: String,
    },

    /// Replace a service's info string.
    SetServiceInfo {
        /// Correlation tag echoed in the reply.
        tag: MatchTag,
        /// The service.
        service_name: String,
        /// The new info.
        info: String,
    },

    /// The component has gone away.
    ComponentExited,
}

/// A reply (or unsolicited notification) from the broker to a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerReply {
    /// Answer to `RegisterService` or `RetryPorts`.
    Ports {
        /// The request's tag.
        tag: MatchTag,
        /// The service.
        service_name: String,
        /// Ports to bind.
        result: BrokerResult<Vec<Port>>,
    },

    /// Answer to `ConfirmPorts`.
    Confirmed {
        /// The request's tag.
        tag: MatchTag,
        /// The service.
        service_name: String,
        /// Whether the service is now live.
        result: BrokerResult<()>,
    },

    /// Answer to `RequestService`, possibly much later.
    ServiceLocation {
        /// The request's tag.
        tag: MatchTag,
        /// The service.
        service_name: String,
        /// Where to connect.
        result: BrokerResult<ServiceAddress>,
    },

    /// A watched service is gone (or was never live).
    Released {
        /// The `WatchRelease` tag.
        tag: MatchTag,
        /// The service.
        service_name: String,
    },

    /// Answer to `GetServiceInfo`. Empty for unknown services.
    ServiceInfo {
        /// The request's tag.
        tag: MatchTag,
        /// The service.
        service_name: String,
        /// The info string.
        info: String,
    },

    /// Answer to `SetServiceInfo`.
    InfoSet {
        /// The request's tag.
        tag: MatchTag,
        /// The service.
        service_name: String,
        /// Whether the info was replaced.
        result: BrokerResult<()>,
    },
}

/// Carries replies back to components.
///
/// Release notifications are delivered while the broker lock is held,
/// so `deliver` must queue the reply and return.
pub trait Outbox: 'static + Send + Sync {
    /// Hand `reply` to `component`.
    fn deliver(&self, component: ComponentId, reply: BrokerReply);
}

/// Trait-object [Outbox].
pub type DynOutbox = Arc<dyn Outbox>;

struct OutboxNotifier(DynOutbox);

impl ReleaseNotifier for OutboxNotifier {
    fn service_released(
        &self,
        component: ComponentId,
        tag: MatchTag,
        service_name: &str,
    ) {
        self.0.deliver(
            component,
            BrokerReply::Released {
                tag,
                service_name: service_name.to_string(),
            },
        );
    }
}

type RequestSend = async_channel::Sender<(ComponentId, BrokerRequest)>;
type RequestRecv = async_channel::Receiver<(ComponentId, BrokerRequest)>;

/// The broker side of a phleet directory server.
///
/// Requests are queued and handled by a pool of os thread workers,
/// each of which takes the broker lock only for the duration of a
/// single broker call.
pub struct BrokerSrv {
    cont: Arc<AtomicBool>,
    workers: Vec<std::thread::JoinHandle<()>>,
    broker: Arc<ConnectionBroker>,
    send: RequestSend,
}

impl Drop for BrokerSrv {
    fn drop(&mut self) {
        let _g = ThreadGuard("BrokerSrv Shutdown Complete!");

        tracing::debug!("begin broker shutdown...");
        let _ = self.shutdown();
    }
}

impl BrokerSrv {
    /// Construct a new BrokerSrv, replying through `outbox`.
    pub fn new(config: BrokerSrvConfig, outbox: DynOutbox) -> Self {
        // atomic flag for telling worker threads to shutdown
        let cont = Arc::new(AtomicBool::new(true));

        let broker = Arc::new(ConnectionBroker::with_release_notifier(
            Arc::new(OutboxNotifier(outbox.clone())),
        ));

        let (send, recv) =
            async_channel::bounded(config.request_queue_len.max(1));

        let count = config.worker_thread_count.max(1);
        let mut workers = Vec::with_capacity(count);
        for _ in 0..count {
            let cont = cont.clone();
            let broker = broker.clone();
            let outbox = outbox.clone();
            let recv = recv.clone();
            workers.push(std::thread::spawn(move || {
                worker(cont, broker, outbox, recv)
            }));
        }

        tracing::debug!(worker_thread_count = count, "broker started");

        Self {
            cont,
            workers,
            broker,
            send,
        }
    }

    /// The broker the workers operate on.
    pub fn broker(&self) -> &Arc<ConnectionBroker> {
        &self.broker
    }

    /// Queue a request from `component`. Blocks while the queue is full.
    pub fn submit(
        &self,
        component: ComponentId,
        request: BrokerRequest,
    ) -> SzgResult<()> {
        self.send
            .send_blocking((component, request))
            .map_err(|_| SzgError::other("broker is shut down"))
    }

    /// Shutdown the broker, returning an error result if any
    /// of the worker threads had panicked.
    pub fn shutdown(&mut self) -> SzgResult<()> {
        let mut is_err = false;
        self.cont.store(false, Ordering::SeqCst);
        self.send.close();
        while let Some(w) = self.workers.pop() {
            tracing::debug!(
                "waiting on {} threads to close...",
                self.workers.len() + 1
            );
            if w.join().is_err() {
                is_err = true;
            }
        }
        tracing::debug!("all threads closed.");
        if is_err {
            Err(SzgError::other("Failure shutting down worker thread"))
        } else {
            Ok(())
        }
    }
}

fn worker(
    cont: Arc<AtomicBool>,
    broker: Arc<ConnectionBroker>,
    outbox: DynOutbox,
    recv: RequestRecv,
) {
    let _g = ThreadGuard("broker worker thread has ended");

    while cont.load(Ordering::SeqCst) {
        let (component, request) = match recv.recv_blocking() {
            Ok(r) => r,
            Err(_) => break,
        };

        let handler = Handler {
            broker: &broker,
            outbox: &outbox,
            component,
        };

        handler.handle(request);
    }
}

struct Handler<'lt> {
    broker: &'lt ConnectionBroker,
    outbox: &'lt DynOutbox,
    component: ComponentId,
}

impl Handler<'_> {
    /// Dispatch to the correct handlers.
    fn handle(self, request: BrokerRequest) {
        match request {
            BrokerRequest::RegisterService { tag, request } => {
                let result = self
                    .broker
                    .request_ports(self.component, &request)
                    .map(|s| s.ports);
                self.reply(BrokerReply::Ports {
                    tag,
                    service_name: request.service_name,
                    result: self.log(result),
                });
            }
            BrokerRequest::RetryPorts { tag, service_name } => {
                let result = self
                    .broker
                    .retry_ports(self.component, &service_name)
                    .map(|s| s.ports);
                self.reply(BrokerReply::Ports {
                    tag,
                    service_name,
                    result: self.log(result),
                });
            }
            BrokerRequest::ConfirmPorts { tag, service_name } => {
                self.handle_confirm(tag, service_name)
            }
            BrokerRequest::RequestService {
                tag,
                host,
                service_name,
                networks,
                is_async,
            } => {
                let result = self.broker.request_service(
                    self.component,
                    &host,
                    tag,
                    &service_name,
                    &networks,
                    is_async,
                );
                if is_async && matches!(result, Err(BrokerError::NotOffered(_)))
                {
                    // answered from the confirm path
                    return;
                }
                self.reply(BrokerReply::ServiceLocation {
                    tag,
                    service_name,
                    result: self.log(result),
                });
            }
            BrokerRequest::WatchRelease {
                tag,
                host,
                service_name,
            } => {
                if !self.broker.register_release_notification(
                    self.component,
                    tag,
                    &host,
                    &service_name,
                ) {
                    self.reply(BrokerReply::Released { tag, service_name });
                }
            }
            BrokerRequest::GetServiceInfo { tag, service_name } => {
                let info = self
                    .broker
                    .get_service_info(&service_name)
                    .unwrap_or_default();
                self.reply(BrokerReply::ServiceInfo {
                    tag,
                    service_name,
                    info,
                });
            }
            BrokerRequest::SetServiceInfo {
                tag,
                service_name,
                info,
            } => {
                let result = self.broker.set_service_info(
                    self.component,
                    &service_name,
                    &info,
                );
                self.reply(BrokerReply::InfoSet {
                    tag,
                    service_name,
                    result: self.log(result),
                });
            }
            BrokerRequest::ComponentExited => {
                self.broker.remove_component(self.component);
            }
        }
    }

    /// Confirm, then answer everyone who was waiting for the service.
    fn handle_confirm(&self, tag: MatchTag, service_name: String) {
        let result = self.broker.confirm_ports(self.component, &service_name);
        let is_live = result.is_ok();
        self.reply(BrokerReply::Confirmed {
            tag,
            service_name: service_name.clone(),
            result: self.log(result),
        });

        if !is_live {
            return;
        }

        for pending in self.broker.take_pending_requests(&service_name) {
            let result = self.broker.request_service(
                pending.component,
                &pending.host,
                pending.tag,
                &pending.service_name,
                &pending.networks,
                false,
            );
            tracing::debug!(
                service = %service_name,
                requester = %pending.component,
                ok = result.is_ok(),
                "answering pending request"
            );
            self.outbox.deliver(
                pending.component,
                BrokerReply::ServiceLocation {
                    tag: pending.tag,
                    service_name: pending.service_name,
                    result,
                },
            );
        }
    }

    fn log<T>(&self, result: BrokerResult<T>) -> BrokerResult<T> {
        if let Err(err) = &result {
            if err.is_expected_miss() {
                tracing::debug!(component = %self.component, %err);
            } else {
                tracing::warn!(component = %self.component, %err);
            }
        }
        result
    }

    fn reply(&self, reply: BrokerReply) {
        self.outbox.deliver(self.component, reply);
    }
}
