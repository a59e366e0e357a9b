//! The phleet connection broker.
//!
//! One [ConnectionBroker] per directory server decides which ports and
//! service names belong to which components, answers discovery requests,
//! and tells waiters when a service goes away.
//!
//! A service moves through two states. `request_ports` creates it as
//! *temporary*: ports are reserved but nobody can discover it.
//! `confirm_ports` promotes it to *used*, which is the only way to
//! become discoverable. It is destroyed only when its owning component
//! is removed, at which point every registered release waiter is told
//! exactly once.
//!
//! Every public call takes the single broker lock for its whole duration
//! and never blocks on anything else while holding it.

use crate::*;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use syzygy_api::{ComponentId, MatchTag, Port};

/// Told when a service a component was watching has been released.
///
/// Invoked with the broker lock held, from inside `remove_component`.
/// Implementations must not block and must not call back into the broker.
pub trait ReleaseNotifier: 'static + Send + Sync {
    /// `component` asked (with `tag`) to hear about `service_name`,
    /// which has now been released.
    fn service_released(
        &self,
        component: ComponentId,
        tag: MatchTag,
        service_name: &str,
    );
}

/// Trait-object [ReleaseNotifier].
pub type DynReleaseNotifier = Arc<dyn ReleaseNotifier>;

/// Everything needed to reserve ports for a new service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRequest {
    /// Name of the to-be-offered service.
    pub service_name: String,

    /// Host the service will run on.
    pub host: String,

    /// Networks the host is attached to.
    pub networks: Vec<String>,

    /// The host's address on each of `networks`.
    pub addresses: Vec<String>,

    /// How many ports the service needs.
    pub port_count: usize,

    /// First port of the host's port block.
    pub first_port: Port,

    /// Size of the host's port block.
    pub block_size: u16,
}

/// What the broker knows about one component.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRecord {
    /// The host the component runs on.
    pub host: String,

    /// Services reserved but not yet confirmed.
    pub temporary_tags: Vec<String>,

    /// Services confirmed.
    pub used_tags: Vec<String>,

    /// Services whose release this component wants to hear about.
    pub release_tags: Vec<String>,

    /// Ports reserved but not yet bound.
    pub temporary_ports: Vec<Port>,

    /// Ports bound.
    pub used_ports: Vec<Port>,
}

impl ComponentRecord {
    fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            ..Default::default()
        }
    }
}

/// A point-in-time view of the whole broker.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerSnapshot {
    /// Port pools, by host.
    pub hosts: BTreeMap<String, ComputerPortPool>,

    /// Component records, by id.
    pub components: BTreeMap<ComponentId, ComponentRecord>,

    /// Services awaiting confirmation.
    pub temporary_services: Vec<Service>,

    /// Live services.
    pub used_services: Vec<Service>,

    /// Unanswered discovery requests, newest first.
    pub pending_requests: Vec<PendingServiceRequest>,
}

#[derive(Default)]
struct BrokerState {
    hosts: HashMap<String, ComputerPortPool>,
    components: HashMap<ComponentId, ComponentRecord>,
    temporary: BTreeMap<String, Service>,
    used: BTreeMap<String, Service>,
    pending: VecDeque<PendingServiceRequest>,
}

/// The connection broker.
#[derive(Default)]
pub struct ConnectionBroker {
    state: Mutex<BrokerState>,
    notifier: Option<DynReleaseNotifier>,
}

impl std::fmt::Debug for ConnectionBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionBroker")
            .field("has_notifier", &self.notifier.is_some())
            .finish()
    }
}

impl ConnectionBroker {
    /// A broker without release notification.
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker that reports releases to `notifier`.
    pub fn with_release_notifier(notifier: DynReleaseNotifier) -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            notifier: Some(notifier),
        }
    }

    /// Reserve ports for a new, not yet discoverable service.
    ///
    /// Creates or resizes the host's port pool to match the request's
    /// block. Nothing is reserved unless all requested ports are.
    pub fn request_ports(
        &self,
        component: ComponentId,
        req: &PortRequest,
    ) -> BrokerResult<Service> {
        if req.port_count == 0 || req.port_count > MAX_SERVICE_PORTS {
            return Err(BrokerError::InvalidPortCount(req.port_count));
        }

        let mut st = self.state.lock().unwrap();
        let BrokerState {
            hosts,
            components,
            temporary,
            used,
            ..
        } = &mut *st;

        if temporary.contains_key(&req.service_name)
            || used.contains_key(&req.service_name)
        {
            // master/slave apps probe for a name to decide who is master
            tracing::debug!(
                service = %req.service_name,
                "service already registered"
            );
            return Err(BrokerError::ServiceExists(req.service_name.clone()));
        }

        let pool = hosts.entry(req.host.clone()).or_insert_with(|| {
            ComputerPortPool::new(
                req.host.clone(),
                req.networks.clone(),
                req.addresses.clone(),
                req.first_port,
                req.block_size,
            )
        });

        if pool.resize(req.first_port, req.block_size) {
            tracing::debug!(
                host = %req.host,
                first_port = req.first_port,
                block_size = req.block_size,
                "port block resized"
            );
        }

        let ports = match pool.allocate(req.port_count) {
            Some(ports) => ports,
            None => {
                let err = BrokerError::PortsExhausted {
                    host: req.host.clone(),
                    requested: req.port_count,
                    available: pool.available().len(),
                };
                tracing::warn!(?err);
                return Err(err);
            }
        };

        let record = components
            .entry(component)
            .or_insert_with(|| ComponentRecord::new(&req.host));
        record.temporary_tags.push(req.service_name.clone());
        record.temporary_ports.extend(ports.iter().copied());

        let service = Service {
            name: req.service_name.clone(),
            info: String::new(),
            host: req.host.clone(),
            component,
            networks: req.networks.clone(),
            addresses: req.addresses.clone(),
            ports,
            release_waiters: Vec::new(),
        };

        temporary.insert(req.service_name.clone(), service.clone());

        Ok(service)
    }

    /// The service could not bind its ports. Return them to the pool and
    /// hand out a fresh batch of the same size.
    ///
    /// If the fresh batch cannot be had, the temporary service is
    /// withdrawn entirely.
    pub fn retry_ports(
        &self,
        component: ComponentId,
        service_name: &str,
    ) -> BrokerResult<Service> {
        let mut st = self.state.lock().unwrap();
        let BrokerState {
            hosts,
            components,
            temporary,
            ..
        } = &mut *st;

        let service = owned_temporary(temporary, component, service_name)?;
        let pool = hosts
            .get_mut(&service.host)
            .ok_or_else(|| BrokerError::NoHostRecord(service.host.clone()))?;
        let record = components
            .get_mut(&component)
            .ok_or(BrokerError::NoComponentRecord(component))?;

        let old = std::mem::take(&mut service.ports);
        pool.release_temporary(&old);
        record.temporary_ports.retain(|p| !old.contains(p));

        match pool.allocate(old.len()) {
            Some(ports) => {
                record.temporary_ports.extend(ports.iter().copied());
                service.ports = ports;
                Ok(service.clone())
            }
            None => {
                let err = BrokerError::PortsExhausted {
                    host: service.host.clone(),
                    requested: old.len(),
                    available: pool.available().len(),
                };
                tracing::warn!(?err, "withdrawing service after failed retry");
                record.temporary_tags.retain(|t| t != service_name);
                temporary.remove(service_name);
                Err(err)
            }
        }
    }

    /// The service has bound its ports. Make it discoverable.
    pub fn confirm_ports(
        &self,
        component: ComponentId,
        service_name: &str,
    ) -> BrokerResult<()> {
        let mut st = self.state.lock().unwrap();
        let BrokerState {
            hosts,
            components,
            temporary,
            used,
            ..
        } = &mut *st;

        let service = owned_temporary(temporary, component, service_name)?;
        let pool = hosts
            .get_mut(&service.host)
            .ok_or_else(|| BrokerError::NoHostRecord(service.host.clone()))?;
        let record = components
            .get_mut(&component)
            .ok_or(BrokerError::NoComponentRecord(component))?;

        pool.confirm(&service.ports);

        record.temporary_ports.retain(|p| !service.ports.contains(p));
        record.used_ports.extend(service.ports.iter().copied());
        record.temporary_tags.retain(|t| t != service_name);
        record.used_tags.push(service_name.to_string());

        if let Some(service) = temporary.remove(service_name) {
            tracing::info!(
                service = %service_name,
                host = %service.host,
                ports = ?service.ports,
                "service confirmed"
            );
            used.insert(service_name.to_string(), service);
        }

        Ok(())
    }

    /// Look up a live service, reachable on one of `networks` (most
    /// preferred first).
    ///
    /// If the service is not live and `is_async` is set, the request is
    /// remembered so it can be answered once the service is confirmed
    /// (see [ConnectionBroker::take_pending_requests]). A live service
    /// on no shared network is a final answer and is never queued.
    pub fn request_service(
        &self,
        component: ComponentId,
        host: &str,
        tag: MatchTag,
        service_name: &str,
        networks: &[String],
        is_async: bool,
    ) -> BrokerResult<ServiceAddress> {
        let mut st = self.state.lock().unwrap();
        let st = &mut *st;

        if !st.used.contains_key(service_name) {
            if is_async {
                // newest first, these are expected to be filled quickly
                st.pending.push_front(PendingServiceRequest {
                    component,
                    host: host.to_string(),
                    tag,
                    service_name: service_name.to_string(),
                    networks: networks.to_vec(),
                });
            }
            return Err(BrokerError::NotOffered(service_name.to_string()));
        }

        let service = &st.used[service_name];

        match service.address_on(networks) {
            Some(address) => Ok(ServiceAddress {
                address: address.to_string(),
                ports: service.ports.clone(),
            }),
            None => {
                Err(BrokerError::NoCompatibleNetwork(service_name.to_string()))
            }
        }
    }

    /// Ask to be told when a live service is released. Returns false, and
    /// registers nothing, if the service is not live.
    pub fn register_release_notification(
        &self,
        component: ComponentId,
        tag: MatchTag,
        host: &str,
        service_name: &str,
    ) -> bool {
        let mut st = self.state.lock().unwrap();
        let BrokerState {
            components, used, ..
        } = &mut *st;

        let service = match used.get_mut(service_name) {
            Some(service) => service,
            None => return false,
        };

        components
            .entry(component)
            .or_insert_with(|| ComponentRecord::new(host))
            .release_tags
            .push(service_name.to_string());

        service.release_waiters.push(ReleaseWaiter { component, tag });

        true
    }

    /// A component has exited. Drop its pending requests, release its
    /// services (notifying waiters), withdraw it from other services'
    /// waiter lists and return its ports. Removing an unknown component
    /// is a no-op.
    pub fn remove_component(&self, component: ComponentId) {
        let mut st = self.state.lock().unwrap();

        st.pending.retain(|r| r.component != component);

        let record = match st.components.remove(&component) {
            Some(record) => record,
            None => {
                // e.g. a command line tool that never offered anything
                tracing::trace!(%component, "no broker record on removal");
                return;
            }
        };

        for name in record.temporary_tags.iter().chain(record.used_tags.iter())
        {
            self.remove_service(&mut st, name);
        }

        for name in record.release_tags.iter() {
            if let Some(service) = st.used.get_mut(name) {
                service.release_waiters.retain(|w| w.component != component);
            }
        }

        match st.hosts.get_mut(&record.host) {
            Some(pool) => {
                pool.release_temporary(&record.temporary_ports);
                pool.release_used(&record.used_ports);
            }
            None => {
                tracing::error!(
                    %component,
                    host = %record.host,
                    "no port pool for removed component's host"
                );
            }
        }

        tracing::debug!(%component, "component removed");
    }

    /// Caller holds the broker lock.
    fn remove_service(&self, st: &mut BrokerState, service_name: &str) {
        let service = match st.used.remove(service_name) {
            Some(service) => service,
            None => match st.temporary.remove(service_name) {
                Some(service) => service,
                None => return,
            },
        };

        for waiter in service.release_waiters.iter() {
            if let Some(notifier) = &self.notifier {
                notifier.service_released(
                    waiter.component,
                    waiter.tag,
                    service_name,
                );
            }

            if let Some(record) = st.components.get_mut(&waiter.component) {
                record.release_tags.retain(|t| t != service_name);
            }
        }

        tracing::debug!(service = %service_name, "service released");
    }

    /// The info string of a temporary or used service.
    pub fn get_service_info(&self, service_name: &str) -> Option<String> {
        let st = self.state.lock().unwrap();
        st.temporary
            .get(service_name)
            .or_else(|| st.used.get(service_name))
            .map(|s| s.info.clone())
    }

    /// Set the info string of a temporary or used service. Only its owner
    /// may do this.
    pub fn set_service_info(
        &self,
        component: ComponentId,
        service_name: &str,
        info: &str,
    ) -> BrokerResult<()> {
        let mut st = self.state.lock().unwrap();
        let BrokerState {
            temporary, used, ..
        } = &mut *st;

        let service = match temporary.get_mut(service_name) {
            Some(service) => service,
            None => used.get_mut(service_name).ok_or_else(|| {
                BrokerError::NotOffered(service_name.to_string())
            })?,
        };

        if service.component != component {
            return Err(BrokerError::NotOwner {
                service: service_name.to_string(),
                owner: service.component,
                caller: component,
            });
        }

        service.info = info.to_string();
        Ok(())
    }

    /// Is the name currently temporary or used?
    pub fn check_service(&self, service_name: &str) -> bool {
        let st = self.state.lock().unwrap();
        st.temporary.contains_key(service_name)
            || st.used.contains_key(service_name)
    }

    /// Names of all live services.
    pub fn get_service_names(&self) -> Vec<String> {
        self.state.lock().unwrap().used.keys().cloned().collect()
    }

    /// Hosts of all live services, in [Self::get_service_names] order.
    pub fn get_service_computers(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .used
            .values()
            .map(|s| s.host.clone())
            .collect()
    }

    /// Owners of all live services, in [Self::get_service_names] order.
    pub fn get_service_components(&self) -> Vec<ComponentId> {
        self.state
            .lock()
            .unwrap()
            .used
            .values()
            .map(|s| s.component)
            .collect()
    }

    /// The owner of a live service.
    pub fn get_service_component_id(
        &self,
        service_name: &str,
    ) -> Option<ComponentId> {
        self.state
            .lock()
            .unwrap()
            .used
            .get(service_name)
            .map(|s| s.component)
    }

    /// Remove and return the pending requests for one service.
    pub fn take_pending_requests(
        &self,
        service_name: &str,
    ) -> Vec<PendingServiceRequest> {
        let mut st = self.state.lock().unwrap();
        let (taken, kept): (VecDeque<_>, VecDeque<_>) =
            std::mem::take(&mut st.pending)
                .into_iter()
                .partition(|r| r.service_name == service_name);
        st.pending = kept;
        taken.into()
    }

    /// A copy of every pending request, newest first.
    pub fn get_pending_requests(&self) -> Vec<PendingServiceRequest> {
        self.state.lock().unwrap().pending.iter().cloned().collect()
    }

    /// A copy of one host's port pool.
    pub fn port_pool(&self, host: &str) -> Option<ComputerPortPool> {
        self.state.lock().unwrap().hosts.get(host).cloned()
    }

    /// A copy of one component's record.
    pub fn component_record(
        &self,
        component: ComponentId,
    ) -> Option<ComponentRecord> {
        self.state
            .lock()
            .unwrap()
            .components
            .get(&component)
            .cloned()
    }

    /// A copy of everything.
    pub fn snapshot(&self) -> BrokerSnapshot {
        let st = self.state.lock().unwrap();
        BrokerSnapshot {
            hosts: st
                .hosts
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            components: st
                .components
                .iter()
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
            temporary_services: st.temporary.values().cloned().collect(),
            used_services: st.used.values().cloned().collect(),
            pending_requests: st.pending.iter().cloned().collect(),
        }
    }
}

/// Look up a temporary service and check who owns it.
fn owned_temporary<'a>(
    temporary: &'a mut BTreeMap<String, Service>,
    component: ComponentId,
    service_name: &str,
) -> BrokerResult<&'a mut Service> {
    let service = match temporary.get_mut(service_name) {
        Some(service) => service,
        None => {
            tracing::warn!(service = %service_name, "no such pending service");
            return Err(BrokerError::UnknownService(service_name.to_string()));
        }
    };

    if service.component != component {
        tracing::error!(
            service = %service_name,
            owner = %service.component,
            caller = %component,
            "unowned service"
        );
        return Err(BrokerError::NotOwner {
            service: service_name.to_string(),
            owner: service.component,
            caller: component,
        });
    }

    Ok(service)
}
