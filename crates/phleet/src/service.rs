//! Service records.

use syzygy_api::{ComponentId, MatchTag, Port};

/// The most ports a single service may hold.
pub const MAX_SERVICE_PORTS: usize = 10;

/// A component waiting to hear that a service went away.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseWaiter {
    /// The component to notify.
    pub component: ComponentId,

    /// The tag of the component's original request.
    pub tag: MatchTag,
}

/// One named network endpoint offered by a component.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// The (location-qualified) service name.
    pub name: String,

    /// Free-form text the owner publishes about the service.
    pub info: String,

    /// The host the service runs on.
    pub host: String,

    /// The component offering the service.
    pub component: ComponentId,

    /// Networks the service is reachable on.
    pub networks: Vec<String>,

    /// Address on each of `networks`, index for index.
    pub addresses: Vec<String>,

    /// The brokered ports, at most [MAX_SERVICE_PORTS].
    pub ports: Vec<Port>,

    /// Components to notify on release.
    pub release_waiters: Vec<ReleaseWaiter>,
}

impl Service {
    /// Find the address of this service on the first of `preferred`
    /// networks it is reachable on. The caller's order wins.
    pub fn address_on(&self, preferred: &[String]) -> Option<&str> {
        preferred.iter().find_map(|net| {
            let idx = self.networks.iter().position(|n| n == net)?;
            self.addresses.get(idx).map(String::as_str)
        })
    }
}

/// Where to connect to a service.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAddress {
    /// Address on the matched network.
    pub address: String,

    /// All of the service's ports.
    pub ports: Vec<Port>,
}

/// A discovery request that could not be answered yet.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingServiceRequest {
    /// The requesting component.
    pub component: ComponentId,

    /// The host the requester runs on.
    pub host: String,

    /// The requester's correlation tag.
    pub tag: MatchTag,

    /// The requested service.
    pub service_name: String,

    /// Networks the requester can use, most preferred first.
    pub networks: Vec<String>,
}
