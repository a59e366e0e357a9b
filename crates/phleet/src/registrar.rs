//! A [ServiceRegistrar] talking straight to a broker in the same process.

use crate::*;
use std::collections::HashMap;
use std::sync::Arc;
use syzygy_api::*;

/// Networks and matching addresses of one routing channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ChannelRoute {
    networks: Vec<String>,
    addresses: Vec<String>,
}

/// Registers the services of one component on one host with a
/// [ConnectionBroker] it shares memory with.
#[derive(Debug)]
pub struct InProcessRegistrar {
    broker: Arc<ConnectionBroker>,
    component: ComponentId,
    host: String,
    user: String,
    location: Option<String>,
    first_port: Port,
    block_size: u16,
    routes: HashMap<String, ChannelRoute>,
}

impl InProcessRegistrar {
    /// A registrar with the stock `4700` / `200` port block and no
    /// channels configured.
    pub fn new(
        broker: Arc<ConnectionBroker>,
        component: ComponentId,
        host: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            component,
            host: host.into(),
            user: user.into(),
            location: None,
            first_port: 4700,
            block_size: 200,
            routes: HashMap::new(),
        }
    }

    /// Qualify service names with a location instead of the user name.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Use a different port block for this host.
    pub fn with_port_block(
        mut self,
        first_port: Port,
        block_size: u16,
    ) -> Self {
        self.first_port = first_port;
        self.block_size = block_size;
        self
    }

    /// Route `channel` over `networks`, reachable at `addresses`
    /// (index for index). Channels without a route use `default`.
    pub fn with_channel(
        mut self,
        channel: &str,
        networks: Vec<String>,
        addresses: Vec<String>,
    ) -> Self {
        self.routes.insert(
            channel.to_string(),
            ChannelRoute {
                networks,
                addresses,
            },
        );
        self
    }

    /// The component this registrar acts for.
    pub fn component(&self) -> ComponentId {
        self.component
    }

    fn route(&self, channel: &str) -> SzgResult<&ChannelRoute> {
        if !is_valid_channel(channel) {
            return Err(SzgError::other(format!(
                "invalid routing channel {channel:?}, \
                expected one of {CHANNELS:?}"
            )));
        }
        self.routes
            .get(channel)
            .or_else(|| self.routes.get("default"))
            .ok_or_else(|| {
                SzgError::other(format!("no networks for channel {channel:?}"))
            })
    }
}

impl ServiceRegistrar for InProcessRegistrar {
    fn register_service(
        &self,
        service_name: &str,
        channel: &str,
        port_count: usize,
    ) -> SzgResult<Vec<Port>> {
        let route = self.route(channel)?;
        let service = self.broker.request_ports(
            self.component,
            &PortRequest {
                service_name: service_name.to_string(),
                host: self.host.clone(),
                networks: route.networks.clone(),
                addresses: route.addresses.clone(),
                port_count,
                first_port: self.first_port,
                block_size: self.block_size,
            },
        )?;
        Ok(service.ports)
    }

    fn request_new_ports(
        &self,
        service_name: &str,
        channel: &str,
        port_count: usize,
    ) -> SzgResult<Vec<Port>> {
        self.route(channel)?;
        let service = self.broker.retry_ports(self.component, service_name)?;
        if service.ports.len() != port_count {
            tracing::warn!(
                service = %service_name,
                asked = port_count,
                got = service.ports.len(),
                "retry keeps the original port count"
            );
        }
        Ok(service.ports)
    }

    fn confirm_ports(
        &self,
        service_name: &str,
        channel: &str,
        ports: &[Port],
    ) -> SzgResult<()> {
        self.route(channel)?;
        tracing::debug!(service = %service_name, ?ports, "confirming");
        self.broker.confirm_ports(self.component, service_name)?;
        Ok(())
    }

    fn create_complex_service_name(&self, service_name: &str) -> String {
        match &self.location {
            Some(location) => format!("{location}/{service_name}"),
            None => format!("{service_name}/{}", self.user),
        }
    }
}
