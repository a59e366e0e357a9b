//! The service registration seam.

use crate::*;
use std::sync::Arc;

/// Acquires brokered ports on behalf of a service that wants to listen.
///
/// The handshake is three steps: get ports, bind them (asking for new
/// ones if binding fails), then confirm. A service only becomes
/// discoverable after it confirms, so nobody gets directed at a port
/// that is not yet accepting connections.
pub trait ServiceRegistrar: 'static + Send + Sync + std::fmt::Debug {
    /// Reserve `port_count` ports for `service_name` on the given routing
    /// channel. Fails if the name is already taken or the host has run
    /// out of ports.
    fn register_service(
        &self,
        service_name: &str,
        channel: &str,
        port_count: usize,
    ) -> SzgResult<Vec<Port>>;

    /// The previously handed out ports could not be bound. Give them back
    /// and get a fresh batch of the same size.
    fn request_new_ports(
        &self,
        service_name: &str,
        channel: &str,
        port_count: usize,
    ) -> SzgResult<Vec<Port>>;

    /// Report that `ports` have been bound and the service is live.
    fn confirm_ports(
        &self,
        service_name: &str,
        channel: &str,
        ports: &[Port],
    ) -> SzgResult<()>;

    /// Qualify a bare service name with this registrar's location,
    /// producing the name used as the broker key.
    fn create_complex_service_name(&self, service_name: &str) -> String;
}

/// Trait-object [ServiceRegistrar].
pub type DynServiceRegistrar = Arc<dyn ServiceRegistrar>;

/// The routing channels a service may be offered on.
pub const CHANNELS: &[&str] = &["default", "graphics", "sound", "input"];

/// Returns true if `channel` is one of [CHANNELS].
pub fn is_valid_channel(channel: &str) -> bool {
    CHANNELS.contains(&channel)
}
