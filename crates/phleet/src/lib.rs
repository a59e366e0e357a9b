#![deny(missing_docs)]
//! Syzygy phleet connection brokering.
//!
//! A phleet is the set of processes ("components") cooperating on one
//! cluster. Components that want to listen ask the directory server for
//! ports out of their host's configured port block, bind them, and then
//! confirm. Only confirmed services can be discovered by name, so a
//! client is never pointed at a port nobody is listening on yet.
//!
//! This crate holds the broker bookkeeping ([ConnectionBroker]), the
//! per-host port inventory ([ComputerPortPool]), a threaded request
//! dispatcher ([BrokerSrv]) and a [syzygy_api::ServiceRegistrar] for
//! services living in the same process as the broker
//! ([InProcessRegistrar]).
//!
//! For the request lifecycle, see [lifecycle].

/// This is a documentation module describing the broker request lifecycle.
///
/// #### 1. Offering a service
///
/// ```text
/// component              broker
///     | RegisterService     |
///     |-------------------->|  ports move available -> temporary
///     |<--------------------|  Ports
///     |  bind ports...      |
///     | RetryPorts (opt.)   |  old ports return to the back of the list
///     |-------------------->|
///     |<--------------------|  Ports
///     | ConfirmPorts        |
///     |-------------------->|  ports move temporary -> used
///     |<--------------------|  Confirmed
/// ```
///
/// - A service name is unique across temporary and used services.
/// - A request for zero ports, or more than [MAX_SERVICE_PORTS], fails.
/// - A request that cannot be fully satisfied reserves nothing.
///
/// #### 2. Finding a service
///
/// - `RequestService` with `is_async = false` is answered immediately.
/// - With `is_async = true` a miss is remembered, and answered right after
///   the matching `ConfirmPorts`.
/// - A live service that shares no network with the requester is a final
///   answer, it is never remembered.
///
/// #### 3. Releasing a service
///
/// - `WatchRelease` on a live service registers the watcher, on anything
///   else it is answered with `Released` at once.
/// - `ComponentExited` destroys every service of the component. Each
///   watcher gets exactly one `Released`. The component's own watches and
///   pending requests are dropped and its ports return to the pool.
#[cfg(doc)]
pub mod lifecycle {}

mod port_pool;
pub use port_pool::*;

mod service;
pub use service::*;

mod error;
pub use error::*;

mod broker;
pub use broker::*;

mod config;
pub use config::*;

mod server;
pub use server::*;

mod registrar;
pub use registrar::*;

#[cfg(test)]
mod test;
