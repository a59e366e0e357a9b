//! Connection broker errors.

use crate::MAX_SERVICE_PORTS;
use syzygy_api::{ComponentId, SzgError};

/// Why a broker operation did not go through.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// The name is already temporary or used.
    #[error("service {0:?} is already registered")]
    ServiceExists(String),

    /// Zero ports, or more than a service may hold.
    #[error(
        "a service needs between 1 and {max} ports, not {0}",
        max = MAX_SERVICE_PORTS
    )]
    InvalidPortCount(usize),

    /// The host does not have enough available ports.
    #[error(
        "host {host:?} has {available} available ports, {requested} requested"
    )]
    PortsExhausted {
        /// The host.
        host: String,
        /// Ports asked for.
        requested: usize,
        /// Ports that were available.
        available: usize,
    },

    /// No temporary service has this name.
    #[error("no pending service named {0:?}")]
    UnknownService(String),

    /// The service belongs to someone else.
    #[error("service {service:?} is owned by {owner}, not {caller}")]
    NotOwner {
        /// The service.
        service: String,
        /// Its owner.
        owner: ComponentId,
        /// Who asked.
        caller: ComponentId,
    },

    /// Internal bookkeeping is missing the host's port pool.
    #[error("no port pool for host {0:?}")]
    NoHostRecord(String),

    /// Internal bookkeeping is missing the component.
    #[error("no record of {0}")]
    NoComponentRecord(ComponentId),

    /// No live service has this name.
    #[error("service {0:?} is not currently offered")]
    NotOffered(String),

    /// The service is live but shares no network with the caller.
    #[error("service {0:?} is not reachable on any requested network")]
    NoCompatibleNetwork(String),
}

impl BrokerError {
    /// Misses that are a normal outcome of components racing each other
    /// and should not be reported as failures.
    pub fn is_expected_miss(&self) -> bool {
        matches!(
            self,
            Self::ServiceExists(_)
                | Self::NotOffered(_)
                | Self::NoCompatibleNetwork(_)
        )
    }
}

impl From<BrokerError> for SzgError {
    fn from(err: BrokerError) -> Self {
        SzgError::other_src("connection broker", err)
    }
}

/// Connection broker result type.
pub type BrokerResult<T> = Result<T, BrokerError>;
