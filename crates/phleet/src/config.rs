//! config types.

/// Configuration for running a BrokerSrv.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrokerSrvConfig {
    /// Worker thread count.
    ///
    /// Request handling only ever takes the broker lock briefly, but
    /// reply delivery goes through the outbox which may block on io,
    /// so it pays to have more workers than cpus.
    ///
    /// Defaults:
    /// - `testing = 2`
    /// - `production = 4 * cpu_count`
    pub worker_thread_count: usize,

    /// How many submitted requests may wait for a worker before
    /// `submit` blocks.
    ///
    /// Defaults:
    /// - `testing = 16`
    /// - `production = 1024`
    pub request_queue_len: usize,
}

impl Default for BrokerSrvConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl syzygy_api::config::ModConfig for BrokerSrvConfig {}

impl BrokerSrvConfig {
    /// Get a broker config suitable for testing.
    pub fn testing() -> Self {
        Self {
            worker_thread_count: 2,
            request_queue_len: 16,
        }
    }

    /// Get a broker config suitable for production.
    pub fn production() -> Self {
        Self {
            worker_thread_count: num_cpus::get() * 4,
            request_queue_len: 1024,
        }
    }
}
