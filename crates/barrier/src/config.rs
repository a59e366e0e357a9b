//! SyncDataServer configuration types.

/// What paces buffer swaps.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum SyncMode {
    /// Barrier releases drive swaps, `swap_buffers` does nothing.
    #[default]
    Auto,

    /// `swap_buffers` drives swaps and blocks through the barrier round.
    Manual,

    /// `swap_buffers` drives swaps, no barrier at all.
    NoSyncManual,
}

/// Configuration parameters for [SyncDataServer](crate::SyncDataServer).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Swap pacing.
    /// Default: auto.
    pub mode: SyncMode,

    /// In auto mode, with someone connected, the producer blocks once
    /// the back buffer holds more than this many bytes.
    /// Default: 300000.
    pub send_limit: usize,

    /// How many brokered ports to try before giving up on listening.
    /// Default: 10.
    pub listen_tries: usize,

    /// The interface to listen on.
    /// Default: "0.0.0.0".
    pub interface: String,

    /// How long the acceptance thread sleeps when nobody is connecting.
    /// Default: 20ms.
    pub accept_poll_interval_ms: u32,

    /// How long a barrier round may wait for stragglers before it is
    /// released anyway.
    /// Default: 5 seconds.
    pub barrier_timeout_ms: u32,

    /// Pause before a barrier round when no remote peers are connected,
    /// to keep an unobserved producer from spinning.
    /// Default: 10ms.
    pub idle_sync_interval_ms: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl SyncConfig {
    /// Get a sync config suitable for testing.
    pub fn testing() -> Self {
        Self {
            mode: SyncMode::Auto,
            send_limit: 300_000,
            listen_tries: 10,
            interface: "127.0.0.1".into(),
            accept_poll_interval_ms: 5,
            barrier_timeout_ms: 200,
            idle_sync_interval_ms: 10,
        }
    }

    /// Get a sync config suitable for production.
    pub fn production() -> Self {
        Self {
            mode: SyncMode::Auto,
            send_limit: 300_000,
            listen_tries: 10,
            interface: "0.0.0.0".into(),
            accept_poll_interval_ms: 20,
            barrier_timeout_ms: 1000 * 5,
            idle_sync_interval_ms: 10,
        }
    }

    /// Use `mode`.
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    /// Get the accept poll interval.
    pub fn accept_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.accept_poll_interval_ms as u64)
    }

    /// Get the barrier timeout.
    pub fn barrier_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.barrier_timeout_ms as u64)
    }

    /// Get the idle sync interval.
    pub fn idle_sync_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.idle_sync_interval_ms as u64)
    }
}

/// Module-level configuration for the sync data server.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncModConfig {
    /// SyncDataServer configuration.
    pub sync_data_server: SyncConfig,
}

impl syzygy_api::config::ModConfig for SyncModConfig {}
