//! Node configuration

use serde::{Deserialize, Serialize};

/// Mesh control-plane configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Topology discovery period (milliseconds)
    pub topology_interval_ms: u64,
    /// Maximum peer age before staleness pruning (milliseconds)
    pub stale_threshold_ms: u64,
    /// Consecutive mesh-enable attempts before giving up
    pub enable_attempt_limit: u32,
    /// Connection-loss watchdog period (milliseconds)
    pub watchdog_ms: u64,
    /// Provisioning completion poll period (milliseconds)
    pub provision_poll_ms: u64,
    /// Vital-sign heartbeat period while connected (milliseconds)
    pub heartbeat_ms: u64,
    /// SSID prefix announced by the mesh transport
    pub ssid_prefix: String,
    /// Maximum mesh hop depth handed to the transport
    pub max_hops: u8,
    /// Inter-node communication channel port
    pub channel_port: u16,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            topology_interval_ms: 15_000,
            stale_threshold_ms: 30_000,
            enable_attempt_limit: 3,
            watchdog_ms: 300_000,
            provision_poll_ms: 500,
            heartbeat_ms: 300_000,
            ssid_prefix: "MESH".to_string(),
            max_hops: 4,
            channel_port: 49_152,
        }
    }
}

impl MeshConfig {
    pub fn with_topology_interval_ms(mut self, ms: u64) -> Self {
        self.topology_interval_ms = ms;
        self
    }

    pub fn with_stale_threshold_ms(mut self, ms: u64) -> Self {
        self.stale_threshold_ms = ms;
        self
    }

    pub fn with_enable_attempt_limit(mut self, limit: u32) -> Self {
        self.enable_attempt_limit = limit;
        self
    }

    pub fn with_watchdog_ms(mut self, ms: u64) -> Self {
        self.watchdog_ms = ms;
        self
    }

    pub fn with_provision_poll_ms(mut self, ms: u64) -> Self {
        self.provision_poll_ms = ms;
        self
    }

    pub fn with_heartbeat_ms(mut self, ms: u64) -> Self {
        self.heartbeat_ms = ms;
        self
    }
}
