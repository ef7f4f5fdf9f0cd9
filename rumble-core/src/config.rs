//! Engine configuration, supplied explicitly by the embedding application.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::Deserialize;

/// Ports, groups, intervals and capacities. Every field has a default so a
/// partial TOML table (or `NetworkConfig::default()`) is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    /// Rumble TCP listen port (default 7963). 0 binds an ephemeral port.
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    /// Discovery beacon UDP port (default 7964).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    #[serde(default = "default_discovery_group")]
    pub discovery_group: Ipv4Addr,
    /// Firechat multicast port (default 7576).
    #[serde(default = "default_firechat_port")]
    pub firechat_port: u16,
    #[serde(default = "default_firechat_group")]
    pub firechat_group: Ipv4Addr,
    #[serde(default = "default_firechat_room")]
    pub firechat_room: String,
    #[serde(default = "default_beacon_interval_ms")]
    pub beacon_interval_ms: u64,
    /// Neighbour considered gone after this long without a beacon.
    #[serde(default = "default_neighbour_timeout_ms")]
    pub neighbour_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Per-peer dispatch queue capacity, fixed when the queue is created.
    #[serde(default = "default_dispatch_queue_capacity")]
    pub dispatch_queue_capacity: usize,
    /// Per-channel command queue capacity.
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,
    #[serde(default = "default_multicast_join_attempts")]
    pub multicast_join_attempts: u32,
    #[serde(default = "default_multicast_join_backoff_ms")]
    pub multicast_join_backoff_ms: u64,
    #[serde(default = "default_true")]
    pub enable_wifi: bool,
    #[serde(default = "default_true")]
    pub enable_firechat: bool,
}

fn default_tcp_port() -> u16 {
    7963
}
fn default_discovery_port() -> u16 {
    7964
}
fn default_discovery_group() -> Ipv4Addr {
    Ipv4Addr::new(239, 255, 42, 99)
}
fn default_firechat_port() -> u16 {
    7576
}
fn default_firechat_group() -> Ipv4Addr {
    Ipv4Addr::new(239, 192, 0, 1)
}
fn default_firechat_room() -> String {
    "#Nearby".to_string()
}
fn default_beacon_interval_ms() -> u64 {
    4_000
}
fn default_neighbour_timeout_ms() -> u64 {
    16_000
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_dispatch_queue_capacity() -> usize {
    10
}
fn default_command_queue_capacity() -> usize {
    64
}
fn default_multicast_join_attempts() -> u32 {
    10
}
fn default_multicast_join_backoff_ms() -> u64 {
    1_000
}
fn default_true() -> bool {
    true
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            tcp_port: default_tcp_port(),
            discovery_port: default_discovery_port(),
            discovery_group: default_discovery_group(),
            firechat_port: default_firechat_port(),
            firechat_group: default_firechat_group(),
            firechat_room: default_firechat_room(),
            beacon_interval_ms: default_beacon_interval_ms(),
            neighbour_timeout_ms: default_neighbour_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            dispatch_queue_capacity: default_dispatch_queue_capacity(),
            command_queue_capacity: default_command_queue_capacity(),
            multicast_join_attempts: default_multicast_join_attempts(),
            multicast_join_backoff_ms: default_multicast_join_backoff_ms(),
            enable_wifi: true,
            enable_firechat: true,
        }
    }
}

impl NetworkConfig {
    pub fn beacon_interval(&self) -> Duration {
        Duration::from_millis(self.beacon_interval_ms)
    }

    pub fn neighbour_timeout(&self) -> Duration {
        Duration::from_millis(self.neighbour_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn multicast_join_backoff(&self) -> Duration {
        Duration::from_millis(self.multicast_join_backoff_ms)
    }
}
