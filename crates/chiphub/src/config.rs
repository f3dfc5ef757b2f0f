//! Hub configuration.

use std::time::Duration;

use chiphub_room::{RegistryConfig, DEFAULT_OUTBOUND_CAPACITY};
use chiphub_transport::TransportConfig;
use serde::{Deserialize, Serialize};

/// Per-connection timing and buffering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// How long the inbound loop waits for a pong before giving up.
    pub pong_wait: Duration,
    /// How often the outbound loop pings. Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Capacity of each client's outbound queue. A client whose queue is
    /// full when a room broadcasts is disconnected.
    pub outbound_capacity: usize,
}

impl ConnectionConfig {
    /// A config with the given `pong_wait` and a ping period of nine
    /// tenths of it.
    pub fn with_pong_wait(pong_wait: Duration) -> Self {
        Self {
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            ..Self::default()
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(54),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

/// Everything needed to start a hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Address the WebSocket listener binds to.
    pub bind: String,
    pub transport: TransportConfig,
    pub connection: ConnectionConfig,
    pub registry: RegistryConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            transport: TransportConfig::default(),
            connection: ConnectionConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.transport.max_message_size, 10_000);
        assert_eq!(cfg.transport.write_wait, Duration::from_secs(10));
        assert_eq!(cfg.connection.pong_wait, Duration::from_secs(60));
        assert_eq!(cfg.connection.ping_period, Duration::from_secs(54));
        assert_eq!(cfg.connection.outbound_capacity, 256);
        assert_eq!(cfg.registry.room.seat_chips, Some(1000));
    }

    #[test]
    fn test_ping_period_follows_pong_wait() {
        let cfg = ConnectionConfig::with_pong_wait(Duration::from_secs(10));
        assert_eq!(cfg.ping_period, Duration::from_secs(9));
    }
}
