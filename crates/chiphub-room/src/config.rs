//! Room and registry configuration.

use serde::{Deserialize, Serialize};

/// Configuration shared by every room actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Capacity of each room's command mailbox.
    pub mailbox_size: usize,

    /// Chips granted to a joiner whose name has no balance in the room yet.
    /// `None` leaves newcomers untracked.
    pub seat_chips: Option<u64>,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            mailbox_size: 64,
            seat_chips: Some(1000),
        }
    }
}

/// Configuration for the registry actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Capacity of the registry's command mailbox.
    pub mailbox_size: usize,

    /// Handed to every room the registry spawns.
    pub room: RoomConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            mailbox_size: 256,
            room: RoomConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let cfg: RegistryConfig =
            serde_json::from_str(r#"{"room":{"seat_chips":null}}"#).unwrap();
        assert_eq!(cfg.mailbox_size, 256);
        assert_eq!(cfg.room.mailbox_size, 64);
        assert_eq!(cfg.room.seat_chips, None);
    }
}
