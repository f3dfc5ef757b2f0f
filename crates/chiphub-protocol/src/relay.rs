//! Relay envelopes exchanged between hub instances over the bridge.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Event;

/// Identifies one hub process on the shared relay channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hub-{:016x}", self.0)
    }
}

/// Where an event entered this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// From a client connected to this instance. May be relayed.
    Local,
    /// Replayed from another instance. Never relayed again.
    Remote,
}

/// A room event worth telling other hub instances about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RelayEvent {
    /// `user` joined `room` on the origin instance.
    Join {
        room: String,
        private: bool,
        user: String,
    },
    /// `user` left `room` on the origin instance.
    Leave { room: String, user: String },
    /// `from` opened private `room` with `to`, who may live elsewhere.
    Invite {
        room: String,
        from: String,
        to: String,
    },
    /// A chat event broadcast in `room`.
    Chat { room: String, event: Event },
}

impl RelayEvent {
    /// The room this event concerns.
    pub fn room(&self) -> &str {
        match self {
            Self::Join { room, .. }
            | Self::Leave { room, .. }
            | Self::Invite { room, .. }
            | Self::Chat { room, .. } => room,
        }
    }
}

/// What actually travels on the relay channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    /// The instance that published the event.
    pub origin: InstanceId,
    pub event: RelayEvent,
}
