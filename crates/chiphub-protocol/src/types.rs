//! Wire types: the JSON events clients and the hub exchange.
//!
//! Every frame carries one or more [`Event`]s. An event is a flat JSON
//! object whose `action` field selects how the rest is interpreted:
//!
//! ```json
//! {"action":"add-pot","message":"","pot":300,"target":{"name":"lobby"}}
//! ```

use std::fmt;

use chiphub_transport::ConnectionId;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Identifier of a room, as assigned by the room repository.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Who sent an event. Always filled in by the hub from the owning
/// connection; whatever a client puts here is discarded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// The connection the event came from.
    pub id: ConnectionId,
    /// Display name, also the key into a room's balances.
    pub name: String,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// A reference to a room on the wire.
///
/// Clients usually only fill in `name`; the hub fills in everything when it
/// sends a reference back.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoomRef {
    #[serde(default)]
    pub id: RoomId,
    pub name: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub private: bool,
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// The closed set of event kinds.
///
/// Anything else on the wire decodes as [`Action::Unknown`] so the
/// connection can log and drop it instead of failing the whole frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Chat text to a room.
    SendMessage,
    /// Join (or create) the room named in `message`.
    JoinRoom,
    /// Leave the room named in `message`.
    LeaveRoom,
    /// Open a private room with the user named in `message`.
    JoinRoomPrivate,
    /// Server → joiner: you are now in `target`.
    RoomJoined,
    /// Server → others: `sender` came online or joined the room.
    UserJoin,
    /// Server → others: `sender` went away or left the room.
    UserLeft,
    /// Move `pot` chips from the sender's balance into the pot.
    AddPot,
    /// Move `pot` chips from the pot to the sender's balance.
    RetrievePot,
    /// Server → room: the ledger changed.
    UpdatePot,
    /// Server → actor: a pot operation was refused, nothing changed.
    PotRejected,
    /// Any action string the hub doesn't know.
    #[serde(other)]
    Unknown,
}

impl Action {
    /// Returns `true` for actions a client is allowed to send.
    pub fn is_client_action(self) -> bool {
        matches!(
            self,
            Self::SendMessage
                | Self::JoinRoom
                | Self::LeaveRoom
                | Self::JoinRoomPrivate
                | Self::AddPot
                | Self::RetrievePot
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SendMessage => "send-message",
            Self::JoinRoom => "join-room",
            Self::LeaveRoom => "leave-room",
            Self::JoinRoomPrivate => "join-room-private",
            Self::RoomJoined => "room-joined",
            Self::UserJoin => "user-join",
            Self::UserLeft => "user-left",
            Self::AddPot => "add-pot",
            Self::RetrievePot => "retrieve-pot",
            Self::UpdatePot => "update-pot",
            Self::PotRejected => "pot-rejected",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One event on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub action: Action,

    /// Chat text, a room name for join/leave, or a user name for private
    /// invites.
    #[serde(default)]
    pub message: String,

    /// Chip amount. Signed so that a negative request decodes and can be
    /// refused explicitly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pot: Option<i64>,

    /// The actor's balance after an `update-pot`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<RoomRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Identity>,
}

impl Event {
    /// Creates an event with only an action and message text.
    pub fn new(action: Action, message: impl Into<String>) -> Self {
        Self {
            action,
            message: message.into(),
            pot: None,
            balance: None,
            target: None,
            sender: None,
        }
    }

    /// Sets the target room.
    pub fn with_target(mut self, target: RoomRef) -> Self {
        self.target = Some(target);
        self
    }

    /// Sets the sender.
    pub fn with_sender(mut self, sender: Identity) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Sets the chip amount.
    pub fn with_pot(mut self, pot: i64) -> Self {
        self.pot = Some(pot);
        self
    }

    /// `user-join` / `user-left` presence notice for `who`.
    pub fn presence(action: Action, who: Identity) -> Self {
        Self::new(action, who.name.clone()).with_sender(who)
    }

    /// Name of the room this event addresses, if any.
    pub fn target_name(&self) -> Option<&str> {
        self.target.as_ref().map(|t| t.name.as_str())
    }
}

/// Collapses a raw inbound frame onto one line and trims it.
pub fn normalize_frame(raw: &str) -> String {
    raw.replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
        .trim()
        .to_string()
}

// =========================================================================
// Tests
// =========================================================================
