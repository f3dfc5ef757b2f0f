//! Unified error type for the hub.

use chiphub_bridge::BridgeError;
use chiphub_protocol::ProtocolError;
use chiphub_room::RoomError;
use chiphub_transport::TransportError;

/// Why a client's credentials were refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// A required handshake parameter was absent or blank.
    #[error("missing {0}")]
    Missing(&'static str),

    /// The credentials were present but not accepted.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A room or registry error.
    #[error(transparent)]
    Room(#[from] RoomError),

    /// The distribution bridge failed to start.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// The handshake was refused.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
}
