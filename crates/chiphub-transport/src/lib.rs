//! Transport abstraction layer for Chiphub.
//!
//! A connection is split into two owned halves right after the upgrade:
//! a [`FrameReader`] driven by exactly one inbound task and a
//! [`FrameWriter`] driven by exactly one outbound task. Nothing else ever
//! touches the socket.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{
    PendingWebSocket, WebSocketConnection, WebSocketTransport, WsReader, WsWriter,
};

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Limits applied to every accepted connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Largest inbound message (and frame) accepted from a peer, in bytes.
    /// Anything bigger is a [`TransportError::FrameTooLarge`].
    pub max_message_size: usize,

    /// Deadline for a single outbound write, including flush.
    pub write_wait: Duration,

    /// How long an accepted socket may take to finish the upgrade.
    pub handshake_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_size: 10_000,
            write_wait: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// The parts of the HTTP upgrade request the hub cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Request path, e.g. `/ws`.
    pub path: String,
    /// Decoded query parameters. Later duplicates win.
    pub query: HashMap<String, String>,
}

impl UpgradeRequest {
    /// Parses a request target such as `/ws?name=alice&room=lobby`.
    pub fn from_target(target: &str) -> Self {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        let query = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        Self {
            path: path.to_string(),
            query,
        }
    }

    /// Returns a query parameter, if present.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }
}

/// An inbound frame, after control frames the hub doesn't care about are
/// filtered out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text (or binary, lossily decoded) data message.
    Text(String),
    /// A keepalive response from the peer.
    Pong,
}

/// Accepts new incoming connections.
///
/// Accepting only takes the socket off the listener. The protocol upgrade
/// happens in [`Pending::upgrade`], so a peer that stalls mid-handshake
/// never holds up the accept loop.
pub trait Transport: Send + Sync + 'static {
    /// A socket that has been accepted but not yet upgraded.
    type Pending: Pending;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming socket.
    async fn accept(&mut self) -> Result<Self::Pending, Self::Error>;
}

/// An accepted socket waiting for its upgrade.
pub trait Pending: Send + 'static {
    /// The connection type produced by a successful upgrade.
    type Connection: Connection;
    /// The error type for the upgrade.
    type Error: std::error::Error + Send + Sync;

    /// Runs the upgrade handshake, bounded by the handshake timeout.
    async fn upgrade(self) -> Result<Self::Connection, Self::Error>;
}

/// A freshly upgraded connection, not yet split.
pub trait Connection: Send + 'static {
    /// The read half.
    type Reader: FrameReader;
    /// The write half.
    type Writer: FrameWriter;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Returns the upgrade request this connection was opened with.
    fn request(&self) -> &UpgradeRequest;

    /// Splits the connection into its single reader and single writer.
    fn split(self) -> (Self::Reader, Self::Writer);
}

/// The read half of a connection.
pub trait FrameReader: Send + 'static {
    /// The error type for read operations.
    type Error: std::error::Error + Send + Sync;

    /// Receives the next frame from the peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&mut self) -> Result<Option<Frame>, Self::Error>;
}

/// The write half of a connection. Every write is deadline-guarded.
pub trait FrameWriter: Send + 'static {
    /// The error type for write operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), Self::Error>;

    /// Sends a keepalive probe.
    async fn ping(&mut self) -> Result<(), Self::Error>;

    /// Sends a close frame and closes the socket.
    async fn close(&mut self) -> Result<(), Self::Error>;

    /// Closes the socket with a policy-violation close frame carrying
    /// `reason`. Used when the peer is refused after the upgrade.
    async fn reject(&mut self, reason: &str) -> Result<(), Self::Error>;
}
