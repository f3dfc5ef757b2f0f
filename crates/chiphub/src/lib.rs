//! # Chiphub
//!
//! A real-time, room-scoped broadcast hub for multiplayer chip tracking.
//!
//! Clients hold a WebSocket open, join named rooms, chat, and move chips
//! between their balance and the room's pot. Every room is an actor, so
//! ledger operations are applied one at a time and can never overdraw.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use chiphub::prelude::*;
//!
//! # async fn start() -> Result<(), HubError> {
//! chiphub::init_tracing();
//! let server = HubServerBuilder::new()
//!     .bind("0.0.0.0:8080")
//!     .build(
//!         NameAuthenticator,
//!         Arc::new(MemoryRoomRepository::new()),
//!         Arc::new(MemoryUserRepository::new()),
//!     )
//!     .await?;
//! server.run().await
//! # }
//! ```
//!
//! Clients connect to `ws://host/?name=alice&room=lobby` and exchange
//! JSON [`Event`](chiphub_protocol::Event)s.

mod auth;
mod config;
mod connection;
mod error;
mod server;

pub use auth::{Authenticator, Credentials, NameAuthenticator, MAX_NAME_LEN};
pub use config::{ConnectionConfig, HubConfig};
pub use error::{AuthError, HubError};
pub use server::{HubServer, HubServerBuilder};

use tracing_subscriber::EnvFilter;

/// Installs a `tracing` subscriber filtered by `RUST_LOG`, defaulting to
/// `info`. Does nothing if a subscriber is already installed.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Everything needed to run a hub and talk to it.
pub mod prelude {
    pub use crate::{
        AuthError, Authenticator, ConnectionConfig, Credentials, HubConfig,
        HubError, HubServer, HubServerBuilder, NameAuthenticator,
    };
    pub use chiphub_bridge::{Broker, LocalBroker};
    pub use chiphub_protocol::{
        Action, ConnectionId, Event, Identity, RoomId, RoomRef,
    };
    pub use chiphub_room::{
        MemoryRoomRepository, MemoryUserRepository, Registry,
        RegistryConfig, RoomConfig, RoomRecord, RoomRepository, UserRecord,
        UserRepository,
    };
    pub use chiphub_transport::TransportConfig;
}
