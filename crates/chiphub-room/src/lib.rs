//! Rooms, chip ledgers and the room registry for Chiphub.
//!
//! Each room runs as an isolated Tokio task (actor model) that owns its
//! membership and its [`Ledger`]. A single [`Registry`] task owns the set of
//! live rooms and global presence.
//!
//! # Key types
//!
//! - [`Registry`]: join-or-create by name, room lookup, presence, user
//!   directory
//! - [`RoomHandle`]: send commands to a running room actor
//! - [`ClientHandle`]: how rooms reach a connected client
//! - [`Ledger`]: pot and balances with overdraft-free operations
//! - [`RoomRepository`] / [`UserRepository`]: persistence collaborators,
//!   with in-memory implementations

mod client;
mod config;
mod error;
mod ledger;
mod registry;
mod repository;
mod room;

pub use client::{
    ClientControl, ClientHandle, ClientMailbox, DeliveryError, OutboundFrame,
    DEFAULT_OUTBOUND_CAPACITY,
};
pub use config::{RegistryConfig, RoomConfig};
pub use error::{LedgerError, RepositoryError, RoomError};
pub use ledger::{Balances, Ledger, LedgerUpdate, PotOp};
pub use registry::{private_room_name, DirectoryEntry, Registry};
pub use repository::{
    slugify, MemoryRoomRepository, MemoryUserRepository, RoomRecord,
    RoomRepository, UserRecord, UserRepository,
};
pub use room::{RelaySender, RoomHandle, RoomInfo};
