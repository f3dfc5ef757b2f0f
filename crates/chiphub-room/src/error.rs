//! Error types for the room layer.

use chiphub_protocol::{ConnectionId, RoomId};

/// A refused ledger operation. Nothing was mutated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// Amounts must be strictly positive.
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(i64),

    /// The player doesn't have enough chips to put in.
    #[error("{name} has {balance} chips, cannot bet {requested}")]
    InsufficientBalance {
        name: String,
        balance: u64,
        requested: u64,
    },

    /// The pot doesn't hold enough chips to take out.
    #[error("pot holds {pot} chips, cannot retrieve {requested}")]
    InsufficientPot { pot: u64, requested: u64 },

    /// The result would not fit in a `u64`.
    #[error("chip count overflow")]
    Overflow,
}

/// Errors reported by a room or user repository.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    /// No record with that key.
    #[error("record not found: {0}")]
    NotFound(String),

    /// A record with that key already exists.
    #[error("record already exists: {0}")]
    Conflict(String),

    /// The backing store could not be reached or refused the write.
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur during room and registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room does not exist (or no longer exists).
    #[error("room {0} not found")]
    NotFound(String),

    /// Room names must contain something besides whitespace.
    #[error("invalid room name {0:?}")]
    InvalidName(String),

    /// The connection is not a member of this room.
    #[error("{0} is not in room {1}")]
    NotInRoom(ConnectionId, RoomId),

    /// A pot operation was refused.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The repository failed; for ledger ops the mutation was not applied.
    #[error("persistence failed: {0}")]
    Repository(#[from] RepositoryError),

    /// The room's mailbox is closed; the actor has stopped.
    #[error("room {0} is unavailable")]
    Unavailable(RoomId),

    /// The registry's mailbox is closed.
    #[error("room registry is unavailable")]
    RegistryUnavailable,
}
