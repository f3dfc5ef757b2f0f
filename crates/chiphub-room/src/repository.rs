//! Persistence collaborators.
//!
//! The hub never talks to a database directly. Rooms are hydrated from and
//! persisted through a [`RoomRepository`]; the user directory goes through a
//! [`UserRepository`]. [`MemoryRoomRepository`] and [`MemoryUserRepository`]
//! are complete in-process implementations, used by the demo and the tests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use chiphub_protocol::{RoomId, RoomRef};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{Balances, RepositoryError};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A room as stored by the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRecord {
    pub id: RoomId,
    pub name: String,
    pub uri: String,
    pub private: bool,
    pub pot: u64,
    pub balances: Balances,
}

impl RoomRecord {
    /// The wire reference for this room.
    pub fn to_ref(&self) -> RoomRef {
        RoomRef {
            id: self.id.clone(),
            name: self.name.clone(),
            uri: self.uri.clone(),
            private: self.private,
        }
    }
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub username: String,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Durable storage for rooms and their ledgers.
pub trait RoomRepository: Send + Sync + 'static {
    /// Creates a fresh room with an empty ledger.
    fn create(
        &self,
        name: &str,
        private: bool,
    ) -> impl Future<Output = Result<RoomRecord, RepositoryError>> + Send;

    fn find_by_name(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<RoomRecord>, RepositoryError>> + Send;

    fn find_by_uri(
        &self,
        uri: &str,
    ) -> impl Future<Output = Result<Option<RoomRecord>, RepositoryError>> + Send;

    /// Overwrites the stored pot and balances of room `id`.
    fn persist(
        &self,
        id: &RoomId,
        pot: u64,
        balances: &Balances,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

/// The user directory.
pub trait UserRepository: Send + Sync + 'static {
    fn list_all(
        &self,
    ) -> impl Future<Output = Result<Vec<UserRecord>, RepositoryError>> + Send;

    fn remove(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

/// Derives a URI slug from a room name: lowercase, runs of anything that
/// isn't alphanumeric collapsed to `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

/// An in-process [`RoomRepository`]. Names are matched case-insensitively.
#[derive(Debug, Default)]
pub struct MemoryRoomRepository {
    rooms: Mutex<HashMap<RoomId, RoomRecord>>,
    next_id: AtomicU64,
    fail_persist: AtomicBool,
    creates: AtomicUsize,
    persists: AtomicUsize,
}

impl MemoryRoomRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record as-is, replacing any record with the same id.
    pub async fn insert(&self, record: RoomRecord) {
        self.rooms.lock().await.insert(record.id.clone(), record);
    }

    /// Returns the stored record for `id`.
    pub async fn get(&self, id: &RoomId) -> Option<RoomRecord> {
        self.rooms.lock().await.get(id).cloned()
    }

    /// Makes every following `persist` fail until reset.
    pub fn set_fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }

    /// Number of rooms created through [`RoomRepository::create`].
    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Number of successful persists.
    pub fn persist_count(&self) -> usize {
        self.persists.load(Ordering::SeqCst)
    }
}

impl RoomRepository for MemoryRoomRepository {
    async fn create(
        &self,
        name: &str,
        private: bool,
    ) -> Result<RoomRecord, RepositoryError> {
        let mut rooms = self.rooms.lock().await;
        if rooms.values().any(|r| r.name.eq_ignore_ascii_case(name)) {
            return Err(RepositoryError::Conflict(name.to_string()));
        }

        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let record = RoomRecord {
            id: RoomId(format!("room-{n}")),
            name: name.to_string(),
            uri: slugify(name),
            private,
            pot: 0,
            balances: Balances::new(),
        };
        rooms.insert(record.id.clone(), record.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    async fn find_by_name(
        &self,
        name: &str,
    ) -> Result<Option<RoomRecord>, RepositoryError> {
        let rooms = self.rooms.lock().await;
        Ok(rooms
            .values()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn find_by_uri(
        &self,
        uri: &str,
    ) -> Result<Option<RoomRecord>, RepositoryError> {
        let rooms = self.rooms.lock().await;
        Ok(rooms.values().find(|r| r.uri == uri).cloned())
    }

    async fn persist(
        &self,
        id: &RoomId,
        pot: u64,
        balances: &Balances,
    ) -> Result<(), RepositoryError> {
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "persist disabled".into(),
            ));
        }
        let mut rooms = self.rooms.lock().await;
        let record = rooms
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(id.0.clone()))?;
        record.pot = pot;
        record.balances = balances.clone();
        self.persists.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// An in-process [`UserRepository`].
#[derive(Debug, Default)]
pub struct MemoryUserRepository {
    users: Mutex<Vec<UserRecord>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: Vec<UserRecord>) -> Self {
        Self {
            users: Mutex::new(users),
        }
    }
}

impl UserRepository for MemoryUserRepository {
    async fn list_all(&self) -> Result<Vec<UserRecord>, RepositoryError> {
        Ok(self.users.lock().await.clone())
    }

    async fn remove(&self, id: &str) -> Result<(), RepositoryError> {
        let mut users = self.users.lock().await;
        let before = users.len();
        users.retain(|u| u.id != id);
        if users.len() == before {
            return Err(RepositoryError::NotFound(id.to_string()));
        }
        Ok(())
    }
}
