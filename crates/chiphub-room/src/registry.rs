//! The registry: one actor owning the live room set and global presence.
//!
//! Joins are resolved inside the registry loop (live room, then the
//! repository, then create), and the client is registered with the room
//! before the next command is looked at. Two concurrent joins for an
//! unknown name therefore always land in the same room, and a room can't
//! be torn down between lookup and registration.

use std::collections::HashMap;
use std::sync::Arc;

use chiphub_protocol::{
    Action, Codec, ConnectionId, Event, JsonCodec, RelayEvent, RoomId,
    RoomRef,
};
use tokio::sync::{mpsc, oneshot};

use crate::room::{spawn_room, RelaySender};
use crate::{
    ClientHandle, RegistryConfig, RoomError, RoomHandle, RoomRecord,
    RoomRepository, UserRecord, UserRepository,
};

/// Name of the private room shared by two users. Order-independent.
pub fn private_room_name(a: &str, b: &str) -> String {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a <= b {
        format!("{a}+{b}")
    } else {
        format!("{b}+{a}")
    }
}

fn normalize_name(name: &str) -> Result<String, RoomError> {
    let normalized = name.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(RoomError::InvalidName(name.to_string()));
    }
    Ok(normalized)
}

/// A user directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub user: UserRecord,
    /// Whether a connection with this username is live on this instance.
    pub online: bool,
}

enum RegistryCommand {
    Join {
        name: String,
        private: bool,
        client: ClientHandle,
        reply: oneshot::Sender<Result<RoomHandle, RoomError>>,
    },
    JoinPrivate {
        client: ClientHandle,
        peer: String,
        reply: oneshot::Sender<Result<RoomHandle, RoomError>>,
    },
    FindByName {
        name: String,
        reply: oneshot::Sender<Option<RoomHandle>>,
    },
    FindByUri {
        uri: String,
        reply: oneshot::Sender<Option<RoomHandle>>,
    },
    FindById {
        id: RoomId,
        reply: oneshot::Sender<Option<RoomHandle>>,
    },
    DeleteRoom {
        id: RoomId,
        reply: oneshot::Sender<bool>,
    },
    ListRooms {
        reply: oneshot::Sender<Vec<RoomRef>>,
    },
    Connect {
        client: ClientHandle,
    },
    Disconnect {
        id: ConnectionId,
    },
    FindClient {
        name: String,
        reply: oneshot::Sender<Option<ClientHandle>>,
    },
    Directory {
        reply: oneshot::Sender<Result<Vec<DirectoryEntry>, RoomError>>,
    },
    RemoveUser {
        id: String,
        reply: oneshot::Sender<Result<usize, RoomError>>,
    },
}

/// Handle to the registry actor. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Registry {
    sender: mpsc::Sender<RegistryCommand>,
}

impl Registry {
    /// Spawns the registry actor.
    ///
    /// `relay`, when set, receives every locally originated room event for
    /// the distribution bridge.
    pub fn spawn<R, U>(
        config: RegistryConfig,
        rooms: Arc<R>,
        users: Arc<U>,
        relay: Option<RelaySender>,
    ) -> Self
    where
        R: RoomRepository,
        U: UserRepository,
    {
        let (tx, rx) = mpsc::channel(config.mailbox_size);
        let (emptied_tx, emptied_rx) = mpsc::unbounded_channel();

        let actor = RegistryActor {
            config,
            rooms: HashMap::new(),
            clients: HashMap::new(),
            repo: rooms,
            users,
            codec: JsonCodec,
            receiver: rx,
            emptied_tx,
            emptied_rx,
            relay,
        };
        tokio::spawn(actor.run());

        Self { sender: tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(make(reply_tx))
            .await
            .map_err(|_| RoomError::RegistryUnavailable)?;
        reply_rx.await.map_err(|_| RoomError::RegistryUnavailable)
    }

    /// Joins `client` to the room called `name`, creating it if needed.
    ///
    /// On success the client also gets [`ClientControl::Joined`].
    ///
    /// [`ClientControl::Joined`]: crate::ClientControl::Joined
    pub async fn join(
        &self,
        name: &str,
        private: bool,
        client: ClientHandle,
    ) -> Result<RoomHandle, RoomError> {
        let name = name.to_string();
        self.request(|reply| RegistryCommand::Join {
            name,
            private,
            client,
            reply,
        })
        .await?
    }

    /// Opens the private room shared by `client` and `peer`.
    ///
    /// `peer` is pulled in directly when connected here, otherwise the
    /// invite goes out over the relay.
    pub async fn join_private(
        &self,
        client: ClientHandle,
        peer: &str,
    ) -> Result<RoomHandle, RoomError> {
        let peer = peer.to_string();
        self.request(|reply| RegistryCommand::JoinPrivate {
            client,
            peer,
            reply,
        })
        .await?
    }

    pub async fn find_by_name(
        &self,
        name: &str,
    ) -> Result<Option<RoomHandle>, RoomError> {
        let name = name.to_string();
        self.request(|reply| RegistryCommand::FindByName { name, reply })
            .await
    }

    pub async fn find_by_uri(
        &self,
        uri: &str,
    ) -> Result<Option<RoomHandle>, RoomError> {
        let uri = uri.to_string();
        self.request(|reply| RegistryCommand::FindByUri { uri, reply })
            .await
    }

    pub async fn find_by_id(
        &self,
        id: &RoomId,
    ) -> Result<Option<RoomHandle>, RoomError> {
        let id = id.clone();
        self.request(|reply| RegistryCommand::FindById { id, reply })
            .await
    }

    /// Shuts a live room down. Returns whether it was live.
    pub async fn delete_room(&self, id: &RoomId) -> Result<bool, RoomError> {
        let id = id.clone();
        self.request(|reply| RegistryCommand::DeleteRoom { id, reply })
            .await
    }

    /// References to every live room, sorted by name.
    pub async fn list_rooms(&self) -> Result<Vec<RoomRef>, RoomError> {
        self.request(|reply| RegistryCommand::ListRooms { reply }).await
    }

    /// Marks `client` online and announces it.
    pub async fn connect(&self, client: ClientHandle) -> Result<(), RoomError> {
        self.sender
            .send(RegistryCommand::Connect { client })
            .await
            .map_err(|_| RoomError::RegistryUnavailable)
    }

    /// Marks a connection offline and announces it.
    pub async fn disconnect(&self, id: ConnectionId) -> Result<(), RoomError> {
        self.sender
            .send(RegistryCommand::Disconnect { id })
            .await
            .map_err(|_| RoomError::RegistryUnavailable)
    }

    /// A live connection with this display name.
    pub async fn find_client(
        &self,
        name: &str,
    ) -> Result<Option<ClientHandle>, RoomError> {
        let name = name.to_string();
        self.request(|reply| RegistryCommand::FindClient { name, reply })
            .await
    }

    /// Every known user with an online flag.
    pub async fn directory(&self) -> Result<Vec<DirectoryEntry>, RoomError> {
        self.request(|reply| RegistryCommand::Directory { reply })
            .await?
    }

    /// Deletes a user record and drops their live connections. Returns how
    /// many connections were dropped.
    pub async fn remove_user(&self, id: &str) -> Result<usize, RoomError> {
        let id = id.to_string();
        self.request(|reply| RegistryCommand::RemoveUser { id, reply })
            .await?
    }
}

struct RegistryActor<R: RoomRepository, U: UserRepository> {
    config: RegistryConfig,
    rooms: HashMap<RoomId, RoomHandle>,
    clients: HashMap<ConnectionId, ClientHandle>,
    repo: Arc<R>,
    users: Arc<U>,
    codec: JsonCodec,
    receiver: mpsc::Receiver<RegistryCommand>,
    emptied_tx: mpsc::UnboundedSender<RoomId>,
    emptied_rx: mpsc::UnboundedReceiver<RoomId>,
    relay: Option<RelaySender>,
}

impl<R: RoomRepository, U: UserRepository> RegistryActor<R, U> {
    async fn run(mut self) {
        tracing::info!("room registry started");

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else { break };
                    self.handle(cmd).await;
                }
                Some(id) = self.emptied_rx.recv() => {
                    self.handle_emptied(id).await;
                }
            }
        }

        for (room_id, handle) in self.rooms.drain() {
            tracing::debug!(%room_id, "shutting down room with registry");
            let _ = handle.shutdown().await;
        }
        tracing::info!("room registry stopped");
    }

    async fn handle(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Join {
                name,
                private,
                client,
                reply,
            } => {
                let result = self.handle_join(&name, private, client).await;
                let _ = reply.send(result);
            }
            RegistryCommand::JoinPrivate {
                client,
                peer,
                reply,
            } => {
                let result = self.handle_join_private(client, &peer).await;
                let _ = reply.send(result);
            }
            RegistryCommand::FindByName { name, reply } => {
                let found = self.live_by_name(&name.trim().to_lowercase());
                let _ = reply.send(found);
            }
            RegistryCommand::FindByUri { uri, reply } => {
                let found = self.live_by_uri(&uri);
                let _ = reply.send(found);
            }
            RegistryCommand::FindById { id, reply } => {
                let _ = reply.send(self.rooms.get(&id).cloned());
            }
            RegistryCommand::DeleteRoom { id, reply } => {
                let existed = match self.rooms.remove(&id) {
                    Some(handle) => {
                        let _ = handle.shutdown().await;
                        tracing::info!(room_id = %id, "room deleted");
                        true
                    }
                    None => false,
                };
                let _ = reply.send(existed);
            }
            RegistryCommand::ListRooms { reply } => {
                let mut rooms: Vec<RoomRef> =
                    self.rooms.values().map(RoomHandle::room_ref).collect();
                rooms.sort_by(|a, b| a.name.cmp(&b.name));
                let _ = reply.send(rooms);
            }
            RegistryCommand::Connect { client } => self.handle_connect(client),
            RegistryCommand::Disconnect { id } => self.handle_disconnect(id),
            RegistryCommand::FindClient { name, reply } => {
                let _ = reply.send(self.client_by_name(&name));
            }
            RegistryCommand::Directory { reply } => {
                let _ = reply.send(self.handle_directory().await);
            }
            RegistryCommand::RemoveUser { id, reply } => {
                let _ = reply.send(self.handle_remove_user(&id).await);
            }
        }
    }

    async fn handle_join(
        &mut self,
        name: &str,
        private: bool,
        client: ClientHandle,
    ) -> Result<RoomHandle, RoomError> {
        let name = normalize_name(name)?;
        // `+` is reserved for private room names.
        if !private && name.contains('+') {
            return Err(RoomError::InvalidName(name));
        }

        // A room can stop between our lookup and its reply (it went empty
        // and a stale handle is still listed). Forget it and resolve again.
        for _ in 0..2 {
            let handle = self.resolve(&name, private).await?;
            if handle.is_private() != private {
                return Err(RoomError::NotFound(name));
            }
            match handle.join(client.clone()).await {
                Ok(_) => {
                    client.notify_joined(handle.clone());
                    return Ok(handle);
                }
                Err(RoomError::Unavailable(id)) => {
                    tracing::debug!(room_id = %id, "room stopped during join, retrying");
                    self.rooms.remove(&id);
                }
                Err(e) => return Err(e),
            }
        }
        Err(RoomError::NotFound(name))
    }

    async fn handle_join_private(
        &mut self,
        client: ClientHandle,
        peer: &str,
    ) -> Result<RoomHandle, RoomError> {
        let peer = peer.trim();
        if peer.is_empty() {
            return Err(RoomError::InvalidName(peer.to_string()));
        }
        let name = private_room_name(client.name(), peer);
        let handle = self.handle_join(&name, true, client.clone()).await?;

        match self.client_by_name(peer) {
            Some(other) if other.id() == client.id() => {}
            Some(other) => {
                if let Err(e) = self.handle_join(&name, true, other).await {
                    tracing::warn!(room = %name, peer, error = %e, "could not add peer to private room");
                }
            }
            None => {
                if let Some(relay) = &self.relay {
                    let _ = relay.send(RelayEvent::Invite {
                        room: name.clone(),
                        from: client.name().to_string(),
                        to: peer.to_string(),
                    });
                }
            }
        }

        Ok(handle)
    }

    /// Finds the live room for `name` or brings one up from the repository.
    async fn resolve(
        &mut self,
        name: &str,
        private: bool,
    ) -> Result<RoomHandle, RoomError> {
        if let Some(handle) =
            self.live_by_name(name).or_else(|| self.live_by_uri(name))
        {
            return Ok(handle);
        }

        let record = match self.repo.find_by_name(name).await? {
            Some(record) => record,
            None => match self.repo.find_by_uri(name).await? {
                Some(record) => record,
                None => {
                    let record = self.repo.create(name, private).await?;
                    tracing::info!(room_id = %record.id, name, private, "room created");
                    record
                }
            },
        };

        if let Some(handle) = self.rooms.get(&record.id) {
            return Ok(handle.clone());
        }
        Ok(self.spawn(record))
    }

    fn spawn(&mut self, record: RoomRecord) -> RoomHandle {
        let handle = spawn_room(
            record,
            self.config.room.clone(),
            Arc::clone(&self.repo),
            self.emptied_tx.clone(),
            self.relay.clone(),
        );
        self.rooms.insert(handle.room_id().clone(), handle.clone());
        handle
    }

    async fn handle_emptied(&mut self, id: RoomId) {
        let Some(handle) = self.rooms.get(&id).cloned() else {
            return;
        };
        match handle.close_if_empty().await {
            Ok(false) => {
                tracing::debug!(room_id = %id, "room refilled before teardown");
            }
            Ok(true) | Err(_) => {
                self.rooms.remove(&id);
                tracing::info!(room_id = %id, "empty room removed");
            }
        }
    }

    fn live_by_name(&self, name: &str) -> Option<RoomHandle> {
        self.rooms
            .values()
            .find(|h| h.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    fn live_by_uri(&self, uri: &str) -> Option<RoomHandle> {
        self.rooms.values().find(|h| h.uri() == uri).cloned()
    }

    fn client_by_name(&self, name: &str) -> Option<ClientHandle> {
        self.clients
            .values()
            .find(|c| c.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    fn handle_connect(&mut self, client: ClientHandle) {
        let joined = Event::presence(Action::UserJoin, client.identity().clone());
        self.announce(&joined, None);

        for other in self.clients.values() {
            let present =
                Event::presence(Action::UserJoin, other.identity().clone());
            self.deliver(&client, &present);
        }

        tracing::debug!(conn_id = %client.id(), name = client.name(), "client online");
        self.clients.insert(client.id(), client);
    }

    fn handle_disconnect(&mut self, id: ConnectionId) {
        let Some(client) = self.clients.remove(&id) else {
            return;
        };
        tracing::debug!(conn_id = %id, name = client.name(), "client offline");
        let left = Event::presence(Action::UserLeft, client.identity().clone());
        self.announce(&left, None);
    }

    fn announce(&self, event: &Event, except: Option<ConnectionId>) {
        for client in self.clients.values() {
            if Some(client.id()) != except {
                self.deliver(client, event);
            }
        }
    }

    /// Presence is best effort; a full queue just misses the notice and
    /// the owning room deals with the slow consumer.
    fn deliver(&self, client: &ClientHandle, event: &Event) {
        let frame = match self.codec.encode_text(event) {
            Ok(text) => Arc::from(text),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode presence event");
                return;
            }
        };
        if let Err(e) = client.deliver(frame) {
            tracing::debug!(conn_id = %client.id(), error = %e, "presence notice dropped");
        }
    }

    async fn handle_directory(&self) -> Result<Vec<DirectoryEntry>, RoomError> {
        let users = self.users.list_all().await?;
        Ok(users
            .into_iter()
            .map(|user| {
                let online = self.client_by_name(&user.username).is_some();
                DirectoryEntry { user, online }
            })
            .collect())
    }

    async fn handle_remove_user(&mut self, id: &str) -> Result<usize, RoomError> {
        let username = self
            .users
            .list_all()
            .await?
            .into_iter()
            .find(|u| u.id == id)
            .map(|u| u.username);
        self.users.remove(id).await?;

        let Some(username) = username else {
            return Ok(0);
        };
        let mut dropped = 0;
        for client in self
            .clients
            .values()
            .filter(|c| c.name().eq_ignore_ascii_case(&username))
        {
            client.disconnect();
            dropped += 1;
        }
        tracing::info!(user_id = id, %username, dropped, "user removed");
        Ok(dropped)
    }
}
