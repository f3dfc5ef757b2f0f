//! Room actor: an isolated Tokio task that owns one room's membership and
//! ledger.
//!
//! Every state change goes through the actor's single mailbox, so the room
//! needs no locks: register, unregister, chat and pot operations are
//! applied one at a time in delivery order.

use std::collections::HashMap;
use std::sync::Arc;

use chiphub_protocol::{
    Action, Codec, ConnectionId, Event, Identity, JsonCodec, Origin,
    RelayEvent, RoomId, RoomRef,
};
use tokio::sync::{mpsc, oneshot};

use crate::{
    Balances, ClientHandle, Ledger, LedgerUpdate, PotOp, RepositoryError,
    RoomConfig, RoomError, RoomRecord, RoomRepository,
};

const WELCOME: &str = "joined the room";

/// Channel rooms use to push events to the distribution bridge.
pub type RelaySender = mpsc::UnboundedSender<RelayEvent>;

/// Commands sent to a room actor through its mailbox.
pub(crate) enum RoomCommand {
    Register {
        client: ClientHandle,
        reply: oneshot::Sender<Result<RoomInfo, RoomError>>,
    },
    Unregister {
        id: ConnectionId,
        reply: oneshot::Sender<bool>,
    },
    Broadcast {
        event: Event,
        origin: Origin,
    },
    Pot {
        op: PotOp,
        actor: Identity,
        amount: i64,
        reply: oneshot::Sender<Result<LedgerUpdate, RoomError>>,
    },
    /// A user on another hub instance joined or left this room.
    RemotePresence {
        action: Action,
        user: String,
    },
    Snapshot {
        reply: oneshot::Sender<RoomInfo>,
    },
    /// Sent by the registry after an emptiness notice. The room stops only
    /// if nobody joined in the meantime.
    CloseIfEmpty {
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

/// A snapshot of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub room: RoomRef,
    pub members: Vec<Identity>,
    pub pot: u64,
    pub balances: Balances,
}

/// Handle to a running room actor.
///
/// Cheap to clone. The registry keeps one per live room and every member
/// connection keeps one per room it joined.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    room: Arc<RoomRef>,
    sender: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub fn room_id(&self) -> &RoomId {
        &self.room.id
    }

    pub fn name(&self) -> &str {
        &self.room.name
    }

    pub fn uri(&self) -> &str {
        &self.room.uri
    }

    pub fn is_private(&self) -> bool {
        self.room.private
    }

    /// The wire reference for this room.
    pub fn room_ref(&self) -> RoomRef {
        RoomRef::clone(&self.room)
    }

    fn unavailable(&self) -> RoomError {
        RoomError::Unavailable(self.room.id.clone())
    }

    async fn send(&self, cmd: RoomCommand) -> Result<(), RoomError> {
        self.sender.send(cmd).await.map_err(|_| self.unavailable())
    }

    /// Adds a client to the room. Joining twice is a no-op.
    pub async fn join(
        &self,
        client: ClientHandle,
    ) -> Result<RoomInfo, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RoomCommand::Register {
            client,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| self.unavailable())?
    }

    /// Removes a client. Returns whether it was a member.
    pub async fn leave(&self, id: ConnectionId) -> Result<bool, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RoomCommand::Unregister { id, reply: reply_tx })
            .await?;
        reply_rx.await.map_err(|_| self.unavailable())
    }

    /// Broadcasts a chat event to every member (fire-and-forget).
    pub async fn broadcast(
        &self,
        event: Event,
        origin: Origin,
    ) -> Result<(), RoomError> {
        self.send(RoomCommand::Broadcast { event, origin }).await
    }

    /// Moves `amount` chips from `actor`'s balance into the pot.
    pub async fn add_pot(
        &self,
        actor: Identity,
        amount: i64,
    ) -> Result<LedgerUpdate, RoomError> {
        self.pot(PotOp::Add, actor, amount).await
    }

    /// Moves `amount` chips from the pot to `actor`'s balance.
    pub async fn retrieve_pot(
        &self,
        actor: Identity,
        amount: i64,
    ) -> Result<LedgerUpdate, RoomError> {
        self.pot(PotOp::Retrieve, actor, amount).await
    }

    /// Applies `op` for `actor`.
    pub async fn pot(
        &self,
        op: PotOp,
        actor: Identity,
        amount: i64,
    ) -> Result<LedgerUpdate, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RoomCommand::Pot {
            op,
            actor,
            amount,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| self.unavailable())?
    }

    /// Announces a user from another hub instance to local members.
    pub async fn remote_presence(
        &self,
        action: Action,
        user: String,
    ) -> Result<(), RoomError> {
        self.send(RoomCommand::RemotePresence { action, user }).await
    }

    pub async fn snapshot(&self) -> Result<RoomInfo, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RoomCommand::Snapshot { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| self.unavailable())
    }

    pub(crate) async fn close_if_empty(&self) -> Result<bool, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RoomCommand::CloseIfEmpty { reply: reply_tx })
            .await?;
        reply_rx.await.map_err(|_| self.unavailable())
    }

    pub(crate) async fn shutdown(&self) -> Result<(), RoomError> {
        self.send(RoomCommand::Shutdown).await
    }
}

/// The internal room actor state. Runs inside a Tokio task.
struct RoomActor<R: RoomRepository> {
    room: RoomRef,
    config: RoomConfig,
    members: HashMap<ConnectionId, ClientHandle>,
    ledger: Ledger,
    repo: Arc<R>,
    codec: JsonCodec,
    receiver: mpsc::Receiver<RoomCommand>,
    /// Tells the registry this room went empty.
    emptied: mpsc::UnboundedSender<RoomId>,
    relay: Option<RelaySender>,
}

impl<R: RoomRepository> RoomActor<R> {
    /// Runs the actor loop, processing commands until shutdown.
    async fn run(mut self) {
        tracing::info!(room_id = %self.room.id, name = %self.room.name, "room actor started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                RoomCommand::Register { client, reply } => {
                    let result = self.handle_register(client).await;
                    let _ = reply.send(result);
                }
                RoomCommand::Unregister { id, reply } => {
                    let was_member = self.handle_unregister(id).await;
                    let _ = reply.send(was_member);
                }
                RoomCommand::Broadcast { event, origin } => {
                    self.handle_broadcast(event, origin).await;
                }
                RoomCommand::Pot {
                    op,
                    actor,
                    amount,
                    reply,
                } => {
                    let result = self.handle_pot(op, actor, amount).await;
                    let _ = reply.send(result);
                }
                RoomCommand::RemotePresence { action, user } => {
                    let event = Event::new(action, user)
                        .with_target(self.room.clone());
                    self.broadcast(&event, None).await;
                }
                RoomCommand::Snapshot { reply } => {
                    let _ = reply.send(self.info());
                }
                RoomCommand::CloseIfEmpty { reply } => {
                    let empty = self.members.is_empty();
                    let _ = reply.send(empty);
                    if empty {
                        break;
                    }
                }
                RoomCommand::Shutdown => {
                    tracing::info!(room_id = %self.room.id, "room shutting down");
                    self.persist_final().await;
                    break;
                }
            }
        }

        tracing::info!(room_id = %self.room.id, "room actor stopped");
    }

    async fn handle_register(
        &mut self,
        client: ClientHandle,
    ) -> Result<RoomInfo, RoomError> {
        let id = client.id();
        if self.members.contains_key(&id) {
            return Ok(self.info());
        }

        if let Some(chips) = self.config.seat_chips {
            if let Err(e) = self.seat(client.name(), chips).await {
                tracing::error!(
                    room_id = %self.room.id,
                    name = client.name(),
                    error = %e,
                    "could not persist seat grant, join refused"
                );
                self.check_empty().await;
                return Err(e.into());
            }
        }

        self.members.insert(id, client.clone());
        tracing::info!(
            room_id = %self.room.id,
            conn_id = %id,
            name = client.name(),
            members = self.members.len(),
            "member joined"
        );

        let mut joined = Event::new(Action::RoomJoined, self.room.name.clone())
            .with_target(self.room.clone())
            .with_pot(clamp(self.ledger.pot()));
        joined.balance = self.ledger.balance(client.name());
        self.send_to(&client, &joined).await;

        if !self.room.private {
            let welcome =
                Event::new(Action::SendMessage, format!("{} {WELCOME}", client.name()))
                    .with_target(self.room.clone())
                    .with_sender(client.identity().clone());
            self.broadcast(&welcome, Some(id)).await;

            let presence =
                Event::presence(Action::UserJoin, client.identity().clone())
                    .with_target(self.room.clone());
            self.broadcast(&presence, Some(id)).await;
        }

        self.relay(RelayEvent::Join {
            room: self.room.name.clone(),
            private: self.room.private,
            user: client.name().to_string(),
        });

        Ok(self.info())
    }

    /// Gives an unknown name its starting chips. The grant is committed
    /// only once persisted.
    async fn seat(&mut self, name: &str, chips: u64) -> Result<(), RepositoryError> {
        let mut next = self.ledger.clone();
        if !next.seat(name, chips) {
            return Ok(());
        }
        self.repo
            .persist(&self.room.id, next.pot(), next.balances())
            .await?;
        self.ledger = next;
        Ok(())
    }

    async fn handle_unregister(&mut self, id: ConnectionId) -> bool {
        let Some(client) = self.members.remove(&id) else {
            return false;
        };
        tracing::info!(
            room_id = %self.room.id,
            conn_id = %id,
            members = self.members.len(),
            "member left"
        );

        let left = Event::presence(Action::UserLeft, client.identity().clone())
            .with_target(self.room.clone());
        self.broadcast(&left, None).await;
        self.relay(RelayEvent::Leave {
            room: self.room.name.clone(),
            user: client.name().to_string(),
        });

        self.check_empty().await;
        true
    }

    async fn handle_broadcast(&mut self, mut event: Event, origin: Origin) {
        if origin == Origin::Local {
            let is_member = event
                .sender
                .as_ref()
                .is_some_and(|s| self.members.contains_key(&s.id));
            if !is_member {
                tracing::warn!(
                    room_id = %self.room.id,
                    sender = ?event.sender,
                    "message from non-member, ignoring"
                );
                return;
            }
        }

        // Chat never carries ledger numbers; only the room reports those.
        event.pot = None;
        event.balance = None;
        event.target = Some(self.room.clone());
        self.broadcast(&event, None).await;

        if origin == Origin::Local {
            self.relay(RelayEvent::Chat {
                room: self.room.name.clone(),
                event,
            });
        }
    }

    /// Applies a pot operation fail-closed: the new ledger is computed on a
    /// copy, persisted, and only then committed and broadcast.
    async fn handle_pot(
        &mut self,
        op: PotOp,
        actor: Identity,
        amount: i64,
    ) -> Result<LedgerUpdate, RoomError> {
        if !self.members.contains_key(&actor.id) {
            return Err(RoomError::NotInRoom(actor.id, self.room.id.clone()));
        }

        let action = op.action();
        let mut next = self.ledger.clone();
        let applied = next.apply(op, &actor.name, amount);

        let update = match applied {
            Ok(update) => update,
            Err(e) => {
                tracing::debug!(
                    room_id = %self.room.id,
                    actor = %actor,
                    %action,
                    amount,
                    reason = %e,
                    "pot operation refused"
                );
                self.reject(&actor, action, amount, e.to_string()).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self
            .repo
            .persist(&self.room.id, next.pot(), next.balances())
            .await
        {
            tracing::error!(
                room_id = %self.room.id,
                actor = %actor,
                %action,
                amount,
                error = %e,
                "ledger not persisted, operation rolled back"
            );
            self.reject(&actor, action, amount, "could not save the pot, try again".into())
                .await;
            return Err(e.into());
        }

        self.ledger = next;

        let mut event =
            Event::new(Action::UpdatePot, format!("{} {} {amount}", actor.name, op.verb()))
                .with_target(self.room.clone())
                .with_pot(clamp(update.pot))
                .with_sender(actor);
        event.balance = update.balance;
        self.broadcast(&event, None).await;

        Ok(update)
    }

    /// Tells only the actor that its pot operation didn't happen.
    async fn reject(
        &mut self,
        actor: &Identity,
        action: Action,
        amount: i64,
        reason: String,
    ) {
        let Some(client) = self.members.get(&actor.id).cloned() else {
            return;
        };
        let mut event = Event::new(Action::PotRejected, reason)
            .with_target(self.room.clone())
            .with_pot(clamp(self.ledger.pot()))
            .with_sender(actor.clone());
        event.balance = self.ledger.balance(&actor.name);
        tracing::trace!(room_id = %self.room.id, %action, amount, "sending rejection");
        self.send_to(&client, &event).await;
    }

    /// Queues `event` for every member except `except`. Members whose queue
    /// is full or closed are dropped from the room and disconnected.
    async fn broadcast(&mut self, event: &Event, except: Option<ConnectionId>) {
        let Some(frame) = self.encode(event) else {
            return;
        };
        let evicted = self.deliver_all(&frame, except);
        self.evict(evicted).await;
    }

    /// Queues `frame` for every member except `except` and returns the
    /// members that could not take it.
    fn deliver_all(
        &self,
        frame: &Arc<str>,
        except: Option<ConnectionId>,
    ) -> Vec<ConnectionId> {
        let mut failed = Vec::new();
        for (id, client) in &self.members {
            if Some(*id) == except {
                continue;
            }
            if let Err(e) = client.deliver(Arc::clone(frame)) {
                tracing::warn!(
                    room_id = %self.room.id,
                    conn_id = %id,
                    error = %e,
                    "dropping slow member"
                );
                failed.push(*id);
            }
        }
        failed
    }

    async fn send_to(&mut self, client: &ClientHandle, event: &Event) {
        let Some(frame) = self.encode(event) else {
            return;
        };
        if let Err(e) = client.deliver(frame) {
            tracing::warn!(
                room_id = %self.room.id,
                conn_id = %client.id(),
                error = %e,
                "dropping slow member"
            );
            self.evict(vec![client.id()]).await;
        }
    }

    /// Drops `ids` from the room and tells everyone left. Announcing can
    /// overflow more queues, so this repeats until nobody else falls off.
    async fn evict(&mut self, mut ids: Vec<ConnectionId>) {
        if ids.is_empty() {
            return;
        }
        while !ids.is_empty() {
            let mut failed = Vec::new();
            for id in ids.drain(..) {
                let Some(client) = self.members.remove(&id) else {
                    continue;
                };
                client.disconnect();
                self.relay(RelayEvent::Leave {
                    room: self.room.name.clone(),
                    user: client.name().to_string(),
                });

                let left = Event::presence(Action::UserLeft, client.identity().clone())
                    .with_target(self.room.clone());
                if let Some(frame) = self.encode(&left) {
                    failed.extend(self.deliver_all(&frame, None));
                }
            }
            ids = failed;
        }
        self.check_empty().await;
    }

    async fn check_empty(&mut self) {
        if !self.members.is_empty() {
            return;
        }
        self.persist_final().await;
        let _ = self.emptied.send(self.room.id.clone());
    }

    async fn persist_final(&self) {
        if let Err(e) = self
            .repo
            .persist(&self.room.id, self.ledger.pot(), self.ledger.balances())
            .await
        {
            tracing::error!(
                room_id = %self.room.id,
                error = %e,
                "could not persist final room state"
            );
        }
    }

    fn encode(&self, event: &Event) -> Option<Arc<str>> {
        match self.codec.encode_text(event) {
            Ok(text) => Some(Arc::from(text)),
            Err(e) => {
                tracing::error!(room_id = %self.room.id, error = %e, "failed to encode event");
                None
            }
        }
    }

    fn relay(&self, event: RelayEvent) {
        if let Some(relay) = &self.relay {
            let _ = relay.send(event);
        }
    }

    fn info(&self) -> RoomInfo {
        let mut members: Vec<Identity> = self
            .members
            .values()
            .map(|c| c.identity().clone())
            .collect();
        members.sort_by_key(|m| m.id.into_inner());
        RoomInfo {
            room: self.room.clone(),
            members,
            pot: self.ledger.pot(),
            balances: self.ledger.balances().clone(),
        }
    }
}

fn clamp(chips: u64) -> i64 {
    i64::try_from(chips).unwrap_or(i64::MAX)
}

/// Spawns a room actor seeded from `record` and returns its handle.
pub(crate) fn spawn_room<R: RoomRepository>(
    record: RoomRecord,
    config: RoomConfig,
    repo: Arc<R>,
    emptied: mpsc::UnboundedSender<RoomId>,
    relay: Option<RelaySender>,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(config.mailbox_size);
    let room = record.to_ref();

    let actor = RoomActor {
        room: room.clone(),
        config,
        members: HashMap::new(),
        ledger: Ledger::new(record.pot, record.balances),
        repo,
        codec: JsonCodec,
        receiver: rx,
        emptied,
        relay,
    };

    tokio::spawn(actor.run());

    RoomHandle {
        room: Arc::new(room),
        sender: tx,
    }
}
