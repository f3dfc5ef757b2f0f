//! Per-connection handling: handshake, the inbound loop and the outbound
//! loop.
//!
//! Each accepted socket is split in two. The inbound half is driven by the
//! connection's own task, which decodes events and routes them to rooms.
//! The outbound half gets a task of its own that drains the client's queue
//! and keeps the peer alive with pings. The two only share the client's
//! shutdown switch.

use std::collections::HashMap;
use std::sync::Arc;

use chiphub_protocol::{
    normalize_frame, Action, Codec, Event, Origin, RoomId,
};
use chiphub_room::{
    ClientControl, ClientHandle, ClientMailbox, OutboundFrame, PotOp,
    Registry, RoomError, RoomHandle,
};
use chiphub_transport::{
    Connection, Frame, FrameReader, FrameWriter, WebSocketConnection,
    WsReader, WsWriter,
};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::server::HubState;
use crate::{Authenticator, ConnectionConfig, Credentials, HubError};

/// Handles a single connection from upgrade to close.
pub(crate) async fn handle_connection<A: Authenticator>(
    conn: WebSocketConnection,
    state: Arc<HubState<A>>,
) -> Result<(), HubError> {
    let conn_id = conn.id();
    let credentials = Credentials::from_request(conn_id, conn.request());
    let initial_room = conn
        .request()
        .param("room")
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_owned);
    let (mut reader, mut writer) = conn.split();

    // --- Handshake ---
    let identity = match state.auth.authenticate(&credentials).await {
        Ok(identity) => identity,
        Err(e) => {
            tracing::info!(%conn_id, error = %e, "handshake rejected");
            if let Err(close_err) = writer.reject(&e.to_string()).await {
                tracing::debug!(%conn_id, error = %close_err, "could not send rejection");
            }
            return Err(e.into());
        }
    };
    tracing::info!(%conn_id, name = %identity.name, "client connected");

    let (client, mailbox) =
        ClientHandle::new(identity, state.config.outbound_capacity);
    let ClientMailbox {
        outbound,
        mut control,
        mut shutdown,
    } = mailbox;

    state.registry.connect(client.clone()).await?;

    let writer_task = tokio::spawn(write_loop(
        writer,
        outbound,
        client.clone(),
        state.config.clone(),
    ));

    let mut session = Session::new(client.clone(), state.registry.clone(), state.codec);
    if let Some(room) = initial_room {
        session.join(&room).await;
    }

    session
        .read_loop(&mut reader, &mut control, &mut shutdown, &state.config)
        .await;

    // Joins that completed while the loop was winding down still need to
    // be undone.
    while let Ok(ClientControl::Joined(room)) = control.try_recv() {
        session.track(room);
    }
    client.disconnect();
    session.cleanup().await;

    if let Err(e) = writer_task.await {
        tracing::debug!(%conn_id, error = %e, "outbound task ended abnormally");
    }
    tracing::info!(%conn_id, "client disconnected");
    Ok(())
}

/// The inbound side of one connection and the rooms it belongs to.
///
/// If the handler unwinds before [`Session::cleanup`] ran, dropping the
/// session spawns the cleanup instead.
struct Session<C: Codec + Copy> {
    client: ClientHandle,
    registry: Registry,
    rooms: HashMap<RoomId, RoomHandle>,
    codec: C,
    cleaned_up: bool,
}

impl<C: Codec + Copy> Session<C> {
    fn new(client: ClientHandle, registry: Registry, codec: C) -> Self {
        Self {
            client,
            registry,
            rooms: HashMap::new(),
            codec,
            cleaned_up: false,
        }
    }

    async fn read_loop(
        &mut self,
        reader: &mut WsReader,
        control: &mut mpsc::UnboundedReceiver<ClientControl>,
        shutdown: &mut watch::Receiver<bool>,
        config: &ConnectionConfig,
    ) {
        let conn_id = self.client.id();
        let deadline = tokio::time::sleep(config.pong_wait);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                frame = reader.recv() => match frame {
                    Ok(Some(Frame::Pong)) => {
                        deadline.as_mut().reset(Instant::now() + config.pong_wait);
                    }
                    Ok(Some(Frame::Text(text))) => self.handle_text(&text).await,
                    Ok(None) => {
                        tracing::debug!(%conn_id, "connection closed by peer");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(%conn_id, error = %e, "recv error");
                        break;
                    }
                },
                Some(ClientControl::Joined(room)) = control.recv() => {
                    self.track(room);
                }
                () = &mut deadline => {
                    tracing::info!(%conn_id, "no pong within deadline");
                    break;
                }
                () = stopped(shutdown) => {
                    tracing::debug!(%conn_id, "shutdown requested");
                    break;
                }
            }
        }
    }

    fn track(&mut self, room: RoomHandle) {
        self.rooms.insert(room.room_id().clone(), room);
    }

    fn room_named(&self, name: &str) -> Option<RoomHandle> {
        let name = name.trim();
        self.rooms
            .values()
            .find(|r| r.name().eq_ignore_ascii_case(name) || r.uri() == name)
            .cloned()
    }

    async fn handle_text(&mut self, raw: &str) {
        let conn_id = self.client.id();
        let line = normalize_frame(raw);
        if line.is_empty() {
            return;
        }

        let mut event: Event = match self.codec.decode(line.as_bytes()) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(%conn_id, error = %e, "dropping malformed event");
                return;
            }
        };
        if !event.action.is_client_action() {
            tracing::debug!(%conn_id, action = %event.action, "dropping action a client may not send");
            return;
        }
        event.sender = Some(self.client.identity().clone());

        match event.action {
            Action::SendMessage => self.send_message(event).await,
            Action::JoinRoom => self.join(&event.message).await,
            Action::LeaveRoom => self.leave(&event.message).await,
            Action::JoinRoomPrivate => self.join_private(&event.message).await,
            Action::AddPot => self.pot(PotOp::Add, event).await,
            Action::RetrievePot => self.pot(PotOp::Retrieve, event).await,
            _ => {}
        }
    }

    async fn send_message(&mut self, event: Event) {
        let targets: Vec<RoomHandle> = match event.target_name() {
            Some(name) => match self.room_named(name) {
                Some(room) => vec![room],
                None => {
                    tracing::debug!(conn_id = %self.client.id(), room = name, "message for a room not joined");
                    return;
                }
            },
            None => self.rooms.values().cloned().collect(),
        };

        for room in targets {
            if let Err(e) = room.broadcast(event.clone(), Origin::Local).await {
                self.forget(&room, &e);
            }
        }
    }

    async fn join(&mut self, name: &str) {
        match self.registry.join(name, false, self.client.clone()).await {
            Ok(room) => self.track(room),
            Err(e) => {
                tracing::warn!(conn_id = %self.client.id(), room = name, error = %e, "join failed");
            }
        }
    }

    async fn join_private(&mut self, peer: &str) {
        match self.registry.join_private(self.client.clone(), peer).await {
            Ok(room) => self.track(room),
            Err(e) => {
                tracing::warn!(conn_id = %self.client.id(), peer, error = %e, "private join failed");
            }
        }
    }

    async fn leave(&mut self, name: &str) {
        let Some(room) = self.room_named(name) else {
            tracing::debug!(conn_id = %self.client.id(), room = name, "leave for a room not joined");
            return;
        };
        self.rooms.remove(room.room_id());
        if let Err(e) = room.leave(self.client.id()).await {
            tracing::debug!(conn_id = %self.client.id(), room_id = %room.room_id(), error = %e, "leave failed");
        }
    }

    async fn pot(&mut self, op: PotOp, event: Event) {
        let room = match event.target_name() {
            Some(name) => self.room_named(name),
            None if self.rooms.len() == 1 => self.rooms.values().next().cloned(),
            None => None,
        };
        let Some(room) = room else {
            self.refuse(&event, "name a room you have joined");
            return;
        };

        let actor = self.client.identity().clone();
        let amount = event.pot.unwrap_or(0);
        match room.pot(op, actor, amount).await {
            Ok(_) => {}
            Err(RoomError::Unavailable(_)) => {
                self.rooms.remove(room.room_id());
                self.refuse(&event, "room is gone");
            }
            Err(RoomError::NotInRoom(..)) => {
                self.rooms.remove(room.room_id());
                self.refuse(&event, "you are no longer in that room");
            }
            // The room already told the client why.
            Err(e) => {
                tracing::debug!(conn_id = %self.client.id(), room_id = %room.room_id(), error = %e, "pot operation refused");
            }
        }
    }

    /// Tells this client a pot operation never reached a room.
    fn refuse(&self, event: &Event, reason: &str) {
        let mut rejected = Event::new(Action::PotRejected, reason);
        rejected.target = event.target.clone();
        rejected.sender = event.sender.clone();
        match self.codec.encode_text(&rejected) {
            Ok(text) => {
                let _ = self.client.deliver(OutboundFrame::from(text));
            }
            Err(e) => {
                tracing::error!(conn_id = %self.client.id(), error = %e, "failed to encode rejection");
            }
        }
    }

    fn forget(&mut self, room: &RoomHandle, error: &RoomError) {
        tracing::debug!(conn_id = %self.client.id(), room_id = %room.room_id(), %error, "room unreachable");
        self.rooms.remove(room.room_id());
    }

    /// Leaves every joined room and goes offline. Runs once.
    async fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;
        leave_all(
            self.client.id(),
            std::mem::take(&mut self.rooms),
            &self.registry,
        )
        .await;
    }
}

impl<C: Codec + Copy> Drop for Session<C> {
    fn drop(&mut self) {
        if self.cleaned_up {
            return;
        }
        let id = self.client.id();
        let rooms = std::mem::take(&mut self.rooms);
        let registry = self.registry.clone();
        self.client.disconnect();
        tokio::spawn(async move { leave_all(id, rooms, &registry).await });
    }
}

async fn leave_all(
    id: chiphub_protocol::ConnectionId,
    rooms: HashMap<RoomId, RoomHandle>,
    registry: &Registry,
) {
    for (room_id, room) in rooms {
        if let Err(e) = room.leave(id).await {
            tracing::debug!(conn_id = %id, %room_id, error = %e, "leave during cleanup failed");
        }
    }
    if let Err(e) = registry.disconnect(id).await {
        tracing::debug!(conn_id = %id, error = %e, "registry disconnect failed");
    }
}

/// Resolves once the shutdown switch is flipped or its sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Drains the client's queue onto the socket and pings on a timer.
///
/// Every frame already queued when the loop wakes is sent as one text
/// message, newline separated.
async fn write_loop(
    mut writer: WsWriter,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    client: ClientHandle,
    config: ConnectionConfig,
) {
    let conn_id = client.id();
    let mut shutdown = client.shutdown_signal();
    let mut ping = tokio::time::interval_at(
        Instant::now() + config.ping_period,
        config.ping_period,
    );

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(first) = frame else { break };
                let mut text = String::from(&*first);
                while let Ok(next) = outbound.try_recv() {
                    text.push('\n');
                    text.push_str(&next);
                }
                if let Err(e) = writer.send_text(text).await {
                    tracing::debug!(%conn_id, error = %e, "write failed");
                    break;
                }
            }
            _ = ping.tick() => {
                if let Err(e) = writer.ping().await {
                    tracing::debug!(%conn_id, error = %e, "ping failed");
                    break;
                }
            }
            () = stopped(&mut shutdown) => break,
        }
    }

    client.disconnect();
    if let Err(e) = writer.close().await {
        tracing::trace!(%conn_id, error = %e, "close after shutdown failed");
    }
}
