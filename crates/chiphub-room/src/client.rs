//! The hub-side view of one connected client.
//!
//! Rooms and the registry never see a socket. They hold a [`ClientHandle`]:
//! the client's identity, the sending side of its bounded outbound queue, a
//! shutdown switch, and a control channel back to the client's inbound
//! task. The matching receivers live in a [`ClientMailbox`] owned by the
//! connection.

use std::sync::Arc;

use chiphub_protocol::{ConnectionId, Identity};
use tokio::sync::{mpsc, watch};

use crate::RoomHandle;

/// One encoded event, shared between every member it's delivered to.
pub type OutboundFrame = Arc<str>;

/// Default capacity of a client's outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Why a frame could not be queued for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The client's outbound queue is full.
    #[error("outbound queue full")]
    Full,
    /// The client's outbound loop has gone away.
    #[error("outbound queue closed")]
    Closed,
}

/// Messages from the hub to a client's inbound task.
#[derive(Debug)]
pub enum ClientControl {
    /// The client is now a member of this room, whoever asked for it.
    Joined(RoomHandle),
}

/// Cheap-to-clone handle rooms use to reach a client.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    identity: Identity,
    outbound: mpsc::Sender<OutboundFrame>,
    control: mpsc::UnboundedSender<ClientControl>,
    shutdown: Arc<watch::Sender<bool>>,
}

/// The receiving ends paired with a [`ClientHandle`].
#[derive(Debug)]
pub struct ClientMailbox {
    /// Frames for the outbound loop.
    pub outbound: mpsc::Receiver<OutboundFrame>,
    /// Membership notices for the inbound loop.
    pub control: mpsc::UnboundedReceiver<ClientControl>,
    /// Flips to `true` once the client must go away.
    pub shutdown: watch::Receiver<bool>,
}

impl ClientHandle {
    /// Creates a handle and its mailbox with an outbound queue of
    /// `capacity` frames.
    pub fn new(identity: Identity, capacity: usize) -> (Self, ClientMailbox) {
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        (
            Self {
                identity,
                outbound: outbound_tx,
                control: control_tx,
                shutdown: Arc::new(shutdown_tx),
            },
            ClientMailbox {
                outbound: outbound_rx,
                control: control_rx,
                shutdown: shutdown_rx,
            },
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.identity.id
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Queues a frame without waiting.
    pub fn deliver(&self, frame: OutboundFrame) -> Result<(), DeliveryError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Tells the client's inbound task it now belongs to `room`.
    pub fn notify_joined(&self, room: RoomHandle) {
        let _ = self.control.send(ClientControl::Joined(room));
    }

    /// Asks both of the client's loops to stop. Idempotent.
    pub fn disconnect(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_disconnected(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// A fresh receiver for the shutdown switch.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}
