//! Distribution bridge for Chiphub.
//!
//! Several hub processes can present one logical room set by sharing a
//! [`Broker`]. Rooms hand locally originated [`RelayEvent`]s to the bridge;
//! the bridge stamps them with this instance's [`InstanceId`] and publishes
//! them. Envelopes from other instances are replayed into the local
//! registry with [`Origin::Remote`], which rooms never relay again.
//!
//! ```text
//! Room ──RelayEvent──▶ publisher ──▶ Broker ──▶ subscriber ──▶ Registry / Room
//! ```

mod broker;
mod error;

use std::sync::Arc;

use chiphub_protocol::{
    Action, Codec, InstanceId, JsonCodec, Origin, RelayEnvelope, RelayEvent,
};
use chiphub_room::Registry;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use broker::{Broker, LocalBroker};
pub use error::BridgeError;

/// Receiving end of the channel rooms relay events on.
pub type RelayReceiver = mpsc::UnboundedReceiver<RelayEvent>;

/// A running bridge: one publisher task and one subscriber task.
///
/// Dropping the bridge stops both.
#[derive(Debug)]
pub struct Bridge {
    instance: InstanceId,
    publisher: JoinHandle<()>,
    subscriber: JoinHandle<()>,
}

impl Bridge {
    /// Subscribes to `broker` and starts relaying.
    ///
    /// `relay` is the receiving half of the channel whose sender was given
    /// to [`Registry::spawn`].
    pub async fn spawn<B: Broker>(
        broker: Arc<B>,
        registry: Registry,
        relay: RelayReceiver,
    ) -> Result<Self, BridgeError> {
        let instance = InstanceId(rand::random());
        let inbound = broker.subscribe().await?;

        let publisher = tokio::spawn(publish_loop(instance, broker, relay));
        let subscriber =
            tokio::spawn(subscribe_loop(instance, registry, inbound));

        tracing::info!(%instance, "bridge started");
        Ok(Self {
            instance,
            publisher,
            subscriber,
        })
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.publisher.abort();
        self.subscriber.abort();
    }
}

async fn publish_loop<B: Broker>(
    instance: InstanceId,
    broker: Arc<B>,
    mut relay: RelayReceiver,
) {
    let codec = JsonCodec;
    while let Some(event) = relay.recv().await {
        let envelope = RelayEnvelope {
            origin: instance,
            event,
        };
        let payload = match codec.encode(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(%instance, error = %e, "failed to encode relay envelope");
                continue;
            }
        };
        if let Err(e) = broker.publish(payload).await {
            tracing::warn!(%instance, room = envelope.event.room(), error = %e, "relay publish failed");
        }
    }
    tracing::debug!(%instance, "relay publisher stopped");
}

async fn subscribe_loop(
    instance: InstanceId,
    registry: Registry,
    mut inbound: mpsc::Receiver<Vec<u8>>,
) {
    let codec = JsonCodec;
    while let Some(payload) = inbound.recv().await {
        let envelope: RelayEnvelope = match codec.decode(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(%instance, error = %e, "dropping undecodable relay envelope");
                continue;
            }
        };
        if envelope.origin == instance {
            continue;
        }
        tracing::trace!(%instance, origin = %envelope.origin, room = envelope.event.room(), "replaying relay event");
        if let Err(e) = replay(&registry, envelope.event).await {
            tracing::debug!(%instance, origin = %envelope.origin, error = %e, "relay event not replayed");
        }
    }
    tracing::debug!(%instance, "relay subscriber stopped");
}

/// Applies a remote event to this instance. Rooms that aren't live here
/// have nobody to tell, so those events are skipped.
async fn replay(
    registry: &Registry,
    event: RelayEvent,
) -> Result<(), chiphub_room::RoomError> {
    match event {
        RelayEvent::Join { room, user, .. } => {
            if let Some(handle) = registry.find_by_name(&room).await? {
                handle.remote_presence(Action::UserJoin, user).await?;
            }
        }
        RelayEvent::Leave { room, user } => {
            if let Some(handle) = registry.find_by_name(&room).await? {
                handle.remote_presence(Action::UserLeft, user).await?;
            }
        }
        RelayEvent::Chat { room, event } => {
            if let Some(handle) = registry.find_by_name(&room).await? {
                handle.broadcast(event, Origin::Remote).await?;
            }
        }
        RelayEvent::Invite { room, from, to } => {
            if let Some(client) = registry.find_client(&to).await? {
                tracing::debug!(%room, %from, %to, "accepting remote private invite");
                registry.join(&room, true, client).await?;
            }
        }
    }
    Ok(())
}
