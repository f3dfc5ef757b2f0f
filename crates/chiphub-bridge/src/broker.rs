//! The pub/sub seam between hub instances.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::BridgeError;

/// Capacity of the in-process broadcast channel. Subscribers that fall
/// further behind skip envelopes.
const LOCAL_CAPACITY: usize = 4096;

/// Capacity of each subscription's delivery queue.
const SUBSCRIPTION_CAPACITY: usize = 1024;

/// A shared channel every hub instance publishes to and reads from.
///
/// Payloads are opaque bytes; every subscriber sees every publish,
/// including its own.
pub trait Broker: Send + Sync + 'static {
    fn publish(
        &self,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send;

    fn subscribe(
        &self,
    ) -> impl Future<Output = Result<mpsc::Receiver<Vec<u8>>, BridgeError>> + Send;
}

/// An in-process [`Broker`] over a Tokio broadcast channel.
///
/// Lets several hubs in one process behave like one cluster. Cheap to
/// clone; clones share the channel.
#[derive(Debug, Clone)]
pub struct LocalBroker {
    sender: broadcast::Sender<Arc<[u8]>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(LOCAL_CAPACITY);
        Self { sender }
    }
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker for LocalBroker {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), BridgeError> {
        // No subscribers is not an error; the envelope just has no audience.
        let _ = self.sender.send(Arc::from(payload));
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<Vec<u8>>, BridgeError> {
        let mut rx = self.sender.subscribe();
        let (tx, out) = mpsc::channel(SUBSCRIPTION_CAPACITY);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => {
                        if tx.send(payload.to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "relay subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_sees_every_publish() {
        let broker = LocalBroker::new();
        let mut a = broker.subscribe().await.unwrap();
        let mut b = broker.subscribe().await.unwrap();

        broker.publish(b"one".to_vec()).await.unwrap();

        assert_eq!(a.recv().await.unwrap(), b"one");
        assert_eq!(b.recv().await.unwrap(), b"one");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let broker = LocalBroker::new();
        broker.publish(b"void".to_vec()).await.unwrap();
    }
}
