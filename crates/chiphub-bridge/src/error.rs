//! Error types for the bridge.

use chiphub_protocol::ProtocolError;

/// Errors from the distribution bridge or a broker.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// An envelope could not be encoded or decoded.
    #[error("relay codec error: {0}")]
    Codec(#[from] ProtocolError),

    /// The broker refused or failed to publish.
    #[error("publish failed: {0}")]
    Publish(String),

    /// The broker could not hand out a subscription.
    #[error("subscribe failed: {0}")]
    Subscribe(String),

    /// The broker has shut down.
    #[error("broker closed")]
    Closed,
}
