//! Error types for the protocol layer.

/// Errors that can occur while turning events into bytes and back.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// The payload is not valid JSON or doesn't match the event shape.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The payload decoded but breaks a protocol rule, e.g. a pot
    /// action without an amount.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
