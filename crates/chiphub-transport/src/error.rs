use std::time::Duration;

/// Why a listener or connection failed.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Binding the listener or accepting a socket failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The peer sent a handshake that could not be upgraded.
    #[error("upgrade failed: {0}")]
    UpgradeFailed(#[source] std::io::Error),

    /// The peer did not finish the upgrade within `handshake_timeout`.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// The socket errored while reading.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The socket errored while writing.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// The peer went over `max_message_size`.
    #[error("inbound frame too large: {0}")]
    FrameTooLarge(String),

    /// A write (or close) outlived `write_wait`.
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),
}
