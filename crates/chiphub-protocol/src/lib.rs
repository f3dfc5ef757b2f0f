//! Wire protocol for Chiphub.
//!
//! - **Types** ([`Event`], [`Action`], [`RoomRef`], [`Identity`]): the JSON
//!   events clients send and receive.
//! - **Relay** ([`RelayEnvelope`], [`RelayEvent`]): what hub instances
//!   tell each other over the bridge.
//! - **Codec** ([`Codec`], [`JsonCodec`]): bytes in, typed values out.
//!
//! ```text
//! Transport (frames) → Protocol (Event) → Room / Registry
//! ```

mod codec;
mod error;
mod relay;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use relay::{InstanceId, Origin, RelayEnvelope, RelayEvent};
pub use types::{normalize_frame, Action, Event, Identity, RoomId, RoomRef};

pub use chiphub_transport::ConnectionId;
