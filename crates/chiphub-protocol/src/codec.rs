//! Codec trait and the JSON implementation.
//!
//! Everything that crosses a socket or the relay channel goes through a
//! [`Codec`]. The hub only ships [`JsonCodec`]; browsers speak JSON and the
//! relay payloads are small.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// Encodes values to bytes and decodes them back.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;

    /// Serializes a value for a text frame.
    ///
    /// The default implementation rejects encodings that aren't UTF-8.
    fn encode_text<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<String, ProtocolError> {
        let bytes = self.encode(value)?;
        String::from_utf8(bytes).map_err(|_| {
            ProtocolError::InvalidMessage("encoding is not UTF-8".into())
        })
    }
}

/// A [`Codec`] backed by `serde_json`.
///
/// ```rust
/// use chiphub_protocol::{Action, Codec, Event, JsonCodec};
///
/// let codec = JsonCodec;
/// let event: Event = codec
///     .decode(br#"{"action":"add-pot","message":"","pot":300}"#)
///     .unwrap();
/// assert_eq!(event.action, Action::AddPot);
/// assert_eq!(event.pot, Some(300));
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }

    fn encode_text<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<String, ProtocolError> {
        serde_json::to_string(value).map_err(ProtocolError::Encode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{Action, Event};

    #[test]
    fn test_decode_garbage_is_a_decode_error() {
        let result: Result<Event, _> = JsonCodec.decode(b"{not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_encode_text_matches_encode() {
        let event = Event::new(Action::SendMessage, "hi");
        let text = JsonCodec.encode_text(&event).unwrap();
        let bytes = JsonCodec.encode(&event).unwrap();
        assert_eq!(text.as_bytes(), bytes.as_slice());
    }
}
