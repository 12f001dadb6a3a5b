//! JSON payload encoding.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::{CustomError, ErrorKind};
use crate::message::Message;
use crate::propagation::NAME_KEY;

/// Code of the error produced when a payload cannot be decoded.
pub const DECODE_ERROR: &str = "DECODE_ERROR";

#[derive(Debug, thiserror::Error)]
pub enum MarshalError {
    #[error("failed to encode '{name}': {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode '{name}': {source}")]
    Decode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Encodes payloads as JSON and records the payload name in the `name`
/// metadata key.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaler;

impl JsonMarshaler {
    pub fn marshal<T: Serialize>(&self, name: &str, value: &T) -> Result<Message, MarshalError> {
        let payload = serde_json::to_vec(value).map_err(|source| MarshalError::Encode {
            name: name.to_string(),
            source,
        })?;
        Ok(Message::new(payload).with_metadata(NAME_KEY, name))
    }

    pub fn unmarshal<T: DeserializeOwned>(&self, msg: &Message) -> Result<T, MarshalError> {
        serde_json::from_slice(msg.payload()).map_err(|source| MarshalError::Decode {
            name: self.name_from_message(msg).unwrap_or(msg.topic()).to_string(),
            source,
        })
    }

    /// Payload name recorded at marshal time.
    pub fn name_from_message<'a>(&self, msg: &'a Message) -> Option<&'a str> {
        msg.metadata.get(NAME_KEY)
    }
}

/// Wrap a decode failure as an invalid-input, non-retryable error.
pub(crate) fn decode_error(err: MarshalError) -> CustomError {
    CustomError::new("failed to decode message payload")
        .with_kind(ErrorKind::InvalidInput)
        .with_code(DECODE_ERROR)
        .with_cause(err)
}
