//! Serialization of envelopes to and from frames.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire format for envelopes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum Codec {
    /// MessagePack maps with named fields.
    #[default]
    #[serde(rename = "msgpack")]
    MessagePack,
    /// JSON objects.
    #[serde(rename = "json")]
    Json,
}

impl Codec {
    /// Serializes a value into a frame.
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Bytes, CodecError> {
        let bytes = match self {
            Codec::MessagePack => rmp_serde::to_vec_named(value)?,
            Codec::Json => serde_json::to_vec(value)?,
        };
        Ok(Bytes::from(bytes))
    }

    /// Deserializes a frame.
    pub fn decode<T: DeserializeOwned>(self, frame: &[u8]) -> Result<T, CodecError> {
        let value = match self {
            Codec::MessagePack => rmp_serde::from_slice(frame)?,
            Codec::Json => serde_json::from_slice(frame)?,
        };
        Ok(value)
    }
}

/// A frame could not be encoded or decoded.
#[derive(Debug, Error)]
pub enum CodecError {
    /// MessagePack serialization failed.
    #[error("msgpack encode error: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    /// The frame is not a valid MessagePack envelope.
    #[error("msgpack decode error: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),

    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
