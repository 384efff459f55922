//! Pluggable value codecs and the framed reader/writer that bind them to a stream.
//!
//! Every value on a channel travels as a length-prefixed frame (4-byte big-endian
//! length, then the codec's bytes). The frame boundary lets a reader stop exactly
//! after the last value, so raw bytes can follow values on the same channel.
//!
//! `serde_json::Value` is the schema-free value model shared by all codecs.

mod cbor;
mod frame;
mod json;

use std::fmt;
use std::io;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

pub use cbor::CborCodec;
pub use frame::{MAX_FRAME_SIZE, ValueCodec, ValueReader, ValueWriter};
pub use json::JsonCodec;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cbor encode: {0}")]
    CborEncode(String),

    #[error("cbor decode: {0}")]
    CborDecode(String),

    #[error("frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("unknown codec: {0}")]
    Unknown(String),
}

/// Converts values to and from bytes. Implementations are stateless.
pub trait Codec: Send + Sync + fmt::Debug + 'static {
    fn name(&self) -> &'static str;

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;
}

/// Shared codec handle, cloned into every channel reader/writer.
pub type SharedCodec = Arc<dyn Codec>;

pub fn json() -> SharedCodec {
    Arc::new(JsonCodec)
}

pub fn cbor() -> SharedCodec {
    Arc::new(CborCodec)
}

/// Resolves a codec by its name (`json` or `cbor`, case-insensitive).
pub fn from_name(name: &str) -> Result<SharedCodec, CodecError> {
    match name.to_ascii_lowercase().as_str() {
        "json" => Ok(json()),
        "cbor" => Ok(cbor()),
        other => Err(CodecError::Unknown(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_name_resolves_known_codecs() {
        assert_eq!(from_name("json").unwrap().name(), "json");
        assert_eq!(from_name("CBOR").unwrap().name(), "cbor");
    }

    #[test]
    fn from_name_rejects_unknown() {
        let err = from_name("msgpack").unwrap_err();
        assert_eq!(err.to_string(), "unknown codec: msgpack");
    }
}
