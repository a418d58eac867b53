//! # Codec
//!
//! Serializes envelopes and values to the wire representation. The value
//! domain is JSON: primitives, ordered sequences, and string-keyed maps.
//! Cyclic structures and non-plain objects are unrepresentable by
//! construction, so round-tripping is lossless for everything the domain
//! admits.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Failures while translating between values and bytes.
#[derive(Debug)]
pub enum CodecError {
    /// The value could not be serialized.
    Encode(serde_json::Error),
    /// The bytes were not a well-formed payload of the expected shape.
    Decode(serde_json::Error),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "Encode failed: {}", e),
            Self::Decode(e) => write!(f, "Decode failed: {}", e),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encode(e) | Self::Decode(e) => Some(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// The JSON codec shared by clients and handlers.
///
/// Malformed input fails with a `CodecError` rather than panicking, so the
/// receiving side can convert it into a structured response instead of
/// crashing its subscription loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(CodecError::Encode)
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(CodecError::Decode)
    }
}
