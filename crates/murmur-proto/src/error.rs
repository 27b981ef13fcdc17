//! Protocol error type.

use thiserror::Error;

/// Errors from wire event encoding and decoding.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// CBOR serialization failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// CBOR deserialization failed.
    #[error("decode failed: {0}")]
    Decode(String),
}
