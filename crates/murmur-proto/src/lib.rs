//! Wire event model for the Murmur messaging relay.
//!
//! Events are CBOR-encoded for type safety and forward compatibility: CBOR is
//! self-describing (field names embedded), compact, and needs no code
//! generation. The server treats message-bearing events as opaque blobs - it
//! relays [`EncryptedEnvelope`]s without ever seeing plaintext and performs no
//! cryptographic validation.
//!
//! # Invariants
//!
//! Round-trip encoding must produce identical values (verified by property
//! tests).

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod event;

pub use error::ProtocolError;
pub use event::{
    AuthAck, AuthReject, AuthRequest, Goodbye, Ping, PresenceChange, ReadReceipt, RoomSet, Typing,
    WireEvent,
};
pub use murmur_crypto::EncryptedEnvelope;
