//! Client
//!
//! Action-based messaging client for the Murmur relay protocol. Manages the
//! session lifecycle, conversation membership, envelope encryption, and
//! debounced event delivery to the application.
//!
//! # Architecture
//!
//! The client follows the same Sans-IO and action-based patterns as
//! [`murmur_core`]. It receives events ([`ClientEvent`]), processes them
//! through pure state machine logic, and returns actions ([`ClientAction`])
//! for the caller to execute.
//!
//! # Components
//!
//! - [`MessagingClient`]: Top-level state machine tying session, vault,
//!   membership, and router together
//! - [`ClientEvent`]: Events fed into the client
//! - [`ClientAction`]: Actions produced by the client
//!
//! # Transport (optional)
//!
//! With the `transport` feature enabled, this crate also provides:
//! - [`transport::ConnectedLink`]: WebSocket link with event channels
//! - [`transport::connect`]: Open a link to a relay

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod error;
mod event;

#[cfg(feature = "transport")]
pub mod transport;

pub use client::MessagingClient;
pub use error::ClientError;
pub use event::{ClientAction, ClientEvent};
pub use murmur_core::{
    Credentials, DebouncePolicy, Environment, EventPayload, EventType, KeyStore, KeyVault,
    MemoryKeyStore, SessionConfig, SessionState, SubscriberId,
};
