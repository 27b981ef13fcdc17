//! Core state machines and key management for the Murmur messaging layer.
//!
//! Everything here is Sans-IO: state machines take time as input and return
//! actions for a driver to execute. No sockets, no timers, no ambient clocks.
//!
//! # Components
//!
//! - [`env::Environment`]: time/randomness abstraction for deterministic tests
//! - [`vault::KeyVault`]: master secret, user key pairs, cached shared secrets
//! - [`session::TransportSession`]: connection lifecycle state machine with
//!   heartbeat, health probing, and bounded reconnect backoff
//! - [`router::EventRouter`]: typed publish/subscribe with per-event-class
//!   debounce windows
//! - [`membership::ConversationMembership`]: the authoritative local join set

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod env;
pub mod membership;
pub mod router;
pub mod session;
pub mod vault;

pub use env::Environment;
pub use membership::ConversationMembership;
pub use router::{DebouncePolicy, EventPayload, EventRouter, EventType, SubscriberId};
pub use session::{
    Credentials, DisconnectReason, SessionAction, SessionConfig, SessionError, SessionState,
    SessionStatus, TransportSession,
};
pub use vault::{KeyStore, KeyVault, MemoryKeyStore, StoreError, UserKeyPair, VaultError, VaultRecord};
