//! Cryptography for the Murmur messaging layer.
//!
//! Two building blocks, both pure (no I/O, no clocks, no internal RNG):
//!
//! - [`derive_shared_secret`]: deterministic, order-independent derivation of
//!   a per-conversation secret from the participant set and the master secret.
//! - [`encrypt`] / [`decrypt`]: AEAD envelope construction. The shared secret
//!   is stretched with PBKDF2-SHA256 salted by the conversation id, binding
//!   the symmetric key to the conversation, then sealed with AES-256-GCM.
//!
//! Randomness (the per-message IV) and the verifier's clock are provided by
//! the caller. This keeps every function deterministic under test.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod cipher;
mod derive;
mod envelope;
mod error;

pub use cipher::{
    CLOCK_SKEW_MS, FRESHNESS_WINDOW_MS, PBKDF2_ITERATIONS, comment_conversation_id, decrypt,
    decrypt_comment, encrypt, encrypt_comment,
};
pub use derive::derive_shared_secret;
pub use envelope::{AUTH_TAG_SIZE, EncryptedEnvelope, EnvelopeHeader, IV_SIZE, PayloadKind};
pub use error::{DeriveError, IntegrityError};
