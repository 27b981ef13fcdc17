//! Error types for derivation and envelope encryption.
//!
//! Integrity failures are deliberately split into distinct variants: callers
//! surface them per-message and must never retry a failed decryption, so the
//! variant is the whole story.

use thiserror::Error;

/// Errors from shared secret derivation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeriveError {
    /// Derivation was attempted with no participants.
    ///
    /// An empty participant list would silently hash down to a secret bound
    /// to nothing, so it is rejected up front.
    #[error("cannot derive a shared secret for an empty participant set")]
    EmptyParticipants,
}

/// Non-retryable envelope verification failures.
///
/// All variants are hard failures: the envelope is either tampered with,
/// misdirected, or stale. Retrying `decrypt` with the same inputs will
/// always produce the same result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    /// The envelope was encrypted for a different conversation.
    ///
    /// Rejecting the mismatch before any key work prevents cross-conversation
    /// replay of otherwise valid ciphertext.
    #[error("conversation mismatch: envelope is for {actual}, expected {expected}")]
    ConversationMismatch {
        /// Conversation the caller expected.
        expected: String,
        /// Conversation the envelope claims.
        actual: String,
    },

    /// The authentication tag failed to verify (tamper or wrong key).
    #[error("authentication failed: envelope tampered with or wrong key")]
    AuthenticationFailed,

    /// The envelope timestamp is older than the freshness window.
    #[error("stale envelope: timestamp is {age_ms}ms old (limit {limit_ms}ms)")]
    StaleTimestamp {
        /// Age of the envelope relative to the verifier's clock.
        age_ms: u64,
        /// Maximum accepted age.
        limit_ms: u64,
    },

    /// The envelope timestamp is further ahead of the verifier's clock than
    /// the tolerated skew.
    #[error("future-dated envelope: timestamp is {skew_ms}ms ahead (limit {limit_ms}ms)")]
    FutureTimestamp {
        /// How far ahead of the verifier's clock the timestamp is.
        skew_ms: u64,
        /// Maximum tolerated skew.
        limit_ms: u64,
    },
}

impl IntegrityError {
    /// Integrity failures are never transient; callers must not loop on them.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
