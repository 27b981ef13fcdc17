//! Shared secret derivation.
//!
//! Every participant of a conversation derives the same secret locally, with
//! no key-distribution round trip: the inputs are the (sorted) participant
//! set, the conversation id, and the application master secret.

use sha2::{Digest, Sha256};

use crate::error::DeriveError;

/// Domain separation label mixed into every derivation.
const DERIVE_LABEL: &str = "murmurSharedSecretV1";

/// Derive a per-conversation shared secret.
///
/// Participants are sorted lexicographically before hashing, so any two peers
/// calling with the same set (in any order) derive an identical value. The
/// result is the lowercase hex encoding of a SHA-256 digest.
///
/// Inputs are joined with an explicit separator so that distinct participant
/// lists can never concatenate to the same byte string.
///
/// # Errors
///
/// - [`DeriveError::EmptyParticipants`] if `participants` is empty.
pub fn derive_shared_secret(
    participants: &[String],
    conversation_id: &str,
    master_secret: &str,
) -> Result<String, DeriveError> {
    if participants.is_empty() {
        return Err(DeriveError::EmptyParticipants);
    }

    let mut sorted: Vec<&str> = participants.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut hasher = Sha256::new();
    hasher.update(DERIVE_LABEL.as_bytes());
    for participant in sorted {
        hasher.update(b":");
        hasher.update(participant.as_bytes());
    }
    hasher.update(b"|");
    hasher.update(conversation_id.as_bytes());
    hasher.update(b"|");
    hasher.update(master_secret.as_bytes());

    Ok(hex::encode(hasher.finalize()))
}
