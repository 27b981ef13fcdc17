//! Envelope encryption using AES-256-GCM.
//!
//! All functions are pure - the per-message IV and the verifier's clock are
//! provided by the caller. This enables deterministic testing and keeps the
//! cipher free of ambient state.
//!
//! The shared secret string is never used as a key directly: it is stretched
//! through PBKDF2-SHA256 with the conversation id as salt, so the derived
//! 256-bit key is bound to the conversation even if the same secret string
//! were ever reused across conversations. The envelope header (conversation,
//! sender, recipient, timestamp) is authenticated as associated data.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::{
    envelope::{AUTH_TAG_SIZE, EncryptedEnvelope, EnvelopeHeader, IV_SIZE, PayloadKind},
    error::IntegrityError,
};

/// PBKDF2 iteration count for conversation key stretching.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Maximum accepted envelope age (24 hours) in milliseconds.
pub const FRESHNESS_WINDOW_MS: u64 = 24 * 60 * 60 * 1000;

/// Maximum tolerated clock skew (5 minutes) for future-dated envelopes.
pub const CLOCK_SKEW_MS: u64 = 5 * 60 * 1000;

/// Derive the 256-bit conversation key from a shared secret.
///
/// Salting with the conversation id binds the key to the conversation.
fn conversation_key(shared_secret: &str, conversation_id: &str) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(
        shared_secret.as_bytes(),
        conversation_id.as_bytes(),
        PBKDF2_ITERATIONS,
        &mut key,
    );
    key
}

/// Canonical associated data covering the envelope header.
///
/// Feeding these fields through the GCM tag means rewriting the routing
/// identity or the timestamp on the wire fails authentication.
fn associated_data(
    conversation_id: &str,
    sender_id: &str,
    recipient_id: &str,
    timestamp_ms: u64,
) -> Vec<u8> {
    let mut aad = Vec::with_capacity(
        conversation_id.len() + sender_id.len() + recipient_id.len() + 3 + size_of::<u64>(),
    );
    aad.extend_from_slice(conversation_id.as_bytes());
    aad.push(0);
    aad.extend_from_slice(sender_id.as_bytes());
    aad.push(0);
    aad.extend_from_slice(recipient_id.as_bytes());
    aad.push(0);
    aad.extend_from_slice(&timestamp_ms.to_be_bytes());
    aad
}

/// Encrypt a plaintext into an [`EncryptedEnvelope`].
///
/// The caller provides a fresh random 96-bit IV (from its environment's CSPRNG
/// in production) and its wall clock in unix milliseconds. The GCM tag is
/// carried separately from the ciphertext in the envelope.
pub fn encrypt(
    plaintext: &[u8],
    shared_secret: &str,
    conversation_id: &str,
    header: EnvelopeHeader,
    iv: [u8; IV_SIZE],
    timestamp_ms: u64,
) -> EncryptedEnvelope {
    let mut key = conversation_key(shared_secret, conversation_id);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

    let aad =
        associated_data(conversation_id, &header.sender_id, &header.recipient_id, timestamp_ms);
    let Ok(mut sealed) =
        cipher.encrypt(Nonce::from_slice(&iv), Payload { msg: plaintext, aad: &aad })
    else {
        unreachable!("AES-256-GCM encryption cannot fail with valid inputs");
    };
    key.zeroize();

    // The aead crate appends the tag; the envelope carries it separately.
    let tag_offset = sealed.len() - AUTH_TAG_SIZE;
    let tag_bytes = sealed.split_off(tag_offset);
    let mut auth_tag = [0u8; AUTH_TAG_SIZE];
    auth_tag.copy_from_slice(&tag_bytes);

    EncryptedEnvelope {
        ciphertext: sealed,
        iv,
        auth_tag,
        sender_id: header.sender_id,
        recipient_id: header.recipient_id,
        timestamp_ms,
        kind: header.kind,
        conversation_id: conversation_id.to_string(),
        post_id: header.post_id,
    }
}

/// Decrypt and verify an [`EncryptedEnvelope`].
///
/// Verification order: conversation binding, freshness, then authentication.
/// Each failure is a distinct [`IntegrityError`]; none is retryable.
///
/// # Errors
///
/// - [`IntegrityError::ConversationMismatch`] if the envelope was encrypted
///   for a different conversation (cross-conversation replay).
/// - [`IntegrityError::StaleTimestamp`] if the envelope is older than
///   [`FRESHNESS_WINDOW_MS`] relative to `now_ms`.
/// - [`IntegrityError::FutureTimestamp`] if the envelope claims a timestamp
///   more than [`CLOCK_SKEW_MS`] ahead of `now_ms`.
/// - [`IntegrityError::AuthenticationFailed`] if the tag does not verify
///   (tampered ciphertext, IV, tag, header fields, or wrong key).
pub fn decrypt(
    envelope: &EncryptedEnvelope,
    shared_secret: &str,
    expected_conversation_id: &str,
    now_ms: u64,
) -> Result<Vec<u8>, IntegrityError> {
    if envelope.conversation_id != expected_conversation_id {
        return Err(IntegrityError::ConversationMismatch {
            expected: expected_conversation_id.to_string(),
            actual: envelope.conversation_id.clone(),
        });
    }

    let age_ms = now_ms.saturating_sub(envelope.timestamp_ms);
    if age_ms > FRESHNESS_WINDOW_MS {
        return Err(IntegrityError::StaleTimestamp { age_ms, limit_ms: FRESHNESS_WINDOW_MS });
    }

    let skew_ms = envelope.timestamp_ms.saturating_sub(now_ms);
    if skew_ms > CLOCK_SKEW_MS {
        return Err(IntegrityError::FutureTimestamp { skew_ms, limit_ms: CLOCK_SKEW_MS });
    }

    let mut key = conversation_key(shared_secret, expected_conversation_id);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    key.zeroize();

    let mut sealed = Vec::with_capacity(envelope.ciphertext.len() + AUTH_TAG_SIZE);
    sealed.extend_from_slice(&envelope.ciphertext);
    sealed.extend_from_slice(&envelope.auth_tag);

    let aad = associated_data(
        &envelope.conversation_id,
        &envelope.sender_id,
        &envelope.recipient_id,
        envelope.timestamp_ms,
    );
    cipher
        .decrypt(Nonce::from_slice(&envelope.iv), Payload { msg: sealed.as_slice(), aad: &aad })
        .map_err(|_| IntegrityError::AuthenticationFailed)
}

/// Synthesize the conversation id for comments on a post.
///
/// Deterministic, so the author and any commenter derive the same key
/// without a handshake.
pub fn comment_conversation_id(post_id: &str) -> String {
    format!("post_{post_id}")
}

/// Encrypt a comment on a post.
///
/// Thin variant of [`encrypt`] with the conversation id synthesized from the
/// post id via [`comment_conversation_id`].
pub fn encrypt_comment(
    plaintext: &[u8],
    shared_secret: &str,
    post_id: &str,
    sender_id: String,
    recipient_id: String,
    iv: [u8; IV_SIZE],
    timestamp_ms: u64,
) -> EncryptedEnvelope {
    let conversation_id = comment_conversation_id(post_id);
    let header = EnvelopeHeader {
        sender_id,
        recipient_id,
        kind: PayloadKind::Comment,
        post_id: Some(post_id.to_string()),
    };
    encrypt(plaintext, shared_secret, &conversation_id, header, iv, timestamp_ms)
}

/// Decrypt a comment on a post.
///
/// # Errors
///
/// Same failure modes as [`decrypt`].
pub fn decrypt_comment(
    envelope: &EncryptedEnvelope,
    shared_secret: &str,
    post_id: &str,
    now_ms: u64,
) -> Result<Vec<u8>, IntegrityError> {
    decrypt(envelope, shared_secret, &comment_conversation_id(post_id), now_ms)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const NOW_MS: u64 = 1_700_000_000_000;

    fn test_header() -> EnvelopeHeader {
        EnvelopeHeader {
            sender_id: "alice".to_string(),
            recipient_id: "bob".to_string(),
            kind: PayloadKind::Message,
            post_id: None,
        }
    }

    fn seal(plaintext: &[u8], secret: &str, conversation_id: &str) -> EncryptedEnvelope {
        encrypt(plaintext, secret, conversation_id, test_header(), [0xA5; IV_SIZE], NOW_MS)
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let envelope = seal(b"hello", "secret", "conv_1");
        let plaintext = decrypt(&envelope, "secret", "conv_1", NOW_MS).unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn encrypt_decrypt_empty_message() {
        let envelope = seal(b"", "secret", "conv_1");
        let plaintext = decrypt(&envelope, "secret", "conv_1", NOW_MS).unwrap();
        assert_eq!(plaintext, b"");
    }

    #[test]
    fn tag_is_carried_separately() {
        let envelope = seal(b"twelve bytes", "secret", "conv_1");
        assert_eq!(envelope.ciphertext.len(), 12);
        assert_eq!(envelope.auth_tag.len(), AUTH_TAG_SIZE);
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let mut envelope = seal(b"original", "secret", "conv_1");
        envelope.ciphertext[0] ^= 0x01;
        let result = decrypt(&envelope, "secret", "conv_1", NOW_MS);
        assert_eq!(result, Err(IntegrityError::AuthenticationFailed));
    }

    #[test]
    fn tampered_iv_fails() {
        let mut envelope = seal(b"original", "secret", "conv_1");
        envelope.iv[3] ^= 0x80;
        let result = decrypt(&envelope, "secret", "conv_1", NOW_MS);
        assert_eq!(result, Err(IntegrityError::AuthenticationFailed));
    }

    #[test]
    fn tampered_auth_tag_fails() {
        let mut envelope = seal(b"original", "secret", "conv_1");
        envelope.auth_tag[15] ^= 0x01;
        let result = decrypt(&envelope, "secret", "conv_1", NOW_MS);
        assert_eq!(result, Err(IntegrityError::AuthenticationFailed));
    }

    #[test]
    fn wrong_secret_fails() {
        let envelope = seal(b"original", "secret_a", "conv_1");
        let result = decrypt(&envelope, "secret_b", "conv_1", NOW_MS);
        assert_eq!(result, Err(IntegrityError::AuthenticationFailed));
    }

    #[test]
    fn envelope_is_bound_to_its_conversation() {
        // Correct secret, wrong expected conversation: rejected before any
        // key work, as a mismatch rather than an auth failure.
        let envelope = seal(b"for conv_1 only", "secret", "conv_1");
        let result = decrypt(&envelope, "secret", "conv_2", NOW_MS);
        assert!(matches!(result, Err(IntegrityError::ConversationMismatch { .. })));
    }

    #[test]
    fn relabeled_envelope_fails_authentication() {
        // An attacker rewriting conversation_id to pass the binding check
        // still fails: the key was derived with the original id as salt.
        let mut envelope = seal(b"for conv_1 only", "secret", "conv_1");
        envelope.conversation_id = "conv_2".to_string();
        let result = decrypt(&envelope, "secret", "conv_2", NOW_MS);
        assert_eq!(result, Err(IntegrityError::AuthenticationFailed));
    }

    #[test]
    fn stale_envelope_is_rejected() {
        let envelope = seal(b"old news", "secret", "conv_1");
        // 25 hours later
        let later = NOW_MS + 25 * 60 * 60 * 1000;
        let result = decrypt(&envelope, "secret", "conv_1", later);
        assert!(matches!(result, Err(IntegrityError::StaleTimestamp { .. })));
    }

    #[test]
    fn envelope_at_window_edge_is_accepted() {
        let envelope = seal(b"just in time", "secret", "conv_1");
        let edge = NOW_MS + FRESHNESS_WINDOW_MS;
        assert!(decrypt(&envelope, "secret", "conv_1", edge).is_ok());
    }

    #[test]
    fn future_dated_envelope_is_rejected() {
        // A timestamp an hour ahead of the verifier's clock cannot be
        // explained by clock skew.
        let envelope = seal(b"from the future", "secret", "conv_1");
        let earlier = NOW_MS - 60 * 60 * 1000;
        let result = decrypt(&envelope, "secret", "conv_1", earlier);
        assert!(matches!(result, Err(IntegrityError::FutureTimestamp { .. })));
    }

    #[test]
    fn envelope_within_clock_skew_is_accepted() {
        let envelope = seal(b"slightly ahead", "secret", "conv_1");
        let earlier = NOW_MS - CLOCK_SKEW_MS;
        assert!(decrypt(&envelope, "secret", "conv_1", earlier).is_ok());
    }

    #[test]
    fn rewritten_timestamp_fails_authentication() {
        // The timestamp is covered by the tag, so a replayer cannot refresh
        // an old envelope by rewriting it.
        let mut envelope = seal(b"replayed", "secret", "conv_1");
        envelope.timestamp_ms += 1000;
        let result = decrypt(&envelope, "secret", "conv_1", NOW_MS + 1000);
        assert_eq!(result, Err(IntegrityError::AuthenticationFailed));
    }

    #[test]
    fn rewritten_sender_fails_authentication() {
        let mut envelope = seal(b"from alice", "secret", "conv_1");
        envelope.sender_id = "mallory".to_string();
        let result = decrypt(&envelope, "secret", "conv_1", NOW_MS);
        assert_eq!(result, Err(IntegrityError::AuthenticationFailed));
    }

    #[test]
    fn comment_roundtrip_via_post_id() {
        let envelope = encrypt_comment(
            b"nice post",
            "secret",
            "post_42_id",
            "alice".to_string(),
            "bob".to_string(),
            [0x11; IV_SIZE],
            NOW_MS,
        );

        assert_eq!(envelope.kind, PayloadKind::Comment);
        assert_eq!(envelope.conversation_id, "post_post_42_id");
        assert_eq!(envelope.post_id.as_deref(), Some("post_42_id"));

        let plaintext = decrypt_comment(&envelope, "secret", "post_42_id", NOW_MS).unwrap();
        assert_eq!(plaintext, b"nice post");
    }

    #[test]
    fn distinct_ivs_produce_distinct_ciphertext() {
        let a = encrypt(b"same", "secret", "conv_1", test_header(), [0x00; IV_SIZE], NOW_MS);
        let b = encrypt(b"same", "secret", "conv_1", test_header(), [0xFF; IV_SIZE], NOW_MS);
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_ne!(a.auth_tag, b.auth_tag);
    }

    proptest! {
        // PBKDF2 at full iteration count is slow; keep the case count modest.
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn roundtrip_preserves_arbitrary_plaintext(
            plaintext in proptest::collection::vec(any::<u8>(), 0..512),
            secret in "[a-f0-9]{64}",
        ) {
            let envelope = seal(&plaintext, &secret, "conv_p");
            let decrypted = decrypt(&envelope, &secret, "conv_p", NOW_MS).unwrap();
            prop_assert_eq!(decrypted, plaintext);
        }
    }
}
