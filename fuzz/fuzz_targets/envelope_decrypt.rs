//! Fuzz target for envelope decryption
//!
//! Decryption runs on fully attacker-controlled envelopes. Every field is
//! fuzzed independently: ciphertext, IV, tag, ids, timestamps.
//!
//! # Invariants
//!
//! - Decryption NEVER panics, whatever the envelope claims
//! - No arbitrary envelope authenticates under an unrelated key
//!   (forging a valid tag without the key would break AES-GCM)

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use murmur_crypto::{AUTH_TAG_SIZE, EncryptedEnvelope, IV_SIZE, PayloadKind, decrypt};

#[derive(Debug, Arbitrary)]
struct FuzzEnvelope {
    ciphertext: Vec<u8>,
    iv: [u8; IV_SIZE],
    auth_tag: [u8; AUTH_TAG_SIZE],
    sender_id: String,
    recipient_id: String,
    timestamp_ms: u64,
    comment: bool,
    conversation_id: String,
    post_id: Option<String>,
    now_ms: u64,
    secret: String,
}

fuzz_target!(|input: FuzzEnvelope| {
    let envelope = EncryptedEnvelope {
        ciphertext: input.ciphertext,
        iv: input.iv,
        auth_tag: input.auth_tag,
        sender_id: input.sender_id,
        recipient_id: input.recipient_id,
        timestamp_ms: input.timestamp_ms,
        kind: if input.comment { PayloadKind::Comment } else { PayloadKind::Message },
        conversation_id: input.conversation_id.clone(),
        post_id: input.post_id,
    };

    let result = decrypt(&envelope, &input.secret, &input.conversation_id, input.now_ms);

    // A random tag verifying under an arbitrary key would mean a broken AEAD.
    assert!(result.is_err(), "arbitrary envelope must not authenticate");
});
