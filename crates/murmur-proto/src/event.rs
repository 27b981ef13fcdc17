//! Named wire events exchanged with the relay server.

use murmur_crypto::EncryptedEnvelope;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Credential presented immediately after the raw link opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Authenticating user.
    pub user_id: String,
    /// Opaque credential token (session/JWT issuance is external).
    pub token: String,
}

/// Server acknowledgment of a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthAck {
    /// Server-assigned session identifier.
    pub session_id: String,
}

/// Explicit credential rejection. Terminal - the client must not retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthReject {
    /// Human-readable rejection reason.
    pub reason: String,
}

/// Best-effort liveness ping. No response matching is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Sender's wall clock, unix milliseconds.
    pub sent_at_ms: u64,
}

/// Join/leave framing for a set of conversations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSet {
    /// Conversation identifiers.
    pub conversation_ids: Vec<String>,
}

/// Typing indicator for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Typing {
    /// Conversation the indicator belongs to.
    pub conversation_id: String,
    /// User who is (or stopped) typing.
    pub user_id: String,
}

/// Read receipt for a delivered message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReadReceipt {
    /// Conversation the message belongs to.
    pub conversation_id: String,
    /// Message that was read.
    pub message_id: String,
    /// Reading user.
    pub user_id: String,
    /// When the message was read, unix milliseconds.
    pub read_at_ms: u64,
}

/// Presence transition for a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresenceChange {
    /// User whose presence changed.
    pub user_id: String,
    /// Whether the user is now online.
    pub online: bool,
}

/// Server-initiated disconnect. Terminal - the client must not auto-reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goodbye {
    /// Reason for the disconnect.
    pub reason: String,
}

/// All events carried over the relay link, in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireEvent {
    /// Client credential, sent immediately on link open.
    Auth(AuthRequest),
    /// Server acknowledgment; completes the handshake.
    AuthAck(AuthAck),
    /// Explicit credential rejection (terminal).
    AuthReject(AuthReject),
    /// Liveness heartbeat.
    Ping(Ping),
    /// Subscribe to conversations.
    Join(RoomSet),
    /// Unsubscribe from conversations.
    Leave(RoomSet),
    /// Encrypted message or comment (opaque to the server).
    Envelope(EncryptedEnvelope),
    /// User started typing.
    TypingStart(Typing),
    /// User stopped typing.
    TypingStop(Typing),
    /// Message read receipt.
    ReadReceipt(ReadReceipt),
    /// Presence change notification.
    Presence(PresenceChange),
    /// Server-initiated disconnect (terminal).
    Goodbye(Goodbye),
}

impl WireEvent {
    /// Stable event name, as used in logs and delivery shaping.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::AuthAck(_) => "auth_ack",
            Self::AuthReject(_) => "auth_reject",
            Self::Ping(_) => "ping",
            Self::Join(_) => "join",
            Self::Leave(_) => "leave",
            Self::Envelope(_) => "envelope",
            Self::TypingStart(_) => "typing_start",
            Self::TypingStop(_) => "typing_stop",
            Self::ReadReceipt(_) => "read_receipt",
            Self::Presence(_) => "presence",
            Self::Goodbye(_) => "goodbye",
        }
    }

    /// Encode to CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// Decode from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Decode`] if the bytes are not a valid event.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use murmur_crypto::{AUTH_TAG_SIZE, IV_SIZE, PayloadKind};
    use proptest::prelude::*;

    use super::*;

    fn sample_envelope() -> EncryptedEnvelope {
        EncryptedEnvelope {
            ciphertext: vec![0xDE, 0xAD, 0xBE, 0xEF],
            iv: [0x01; IV_SIZE],
            auth_tag: [0x02; AUTH_TAG_SIZE],
            sender_id: "alice".to_string(),
            recipient_id: "bob".to_string(),
            timestamp_ms: 1_700_000_000_000,
            kind: PayloadKind::Message,
            conversation_id: "conv_1".to_string(),
            post_id: None,
        }
    }

    #[test]
    fn envelope_event_roundtrips() {
        let event = WireEvent::Envelope(sample_envelope());
        let bytes = event.encode().unwrap();
        let decoded = WireEvent::decode(&bytes).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn auth_event_roundtrips() {
        let event = WireEvent::Auth(AuthRequest {
            user_id: "alice".to_string(),
            token: "jwt.abc.def".to_string(),
        });
        let decoded = WireEvent::decode(&event.encode().unwrap()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn kinds_are_distinct() {
        let events = [
            WireEvent::Auth(AuthRequest { user_id: String::new(), token: String::new() }),
            WireEvent::AuthAck(AuthAck { session_id: String::new() }),
            WireEvent::AuthReject(AuthReject { reason: String::new() }),
            WireEvent::Ping(Ping { sent_at_ms: 0 }),
            WireEvent::Join(RoomSet { conversation_ids: vec![] }),
            WireEvent::Leave(RoomSet { conversation_ids: vec![] }),
            WireEvent::Envelope(sample_envelope()),
            WireEvent::TypingStart(Typing {
                conversation_id: String::new(),
                user_id: String::new(),
            }),
            WireEvent::TypingStop(Typing {
                conversation_id: String::new(),
                user_id: String::new(),
            }),
            WireEvent::ReadReceipt(ReadReceipt {
                conversation_id: String::new(),
                message_id: String::new(),
                user_id: String::new(),
                read_at_ms: 0,
            }),
            WireEvent::Presence(PresenceChange { user_id: String::new(), online: false }),
            WireEvent::Goodbye(Goodbye { reason: String::new() }),
        ];

        let mut kinds: Vec<&str> = events.iter().map(WireEvent::kind).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), events.len(), "every event kind must be unique");
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let result = WireEvent::decode(&[0xFF, 0x00, 0x13, 0x37]);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    proptest! {
        #[test]
        fn envelope_payload_roundtrips_arbitrary_blobs(
            ciphertext in proptest::collection::vec(any::<u8>(), 0..256),
            timestamp_ms in any::<u64>(),
        ) {
            let mut envelope = sample_envelope();
            envelope.ciphertext = ciphertext;
            envelope.timestamp_ms = timestamp_ms;

            let event = WireEvent::Envelope(envelope);
            let decoded = WireEvent::decode(&event.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded, event);
        }
    }
}
