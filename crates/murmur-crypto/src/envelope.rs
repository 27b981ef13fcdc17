//! The encrypted envelope: the transmissible unit of the messaging layer.

use serde::{Deserialize, Serialize};

/// AES-GCM IV size in bytes (96 bits).
pub const IV_SIZE: usize = 12;

/// AES-GCM authentication tag size in bytes (128 bits).
pub const AUTH_TAG_SIZE: usize = 16;

/// What kind of payload the envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadKind {
    /// A direct conversation message.
    Message,
    /// A comment on a post.
    Comment,
}

/// Addressing metadata for an envelope, supplied by the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeader {
    /// Sending user.
    pub sender_id: String,
    /// Receiving user.
    pub recipient_id: String,
    /// Message or comment.
    pub kind: PayloadKind,
    /// Post the comment belongs to. `None` for direct messages.
    pub post_id: Option<String>,
}

/// An encrypted message or comment plus the metadata needed to decrypt and
/// validate it. Immutable once constructed; the server relays it opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// AES-256-GCM ciphertext (tag carried separately).
    pub ciphertext: Vec<u8>,
    /// Fresh random 96-bit IV, unique per envelope.
    pub iv: [u8; IV_SIZE],
    /// 128-bit GCM authentication tag.
    pub auth_tag: [u8; AUTH_TAG_SIZE],
    /// Sending user.
    pub sender_id: String,
    /// Receiving user.
    pub recipient_id: String,
    /// Sender's wall clock at encryption time, unix milliseconds. Checked
    /// against the verifier's clock on decrypt.
    pub timestamp_ms: u64,
    /// Message or comment.
    pub kind: PayloadKind,
    /// Conversation the envelope is bound to.
    pub conversation_id: String,
    /// Post the comment belongs to. `None` for direct messages.
    pub post_id: Option<String>,
}
