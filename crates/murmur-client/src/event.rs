//! Client events and actions.

use murmur_proto::WireEvent;

/// Events the caller feeds into the client.
///
/// The caller is responsible for:
/// - Receiving wire events from the link and feeding them back
/// - Reporting link lifecycle (opened, lost, health) as it happens
/// - Driving time forward via ticks
/// - Forwarding application intents (send message, join conversation, etc.)
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Application wants the session up.
    Connect,

    /// Application wants the session down. The client stays usable for a
    /// later fresh session.
    Disconnect,

    /// Application is logging the user out. Wipes all key material and
    /// tears the session down.
    Logout,

    /// The driver opened the raw link.
    LinkOpened,

    /// The driver lost the raw link.
    LinkLost,

    /// Result of a [`ClientAction::Probe`].
    LinkHealth {
        /// Whether the link responded.
        alive: bool,
    },

    /// Time tick for timeout, heartbeat, and backoff processing.
    ///
    /// The caller should send ticks periodically (once a second is plenty).
    Tick,

    /// Wire event received from the relay.
    WireReceived(WireEvent),

    /// Application wants to send a direct message.
    SendMessage {
        /// Target conversation.
        conversation_id: String,
        /// The one peer in the conversation.
        recipient_id: String,
        /// Message plaintext.
        plaintext: Vec<u8>,
    },

    /// Application wants to comment on a post.
    SendComment {
        /// Post being commented on.
        post_id: String,
        /// The post's author.
        recipient_id: String,
        /// Comment plaintext.
        plaintext: Vec<u8>,
    },

    /// Application wants to signal typing state.
    SendTyping {
        /// Conversation being typed in.
        conversation_id: String,
        /// True on start, false on stop.
        started: bool,
    },

    /// Application wants to acknowledge reading a message.
    SendReadReceipt {
        /// Conversation the message belongs to.
        conversation_id: String,
        /// Message that was read.
        message_id: String,
    },

    /// Application wants to join conversations.
    JoinConversations(Vec<String>),

    /// Application wants to leave conversations.
    LeaveConversations(Vec<String>),

    /// A follow notification arrived from the social backend.
    ///
    /// Follows travel outside the relay link; they are fed in here so they
    /// flow through the same debounced delivery as everything else.
    FollowReceived {
        /// The new follower.
        follower_id: String,
    },
}

/// Actions the client produces for the caller to execute.
///
/// Decrypted content and state changes are not actions; they are delivered
/// through the router subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Open a fresh link to the relay.
    OpenLink,

    /// Tear down the current link.
    CloseLink,

    /// Send this event to the relay.
    Send(WireEvent),

    /// Check whether the link is actually alive and report the result back
    /// as [`ClientEvent::LinkHealth`].
    Probe,
}
