//! Debounced event routing.
//!
//! Fans decrypted and session events out to application subscribers over
//! channels, with per-type debounce windows that collapse identical bursts
//! (typing storms, presence flaps) into a single delivery. Like the session
//! state machine, the router is pure with respect to time: callers pass the
//! current instant into [`EventRouter::dispatch`].

use std::{
    collections::HashMap,
    hash::{DefaultHasher, Hash, Hasher},
    ops::Sub,
    time::{Duration, Instant},
};

use murmur_crypto::PayloadKind;
use murmur_proto::{PresenceChange, ReadReceipt};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// Categories of application-facing events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// A direct message arrived (or failed to decrypt).
    MessageReceived,
    /// A post comment arrived (or failed to decrypt).
    CommentReceived,
    /// A peer read a message we sent.
    ReadReceipt,
    /// A peer started or stopped typing.
    TypingIndicator,
    /// Somebody followed the local user.
    FollowNotification,
    /// A peer went online or offline.
    PresenceChange,
    /// The session status changed.
    ConnectionStatus,
}

/// Per-type debounce windows.
///
/// A dispatch whose payload is identical to one delivered within the window
/// is suppressed; the first dispatch of a burst is always delivered.
#[derive(Debug, Clone)]
pub struct DebouncePolicy {
    /// Window for direct messages.
    pub message: Duration,
    /// Window for comments.
    pub comment: Duration,
    /// Window for read receipts.
    pub read_receipt: Duration,
    /// Window for typing indicators.
    pub typing: Duration,
    /// Window for follow notifications.
    pub follow: Duration,
    /// Window for presence changes.
    pub presence: Duration,
    /// Window for connection status changes.
    pub status: Duration,
}

impl Default for DebouncePolicy {
    fn default() -> Self {
        Self {
            message: Duration::from_millis(100),
            comment: Duration::from_millis(100),
            read_receipt: Duration::from_millis(100),
            typing: Duration::from_millis(200),
            follow: Duration::from_millis(200),
            presence: Duration::from_millis(300),
            status: Duration::from_millis(500),
        }
    }
}

impl DebouncePolicy {
    /// Window applied to the given event type.
    #[must_use]
    pub fn window(&self, event_type: EventType) -> Duration {
        match event_type {
            EventType::MessageReceived => self.message,
            EventType::CommentReceived => self.comment,
            EventType::ReadReceipt => self.read_receipt,
            EventType::TypingIndicator => self.typing,
            EventType::FollowNotification => self.follow,
            EventType::PresenceChange => self.presence,
            EventType::ConnectionStatus => self.status,
        }
    }
}

/// Payload delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventPayload {
    /// Decrypted message or comment content.
    Message {
        /// Conversation the plaintext belongs to.
        conversation_id: String,
        /// Who sent it.
        sender_id: String,
        /// Message or comment.
        kind: PayloadKind,
        /// Decrypted content.
        plaintext: Vec<u8>,
    },
    /// An envelope arrived but could not be decrypted or verified.
    Unreadable {
        /// Conversation the envelope claimed.
        conversation_id: String,
        /// Who sent it.
        sender_id: String,
        /// Human-readable failure description.
        reason: String,
    },
    /// A peer read one of our messages.
    ReadReceipt(ReadReceipt),
    /// A peer started or stopped typing.
    Typing {
        /// Conversation the indicator belongs to.
        conversation_id: String,
        /// Peer who is typing.
        user_id: String,
        /// True on start, false on stop.
        started: bool,
    },
    /// A peer's presence changed.
    Presence(PresenceChange),
    /// Somebody followed the local user.
    Follow {
        /// The new follower.
        follower_id: String,
    },
    /// The session status changed.
    Status {
        /// Status description, e.g. "connected" or "reconnecting (2)".
        description: String,
    },
}

/// Opaque handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub u64);

/// Debounced publish/subscribe router.
///
/// Generic over `Instant` to support virtual time in tests.
#[derive(Debug)]
pub struct EventRouter<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    policy: DebouncePolicy,
    subscribers: HashMap<EventType, Vec<(SubscriberId, UnboundedSender<EventPayload>)>>,
    /// Last delivery instant per (type, payload signature).
    recent: HashMap<(EventType, u64), I>,
    next_id: u64,
}

impl<I> EventRouter<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a router with the given debounce policy.
    #[must_use]
    pub fn new(policy: DebouncePolicy) -> Self {
        Self { policy, subscribers: HashMap::new(), recent: HashMap::new(), next_id: 0 }
    }

    /// Subscribe to one event type. Returns the receiving channel half and
    /// the handle needed to unsubscribe.
    pub fn subscribe(
        &mut self,
        event_type: EventType,
    ) -> (SubscriberId, UnboundedReceiver<EventPayload>) {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;

        let (tx, rx) = unbounded_channel();
        self.subscribers.entry(event_type).or_default().push((id, tx));
        (id, rx)
    }

    /// Replace the channel behind an existing subscription.
    ///
    /// The subscriber keeps its identity and delivery position. Registering
    /// twice with the same handle must not produce duplicate deliveries.
    pub fn resubscribe(
        &mut self,
        event_type: EventType,
        id: SubscriberId,
    ) -> UnboundedReceiver<EventPayload> {
        let (tx, rx) = unbounded_channel();
        let entries = self.subscribers.entry(event_type).or_default();

        if let Some(entry) = entries.iter_mut().find(|(existing, _)| *existing == id) {
            entry.1 = tx;
        } else {
            entries.push((id, tx));
        }
        rx
    }

    /// Remove one subscription, or all subscriptions for the type when `id`
    /// is `None`. Unknown handles are ignored.
    pub fn unsubscribe(&mut self, event_type: EventType, id: Option<SubscriberId>) {
        match id {
            Some(id) => {
                if let Some(entries) = self.subscribers.get_mut(&event_type) {
                    entries.retain(|(existing, _)| *existing != id);
                }
            },
            None => {
                self.subscribers.remove(&event_type);
            },
        }
    }

    /// Number of live subscriptions for the type.
    #[must_use]
    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.subscribers.get(&event_type).map_or(0, Vec::len)
    }

    /// Deliver a payload to the type's subscribers, in registration order.
    ///
    /// Returns `false` when the payload was suppressed: an identical payload
    /// was already delivered within the type's debounce window. Distinct
    /// payloads never suppress each other. Subscribers whose receiver was
    /// dropped are pruned on the way through.
    pub fn dispatch(&mut self, event_type: EventType, payload: &EventPayload, now: I) -> bool {
        let key = (event_type, Self::signature(payload));
        let window = self.policy.window(event_type);

        if let Some(&last) = self.recent.get(&key)
            && now - last < window
        {
            return false;
        }
        self.recent.insert(key, now);
        self.recent.retain(|(kind, _), last| now - *last < self.policy.window(*kind));

        if let Some(entries) = self.subscribers.get_mut(&event_type) {
            entries.retain(|(_, tx)| tx.send(payload.clone()).is_ok());
        }
        true
    }

    fn signature(payload: &EventPayload) -> u64 {
        let mut hasher = DefaultHasher::new();
        payload.hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new(DebouncePolicy::default())
    }
}
