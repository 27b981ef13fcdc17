//! Conversation membership tracking.
//!
//! Tracks which conversations the local user participates in so the set can
//! be re-announced to the relay after every reconnect. The relay only routes
//! events for announced conversations, so a reconnect that skips the
//! re-announcement silently drops traffic.

use std::collections::BTreeSet;

use murmur_proto::{RoomSet, WireEvent};

/// Set of conversations the local user is joined to.
#[derive(Debug, Clone, Default)]
pub struct ConversationMembership {
    conversations: BTreeSet<String>,
}

impl ConversationMembership {
    /// Create an empty membership set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Join conversations. Returns the join announcement covering only the
    /// conversations that were not already joined, or `None` when every id
    /// was already present.
    pub fn join<S: Into<String>>(
        &mut self,
        conversation_ids: impl IntoIterator<Item = S>,
    ) -> Option<WireEvent> {
        let added: Vec<String> = conversation_ids
            .into_iter()
            .map(Into::into)
            .filter(|id| self.conversations.insert(id.clone()))
            .collect();

        if added.is_empty() {
            None
        } else {
            Some(WireEvent::Join(RoomSet { conversation_ids: added }))
        }
    }

    /// Leave conversations. Returns the leave announcement covering only the
    /// conversations that were actually joined, or `None` when none were.
    pub fn leave<S: AsRef<str>>(
        &mut self,
        conversation_ids: impl IntoIterator<Item = S>,
    ) -> Option<WireEvent> {
        let removed: Vec<String> = conversation_ids
            .into_iter()
            .filter(|id| self.conversations.remove(id.as_ref()))
            .map(|id| id.as_ref().to_string())
            .collect();

        if removed.is_empty() {
            None
        } else {
            Some(WireEvent::Leave(RoomSet { conversation_ids: removed }))
        }
    }

    /// Announcement re-joining the full set. Sent on every reconnect; the
    /// relay forgets membership when the link drops.
    #[must_use]
    pub fn rejoin_all(&self) -> Option<WireEvent> {
        if self.conversations.is_empty() {
            return None;
        }
        Some(WireEvent::Join(RoomSet {
            conversation_ids: self.conversations.iter().cloned().collect(),
        }))
    }

    /// Whether the conversation is currently joined.
    #[must_use]
    pub fn contains(&self, conversation_id: &str) -> bool {
        self.conversations.contains(conversation_id)
    }

    /// Joined conversation ids, in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.conversations.iter().map(String::as_str)
    }

    /// Number of joined conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// Whether no conversations are joined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}
