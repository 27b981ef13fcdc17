//! Client state machine.
//!
//! [`MessagingClient`] is the top-level state machine that ties the session
//! lifecycle, key vault, conversation membership, and event router together.
//! It owns no I/O: the caller drives it with [`ClientEvent`]s and executes
//! the returned [`ClientAction`]s.

use murmur_core::{
    ConversationMembership, Credentials, DebouncePolicy, EventPayload, EventRouter, EventType,
    KeyStore, KeyVault, SessionConfig, SessionState, SessionStatus, SubscriberId,
    TransportSession, env::Environment, session::SessionAction,
};
use murmur_crypto::{
    EncryptedEnvelope, EnvelopeHeader, IV_SIZE, PayloadKind, comment_conversation_id, decrypt,
    decrypt_comment, encrypt,
};
use murmur_proto::{ReadReceipt, Typing, WireEvent};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    error::ClientError,
    event::{ClientAction, ClientEvent},
};

/// Messaging client for one local user.
///
/// Envelope keys are derived lazily per conversation through the vault.
/// Inbound message envelopes are only decrypted for conversations in the
/// local join set; comment envelopes are post-scoped and need no prior
/// membership.
pub struct MessagingClient<E: Environment, S: KeyStore> {
    /// Environment for time and randomness.
    env: E,

    /// Local user, also the envelope sender id.
    user_id: String,

    /// Connection lifecycle state machine.
    session: TransportSession<E::Instant>,

    /// Conversations to re-announce after every reconnect.
    membership: ConversationMembership,

    /// Debounced delivery to application subscribers.
    router: EventRouter<E::Instant>,

    /// Key material and shared secret cache.
    vault: KeyVault<S>,
}

impl<E: Environment, S: KeyStore> MessagingClient<E, S> {
    /// Create a client with default session and debounce configuration.
    pub fn new(env: E, credentials: Credentials, vault: KeyVault<S>) -> Self {
        Self::with_config(env, credentials, vault, SessionConfig::default(), DebouncePolicy::default())
    }

    /// Create a client with explicit configuration.
    pub fn with_config(
        env: E,
        credentials: Credentials,
        vault: KeyVault<S>,
        session_config: SessionConfig,
        debounce_policy: DebouncePolicy,
    ) -> Self {
        let now = env.now();
        let user_id = credentials.user_id.clone();
        Self {
            env,
            user_id,
            session: TransportSession::new(credentials, session_config, now),
            membership: ConversationMembership::new(),
            router: EventRouter::new(debounce_policy),
            vault,
        }
    }

    /// Current session state.
    #[must_use]
    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    /// Conversations currently joined.
    #[must_use]
    pub fn membership(&self) -> &ConversationMembership {
        &self.membership
    }

    /// Key vault access, for key pair provisioning and integrity checks.
    #[must_use]
    pub fn vault(&mut self) -> &mut KeyVault<S> {
        &mut self.vault
    }

    /// Subscribe to one event type.
    pub fn subscribe(
        &mut self,
        event_type: EventType,
    ) -> (SubscriberId, UnboundedReceiver<EventPayload>) {
        self.router.subscribe(event_type)
    }

    /// Remove one subscription, or every subscription for the type.
    pub fn unsubscribe(&mut self, event_type: EventType, id: Option<SubscriberId>) {
        self.router.unsubscribe(event_type, id);
    }

    /// Process one event.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Session`] for invalid session transitions.
    /// - [`ClientError::Vault`] when key material cannot be derived or
    ///   persisted.
    /// - [`ClientError::NotConnected`] for sends without a live session.
    #[allow(clippy::too_many_lines)]
    pub fn handle(&mut self, event: ClientEvent) -> Result<Vec<ClientAction>, ClientError> {
        let now = self.env.now();

        match event {
            ClientEvent::Connect => {
                self.session.note_activity(now);
                let actions = self.session.connect(now)?;
                Ok(self.run_session_actions(actions, now))
            },

            ClientEvent::Disconnect => {
                let actions = self.session.disconnect();
                Ok(self.run_session_actions(actions, now))
            },

            ClientEvent::Logout => {
                self.vault.wipe()?;
                let actions = self.session.disconnect();
                Ok(self.run_session_actions(actions, now))
            },

            ClientEvent::LinkOpened => {
                let actions = self.session.link_opened(now)?;
                Ok(self.run_session_actions(actions, now))
            },

            ClientEvent::LinkLost => {
                let actions = self.session.link_lost(now);
                Ok(self.run_session_actions(actions, now))
            },

            ClientEvent::LinkHealth { alive } => {
                let actions = self.session.health_report(alive, now);
                Ok(self.run_session_actions(actions, now))
            },

            ClientEvent::Tick => {
                let actions = self.session.tick(now, self.env.unix_millis());
                Ok(self.run_session_actions(actions, now))
            },

            ClientEvent::WireReceived(wire) => self.handle_wire(wire, now),

            ClientEvent::SendMessage { conversation_id, recipient_id, plaintext } => {
                self.send_envelope(
                    &conversation_id,
                    &recipient_id,
                    PayloadKind::Message,
                    None,
                    &plaintext,
                    now,
                )
            },

            ClientEvent::SendComment { post_id, recipient_id, plaintext } => {
                let conversation_id = comment_conversation_id(&post_id);
                self.send_envelope(
                    &conversation_id,
                    &recipient_id,
                    PayloadKind::Comment,
                    Some(post_id),
                    &plaintext,
                    now,
                )
            },

            ClientEvent::SendTyping { conversation_id, started } => {
                self.session.note_activity(now);
                // Best effort: silently dropped without a live session.
                if self.session.state() != SessionState::Connected {
                    return Ok(vec![]);
                }
                let typing = Typing { conversation_id, user_id: self.user_id.clone() };
                let wire = if started {
                    WireEvent::TypingStart(typing)
                } else {
                    WireEvent::TypingStop(typing)
                };
                Ok(vec![ClientAction::Send(wire)])
            },

            ClientEvent::SendReadReceipt { conversation_id, message_id } => {
                self.session.note_activity(now);
                if self.session.state() != SessionState::Connected {
                    return Ok(vec![]);
                }
                Ok(vec![ClientAction::Send(WireEvent::ReadReceipt(ReadReceipt {
                    conversation_id,
                    message_id,
                    user_id: self.user_id.clone(),
                    read_at_ms: self.env.unix_millis(),
                }))])
            },

            ClientEvent::JoinConversations(ids) => {
                let announce = self.membership.join(ids);
                Ok(self.announce_if_connected(announce))
            },

            ClientEvent::LeaveConversations(ids) => {
                let announce = self.membership.leave(ids);
                Ok(self.announce_if_connected(announce))
            },

            ClientEvent::FollowReceived { follower_id } => {
                self.router.dispatch(
                    EventType::FollowNotification,
                    &EventPayload::Follow { follower_id },
                    now,
                );
                Ok(vec![])
            },
        }
    }

    /// Membership changes are announced only over a live session; the relay
    /// relearns the full set from the rejoin announcement otherwise.
    fn announce_if_connected(&self, announce: Option<WireEvent>) -> Vec<ClientAction> {
        match announce {
            Some(wire) if self.session.state() == SessionState::Connected => {
                vec![ClientAction::Send(wire)]
            },
            _ => vec![],
        }
    }

    fn send_envelope(
        &mut self,
        conversation_id: &str,
        recipient_id: &str,
        kind: PayloadKind,
        post_id: Option<String>,
        plaintext: &[u8],
        now: E::Instant,
    ) -> Result<Vec<ClientAction>, ClientError> {
        self.session.note_activity(now);

        if self.session.state() != SessionState::Connected {
            return Err(ClientError::NotConnected { operation: "send".to_string() });
        }

        let participants = vec![self.user_id.clone(), recipient_id.to_string()];
        let secret =
            self.vault.get_or_create_shared_secret(conversation_id, &participants, &self.env)?;

        let mut iv = [0u8; IV_SIZE];
        self.env.random_bytes(&mut iv);

        let header = EnvelopeHeader {
            sender_id: self.user_id.clone(),
            recipient_id: recipient_id.to_string(),
            kind,
            post_id,
        };
        let envelope =
            encrypt(plaintext, &secret, conversation_id, header, iv, self.env.unix_millis());

        Ok(vec![ClientAction::Send(WireEvent::Envelope(envelope))])
    }

    fn handle_wire(
        &mut self,
        wire: WireEvent,
        now: E::Instant,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let session_actions = self.session.handle_event(&wire, now);
        let actions = self.run_session_actions(session_actions, now);

        match wire {
            WireEvent::Envelope(envelope) => {
                self.deliver_envelope(&envelope, now)?;
            },

            WireEvent::TypingStart(typing) => {
                self.router.dispatch(
                    EventType::TypingIndicator,
                    &EventPayload::Typing {
                        conversation_id: typing.conversation_id,
                        user_id: typing.user_id,
                        started: true,
                    },
                    now,
                );
            },

            WireEvent::TypingStop(typing) => {
                self.router.dispatch(
                    EventType::TypingIndicator,
                    &EventPayload::Typing {
                        conversation_id: typing.conversation_id,
                        user_id: typing.user_id,
                        started: false,
                    },
                    now,
                );
            },

            WireEvent::ReadReceipt(receipt) => {
                self.router.dispatch(
                    EventType::ReadReceipt,
                    &EventPayload::ReadReceipt(receipt),
                    now,
                );
            },

            WireEvent::Presence(presence) => {
                self.router.dispatch(
                    EventType::PresenceChange,
                    &EventPayload::Presence(presence),
                    now,
                );
            },

            // Session-level events were already handled above; outbound-only
            // events from the relay are ignored.
            _ => {},
        }

        Ok(actions)
    }

    /// Decrypt an inbound envelope and deliver it.
    ///
    /// An envelope that fails integrity checks is delivered as an
    /// [`EventPayload::Unreadable`] marker; one bad envelope must never take
    /// the session down. Message envelopes for conversations outside the
    /// local join set are unreadable without any key work.
    fn deliver_envelope(
        &mut self,
        envelope: &EncryptedEnvelope,
        now: E::Instant,
    ) -> Result<(), ClientError> {
        let result = self.decrypt_envelope(envelope)?;

        let event_type = match envelope.kind {
            PayloadKind::Message => EventType::MessageReceived,
            PayloadKind::Comment => EventType::CommentReceived,
        };

        let payload = match result {
            Ok(plaintext) => EventPayload::Message {
                conversation_id: envelope.conversation_id.clone(),
                sender_id: envelope.sender_id.clone(),
                kind: envelope.kind,
                plaintext,
            },
            Err(reason) => {
                tracing::warn!(
                    conversation_id = %envelope.conversation_id,
                    sender_id = %envelope.sender_id,
                    %reason,
                    "envelope failed integrity checks"
                );
                EventPayload::Unreadable {
                    conversation_id: envelope.conversation_id.clone(),
                    sender_id: envelope.sender_id.clone(),
                    reason,
                }
            },
        };

        self.router.dispatch(event_type, &payload, now);
        Ok(())
    }

    /// Derive the conversation secret and attempt decryption.
    ///
    /// The outer error is a vault failure; the inner result carries the
    /// per-envelope integrity outcome.
    fn decrypt_envelope(
        &mut self,
        envelope: &EncryptedEnvelope,
    ) -> Result<Result<Vec<u8>, String>, ClientError> {
        if envelope.kind == PayloadKind::Message
            && !self.membership.contains(&envelope.conversation_id)
        {
            return Ok(Err(format!("not joined to conversation {}", envelope.conversation_id)));
        }

        let participants = vec![envelope.sender_id.clone(), envelope.recipient_id.clone()];
        let secret = self.vault.get_or_create_shared_secret(
            &envelope.conversation_id,
            &participants,
            &self.env,
        )?;

        let now_ms = self.env.unix_millis();
        Ok(match (envelope.kind, envelope.post_id.as_deref()) {
            (PayloadKind::Comment, Some(post_id)) => {
                decrypt_comment(envelope, &secret, post_id, now_ms).map_err(|e| e.to_string())
            },
            (PayloadKind::Comment, None) => Err("comment envelope missing post id".to_string()),
            (PayloadKind::Message, _) => {
                decrypt(envelope, &secret, &envelope.conversation_id, now_ms)
                    .map_err(|e| e.to_string())
            },
        })
    }

    /// Execute session actions: map link actions through, expand status
    /// notifications into router deliveries and the reconnect rejoin.
    fn run_session_actions(
        &mut self,
        session_actions: Vec<SessionAction>,
        now: E::Instant,
    ) -> Vec<ClientAction> {
        let mut actions = Vec::new();

        for action in session_actions {
            match action {
                SessionAction::OpenLink => actions.push(ClientAction::OpenLink),
                SessionAction::CloseLink => actions.push(ClientAction::CloseLink),
                SessionAction::Probe => actions.push(ClientAction::Probe),
                SessionAction::Send(wire) => actions.push(ClientAction::Send(wire)),
                SessionAction::Notify(status) => {
                    // The relay forgets membership across connections.
                    if status == SessionStatus::Connected
                        && let Some(rejoin) = self.membership.rejoin_all()
                    {
                        tracing::debug!(
                            conversations = self.membership.len(),
                            "re-announcing membership after connect"
                        );
                        actions.push(ClientAction::Send(rejoin));
                    }

                    self.router.dispatch(
                        EventType::ConnectionStatus,
                        &EventPayload::Status { description: Self::describe(&status) },
                        now,
                    );
                },
            }
        }

        actions
    }

    fn describe(status: &SessionStatus) -> String {
        match status {
            SessionStatus::Connecting => "connecting".to_string(),
            SessionStatus::Connected => "connected".to_string(),
            SessionStatus::Reconnecting { attempt } => format!("reconnecting ({attempt})"),
            SessionStatus::Disconnected { reason } => format!("disconnected: {reason:?}"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use murmur_core::env::test_utils::MockEnv;
    use murmur_core::{MemoryKeyStore, SessionState};
    use murmur_proto::{AuthAck, PresenceChange};

    use super::*;

    fn client(user_id: &str) -> MessagingClient<MockEnv, MemoryKeyStore> {
        client_with_master(user_id, "shared-master")
    }

    fn client_with_master(
        user_id: &str,
        master: &str,
    ) -> MessagingClient<MockEnv, MemoryKeyStore> {
        let env = MockEnv::new();
        let vault =
            KeyVault::open_provisioned(MemoryKeyStore::new(), &env, master.to_string()).unwrap();
        let credentials =
            Credentials { user_id: user_id.to_string(), token: format!("token_{user_id}") };
        MessagingClient::new(env, credentials, vault)
    }

    fn bring_online(client: &mut MessagingClient<MockEnv, MemoryKeyStore>) {
        client.handle(ClientEvent::Connect).unwrap();
        client.handle(ClientEvent::LinkOpened).unwrap();
        client
            .handle(ClientEvent::WireReceived(WireEvent::AuthAck(AuthAck {
                session_id: "sess".to_string(),
            })))
            .unwrap();
        assert_eq!(client.session_state(), SessionState::Connected);
    }

    fn sent_envelope(actions: &[ClientAction]) -> EncryptedEnvelope {
        match actions {
            [ClientAction::Send(WireEvent::Envelope(envelope))] => envelope.clone(),
            other => panic!("expected a single envelope send, got {other:?}"),
        }
    }

    #[test]
    fn connect_produces_open_link() {
        let mut client = client("alice");
        let actions = client.handle(ClientEvent::Connect).unwrap();
        assert_eq!(actions, vec![ClientAction::OpenLink]);
    }

    #[test]
    fn send_before_connect_is_rejected() {
        let mut client = client("alice");
        let result = client.handle(ClientEvent::SendMessage {
            conversation_id: "conv_1".to_string(),
            recipient_id: "bob".to_string(),
            plaintext: b"hello".to_vec(),
        });
        assert!(matches!(result, Err(ClientError::NotConnected { .. })));
    }

    #[test]
    fn message_round_trips_between_two_clients() {
        let mut alice = client("alice");
        let mut bob = client("bob");
        bring_online(&mut alice);
        bring_online(&mut bob);
        bob.handle(ClientEvent::JoinConversations(vec!["conv_ab".to_string()])).unwrap();

        let (_, mut inbox) = bob.subscribe(EventType::MessageReceived);

        let actions = alice
            .handle(ClientEvent::SendMessage {
                conversation_id: "conv_ab".to_string(),
                recipient_id: "bob".to_string(),
                plaintext: b"hello bob".to_vec(),
            })
            .unwrap();
        let envelope = sent_envelope(&actions);

        bob.handle(ClientEvent::WireReceived(WireEvent::Envelope(envelope))).unwrap();
        match inbox.try_recv().unwrap() {
            EventPayload::Message { plaintext, sender_id, .. } => {
                assert_eq!(plaintext, b"hello bob");
                assert_eq!(sender_id, "alice");
            },
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn third_party_cannot_read_the_envelope() {
        let mut alice = client("alice");
        let mut carol = client("carol");
        bring_online(&mut alice);
        bring_online(&mut carol);
        carol.handle(ClientEvent::JoinConversations(vec!["conv_ab".to_string()])).unwrap();

        let (_, mut inbox) = carol.subscribe(EventType::MessageReceived);

        let actions = alice
            .handle(ClientEvent::SendMessage {
                conversation_id: "conv_ab".to_string(),
                recipient_id: "bob".to_string(),
                plaintext: b"secret".to_vec(),
            })
            .unwrap();
        let mut envelope = sent_envelope(&actions);
        // Carol intercepts and relabels the envelope for herself.
        envelope.recipient_id = "carol".to_string();

        carol.handle(ClientEvent::WireReceived(WireEvent::Envelope(envelope))).unwrap();
        match inbox.try_recv().unwrap() {
            EventPayload::Unreadable { sender_id, .. } => assert_eq!(sender_id, "alice"),
            other => panic!("expected unreadable marker, got {other:?}"),
        }
        // The session is unaffected.
        assert_eq!(carol.session_state(), SessionState::Connected);
    }

    #[test]
    fn message_for_an_unjoined_conversation_is_unreadable() {
        let mut alice = client("alice");
        let mut bob = client("bob");
        bring_online(&mut alice);
        bring_online(&mut bob);
        // Bob never joined conv_ab.

        let (_, mut inbox) = bob.subscribe(EventType::MessageReceived);

        let actions = alice
            .handle(ClientEvent::SendMessage {
                conversation_id: "conv_ab".to_string(),
                recipient_id: "bob".to_string(),
                plaintext: b"hello?".to_vec(),
            })
            .unwrap();
        let envelope = sent_envelope(&actions);

        bob.handle(ClientEvent::WireReceived(WireEvent::Envelope(envelope))).unwrap();
        match inbox.try_recv().unwrap() {
            EventPayload::Unreadable { reason, .. } => {
                assert!(reason.contains("not joined"), "unexpected reason: {reason}");
            },
            other => panic!("expected unreadable marker, got {other:?}"),
        }
        // No key material was derived for the unjoined conversation.
        assert_eq!(bob.vault().shared_secret_count(), 0);
    }

    #[test]
    fn comment_round_trips_via_post_id() {
        let mut alice = client("alice");
        let mut bob = client("bob");
        bring_online(&mut alice);
        bring_online(&mut bob);

        let (_, mut inbox) = bob.subscribe(EventType::CommentReceived);

        let actions = alice
            .handle(ClientEvent::SendComment {
                post_id: "post_42".to_string(),
                recipient_id: "bob".to_string(),
                plaintext: b"nice post".to_vec(),
            })
            .unwrap();
        let envelope = sent_envelope(&actions);
        assert_eq!(envelope.post_id.as_deref(), Some("post_42"));

        bob.handle(ClientEvent::WireReceived(WireEvent::Envelope(envelope))).unwrap();
        match inbox.try_recv().unwrap() {
            EventPayload::Message { plaintext, kind, .. } => {
                assert_eq!(plaintext, b"nice post");
                assert_eq!(kind, PayloadKind::Comment);
            },
            other => panic!("expected comment, got {other:?}"),
        }
    }

    #[test]
    fn reconnect_reannounces_the_full_membership() {
        let mut client = client("alice");
        bring_online(&mut client);
        client
            .handle(ClientEvent::JoinConversations(vec![
                "conv_a".to_string(),
                "conv_b".to_string(),
            ]))
            .unwrap();

        client.handle(ClientEvent::LinkLost).unwrap();
        // Wait out the 1s backoff, reopen, re-auth.
        client.env.advance(std::time::Duration::from_secs(1));
        let actions = client.handle(ClientEvent::Tick).unwrap();
        assert_eq!(actions, vec![ClientAction::OpenLink]);
        client.handle(ClientEvent::LinkOpened).unwrap();

        let actions = client
            .handle(ClientEvent::WireReceived(WireEvent::AuthAck(AuthAck {
                session_id: "sess_2".to_string(),
            })))
            .unwrap();

        assert!(actions.iter().any(|a| matches!(
            a,
            ClientAction::Send(WireEvent::Join(set))
                if set.conversation_ids == ["conv_a", "conv_b"]
        )));
    }

    #[test]
    fn join_while_connected_announces_immediately() {
        let mut client = client("alice");
        bring_online(&mut client);

        let actions =
            client.handle(ClientEvent::JoinConversations(vec!["conv_a".to_string()])).unwrap();
        assert!(matches!(&actions[..], [ClientAction::Send(WireEvent::Join(_))]));

        // Re-joining the same conversation announces nothing.
        let actions =
            client.handle(ClientEvent::JoinConversations(vec!["conv_a".to_string()])).unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn join_while_offline_is_deferred_to_reconnect() {
        let mut client = client("alice");
        let actions =
            client.handle(ClientEvent::JoinConversations(vec!["conv_a".to_string()])).unwrap();
        assert!(actions.is_empty());
        assert!(client.membership().contains("conv_a"));
    }

    #[test]
    fn typing_events_route_to_subscribers() {
        let mut client = client("alice");
        bring_online(&mut client);
        let (_, mut rx) = client.subscribe(EventType::TypingIndicator);

        client
            .handle(ClientEvent::WireReceived(WireEvent::TypingStart(Typing {
                conversation_id: "conv_1".to_string(),
                user_id: "bob".to_string(),
            })))
            .unwrap();

        match rx.try_recv().unwrap() {
            EventPayload::Typing { user_id, started, .. } => {
                assert_eq!(user_id, "bob");
                assert!(started);
            },
            other => panic!("expected typing, got {other:?}"),
        }
    }

    #[test]
    fn presence_flaps_are_debounced() {
        let mut client = client("alice");
        bring_online(&mut client);
        let (_, mut rx) = client.subscribe(EventType::PresenceChange);

        let presence = PresenceChange { user_id: "bob".to_string(), online: true };
        for _ in 0..4 {
            client
                .handle(ClientEvent::WireReceived(WireEvent::Presence(presence.clone())))
                .unwrap();
        }

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn follow_notifications_flow_through_the_router() {
        let mut client = client("alice");
        let (_, mut rx) = client.subscribe(EventType::FollowNotification);

        client.handle(ClientEvent::FollowReceived { follower_id: "dave".to_string() }).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            EventPayload::Follow { follower_id: "dave".to_string() }
        );
    }

    #[test]
    fn status_transitions_are_published() {
        let mut client = client("alice");
        let (_, mut rx) = client.subscribe(EventType::ConnectionStatus);

        bring_online(&mut client);
        assert_eq!(
            rx.try_recv().unwrap(),
            EventPayload::Status { description: "connecting".to_string() }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            EventPayload::Status { description: "connected".to_string() }
        );
    }

    #[test]
    fn typing_while_offline_is_dropped() {
        let mut client = client("alice");
        let actions = client
            .handle(ClientEvent::SendTyping { conversation_id: "conv_1".to_string(), started: true })
            .unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn logout_wipes_the_vault_and_closes_the_session() {
        let mut client = client("alice");
        bring_online(&mut client);

        let actions = client.handle(ClientEvent::Logout).unwrap();
        assert!(actions.contains(&ClientAction::CloseLink));
        assert_eq!(client.session_state(), SessionState::Closed);
        assert_eq!(client.vault().shared_secret_count(), 0);
    }
}
