//! Transport session state machine.
//!
//! Manages the lifecycle of the one logical connection to the messaging
//! relay: authentication handshake, heartbeats, bounded reconnect backoff,
//! independent health probing, and teardown. Uses the action pattern: methods
//! take time as input and return actions for the driver to execute. This
//! keeps the state machine pure (no I/O) and makes testing straightforward.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ connect ┌────────────┐ link up ┌────────────────┐ auth ack ┌───────────┐
//! │ Idle │────────>│ Connecting │────────>│ Authenticating │─────────>│ Connected │
//! └──────┘         └────────────┘         └────────────────┘          └───────────┘
//!                        ↑ backoff              │ timeout                   │ link
//!                        │ elapsed              ↓                           ↓ lost
//!                  ┌──────────────┐  <5 attempts ┌────────┐ 5 attempts ┌────────┐
//!                  │ Reconnecting │<─────────────┤ (loss) ├───────────>│ Closed │
//!                  └──────────────┘              └────────┘            └────────┘
//! ```
//!
//! A server goodbye, an explicit auth rejection, or a requested disconnect
//! moves any state to `Closed`, which is terminal for this instance: callers
//! reconnect from scratch by constructing a fresh session.

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use murmur_proto::{AuthRequest, Ping, WireEvent};
use thiserror::Error;

/// Time allowed for the raw connect plus auth acknowledgment.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Interval at which the session emits liveness pings while connected.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Interval of the independent link health probe.
pub const DEFAULT_HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// First reconnect delay; doubles per attempt.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Ceiling on the reconnect delay.
pub const DEFAULT_RECONNECT_CAP_DELAY: Duration = Duration::from_secs(8);

/// Reconnect attempts before the session gives up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Errors from session state machine operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Invalid state transition attempted.
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// Current state when error occurred.
        state: SessionState,
        /// Operation that was attempted.
        operation: String,
    },
}

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet connected.
    Idle,
    /// Raw link being opened.
    Connecting,
    /// Link open, credential sent, awaiting acknowledgment.
    Authenticating,
    /// Authenticated and live.
    Connected,
    /// Link lost; waiting out the backoff delay.
    Reconnecting,
    /// Terminal. A fresh session object is required to connect again.
    Closed,
}

/// Why a session ended up disconnected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Reconnect attempts were exhausted.
    LinkLost,
    /// The server closed the session; never auto-reconnected.
    ServerClosed(String),
    /// The server rejected our credential; never auto-reconnected.
    AuthRejected(String),
    /// The caller asked for the disconnect.
    Requested,
}

/// User-visible session status transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// First connection in progress.
    Connecting,
    /// Authenticated and live.
    Connected,
    /// Transient loss; a retry is scheduled.
    Reconnecting {
        /// Which attempt is pending (1-based).
        attempt: u32,
    },
    /// Terminal for this session instance.
    Disconnected {
        /// Why the session ended.
        reason: DisconnectReason,
    },
}

/// Actions returned by the session state machine.
///
/// The driver (transport task or test harness) executes these:
/// open/close/probe the underlying link, send an event, or surface a status
/// change to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Open a fresh link to the relay.
    OpenLink,
    /// Tear down the current link.
    CloseLink,
    /// Send this event to the relay.
    Send(WireEvent),
    /// Ask the driver whether the link is actually alive.
    Probe,
    /// Surface a status transition to the application.
    Notify(SessionStatus),
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Timeout covering link open plus auth acknowledgment.
    pub connect_timeout: Duration,
    /// Liveness ping interval while connected.
    pub heartbeat_interval: Duration,
    /// Independent health probe interval while connected.
    pub health_poll_interval: Duration,
    /// First reconnect delay.
    pub reconnect_base_delay: Duration,
    /// Reconnect delay ceiling.
    pub reconnect_cap_delay: Duration,
    /// Attempts before giving up.
    pub max_reconnect_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            health_poll_interval: DEFAULT_HEALTH_POLL_INTERVAL,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            reconnect_cap_delay: DEFAULT_RECONNECT_CAP_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Credential presented during the handshake.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Authenticating user.
    pub user_id: String,
    /// Opaque token (issued by the external auth layer).
    pub token: String,
}

/// Connection lifecycle state machine.
///
/// This is a pure state machine - no I/O. Time is passed as parameters to the
/// methods that need it. Generic over `Instant` to support virtual time in
/// tests.
#[derive(Debug, Clone)]
pub struct TransportSession<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Current state.
    state: SessionState,
    /// Configuration.
    config: SessionConfig,
    /// Credential for the handshake.
    credentials: Credentials,
    /// When the current phase (connect attempt or backoff wait) began.
    phase_started: I,
    /// Last heartbeat sent.
    last_heartbeat: Option<I>,
    /// Last health probe requested.
    last_probe: Option<I>,
    /// Last user interaction, for supervising reconnect policy.
    last_activity: I,
    /// Reconnect attempt counter. Zero while the link is healthy.
    attempt: u32,
    /// Server-assigned session id, once authenticated.
    session_id: Option<String>,
}

impl<I> TransportSession<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a new session in [`SessionState::Idle`].
    pub fn new(credentials: Credentials, config: SessionConfig, now: I) -> Self {
        Self {
            state: SessionState::Idle,
            config,
            credentials,
            phase_started: now,
            last_heartbeat: None,
            last_probe: None,
            last_activity: now,
            attempt: 0,
            session_id: None,
        }
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Server-assigned session id. `None` until authenticated.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Pending reconnect attempt number. Zero while the link is healthy.
    #[must_use]
    pub fn reconnect_attempt(&self) -> u32 {
        self.attempt
    }

    /// Time since the last recorded user interaction.
    ///
    /// Policy hook: a supervising layer may consult this to suppress or delay
    /// reconnect storms during idle periods.
    #[must_use]
    pub fn idle_for(&self, now: I) -> Duration {
        now - self.last_activity
    }

    /// Record recent user interaction.
    pub fn note_activity(&mut self, now: I) {
        self.last_activity = now;
    }

    /// Start connecting.
    ///
    /// A no-op while already connecting, authenticating, connected, or
    /// waiting out a backoff delay - rapid repeated calls must not produce
    /// duplicate connections.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidState`] if the session is closed. A closed
    ///   session is never revived; construct a fresh one.
    pub fn connect(&mut self, now: I) -> Result<Vec<SessionAction>, SessionError> {
        match self.state {
            SessionState::Idle => {
                self.state = SessionState::Connecting;
                self.phase_started = now;
                Ok(vec![
                    SessionAction::Notify(SessionStatus::Connecting),
                    SessionAction::OpenLink,
                ])
            },
            SessionState::Connecting
            | SessionState::Authenticating
            | SessionState::Connected
            | SessionState::Reconnecting => Ok(vec![]),
            SessionState::Closed => Err(SessionError::InvalidState {
                state: self.state,
                operation: "connect".to_string(),
            }),
        }
    }

    /// The driver opened the raw link. Sends the credential immediately.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidState`] unless the session was connecting.
    pub fn link_opened(&mut self, now: I) -> Result<Vec<SessionAction>, SessionError> {
        if self.state != SessionState::Connecting {
            return Err(SessionError::InvalidState {
                state: self.state,
                operation: "link_opened".to_string(),
            });
        }

        self.state = SessionState::Authenticating;
        self.phase_started = now;

        let auth = WireEvent::Auth(AuthRequest {
            user_id: self.credentials.user_id.clone(),
            token: self.credentials.token.clone(),
        });

        Ok(vec![SessionAction::Send(auth)])
    }

    /// The driver lost the raw link (unexpected close or open failure).
    ///
    /// Schedules a bounded-backoff reconnect unless the session is already
    /// idle or closed.
    pub fn link_lost(&mut self, now: I) -> Vec<SessionAction> {
        match self.state {
            SessionState::Connecting
            | SessionState::Authenticating
            | SessionState::Connected
            | SessionState::Reconnecting => self.schedule_reconnect(now),
            SessionState::Idle | SessionState::Closed => vec![],
        }
    }

    /// Result of a [`SessionAction::Probe`].
    ///
    /// A dead link while we claim to be connected means a silent half-open
    /// connection; force the reconnect path.
    pub fn health_report(&mut self, alive: bool, now: I) -> Vec<SessionAction> {
        if alive || self.state != SessionState::Connected {
            return vec![];
        }

        let mut actions = vec![SessionAction::CloseLink];
        actions.extend(self.schedule_reconnect(now));
        actions
    }

    /// Process an inbound session-level event.
    ///
    /// Application events (envelopes, typing, receipts, presence) are not the
    /// session's concern and produce no actions; they still count as link
    /// activity.
    pub fn handle_event(&mut self, event: &WireEvent, now: I) -> Vec<SessionAction> {
        self.note_activity(now);

        match event {
            WireEvent::AuthAck(ack) => {
                if self.state != SessionState::Authenticating {
                    return vec![];
                }

                self.state = SessionState::Connected;
                self.attempt = 0;
                self.session_id = Some(ack.session_id.clone());
                self.last_heartbeat = Some(now);
                self.last_probe = Some(now);

                vec![SessionAction::Notify(SessionStatus::Connected)]
            },

            // Explicit rejection is terminal - retrying with the same
            // credential would just be rejected again.
            WireEvent::AuthReject(reject) => {
                self.close_with(DisconnectReason::AuthRejected(reject.reason.clone()))
            },

            WireEvent::Goodbye(goodbye) => {
                self.close_with(DisconnectReason::ServerClosed(goodbye.reason.clone()))
            },

            // Everything else (pings, envelopes, typing, receipts, presence)
            // is not the session's concern.
            _ => vec![],
        }
    }

    /// Explicit teardown. Any state transitions to `Closed`.
    pub fn disconnect(&mut self) -> Vec<SessionAction> {
        if self.state == SessionState::Closed {
            return vec![];
        }
        self.close_with(DisconnectReason::Requested)
    }

    /// Process periodic maintenance.
    ///
    /// Drives connect timeouts, heartbeats, health probes, and backoff
    /// expiry. `now_unix_ms` is the wall clock carried in heartbeat pings.
    pub fn tick(&mut self, now: I, now_unix_ms: u64) -> Vec<SessionAction> {
        match self.state {
            // Absence of the ack within the connect timeout is a connection
            // failure, not an auth failure: take the reconnect path.
            SessionState::Connecting | SessionState::Authenticating => {
                if now - self.phase_started > self.config.connect_timeout {
                    let mut actions = vec![SessionAction::CloseLink];
                    actions.extend(self.schedule_reconnect(now));
                    actions
                } else {
                    vec![]
                }
            },

            SessionState::Connected => {
                let mut actions = Vec::new();

                if self.is_due(self.last_heartbeat, self.config.heartbeat_interval, now) {
                    self.last_heartbeat = Some(now);
                    actions
                        .push(SessionAction::Send(WireEvent::Ping(Ping { sent_at_ms: now_unix_ms })));
                }

                if self.is_due(self.last_probe, self.config.health_poll_interval, now) {
                    self.last_probe = Some(now);
                    actions.push(SessionAction::Probe);
                }

                actions
            },

            SessionState::Reconnecting => {
                if now - self.phase_started >= self.backoff_delay() {
                    self.state = SessionState::Connecting;
                    self.phase_started = now;
                    vec![SessionAction::OpenLink]
                } else {
                    vec![]
                }
            },

            SessionState::Idle | SessionState::Closed => vec![],
        }
    }

    /// Delay before the pending reconnect attempt:
    /// `min(base * 2^(attempt-1), cap)`.
    #[must_use]
    pub fn backoff_delay(&self) -> Duration {
        let exponent = self.attempt.saturating_sub(1).min(16);
        let delay = self.config.reconnect_base_delay * 2u32.pow(exponent);
        delay.min(self.config.reconnect_cap_delay)
    }

    fn is_due(&self, last: Option<I>, interval: Duration, now: I) -> bool {
        match last {
            None => true,
            Some(last) => now - last >= interval,
        }
    }

    fn schedule_reconnect(&mut self, now: I) -> Vec<SessionAction> {
        self.attempt += 1;
        self.session_id = None;

        if self.attempt > self.config.max_reconnect_attempts {
            return self.close_with(DisconnectReason::LinkLost);
        }

        self.state = SessionState::Reconnecting;
        self.phase_started = now;

        vec![SessionAction::Notify(SessionStatus::Reconnecting { attempt: self.attempt })]
    }

    fn close_with(&mut self, reason: DisconnectReason) -> Vec<SessionAction> {
        self.state = SessionState::Closed;
        self.session_id = None;

        vec![
            SessionAction::CloseLink,
            SessionAction::Notify(SessionStatus::Disconnected { reason }),
        ]
    }
}
