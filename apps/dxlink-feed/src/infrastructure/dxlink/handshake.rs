//! DXLink Handshake State Machine
//!
//! Drives one connection from socket open to streaming. The machine is pure:
//! it consumes decoded server frames and returns [`Effect`]s for the
//! connection task to apply, so every transition is testable without I/O.
//!
//! # Handshake Flow
//!
//! 1. Socket opens, client sends `SETUP`
//! 2. Server sends `AUTH_STATE: UNAUTHORIZED`, client sends `AUTH`
//! 3. Server sends `AUTH_STATE: AUTHORIZED`, client sends `CHANNEL_REQUEST`
//! 4. Server sends `CHANNEL_OPENED`, client sends `FEED_SETUP`
//! 5. Server sends `FEED_CONFIG`, client sends `FEED_SUBSCRIPTION` (ready)
//! 6. Server streams `FEED_DATA`
//!
//! Each step waits for the previous acknowledgement. A rejected token is
//! re-sent on every `UNAUTHORIZED` until `max_auth_attempts` is reached.
//!
//! # Keepalive
//!
//! No keepalive timer runs. An inbound server `KEEPALIVE` is answered with one
//! `KEEPALIVE` on the control channel so long sessions outlive the negotiated
//! timeout.

use thiserror::Error;
use tracing::{debug, info, warn};

use super::codec::{CompactCodec, encode_subscription};
use super::messages::{
    AuthMessage, AuthStatus, ChannelRequestMessage, ClientMessage, FeedSetupMessage,
    KeepaliveMessage, ServerMessage, SetupMessage,
};
use crate::domain::streaming::CompactRecord;
use crate::domain::subscription::SubscriptionSpec;

// =============================================================================
// Constants
// =============================================================================

/// Connection control channel.
pub const CONTROL_CHANNEL: u32 = 0;

/// Channel number requested for the feed service.
pub const FEED_CHANNEL: u32 = 3;

/// Client protocol version announced in `SETUP`.
pub const PROTOCOL_VERSION: &str = "0.1-DXF-JS/0.3.0";

/// Keepalive timeout announced in `SETUP` (seconds).
pub const DEFAULT_KEEPALIVE_TIMEOUT_SECS: u64 = 60;

/// Aggregation period requested in `FEED_SETUP` (seconds).
pub const DEFAULT_AGGREGATION_PERIOD: f64 = 0.1;

/// `AUTH` messages sent before the token is considered rejected.
pub const DEFAULT_MAX_AUTH_ATTEMPTS: u32 = 3;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that end a handshake.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// The server kept answering `UNAUTHORIZED`.
    #[error("feed token rejected after {attempts} attempts")]
    AuthRejected {
        /// `AUTH` messages sent.
        attempts: u32,
    },
}

// =============================================================================
// Configuration
// =============================================================================

/// Negotiation parameters for one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeConfig {
    /// Protocol version string.
    pub version: String,
    /// `keepaliveTimeout` in seconds.
    pub keepalive_timeout: u64,
    /// `acceptKeepaliveTimeout` in seconds.
    pub accept_keepalive_timeout: u64,
    /// `acceptAggregationPeriod` in seconds.
    pub aggregation_period: f64,
    /// Cap on `AUTH` messages.
    pub max_auth_attempts: u32,
    /// Feed channel number.
    pub channel: u32,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            keepalive_timeout: DEFAULT_KEEPALIVE_TIMEOUT_SECS,
            accept_keepalive_timeout: DEFAULT_KEEPALIVE_TIMEOUT_SECS,
            aggregation_period: DEFAULT_AGGREGATION_PERIOD,
            max_auth_attempts: DEFAULT_MAX_AUTH_ATTEMPTS,
            channel: FEED_CHANNEL,
        }
    }
}

// =============================================================================
// State
// =============================================================================

/// Position of a connection in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeState {
    /// Socket not open yet.
    #[default]
    Disconnected,
    /// Socket open, nothing sent.
    Connected,
    /// `SETUP` sent, waiting for `AUTHORIZED`.
    Authenticating,
    /// Token accepted.
    Authenticated,
    /// `CHANNEL_REQUEST` sent.
    ChannelRequested,
    /// Feed channel opened.
    ChannelOpen,
    /// `FEED_SETUP` sent.
    FeedConfiguring,
    /// Feed configured, nothing to subscribe.
    FeedReady,
    /// `FEED_SUBSCRIPTION` sent.
    Subscribed,
    /// At least one `FEED_DATA` received.
    Streaming,
    /// Connection ended.
    Closed,
    /// Token rejected.
    Rejected,
}

impl HandshakeState {
    /// Whether the feed channel is configured and can carry data.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::FeedReady | Self::Subscribed | Self::Streaming)
    }

    /// Whether the connection is finished.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Rejected)
    }
}

/// Action requested by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send a frame.
    Send(ClientMessage),
    /// Feed channel configured (and subscription sent, if any).
    Ready,
    /// Records decoded from a `FEED_DATA` frame.
    Records(Vec<CompactRecord>),
    /// Server `ERROR` frame.
    ServerError {
        /// Error code.
        error: String,
        /// Description.
        message: String,
    },
    /// Server closed the feed channel; the socket should be closed.
    Close,
}

// =============================================================================
// Handshake
// =============================================================================

/// Handshake state machine for one connection.
#[derive(Debug, Clone)]
pub struct Handshake {
    config: HandshakeConfig,
    token: String,
    codec: CompactCodec,
    specs: Vec<SubscriptionSpec>,
    state: HandshakeState,
    auth_attempts: u32,
}

impl Handshake {
    /// Create a handshake that will configure `codec`'s schemas and subscribe `specs`.
    #[must_use]
    pub fn new(
        config: HandshakeConfig,
        token: impl Into<String>,
        codec: CompactCodec,
        specs: Vec<SubscriptionSpec>,
    ) -> Self {
        Self {
            config,
            token: token.into(),
            codec,
            specs,
            state: HandshakeState::Disconnected,
            auth_attempts: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> HandshakeState {
        self.state
    }

    /// `AUTH` messages sent so far.
    #[must_use]
    pub const fn auth_attempts(&self) -> u32 {
        self.auth_attempts
    }

    /// Codec bound to the negotiated schemas.
    #[must_use]
    pub const fn codec(&self) -> &CompactCodec {
        &self.codec
    }

    /// Socket opened: send `SETUP`.
    pub fn on_open(&mut self) -> Vec<Effect> {
        self.state = HandshakeState::Connected;
        debug!(version = %self.config.version, "Sending SETUP");
        self.state = HandshakeState::Authenticating;

        vec![Effect::Send(ClientMessage::Setup(SetupMessage::new(
            self.config.version.clone(),
            self.config.keepalive_timeout,
            self.config.accept_keepalive_timeout,
        )))]
    }

    /// Socket closed or failed.
    pub fn on_close(&mut self) {
        if self.state != HandshakeState::Rejected {
            self.state = HandshakeState::Closed;
        }
    }

    /// Advance on one server frame.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::AuthRejected`] once the server has answered
    /// `UNAUTHORIZED` to `max_auth_attempts` tokens.
    pub fn on_message(&mut self, message: ServerMessage) -> Result<Vec<Effect>, HandshakeError> {
        if self.state.is_terminal() {
            return Ok(Vec::new());
        }

        let channel = self.config.channel;
        let effects = match message {
            ServerMessage::AuthState { state, .. } => self.on_auth_state(state)?,

            ServerMessage::ChannelOpened { channel: ch }
                if ch == channel && self.state == HandshakeState::ChannelRequested =>
            {
                self.state = HandshakeState::ChannelOpen;
                debug!(channel, "Feed channel opened, sending FEED_SETUP");
                self.state = HandshakeState::FeedConfiguring;
                vec![Effect::Send(ClientMessage::FeedSetup(
                    FeedSetupMessage::compact(
                        channel,
                        self.config.aggregation_period,
                        &self.codec.schemas(),
                    ),
                ))]
            }

            ServerMessage::FeedConfig { channel: ch }
                if ch == channel && self.state == HandshakeState::FeedConfiguring =>
            {
                self.on_feed_config()
            }

            ServerMessage::FeedData { channel: ch, data }
                if ch == channel && self.state.is_ready() =>
            {
                self.state = HandshakeState::Streaming;
                let records = self.codec.decode_payload(&data);
                if records.is_empty() {
                    Vec::new()
                } else {
                    vec![Effect::Records(records)]
                }
            }

            ServerMessage::ChannelClosed { channel: ch } if ch == channel => {
                info!(channel, "Server closed feed channel");
                self.state = HandshakeState::Closed;
                vec![Effect::Close]
            }

            ServerMessage::Keepalive { .. } => {
                vec![Effect::Send(ClientMessage::Keepalive(KeepaliveMessage::new()))]
            }

            ServerMessage::Error { error, message, .. } => {
                warn!(error = %error, message = %message, "DXLink server error");
                vec![Effect::ServerError { error, message }]
            }

            other => {
                debug!(kind = other.kind(), state = ?self.state, "Ignoring frame");
                Vec::new()
            }
        };

        Ok(effects)
    }

    fn on_auth_state(&mut self, status: AuthStatus) -> Result<Vec<Effect>, HandshakeError> {
        if self.state != HandshakeState::Authenticating {
            debug!(?status, state = ?self.state, "Ignoring AUTH_STATE");
            return Ok(Vec::new());
        }

        match status {
            AuthStatus::Unauthorized => {
                if self.auth_attempts >= self.config.max_auth_attempts {
                    warn!(attempts = self.auth_attempts, "Feed token rejected");
                    self.state = HandshakeState::Rejected;
                    return Err(HandshakeError::AuthRejected {
                        attempts: self.auth_attempts,
                    });
                }
                self.auth_attempts += 1;
                debug!(attempt = self.auth_attempts, "Sending AUTH");
                Ok(vec![Effect::Send(ClientMessage::Auth(AuthMessage::new(
                    self.token.clone(),
                )))])
            }
            AuthStatus::Authorized => {
                self.state = HandshakeState::Authenticated;
                info!(attempts = self.auth_attempts, "Authorized, requesting feed channel");
                self.state = HandshakeState::ChannelRequested;
                Ok(vec![Effect::Send(ClientMessage::ChannelRequest(
                    ChannelRequestMessage::feed(self.config.channel),
                ))])
            }
        }
    }

    fn on_feed_config(&mut self) -> Vec<Effect> {
        self.state = HandshakeState::FeedReady;

        match encode_subscription(self.config.channel, &self.specs) {
            Some(subscription) => {
                info!(symbols = self.specs.len(), "Feed configured, subscribing");
                self.state = HandshakeState::Subscribed;
                vec![
                    Effect::Send(ClientMessage::FeedSubscription(subscription)),
                    Effect::Ready,
                ]
            }
            None => {
                info!("Feed configured with nothing to subscribe");
                vec![Effect::Ready]
            }
        }
    }
}
