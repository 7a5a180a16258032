//! DXLink WebSocket Message Types
//!
//! Wire format types for the DXLink JSON protocol. Every frame is a JSON
//! object with a `type` discriminator and a `channel` number; channel 0 is
//! the connection control channel, feed traffic runs on its own channel.
//!
//! # Message Types
//!
//! ## Outbound (Client -> Server)
//! - `SETUP`: Protocol version and keepalive negotiation
//! - `AUTH`: Feed token
//! - `CHANNEL_REQUEST`: Open a `FEED` service channel
//! - `FEED_SETUP`: Data format and per-kind field lists
//! - `FEED_SUBSCRIPTION`: Symbols to stream
//! - `KEEPALIVE`: Liveness ping
//!
//! ## Inbound (Server -> Client)
//! - `SETUP`, `AUTH_STATE`, `CHANNEL_OPENED`, `CHANNEL_CLOSED`
//! - `FEED_CONFIG`: Feed channel accepted its setup
//! - `FEED_DATA`: COMPACT payload
//! - `KEEPALIVE`, `ERROR`

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::subscription::{FieldSchema, SubscriptionSpec};

// =============================================================================
// Inbound Messages (Server -> Client)
// =============================================================================

/// Authorization state reported in `AUTH_STATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthStatus {
    /// Token accepted.
    Authorized,
    /// No token yet, or the token was rejected.
    Unauthorized,
}

/// Any frame the server can send.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "AUTH_STATE", "channel": 0, "state": "AUTHORIZED"}
/// {"type": "FEED_DATA", "channel": 3, "data": ["Quote", ["Quote", "SPY", 10.0, 10.2]]}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Server side of the version handshake.
    Setup {
        /// Channel (always 0).
        #[serde(default)]
        channel: u32,
    },

    /// Authorization state change.
    AuthState {
        /// Channel (always 0).
        #[serde(default)]
        channel: u32,
        /// New state.
        state: AuthStatus,
    },

    /// A requested channel was opened.
    ChannelOpened {
        /// Opened channel.
        channel: u32,
    },

    /// A channel was closed by the server.
    ChannelClosed {
        /// Closed channel.
        channel: u32,
    },

    /// Feed setup accepted.
    FeedConfig {
        /// Feed channel.
        channel: u32,
    },

    /// Feed payload.
    FeedData {
        /// Feed channel.
        channel: u32,
        /// COMPACT data pairs: `[kind, [values...], kind, [values...], ...]`.
        #[serde(default)]
        data: Vec<Value>,
    },

    /// Keepalive ping.
    Keepalive {
        /// Channel (always 0).
        #[serde(default)]
        channel: u32,
    },

    /// Protocol error.
    Error {
        /// Channel the error refers to.
        #[serde(default)]
        channel: u32,
        /// Error code (e.g., `UNAUTHORIZED`, `BAD_ACTION`).
        #[serde(default)]
        error: String,
        /// Human readable description.
        #[serde(default)]
        message: String,
    },

    /// Any type this client does not act on.
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Wire name of the message type, for logging and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Setup { .. } => "SETUP",
            Self::AuthState { .. } => "AUTH_STATE",
            Self::ChannelOpened { .. } => "CHANNEL_OPENED",
            Self::ChannelClosed { .. } => "CHANNEL_CLOSED",
            Self::FeedConfig { .. } => "FEED_CONFIG",
            Self::FeedData { .. } => "FEED_DATA",
            Self::Keepalive { .. } => "KEEPALIVE",
            Self::Error { .. } => "ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }
}

// =============================================================================
// Outbound Messages (Client -> Server)
// =============================================================================

/// Version and keepalive negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupMessage {
    /// Message type: "SETUP"
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    /// Channel (always 0)
    pub channel: u32,
    /// Client protocol version string
    pub version: String,
    /// Seconds the server may stay silent before the client drops it
    pub keepalive_timeout: u64,
    /// Seconds the client may stay silent before the server drops it
    pub accept_keepalive_timeout: u64,
}

/// Feed token presentation.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct AuthMessage {
    /// Message type: "AUTH"
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    /// Channel (always 0)
    pub channel: u32,
    /// Feed token
    pub token: String,
}

impl std::fmt::Debug for AuthMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthMessage")
            .field("channel", &self.channel)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Parameters of a `FEED` channel request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelParameters {
    /// Feed contract: "AUTO"
    pub contract: &'static str,
}

/// Request to open a feed channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelRequestMessage {
    /// Message type: "CHANNEL_REQUEST"
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    /// Requested channel number
    pub channel: u32,
    /// Service: "FEED"
    pub service: &'static str,
    /// Channel parameters
    pub parameters: ChannelParameters,
}

/// Feed channel configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSetupMessage {
    /// Message type: "FEED_SETUP"
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    /// Feed channel
    pub channel: u32,
    /// Aggregation period in seconds
    pub accept_aggregation_period: f64,
    /// Data format: "COMPACT"
    pub accept_data_format: &'static str,
    /// Ordered field list per event kind
    pub accept_event_fields: BTreeMap<String, Vec<String>>,
}

/// One entry of a subscription's `add` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionEntry {
    /// Event kind ("Quote", "Candle")
    #[serde(rename = "type")]
    pub event_type: String,
    /// Wire symbol
    pub symbol: String,
    /// History start in epoch millis (candles only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_time: Option<i64>,
}

impl From<&SubscriptionSpec> for SubscriptionEntry {
    fn from(spec: &SubscriptionSpec) -> Self {
        Self {
            event_type: spec.kind.as_str().to_string(),
            symbol: spec.wire_symbol(),
            from_time: spec.from_time,
        }
    }
}

/// Replace the channel's subscription set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedSubscriptionMessage {
    /// Message type: "FEED_SUBSCRIPTION"
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    /// Feed channel
    pub channel: u32,
    /// Drop any previous subscriptions first
    pub reset: bool,
    /// Subscriptions to add
    pub add: Vec<SubscriptionEntry>,
}

/// Keepalive ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeepaliveMessage {
    /// Message type: "KEEPALIVE"
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    /// Channel (always 0)
    pub channel: u32,
}

impl SetupMessage {
    /// Create a setup message.
    #[must_use]
    pub fn new(
        version: impl Into<String>,
        keepalive_timeout: u64,
        accept_keepalive_timeout: u64,
    ) -> Self {
        Self {
            msg_type: "SETUP",
            channel: 0,
            version: version.into(),
            keepalive_timeout,
            accept_keepalive_timeout,
        }
    }
}

impl AuthMessage {
    /// Create an auth message.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            msg_type: "AUTH",
            channel: 0,
            token: token.into(),
        }
    }
}

impl ChannelRequestMessage {
    /// Request a `FEED` channel with automatic contract selection.
    #[must_use]
    pub const fn feed(channel: u32) -> Self {
        Self {
            msg_type: "CHANNEL_REQUEST",
            channel,
            service: "FEED",
            parameters: ChannelParameters { contract: "AUTO" },
        }
    }
}

impl FeedSetupMessage {
    /// COMPACT feed setup for the given schemas.
    #[must_use]
    pub fn compact(channel: u32, aggregation_period: f64, schemas: &[FieldSchema]) -> Self {
        Self {
            msg_type: "FEED_SETUP",
            channel,
            accept_aggregation_period: aggregation_period,
            accept_data_format: "COMPACT",
            accept_event_fields: schemas
                .iter()
                .map(|schema| (schema.kind().as_str().to_string(), schema.fields().to_vec()))
                .collect(),
        }
    }
}

impl FeedSubscriptionMessage {
    /// Reset-and-add subscription for the given specs.
    #[must_use]
    pub fn reset_with(channel: u32, specs: &[SubscriptionSpec]) -> Self {
        Self {
            msg_type: "FEED_SUBSCRIPTION",
            channel,
            reset: true,
            add: specs.iter().map(SubscriptionEntry::from).collect(),
        }
    }
}

impl KeepaliveMessage {
    /// Keepalive on the control channel.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            msg_type: "KEEPALIVE",
            channel: 0,
        }
    }
}

impl Default for KeepaliveMessage {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Unified Outbound Message Enum
// =============================================================================

/// Any frame the client sends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClientMessage {
    /// `SETUP`
    Setup(SetupMessage),
    /// `AUTH`
    Auth(AuthMessage),
    /// `CHANNEL_REQUEST`
    ChannelRequest(ChannelRequestMessage),
    /// `FEED_SETUP`
    FeedSetup(FeedSetupMessage),
    /// `FEED_SUBSCRIPTION`
    FeedSubscription(FeedSubscriptionMessage),
    /// `KEEPALIVE`
    Keepalive(KeepaliveMessage),
}

impl ClientMessage {
    /// Wire name of the message type.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Setup(m) => m.msg_type,
            Self::Auth(m) => m.msg_type,
            Self::ChannelRequest(m) => m.msg_type,
            Self::FeedSetup(m) => m.msg_type,
            Self::FeedSubscription(m) => m.msg_type,
            Self::Keepalive(m) => m.msg_type,
        }
    }

    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
