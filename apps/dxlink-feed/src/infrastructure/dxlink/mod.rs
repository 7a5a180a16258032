//! DXLink WebSocket Adapters
//!
//! Client side of the DXLink market data protocol:
//!
//! - **messages**: JSON wire types
//! - **codec**: COMPACT payload decoding and typed record views
//! - **handshake**: Ack-gated connection state machine
//! - **connection**: Socket-owning task and its handle
//! - **historical**: Time-bounded candle downloads
//! - **realtime**: Persistent quote session with a live price map

pub mod codec;
pub mod connection;
pub mod handshake;
pub mod historical;
pub mod messages;
pub mod realtime;

pub use codec::{CodecError, CompactCodec, decimal_value, decode_feed_data, encode_subscription};
pub use connection::{ConnectionHandle, FeedConnection, FeedError};
pub use handshake::{
    CONTROL_CHANNEL, Effect, FEED_CHANNEL, Handshake, HandshakeConfig, HandshakeError,
    HandshakeState, PROTOCOL_VERSION,
};
pub use historical::{CollectionPolicy, HistoricalCollector};
pub use messages::{AuthStatus, ClientMessage, ServerMessage};
pub use realtime::{LivePriceMap, RealTimeSession, SessionState};
