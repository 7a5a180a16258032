//! Real-Time Quote Session
//!
//! A long-lived DXLink connection subscribed to quotes. Every quote updates a
//! shared map of mid prices that callers can snapshot at any time without
//! touching the network.
//!
//! The session does not reconnect. When the connection ends it moves to
//! `Closed` (or `Failed` with the reason) and can be started again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::codec::CompactCodec;
use super::connection::{ConnectionHandle, FeedConnection, FeedError};
use super::handshake::{Handshake, HandshakeConfig};
use crate::application::ports::{ConnectionInfo, FeedEventSink};
use crate::domain::streaming::FeedEvent;
use crate::domain::subscription::{FieldSchema, SubscriptionSpec};
use crate::infrastructure::metrics;

/// Default bound on joining the connection task in [`RealTimeSession::stop`].
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on opening the socket in [`RealTimeSession::start`].
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Live Price Map
// =============================================================================

/// Symbol to last mid price, last write wins.
#[derive(Debug, Clone, Default)]
pub struct LivePriceMap {
    prices: Arc<RwLock<HashMap<String, Decimal>>>,
}

impl LivePriceMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest mid for a symbol.
    pub fn update(&self, symbol: impl Into<String>, mid: Decimal) {
        self.prices.write().insert(symbol.into(), mid);
    }

    /// Latest mid for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<Decimal> {
        self.prices.read().get(symbol).copied()
    }

    /// Copy of the whole map.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Decimal> {
        self.prices.read().clone()
    }

    /// Number of symbols with a price.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prices.read().len()
    }

    /// Whether no price has arrived yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prices.read().is_empty()
    }
}

// =============================================================================
// Session State
// =============================================================================

/// Connection state of a session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Never started.
    #[default]
    Idle,
    /// Socket open, handshake in progress.
    Connecting,
    /// Subscribed and receiving quotes.
    Streaming,
    /// Stopped or closed by the server.
    Closed,
    /// Ended with an error.
    Failed(String),
}

impl SessionState {
    /// Whether the session has stopped.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed(_))
    }
}

struct QuoteSink {
    codec: CompactCodec,
    prices: LivePriceMap,
    state: Arc<watch::Sender<SessionState>>,
}

impl FeedEventSink for QuoteSink {
    fn handle(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Ready => {
                info!("Quote session streaming");
                self.state.send_replace(SessionState::Streaming);
            }
            FeedEvent::Records(records) => {
                for quote in records.iter().filter_map(|r| self.codec.quote(r)) {
                    match quote.mid() {
                        Some(mid) => self.prices.update(quote.symbol, mid),
                        None => debug!(symbol = %quote.symbol, "Skipping quote with unrepresentable mid"),
                    }
                }
                metrics::set_live_symbols(self.prices.len());
            }
            FeedEvent::ServerError { error, message } => {
                warn!(error = %error, message = %message, "Quote session server error");
            }
            FeedEvent::Closed { reason } => {
                let next = reason.map_or(SessionState::Closed, SessionState::Failed);
                self.state.send_replace(next);
            }
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// Persistent quote stream for a fixed symbol list.
#[derive(Debug)]
pub struct RealTimeSession {
    info: ConnectionInfo,
    symbols: Vec<String>,
    handshake: HandshakeConfig,
    connect_timeout: Duration,
    join_timeout: Duration,
    prices: LivePriceMap,
    state: Arc<watch::Sender<SessionState>>,
    connection: Option<ConnectionHandle>,
}

impl RealTimeSession {
    /// Create a stopped session for `symbols`.
    #[must_use]
    pub fn new<I, S>(info: ConnectionInfo, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            info,
            symbols: symbols.into_iter().map(Into::into).collect(),
            handshake: HandshakeConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            prices: LivePriceMap::new(),
            state: Arc::new(state),
            connection: None,
        }
    }

    /// Set handshake parameters.
    #[must_use]
    pub fn with_handshake_config(mut self, config: HandshakeConfig) -> Self {
        self.handshake = config;
        self
    }

    /// Set the bound on opening the socket.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the bound on joining the connection task.
    #[must_use]
    pub const fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Whether a connection task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| !connection.is_finished())
    }

    /// Open the connection and start streaming. No-op if already running.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Connection`] if the socket cannot be opened within
    /// the connect timeout; the
    /// session is then `Failed` and may be started again.
    pub async fn start(&mut self) -> Result<(), FeedError> {
        if self.is_running() {
            debug!("Quote session already running");
            return Ok(());
        }

        let codec = CompactCodec::new([FieldSchema::quote()]);
        let specs = self.symbols.iter().map(SubscriptionSpec::quote).collect();
        let handshake = Handshake::new(
            self.handshake.clone(),
            self.info.token.clone(),
            codec.clone(),
            specs,
        );
        let sink = QuoteSink {
            codec,
            prices: self.prices.clone(),
            state: Arc::clone(&self.state),
        };

        info!(symbols = self.symbols.len(), "Starting quote session");
        self.state.send_replace(SessionState::Connecting);

        match FeedConnection::open(&self.info.url, self.connect_timeout, handshake, sink).await {
            Ok(connection) => {
                self.connection = Some(connection);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Quote session failed to connect");
                self.state.send_replace(SessionState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Close the connection and join its task. Idempotent.
    pub async fn stop(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };

        if let Err(e) = connection.shutdown(self.join_timeout).await {
            debug!(error = %e, "Quote session ended with error");
        }
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = SessionState::Closed;
                true
            }
        });
        info!("Quote session stopped");
    }

    /// Snapshot of symbol to mid price.
    #[must_use]
    pub fn live_prices(&self) -> HashMap<String, Decimal> {
        self.prices.snapshot()
    }

    /// Latest mid for one symbol.
    #[must_use]
    pub fn price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.get(symbol)
    }

    /// Shared handle to the live price map.
    #[must_use]
    pub fn price_map(&self) -> LivePriceMap {
        self.prices.clone()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver that observes state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Wait until the session streams, it stops, or `bound` elapses.
    ///
    /// Returns `true` only if the session reached `Streaming`.
    pub async fn wait_until_streaming(&self, bound: Duration) -> bool {
        let mut state = self.state.subscribe();
        let settled = tokio::time::timeout(
            bound,
            state.wait_for(|s| *s == SessionState::Streaming || s.is_terminal()),
        )
        .await;

        matches!(settled, Ok(Ok(ref s)) if **s == SessionState::Streaming)
    }
}
