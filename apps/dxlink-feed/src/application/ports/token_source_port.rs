//! Feed Token Source Port (Driven Port)
//!
//! Interface to whatever issues DXLink credentials. The brokerage session
//! that mints the token is outside this crate; the feed only needs the
//! WebSocket URL, a token, and to know whether the session is still valid.

use std::fmt;

use async_trait::async_trait;

/// DXLink endpoint and feed token.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// WebSocket URL (e.g., `wss://tasty-openapi-ws.dxfeed.com/realtime`).
    pub url: String,
    /// Feed token sent in `AUTH`.
    pub token: String,
}

impl ConnectionInfo {
    /// Create connection info.
    #[must_use]
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
        }
    }
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("url", &self.url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Token source error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TokenSourceError {
    /// The brokerage session is no longer valid.
    #[error("brokerage session expired")]
    SessionExpired,

    /// The token could not be obtained.
    #[error("feed token unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },
}

/// Port for obtaining DXLink credentials.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedTokenSource: Send + Sync {
    /// Fetch the DXLink URL and a feed token.
    async fn feed_token(&self) -> Result<ConnectionInfo, TokenSourceError>;

    /// Whether the underlying brokerage session is still valid.
    async fn is_session_valid(&self) -> bool;
}

/// Token source backed by fixed credentials (environment or caller supplied).
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    info: ConnectionInfo,
}

impl StaticTokenSource {
    /// Wrap fixed connection info.
    #[must_use]
    pub const fn new(info: ConnectionInfo) -> Self {
        Self { info }
    }
}

#[async_trait]
impl FeedTokenSource for StaticTokenSource {
    async fn feed_token(&self) -> Result<ConnectionInfo, TokenSourceError> {
        Ok(self.info.clone())
    }

    async fn is_session_valid(&self) -> bool {
        !self.info.token.is_empty()
    }
}
