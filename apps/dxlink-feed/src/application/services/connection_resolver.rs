//! Connection Resolver
//!
//! Turns a token source into connection info, refusing to hand out a token
//! once the brokerage session has lapsed.

use tracing::{debug, warn};

use crate::application::ports::{ConnectionInfo, FeedTokenSource, TokenSourceError};

/// Resolve the DXLink URL and feed token from a token source.
///
/// # Errors
///
/// Returns [`TokenSourceError::SessionExpired`] if the session is no longer
/// valid, or whatever error the source reports when fetching the token.
pub async fn resolve_connection(
    source: &dyn FeedTokenSource,
) -> Result<ConnectionInfo, TokenSourceError> {
    if !source.is_session_valid().await {
        warn!("Brokerage session is not valid, refusing to open feed");
        return Err(TokenSourceError::SessionExpired);
    }

    let info = source.feed_token().await?;
    debug!(url = %info.url, "Resolved DXLink connection");
    Ok(info)
}
