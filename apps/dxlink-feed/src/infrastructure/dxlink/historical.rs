//! Historical Candle Collector
//!
//! Downloads candle history over a short-lived DXLink connection.
//!
//! # Completion
//!
//! DXLink has no end-of-history marker, so a collection ends on time:
//!
//! 1. Open the socket within `connect_timeout`
//! 2. Wait up to `ready_timeout` for the feed channel to be configured
//! 3. Wait up to the request's timeout budget for the first `FEED_DATA`
//! 4. Keep absorbing frames for `grace_period`
//! 5. Close the socket and join the task within `join_timeout`
//!
//! A connection that ends early cuts the remaining waits short. History that
//! arrives after the grace period is lost; raise the grace period for very
//! large requests.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::codec::CompactCodec;
use super::connection::{FeedConnection, FeedError};
use super::handshake::{Handshake, HandshakeConfig};
use crate::application::ports::ConnectionInfo;
use crate::domain::history::{HistoricalRequest, HistoricalResult, TradingHours};
use crate::domain::streaming::{CompactRecord, FeedEvent};
use crate::infrastructure::metrics;

// =============================================================================
// Policy
// =============================================================================

/// Time limits for one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionPolicy {
    /// Bound on opening the WebSocket, upgrade included.
    pub connect_timeout: Duration,
    /// Wait for the feed channel to be configured.
    pub ready_timeout: Duration,
    /// Base wait for the first data frame, scaled per request.
    pub base_data_timeout: Duration,
    /// Extra time to absorb trailing frames after data starts.
    pub grace_period: Duration,
    /// Bound on joining the connection task.
    pub join_timeout: Duration,
}

impl Default for CollectionPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(10),
            base_data_timeout: Duration::from_secs(30),
            grace_period: Duration::from_secs(2),
            join_timeout: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Progress Tracking
// =============================================================================

#[derive(Debug, Default)]
struct Progress {
    ready: bool,
    data_frames: usize,
    closed: bool,
    server_error: Option<(String, String)>,
    records: Vec<CompactRecord>,
}

impl Progress {
    fn absorb(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Ready => self.ready = true,
            FeedEvent::Records(records) => {
                self.data_frames += 1;
                self.records.extend(records);
            }
            FeedEvent::ServerError { error, message } => {
                self.server_error.get_or_insert((error, message));
            }
            FeedEvent::Closed { .. } => self.closed = true,
        }
    }
}

async fn absorb_until(
    events: &mut mpsc::UnboundedReceiver<FeedEvent>,
    progress: &mut Progress,
    bound: Duration,
    done: impl Fn(&Progress) -> bool,
) {
    if done(progress) {
        return;
    }

    let deadline = tokio::time::Instant::now() + bound;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) => {
                progress.absorb(event);
                if done(progress) {
                    return;
                }
            }
            Ok(None) => {
                progress.closed = true;
                return;
            }
            Err(_) => return,
        }
    }
}

// =============================================================================
// Collector
// =============================================================================

/// Downloads historical candles.
#[derive(Debug, Clone)]
pub struct HistoricalCollector {
    info: ConnectionInfo,
    handshake: HandshakeConfig,
    policy: CollectionPolicy,
    trading_hours: TradingHours,
}

impl HistoricalCollector {
    /// Create a collector with default handshake, policy and trading hours.
    #[must_use]
    pub fn new(info: ConnectionInfo) -> Self {
        Self {
            info,
            handshake: HandshakeConfig::default(),
            policy: CollectionPolicy::default(),
            trading_hours: TradingHours::default(),
        }
    }

    /// Set handshake parameters.
    #[must_use]
    pub fn with_handshake_config(mut self, config: HandshakeConfig) -> Self {
        self.handshake = config;
        self
    }

    /// Set time limits.
    #[must_use]
    pub const fn with_policy(mut self, policy: CollectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the trading-hours filter.
    #[must_use]
    pub const fn with_trading_hours(mut self, hours: TradingHours) -> Self {
        self.trading_hours = hours;
        self
    }

    /// Collect history for `request`, looking back from now.
    ///
    /// # Errors
    ///
    /// See [`Self::collect_at`].
    pub async fn collect(&self, request: &HistoricalRequest) -> Result<HistoricalResult, FeedError> {
        self.collect_at(request, Utc::now()).await
    }

    /// Collect history for `request`, looking back from `now`.
    ///
    /// An empty ticker list returns an empty result without connecting, and
    /// no data within the timeout budget is an empty result, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Connection`] if the socket cannot be opened within
    /// `connect_timeout`, and
    /// [`FeedError::AuthRejected`] or [`FeedError::Protocol`] if the feed
    /// never became ready and nothing was received.
    pub async fn collect_at(
        &self,
        request: &HistoricalRequest,
        now: DateTime<Utc>,
    ) -> Result<HistoricalResult, FeedError> {
        if request.tickers().is_empty() {
            return Ok(HistoricalResult::default());
        }

        let started = Instant::now();
        let codec = CompactCodec::new([request.field_schema()]);
        let handshake = Handshake::new(
            self.handshake.clone(),
            self.info.token.clone(),
            codec.clone(),
            request.subscriptions(now),
        );

        info!(
            tickers = request.tickers().len(),
            interval = %request.interval(),
            max_rows = request.max_rows(),
            lookback_days = request.lookback_days(),
            "Collecting historical candles"
        );

        let (tx, mut events) = mpsc::unbounded_channel();
        let mut connection =
            FeedConnection::open(&self.info.url, self.policy.connect_timeout, handshake, tx)
                .await?;
        let mut progress = Progress::default();

        absorb_until(&mut events, &mut progress, self.policy.ready_timeout, |p| {
            p.ready || p.closed
        })
        .await;

        if progress.ready {
            let budget = request.timeout_budget(self.policy.base_data_timeout);
            absorb_until(&mut events, &mut progress, budget, |p| {
                p.data_frames > 0 || p.closed
            })
            .await;
            if progress.data_frames == 0 && !progress.closed {
                info!(budget_secs = budget.as_secs(), "No historical data within budget");
            }
            absorb_until(&mut events, &mut progress, self.policy.grace_period, |p| p.closed).await;
        } else if !progress.closed {
            warn!(
                timeout_secs = self.policy.ready_timeout.as_secs(),
                "Feed not ready in time"
            );
        }

        let outcome = connection.shutdown(self.policy.join_timeout).await;
        while let Ok(event) = events.try_recv() {
            progress.absorb(event);
        }

        if progress.records.is_empty() {
            if let Err(e @ FeedError::AuthRejected { .. }) = outcome {
                return Err(e);
            }
            if !progress.ready {
                if let Some((error, message)) = progress.server_error {
                    return Err(FeedError::Protocol { error, message });
                }
            }
        } else if let Err(e) = &outcome {
            debug!(error = %e, "Connection ended with error after data");
        }

        let candles = progress
            .records
            .iter()
            .filter_map(|record| codec.candle(record));
        let result = HistoricalResult::from_candles(candles, &self.trading_hours, request.max_rows());

        let rows: usize = result.symbols().filter_map(|s| result.get(s)).map(<[_]>::len).sum();
        metrics::record_collection(started.elapsed(), rows);
        info!(
            frames = progress.data_frames,
            records = progress.records.len(),
            symbols = result.len(),
            rows,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Historical collection finished"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::EventKind;

    #[test]
    fn default_policy() {
        let policy = CollectionPolicy::default();
        assert_eq!(policy.connect_timeout, Duration::from_secs(10));
        assert_eq!(policy.ready_timeout, Duration::from_secs(10));
        assert_eq!(policy.base_data_timeout, Duration::from_secs(30));
        assert_eq!(policy.grace_period, Duration::from_secs(2));
        assert_eq!(policy.join_timeout, Duration::from_secs(5));
    }

    #[test]
    fn progress_keeps_first_server_error() {
        let mut progress = Progress::default();
        progress.absorb(FeedEvent::ServerError {
            error: "A".to_string(),
            message: "first".to_string(),
        });
        progress.absorb(FeedEvent::ServerError {
            error: "B".to_string(),
            message: "second".to_string(),
        });
        assert_eq!(progress.server_error, Some(("A".to_string(), "first".to_string())));
    }

    #[tokio::test]
    async fn absorb_stops_when_done() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(FeedEvent::Ready).unwrap();
        tx.send(FeedEvent::Records(vec![CompactRecord::new(EventKind::Candle, vec![])]))
            .unwrap();

        let mut progress = Progress::default();
        absorb_until(&mut rx, &mut progress, Duration::from_secs(5), |p| p.ready).await;
        assert!(progress.ready);
        assert_eq!(progress.data_frames, 0);
    }

    #[tokio::test]
    async fn absorb_marks_closed_when_sender_drops() {
        let (tx, mut rx) = mpsc::unbounded_channel::<FeedEvent>();
        drop(tx);

        let mut progress = Progress::default();
        absorb_until(&mut rx, &mut progress, Duration::from_secs(5), |_| false).await;
        assert!(progress.closed);
    }

    #[tokio::test]
    async fn absorb_respects_bound() {
        let (_tx, mut rx) = mpsc::unbounded_channel::<FeedEvent>();
        let mut progress = Progress::default();

        let started = Instant::now();
        absorb_until(&mut rx, &mut progress, Duration::from_millis(100), |_| false).await;
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(!progress.closed);
    }

    #[tokio::test]
    async fn empty_tickers_skip_connection() {
        let collector =
            HistoricalCollector::new(ConnectionInfo::new("ws://127.0.0.1:1/unused", "token"));
        let request = HistoricalRequest::new(Vec::<String>::new(), "5m".parse().unwrap(), 10);
        let result = collector.collect(&request).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn unreachable_server_is_connection_error() {
        let collector =
            HistoricalCollector::new(ConnectionInfo::new("ws://127.0.0.1:1/realtime", "token"));
        let request = HistoricalRequest::new(["AAPL"], "5m".parse().unwrap(), 10);
        let result = collector.collect(&request).await;
        assert!(matches!(result, Err(FeedError::Connection(_))));
    }
}
