//! Market Data Streaming Types
//!
//! Records produced by the COMPACT decoder and the events a feed connection
//! reports to its owner. Raw records keep the wire values untouched; the
//! typed views (`QuoteRecord`, `CandleRecord`) are built against the field
//! schema negotiated for the channel.

use rust_decimal::Decimal;
use serde_json::Value;

use super::subscription::EventKind;

/// One decoded COMPACT tuple, values in field-schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactRecord {
    kind: EventKind,
    values: Vec<Value>,
}

impl CompactRecord {
    /// Create a record from a tuple of wire values.
    #[must_use]
    pub const fn new(kind: EventKind, values: Vec<Value>) -> Self {
        Self { kind, values }
    }

    /// Event kind the tuple was decoded as.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Raw tuple values.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value at a tuple position.
    #[must_use]
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}

/// Quote view of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRecord {
    /// Event symbol.
    pub symbol: String,
    /// Best bid price.
    pub bid: Decimal,
    /// Best ask price.
    pub ask: Decimal,
}

impl QuoteRecord {
    /// Mid price, `(bid + ask) / 2`, or `None` if the sum overflows.
    #[must_use]
    pub fn mid(&self) -> Option<Decimal> {
        self.bid
            .checked_add(self.ask)
            .and_then(|sum| sum.checked_div(Decimal::TWO))
    }
}

/// Candle view of a record.
///
/// Price and volume fields are `None` when they were not requested or the
/// feed sent a non-numeric placeholder (`"NaN"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandleRecord {
    /// Wire symbol, still carrying its `{=...}` suffix.
    pub symbol: String,
    /// Candle start in epoch millis.
    pub time: i64,
    /// Open price.
    pub open: Option<Decimal>,
    /// High price.
    pub high: Option<Decimal>,
    /// Low price.
    pub low: Option<Decimal>,
    /// Close price.
    pub close: Option<Decimal>,
    /// Volume.
    pub volume: Option<Decimal>,
}

/// Event reported by a connection task to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Feed channel configured and subscription sent.
    Ready,
    /// Records decoded from one `FEED_DATA` frame.
    Records(Vec<CompactRecord>),
    /// Server reported an `ERROR` frame.
    ServerError {
        /// Error code from the server.
        error: String,
        /// Human readable message.
        message: String,
    },
    /// Connection ended; `reason` is set when it ended abnormally.
    Closed {
        /// Failure description, if any.
        reason: Option<String>,
    },
}
