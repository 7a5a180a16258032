//! Subscription Types
//!
//! Domain types describing what the feed client asks DXLink for: event kinds,
//! candle intervals, per-symbol subscription specs and the field schema that
//! fixes the COMPACT decode stride for a channel.
//!
//! # Candle Symbols
//!
//! Candle subscriptions carry their aggregation period inside the symbol:
//!
//! ```text
//! AAPL{=5m}    five-minute candles
//! SPY{=1d}     daily candles
//! MSFT{=2mo}   two-month candles
//! ```

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

// =============================================================================
// Field Names
// =============================================================================

/// `eventType` field, present first in every COMPACT tuple.
pub const FIELD_EVENT_TYPE: &str = "eventType";

/// `eventSymbol` field, the wire symbol of the event.
pub const FIELD_EVENT_SYMBOL: &str = "eventSymbol";

/// `time` field of candle events (epoch millis).
pub const FIELD_TIME: &str = "time";

/// `bidPrice` field of quote events.
pub const FIELD_BID_PRICE: &str = "bidPrice";

/// `askPrice` field of quote events.
pub const FIELD_ASK_PRICE: &str = "askPrice";

// =============================================================================
// Event Kind
// =============================================================================

/// Kind of market event requested from the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// Best bid/offer quote.
    Quote,
    /// OHLCV candle.
    Candle,
}

impl EventKind {
    /// Wire name of the event kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quote => "Quote",
            Self::Candle => "Candle",
        }
    }

    /// Parse a wire event type, returning `None` for kinds this client does not handle.
    #[must_use]
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "Quote" => Some(Self::Quote),
            "Candle" => Some(Self::Candle),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Candle Interval
// =============================================================================

/// Errors from parsing or constructing a candle interval.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntervalError {
    /// The interval count was zero.
    #[error("interval count must be at least 1")]
    ZeroCount,

    /// The interval count did not fit in a `u32`.
    #[error("invalid interval count: {0}")]
    InvalidCount(String),

    /// The unit is not one of `m`, `h`, `d`, `w`, `mo`.
    #[error("unsupported interval unit: {0:?}")]
    UnknownUnit(String),
}

/// Unit of a candle aggregation period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalUnit {
    /// Minutes (`m`).
    Minute,
    /// Hours (`h`).
    Hour,
    /// Days (`d`).
    Day,
    /// Weeks (`w`).
    Week,
    /// Months (`mo`), counted as 30 days.
    Month,
}

impl IntervalUnit {
    /// Wire suffix of the unit.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minute => "m",
            Self::Hour => "h",
            Self::Day => "d",
            Self::Week => "w",
            Self::Month => "mo",
        }
    }

    /// Nominal length of one unit in minutes.
    #[must_use]
    pub const fn minutes(self) -> u64 {
        match self {
            Self::Minute => 1,
            Self::Hour => 60,
            Self::Day => 60 * 24,
            Self::Week => 60 * 24 * 7,
            Self::Month => 60 * 24 * 30,
        }
    }
}

impl FromStr for IntervalUnit {
    type Err = IntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "m" => Ok(Self::Minute),
            "h" => Ok(Self::Hour),
            "d" => Ok(Self::Day),
            "w" => Ok(Self::Week),
            "mo" => Ok(Self::Month),
            other => Err(IntervalError::UnknownUnit(other.to_string())),
        }
    }
}

/// Candle aggregation period, e.g. `5m` or `1d`.
///
/// Invariant: `count >= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CandleInterval {
    count: u32,
    unit: IntervalUnit,
}

impl CandleInterval {
    /// Create an interval.
    ///
    /// # Errors
    ///
    /// Returns [`IntervalError::ZeroCount`] if `count` is zero.
    pub const fn new(count: u32, unit: IntervalUnit) -> Result<Self, IntervalError> {
        if count == 0 {
            return Err(IntervalError::ZeroCount);
        }
        Ok(Self { count, unit })
    }

    /// Number of units per candle.
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Unit of the interval.
    #[must_use]
    pub const fn unit(&self) -> IntervalUnit {
        self.unit
    }

    /// Nominal candle length in minutes.
    #[must_use]
    pub const fn minutes(&self) -> u64 {
        self.count as u64 * self.unit.minutes()
    }

    /// Symbol suffix for candle subscriptions, e.g. `{=5m}`.
    #[must_use]
    pub fn symbol_suffix(&self) -> String {
        format!("{{={self}}}")
    }
}

impl fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.unit.as_str())
    }
}

impl FromStr for CandleInterval {
    type Err = IntervalError;

    /// Parse `"<count><unit>"`. A missing count means 1 (`"h"` == `"1h"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, unit) = trimmed.split_at(split);

        let count = if digits.is_empty() {
            1
        } else {
            digits
                .parse::<u32>()
                .map_err(|_| IntervalError::InvalidCount(digits.to_string()))?
        };

        Self::new(count, unit.parse()?)
    }
}

// =============================================================================
// Subscription Spec
// =============================================================================

/// One symbol subscription on the feed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    /// Bare ticker symbol (e.g., "AAPL").
    pub symbol: String,
    /// Event kind to subscribe to.
    pub kind: EventKind,
    /// Candle period; only meaningful for [`EventKind::Candle`].
    pub interval: Option<CandleInterval>,
    /// Start of the requested history in epoch millis.
    pub from_time: Option<i64>,
}

impl SubscriptionSpec {
    /// Quote subscription for a symbol.
    #[must_use]
    pub fn quote(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            kind: EventKind::Quote,
            interval: None,
            from_time: None,
        }
    }

    /// Candle subscription for a symbol starting at `from_time` (epoch millis).
    #[must_use]
    pub fn candle(symbol: impl Into<String>, interval: CandleInterval, from_time: i64) -> Self {
        Self {
            symbol: symbol.into(),
            kind: EventKind::Candle,
            interval: Some(interval),
            from_time: Some(from_time),
        }
    }

    /// Symbol as sent on the wire (`AAPL{=5m}` for candles).
    #[must_use]
    pub fn wire_symbol(&self) -> String {
        match (self.kind, self.interval) {
            (EventKind::Candle, Some(interval)) => {
                format!("{}{}", self.symbol, interval.symbol_suffix())
            }
            _ => self.symbol.clone(),
        }
    }
}

/// Strip a candle interval suffix from a wire symbol.
///
/// Returns everything before the first `{`, or the input unchanged.
#[must_use]
pub fn strip_interval_suffix(wire_symbol: &str) -> &str {
    wire_symbol
        .split_once('{')
        .map_or(wire_symbol, |(bare, _)| bare)
}

// =============================================================================
// Field Schema
// =============================================================================

/// Ordered field list negotiated for an event kind in `FEED_SETUP`.
///
/// Its length is the COMPACT decode stride for that kind and must not change
/// once the channel is configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    kind: EventKind,
    fields: Vec<String>,
}

impl FieldSchema {
    /// Create a schema from an ordered field list.
    #[must_use]
    pub fn new<I, S>(kind: EventKind, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Quote schema used by the real-time session.
    #[must_use]
    pub fn quote() -> Self {
        Self::new(
            EventKind::Quote,
            [
                FIELD_EVENT_TYPE,
                FIELD_EVENT_SYMBOL,
                FIELD_BID_PRICE,
                FIELD_ASK_PRICE,
            ],
        )
    }

    /// Event kind this schema applies to.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Ordered field names.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Decode stride (number of values per record).
    #[must_use]
    pub fn stride(&self) -> usize {
        self.fields.len()
    }

    /// Position of a field in the tuple.
    #[must_use]
    pub fn index_of(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("5m", 5, IntervalUnit::Minute ; "minutes")]
    #[test_case("15m", 15, IntervalUnit::Minute ; "fifteen minutes")]
    #[test_case("1h", 1, IntervalUnit::Hour ; "hour")]
    #[test_case("1d", 1, IntervalUnit::Day ; "day")]
    #[test_case("2w", 2, IntervalUnit::Week ; "weeks")]
    #[test_case("3mo", 3, IntervalUnit::Month ; "months")]
    #[test_case("h", 1, IntervalUnit::Hour ; "implicit count")]
    fn interval_parses(input: &str, count: u32, unit: IntervalUnit) {
        let interval: CandleInterval = input.parse().unwrap();
        assert_eq!(interval.count(), count);
        assert_eq!(interval.unit(), unit);
    }

    #[test]
    fn interval_rejects_zero_count() {
        assert_eq!(
            "0m".parse::<CandleInterval>(),
            Err(IntervalError::ZeroCount)
        );
    }

    #[test]
    fn interval_rejects_unknown_unit() {
        assert!(matches!(
            "5s".parse::<CandleInterval>(),
            Err(IntervalError::UnknownUnit(unit)) if unit == "s"
        ));
        assert!(matches!(
            "5".parse::<CandleInterval>(),
            Err(IntervalError::UnknownUnit(unit)) if unit.is_empty()
        ));
    }

    #[test]
    fn interval_display_round_trips_wire_form() {
        let interval: CandleInterval = "10mo".parse().unwrap();
        assert_eq!(interval.to_string(), "10mo");
        assert_eq!(interval.symbol_suffix(), "{=10mo}");
        assert_eq!(interval.minutes(), 10 * 43_200);
    }

    #[test]
    fn candle_wire_symbol_has_suffix() {
        let spec = SubscriptionSpec::candle("AAPL", "5m".parse().unwrap(), 0);
        assert_eq!(spec.wire_symbol(), "AAPL{=5m}");
    }

    #[test]
    fn quote_wire_symbol_is_bare() {
        assert_eq!(SubscriptionSpec::quote("SPY").wire_symbol(), "SPY");
    }

    #[test]
    fn strip_suffix() {
        assert_eq!(strip_interval_suffix("AAPL{=5m}"), "AAPL");
        assert_eq!(strip_interval_suffix("AAPL"), "AAPL");
        assert_eq!(strip_interval_suffix("{=5m}"), "");
    }

    #[test]
    fn quote_schema_stride() {
        let schema = FieldSchema::quote();
        assert_eq!(schema.stride(), 4);
        assert_eq!(schema.index_of(FIELD_BID_PRICE), Some(2));
        assert_eq!(schema.index_of("volume"), None);
    }

    #[test]
    fn event_kind_wire_names() {
        assert_eq!(EventKind::from_wire("Quote"), Some(EventKind::Quote));
        assert_eq!(EventKind::from_wire("Candle"), Some(EventKind::Candle));
        assert_eq!(EventKind::from_wire("Trade"), None);
        assert_eq!(EventKind::Candle.to_string(), "Candle");
    }
}
