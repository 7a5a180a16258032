//! Historical Candle Types
//!
//! Request shaping and post-processing for historical candle downloads.
//!
//! # Lookback Approximation
//!
//! DXLink candle subscriptions take a `fromTime`, not a row count. The
//! requested row count is turned into a lookback window with fixed
//! unit-dependent ratios (intraday bars assume ~6 bars per day). Weekly and
//! monthly bars span 7 and 30 calendar days each, so their windows are never
//! shorter than the requested rows. This is an approximation, not a
//! trading-calendar computation; callers needing exact coverage should
//! over-request and rely on the per-symbol row cap.
//!
//! # Trading Hours
//!
//! Rows are filtered to the regular session. [`TradingHours::US_EQUITIES_UTC`]
//! is the fixed 14:30-21:00 UTC window, which is one hour late while US
//! daylight saving time is in effect. [`TradingHours::us_equities_local`]
//! evaluates 09:30-16:00 in `America/New_York` instead.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use super::streaming::CandleRecord;
use super::subscription::{
    CandleInterval, EventKind, FIELD_EVENT_SYMBOL, FIELD_EVENT_TYPE, FIELD_TIME, FieldSchema,
    IntervalUnit, SubscriptionSpec, strip_interval_suffix,
};

/// Intraday bars assumed per trading day when sizing the lookback window.
const INTRADAY_BARS_PER_DAY: u64 = 6;

/// Lookback (days) beyond which a request gets the extended timeout.
const LARGE_LOOKBACK_DAYS: i64 = 30;

/// Ticker count beyond which a request gets the extended timeout.
const LARGE_TICKER_COUNT: usize = 5;

// =============================================================================
// Candle Fields
// =============================================================================

/// Optional OHLCV field of a candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandleField {
    /// Open price.
    Open,
    /// High price.
    High,
    /// Low price.
    Low,
    /// Close price.
    Close,
    /// Volume.
    Volume,
}

impl CandleField {
    /// All fields in wire order.
    pub const ALL: [Self; 5] = [Self::Open, Self::High, Self::Low, Self::Close, Self::Volume];

    /// DXLink field name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::High => "high",
            Self::Low => "low",
            Self::Close => "close",
            Self::Volume => "volume",
        }
    }
}

impl FromStr for CandleField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "high" => Ok(Self::High),
            "low" => Ok(Self::Low),
            "close" => Ok(Self::Close),
            "volume" => Ok(Self::Volume),
            other => Err(format!("unknown candle field: {other}")),
        }
    }
}

// =============================================================================
// Trading Hours
// =============================================================================

/// Daily session window, `[open, close)` in minutes after midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindow {
    open: u32,
    close: u32,
}

impl SessionWindow {
    /// Window from `open_hour:open_minute` (inclusive) to `close_hour:close_minute` (exclusive).
    #[must_use]
    pub const fn new(open_hour: u32, open_minute: u32, close_hour: u32, close_minute: u32) -> Self {
        Self {
            open: open_hour * 60 + open_minute,
            close: close_hour * 60 + close_minute,
        }
    }

    const fn contains_minute(self, minute_of_day: u32) -> bool {
        minute_of_day >= self.open && minute_of_day < self.close
    }
}

/// Regular-trading-hours filter applied to historical rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingHours {
    /// Fixed UTC clock range with no daylight-saving adjustment.
    FixedUtc(SessionWindow),
    /// Local exchange clock range, converted per timestamp.
    Exchange {
        /// Exchange time zone.
        timezone: Tz,
        /// Session window in exchange local time.
        window: SessionWindow,
    },
}

impl Default for TradingHours {
    fn default() -> Self {
        Self::US_EQUITIES_UTC
    }
}

impl TradingHours {
    /// US equities regular session as a fixed 14:30-21:00 UTC range.
    pub const US_EQUITIES_UTC: Self = Self::FixedUtc(SessionWindow::new(14, 30, 21, 0));

    /// US equities regular session, 09:30-16:00 New York time.
    #[must_use]
    pub const fn us_equities_local() -> Self {
        Self::Exchange {
            timezone: chrono_tz::America::New_York,
            window: SessionWindow::new(9, 30, 16, 0),
        }
    }

    /// Whether a timestamp falls inside the session.
    #[must_use]
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        match self {
            Self::FixedUtc(window) => window.contains_minute(time.hour() * 60 + time.minute()),
            Self::Exchange { timezone, window } => {
                let local = time.with_timezone(timezone);
                window.contains_minute(local.hour() * 60 + local.minute())
            }
        }
    }
}

// =============================================================================
// Lookback Arithmetic
// =============================================================================

/// Days of history to request so that `rows` candles of `interval` are covered.
///
/// Always at least one day.
#[must_use]
pub fn lookback_days(interval: CandleInterval, rows: usize) -> i64 {
    let rows = u64::try_from(rows).unwrap_or(u64::MAX);
    let span = rows.saturating_mul(u64::from(interval.count()));

    let days = match interval.unit() {
        IntervalUnit::Minute | IntervalUnit::Hour => span / INTRADAY_BARS_PER_DAY,
        IntervalUnit::Day => span,
        IntervalUnit::Week => span.saturating_mul(7),
        IntervalUnit::Month => span.saturating_mul(30),
    };

    i64::try_from(days).unwrap_or(i64::MAX).max(1)
}

/// Errors from [`bars_since`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BarsSinceError {
    /// The start date lies after `now`.
    #[error("start date {0} is later than now")]
    StartInFuture(DateTime<Utc>),
}

/// Number of candles of `interval` needed to cover `start..now`, plus one.
///
/// # Errors
///
/// Returns [`BarsSinceError::StartInFuture`] if `start` is after `now`.
pub fn bars_since(
    interval: CandleInterval,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<u64, BarsSinceError> {
    let elapsed = now.signed_duration_since(start).num_milliseconds();
    let elapsed = u64::try_from(elapsed).map_err(|_| BarsSinceError::StartInFuture(start))?;
    let bar_millis = interval.minutes().saturating_mul(60_000);

    Ok(elapsed.div_ceil(bar_millis) + 1)
}

// =============================================================================
// Historical Request
// =============================================================================

/// Parameters of one historical candle download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalRequest {
    tickers: Vec<String>,
    interval: CandleInterval,
    fields: Vec<CandleField>,
    max_rows: usize,
}

impl HistoricalRequest {
    /// Request `max_rows` candles per ticker, close prices only.
    #[must_use]
    pub fn new<I, S>(tickers: I, interval: CandleInterval, max_rows: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tickers: tickers.into_iter().map(Into::into).collect(),
            interval,
            fields: Vec::new(),
            max_rows,
        }
    }

    /// Select which OHLCV fields to request.
    #[must_use]
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = CandleField>) -> Self {
        self.fields = fields.into_iter().collect();
        self
    }

    /// Requested tickers.
    #[must_use]
    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    /// Candle interval.
    #[must_use]
    pub const fn interval(&self) -> CandleInterval {
        self.interval
    }

    /// Row cap per ticker.
    #[must_use]
    pub const fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Candle field schema: `eventType, eventSymbol, time` then the selected
    /// OHLCV fields in wire order (`close` when nothing was selected).
    #[must_use]
    pub fn field_schema(&self) -> FieldSchema {
        let selected: &[CandleField] = if self.fields.is_empty() {
            &[CandleField::Close]
        } else {
            &self.fields
        };

        let mut fields = vec![FIELD_EVENT_TYPE, FIELD_EVENT_SYMBOL, FIELD_TIME];
        fields.extend(
            CandleField::ALL
                .iter()
                .filter(|field| selected.contains(*field))
                .map(|field| field.as_str()),
        );

        FieldSchema::new(EventKind::Candle, fields)
    }

    /// Lookback window in days.
    #[must_use]
    pub fn lookback_days(&self) -> i64 {
        lookback_days(self.interval, self.max_rows)
    }

    /// Start of the requested range in epoch millis.
    #[must_use]
    pub fn from_time(&self, now: DateTime<Utc>) -> i64 {
        TimeDelta::try_days(self.lookback_days())
            .and_then(|lookback| now.checked_sub_signed(lookback))
            .map_or(0, |from| from.timestamp_millis())
    }

    /// Data timeout scaled from `base`: +50% for long lookbacks or many tickers.
    #[must_use]
    pub fn timeout_budget(&self, base: Duration) -> Duration {
        if self.lookback_days() > LARGE_LOOKBACK_DAYS || self.tickers.len() > LARGE_TICKER_COUNT {
            base + base / 2
        } else {
            base
        }
    }

    /// One candle subscription per ticker.
    #[must_use]
    pub fn subscriptions(&self, now: DateTime<Utc>) -> Vec<SubscriptionSpec> {
        let from_time = self.from_time(now);
        self.tickers
            .iter()
            .map(|ticker| SubscriptionSpec::candle(ticker.clone(), self.interval, from_time))
            .collect()
    }
}

// =============================================================================
// Historical Result
// =============================================================================

/// One OHLCV row of a historical series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandleRow {
    /// Candle start time.
    pub time: DateTime<Utc>,
    /// Open price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open: Option<Decimal>,
    /// High price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<Decimal>,
    /// Low price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<Decimal>,
    /// Close price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close: Option<Decimal>,
    /// Volume.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,
}

/// Historical series keyed by bare ticker symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct HistoricalResult {
    series: BTreeMap<String, Vec<CandleRow>>,
}

impl HistoricalResult {
    /// Build series from decoded candles.
    ///
    /// Candles outside `hours` or with an unrepresentable timestamp are
    /// dropped; rows keep arrival order and each series stops at `max_rows`.
    #[must_use]
    pub fn from_candles(
        candles: impl IntoIterator<Item = CandleRecord>,
        hours: &TradingHours,
        max_rows: usize,
    ) -> Self {
        let mut series: BTreeMap<String, Vec<CandleRow>> = BTreeMap::new();

        for candle in candles {
            let Some(time) = DateTime::from_timestamp_millis(candle.time) else {
                continue;
            };
            if !hours.contains(time) {
                continue;
            }

            let rows = series
                .entry(strip_interval_suffix(&candle.symbol).to_string())
                .or_default();
            if rows.len() >= max_rows {
                continue;
            }

            rows.push(CandleRow {
                time,
                open: candle.open,
                high: candle.high,
                low: candle.low,
                close: candle.close,
                volume: candle.volume,
            });
        }

        series.retain(|_, rows| !rows.is_empty());
        Self { series }
    }

    /// Rows for a ticker.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&[CandleRow]> {
        self.series.get(symbol).map(Vec::as_slice)
    }

    /// Tickers with at least one row.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    /// Whether no rows were collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Number of tickers with rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// Take the underlying map.
    #[must_use]
    pub fn into_inner(self) -> BTreeMap<String, Vec<CandleRow>> {
        self.series
    }
}
