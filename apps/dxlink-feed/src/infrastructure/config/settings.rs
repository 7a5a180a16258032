//! Feed Configuration Settings
//!
//! Configuration for the feed binary, loaded from environment variables.
//! Numeric settings fall back to their defaults when unset or unparsable;
//! the connection credentials are required.

use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;

use crate::application::ports::ConnectionInfo;
use crate::domain::history::{CandleField, HistoricalRequest, SessionWindow, TradingHours};
use crate::domain::subscription::CandleInterval;
use crate::infrastructure::dxlink::{
    CollectionPolicy, HandshakeConfig, HistoricalCollector, RealTimeSession,
};

/// What the binary does once connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedMode {
    /// Download candle history, print it, exit.
    #[default]
    History,
    /// Stream quotes until interrupted.
    Stream,
}

impl FeedMode {
    /// Parse mode from string; anything but `stream` is history.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "stream" | "realtime" | "live" => Self::Stream,
            _ => Self::History,
        }
    }

    /// Mode name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::History => "history",
            Self::Stream => "stream",
        }
    }
}

/// Complete feed configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// DXLink URL and token.
    pub connection: ConnectionInfo,
    /// Run mode.
    pub mode: FeedMode,
    /// Symbols to download or stream.
    pub symbols: Vec<String>,
    /// Candle interval for history mode.
    pub interval: CandleInterval,
    /// Row cap per symbol for history mode.
    pub max_rows: usize,
    /// OHLCV fields for history mode.
    pub candle_fields: Vec<CandleField>,
    /// Handshake parameters.
    pub handshake: HandshakeConfig,
    /// Collection time limits.
    pub policy: CollectionPolicy,
    /// Trading-hours filter.
    pub trading_hours: TradingHours,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl FeedConfig {
    /// Create configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or a value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `DXLINK_URL` or `DXLINK_TOKEN` is missing or empty,
    /// or if the interval, candle fields or time zone cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = required(&lookup, "DXLINK_URL")?;
        let token = required(&lookup, "DXLINK_TOKEN")?;

        let mode = lookup("DXLINK_MODE")
            .map(|s| FeedMode::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let symbols = lookup("DXLINK_SYMBOLS")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|symbol| !symbol.is_empty())
                    .map(str::to_uppercase)
                    .collect()
            })
            .unwrap_or_else(|| vec!["SPY".to_string()]);

        let interval = match lookup("DXLINK_INTERVAL") {
            Some(value) => CandleInterval::from_str(&value)
                .map_err(|_| ConfigError::invalid("DXLINK_INTERVAL", &value))?,
            None => CandleInterval::from_str("1d")
                .map_err(|_| ConfigError::invalid("DXLINK_INTERVAL", "1d"))?,
        };

        let candle_fields = match lookup("DXLINK_CANDLE_FIELDS") {
            Some(value) => value
                .split(',')
                .filter(|field| !field.trim().is_empty())
                .map(CandleField::from_str)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| ConfigError::invalid("DXLINK_CANDLE_FIELDS", &value))?,
            None => CandleField::ALL.to_vec(),
        };

        let trading_hours = match lookup("DXLINK_TRADING_HOURS_TZ") {
            Some(value) if !value.eq_ignore_ascii_case("utc") => TradingHours::Exchange {
                timezone: Tz::from_str(value.trim())
                    .map_err(|_| ConfigError::invalid("DXLINK_TRADING_HOURS_TZ", &value))?,
                window: SessionWindow::new(9, 30, 16, 0),
            },
            _ => TradingHours::default(),
        };

        let defaults = HandshakeConfig::default();
        let keepalive = parse_or(&lookup, "DXLINK_KEEPALIVE_TIMEOUT_SECS", defaults.keepalive_timeout);
        let handshake = HandshakeConfig {
            keepalive_timeout: keepalive,
            accept_keepalive_timeout: keepalive,
            aggregation_period: parse_or(
                &lookup,
                "DXLINK_AGGREGATION_PERIOD",
                defaults.aggregation_period,
            ),
            max_auth_attempts: parse_or(
                &lookup,
                "DXLINK_MAX_AUTH_ATTEMPTS",
                defaults.max_auth_attempts,
            )
            // At least one AUTH is always sent.
            .max(1),
            ..defaults
        };

        let policy_defaults = CollectionPolicy::default();
        let policy = CollectionPolicy {
            connect_timeout: parse_duration_secs(
                &lookup,
                "DXLINK_CONNECT_TIMEOUT_SECS",
                policy_defaults.connect_timeout,
            ),
            ready_timeout: parse_duration_secs(
                &lookup,
                "DXLINK_READY_TIMEOUT_SECS",
                policy_defaults.ready_timeout,
            ),
            base_data_timeout: parse_duration_secs(
                &lookup,
                "DXLINK_DATA_TIMEOUT_SECS",
                policy_defaults.base_data_timeout,
            ),
            grace_period: parse_duration_millis(
                &lookup,
                "DXLINK_GRACE_PERIOD_MILLIS",
                policy_defaults.grace_period,
            ),
            join_timeout: parse_duration_secs(
                &lookup,
                "DXLINK_JOIN_TIMEOUT_SECS",
                policy_defaults.join_timeout,
            ),
        };

        Ok(Self {
            connection: ConnectionInfo::new(url, token),
            mode,
            symbols,
            interval,
            max_rows: parse_or(&lookup, "DXLINK_MAX_ROWS", 100),
            candle_fields,
            handshake,
            policy,
            trading_hours,
            metrics_port: parse_or(&lookup, "DXLINK_METRICS_PORT", 0),
        })
    }

    /// Historical request described by this configuration.
    #[must_use]
    pub fn historical_request(&self) -> HistoricalRequest {
        HistoricalRequest::new(self.symbols.iter().cloned(), self.interval, self.max_rows)
            .with_fields(self.candle_fields.iter().copied())
    }

    /// Historical collector for `info` with this configuration's limits.
    #[must_use]
    pub fn collector(&self, info: ConnectionInfo) -> HistoricalCollector {
        HistoricalCollector::new(info)
            .with_handshake_config(self.handshake.clone())
            .with_policy(self.policy)
            .with_trading_hours(self.trading_hours)
    }

    /// Quote session for `info` over the configured symbols.
    #[must_use]
    pub fn session(&self, info: ConnectionInfo) -> RealTimeSession {
        RealTimeSession::new(info, self.symbols.iter().cloned())
            .with_handshake_config(self.handshake.clone())
            .with_connect_timeout(self.policy.connect_timeout)
            .with_join_timeout(self.policy.join_timeout)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    Invalid {
        /// Variable name.
        key: String,
        /// Rejected value.
        value: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: &str) -> Self {
        Self::Invalid {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
