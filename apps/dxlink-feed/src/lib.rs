#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! DXLink Feed - Market Data Feed Client
//!
//! A client for the DXLink WebSocket market-data protocol as served to
//! tastytrade accounts. It downloads historical candles over short-lived
//! connections and keeps a persistent quote stream for live mid prices.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Protocol-independent data types
//!   - `subscription`: Event kinds, candle intervals, field schemas
//!   - `streaming`: Decoded records and feed events
//!   - `history`: Lookback arithmetic, trading hours, result shaping
//!
//! - **Application**: Port definitions and use cases
//!   - `ports`: Feed token source, feed event sink
//!   - `services`: Connection resolution
//!
//! - **Infrastructure**: Adapters and process concerns
//!   - `dxlink`: Messages, COMPACT codec, handshake, connection task,
//!     historical collector, real-time session
//!   - `config`: Environment configuration
//!   - `metrics`: Prometheus instrumentation
//!   - `telemetry`: Tracing and OpenTelemetry
//!
//! # Data Flow
//!
//! ```text
//!                ┌────────────┐   effects   ┌────────────┐   FeedEvent   ┌───────────────────┐
//! DXLink WS ───► │ Connection │ ──────────► │ Handshake  │ ────────────► │ Collector/Session │
//!           ◄─── │    task    │ ◄────────── │  (pure)    │               └───────────────────┘
//!                └────────────┘   frames    └────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Feed data types with no I/O.
pub mod domain;

/// Application layer - Ports and use cases.
pub mod application;

/// Infrastructure layer - DXLink client and process concerns.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::history::{
    CandleField, CandleRow, HistoricalRequest, HistoricalResult, SessionWindow, TradingHours,
};
pub use domain::streaming::{CandleRecord, CompactRecord, FeedEvent, QuoteRecord};
pub use domain::subscription::{CandleInterval, EventKind, FieldSchema, SubscriptionSpec};

// Ports
pub use application::ports::{ConnectionInfo, FeedTokenSource, StaticTokenSource, TokenSourceError};

// DXLink client
pub use infrastructure::dxlink::{
    CollectionPolicy, FeedError, HandshakeConfig, HistoricalCollector, LivePriceMap,
    RealTimeSession, SessionState,
};

// Configuration
pub use infrastructure::config::{ConfigError, FeedConfig, FeedMode};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
