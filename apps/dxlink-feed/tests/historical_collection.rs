//! Historical Collection Integration Tests
//!
//! Runs the collector against a scripted DXLink server over a real socket.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Value, json};

use dxlink_feed::{
    CandleField, CollectionPolicy, ConnectionInfo, FeedError, HistoricalCollector,
    HistoricalRequest, TradingHours,
};
use support::{MockServer, Script, SilentServer};

/// 2024-01-15 15:00:00 UTC, inside regular trading hours.
const SESSION_START_MS: i64 = 1_705_330_800_000;
const FIVE_MINUTES_MS: i64 = 300_000;
/// 2024-01-15 03:00:00 UTC, outside regular trading hours.
const OVERNIGHT_MS: i64 = 1_705_287_600_000;

fn quick_policy() -> CollectionPolicy {
    CollectionPolicy {
        connect_timeout: Duration::from_secs(2),
        ready_timeout: Duration::from_secs(2),
        base_data_timeout: Duration::from_secs(2),
        grace_period: Duration::from_millis(300),
        join_timeout: Duration::from_secs(1),
    }
}

fn collector(server: &MockServer, token: &str) -> HistoricalCollector {
    HistoricalCollector::new(ConnectionInfo::new(server.url(), token))
        .with_policy(quick_policy())
        .with_trading_hours(TradingHours::US_EQUITIES_UTC)
}

/// `[eventType, eventSymbol, time, close, volume]` values for one candle.
fn candle(symbol: &str, time: i64, close: f64, volume: u64) -> [Value; 5] {
    [
        json!("Candle"),
        json!(format!("{symbol}{{=5m}}")),
        json!(time),
        json!(close),
        json!(volume),
    ]
}

fn candle_frame(candles: impl IntoIterator<Item = [Value; 5]>) -> Value {
    let values: Vec<Value> = candles.into_iter().flatten().collect();
    json!(["Candle", values])
}

fn request(tickers: &[&str]) -> HistoricalRequest {
    HistoricalRequest::new(tickers.iter().copied(), "5m".parse().unwrap(), 10)
        .with_fields([CandleField::Close, CandleField::Volume])
}

#[tokio::test]
async fn collects_capped_series_per_symbol() {
    let bars = |symbol: &str, base: f64, range: std::ops::Range<i64>| {
        range
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let close = base + i as f64;
                candle(symbol, SESSION_START_MS + i * FIVE_MINUTES_MS, close, 1000)
            })
            .collect::<Vec<_>>()
    };

    let mut first = vec![candle("AAPL", OVERNIGHT_MS, 1.0, 1)];
    first.extend(bars("AAPL", 185.0, 0..6));
    first.extend(bars("MSFT", 390.0, 0..6));
    let mut second = bars("AAPL", 185.0, 6..12);
    second.extend(bars("MSFT", 390.0, 6..12));

    let server = MockServer::start(Script::with_data(vec![
        candle_frame(first),
        candle_frame(second),
    ]))
    .await;

    let result = collector(&server, "token")
        .collect(&request(&["AAPL", "MSFT"]))
        .await
        .unwrap();

    assert_eq!(result.symbols().collect::<Vec<_>>(), ["AAPL", "MSFT"]);

    let aapl = result.get("AAPL").unwrap();
    assert_eq!(aapl.len(), 10);
    assert_eq!(
        aapl[0].time,
        DateTime::<Utc>::from_timestamp_millis(SESSION_START_MS).unwrap()
    );
    assert_eq!(aapl[0].close, Decimal::from_str("185.0").ok());
    assert_eq!(aapl[0].volume, Some(Decimal::from(1000)));
    assert_eq!(aapl[0].open, None);
    assert_eq!(aapl[9].close, Decimal::from_str("194.0").ok());

    assert_eq!(result.get("MSFT").unwrap().len(), 10);

    let types = server.received_types();
    assert_eq!(
        types[..5],
        ["SETUP", "AUTH", "CHANNEL_REQUEST", "FEED_SETUP", "FEED_SUBSCRIPTION"]
    );
    assert!(server.wait_closed(Duration::from_secs(2)).await);
}

#[tokio::test]
async fn subscription_carries_interval_symbols_and_from_time() {
    let server = MockServer::start(Script::default()).await;
    let now = DateTime::<Utc>::from_timestamp_millis(SESSION_START_MS).unwrap();
    let request = request(&["AAPL"]);

    let _ = collector(&server, "token").collect_at(&request, now).await.unwrap();

    let frames = server.received();
    let setup = frames.iter().find(|f| f["type"] == "FEED_SETUP").unwrap();
    assert_eq!(setup["acceptDataFormat"], "COMPACT");
    assert_eq!(
        setup["acceptEventFields"]["Candle"],
        json!(["eventType", "eventSymbol", "time", "close", "volume"])
    );

    let subscription = frames
        .iter()
        .find(|f| f["type"] == "FEED_SUBSCRIPTION")
        .unwrap();
    assert_eq!(subscription["reset"], true);
    let entry = &subscription["add"][0];
    assert_eq!(entry["type"], "Candle");
    assert_eq!(entry["symbol"], "AAPL{=5m}");
    assert_eq!(entry["fromTime"], json!(request.from_time(now)));
}

#[tokio::test]
async fn no_data_returns_empty_within_budget() {
    let server = MockServer::start(Script::default()).await;
    let policy = CollectionPolicy {
        base_data_timeout: Duration::from_millis(300),
        grace_period: Duration::from_millis(100),
        ..quick_policy()
    };

    let started = Instant::now();
    let result = collector(&server, "token")
        .with_policy(policy)
        .collect(&request(&["AAPL"]))
        .await
        .unwrap();

    assert!(result.is_empty());
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(server.wait_closed(Duration::from_secs(2)).await);
}

#[tokio::test]
async fn rejected_token_is_auth_error() {
    let server = MockServer::start(Script {
        accept_token: Some("good".to_string()),
        ..Script::default()
    })
    .await;

    let result = collector(&server, "bad").collect(&request(&["AAPL"])).await;

    assert!(matches!(result, Err(FeedError::AuthRejected { attempts: 3 })));
    assert_eq!(server.count("AUTH"), 3);
    assert_eq!(server.count("CHANNEL_REQUEST"), 0);
}

#[tokio::test]
async fn early_close_keeps_received_rows() {
    let server = MockServer::start(Script {
        feed_data: vec![candle_frame([candle("AAPL", SESSION_START_MS, 185.5, 10)])],
        close_after_data: true,
        ..Script::default()
    })
    .await;

    let started = Instant::now();
    let result = collector(&server, "token")
        .with_policy(CollectionPolicy {
            grace_period: Duration::from_secs(5),
            ..quick_policy()
        })
        .collect(&request(&["AAPL"]))
        .await
        .unwrap();

    assert_eq!(result.get("AAPL").unwrap().len(), 1);
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn stalled_upgrade_is_bounded_by_connect_timeout() {
    let server = SilentServer::start().await;
    let collector = HistoricalCollector::new(ConnectionInfo::new(server.url(), "token"))
        .with_policy(CollectionPolicy {
            connect_timeout: Duration::from_millis(300),
            ready_timeout: Duration::from_secs(1),
            base_data_timeout: Duration::from_secs(1),
            grace_period: Duration::from_millis(100),
            join_timeout: Duration::from_secs(1),
        });

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        collector.collect(&request(&["AAPL"])),
    )
    .await
    .expect("collect must finish on its own");

    assert!(matches!(outcome, Err(FeedError::Connection(_))));
}
