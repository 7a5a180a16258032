//! Prometheus Metrics Module
//!
//! Feed client metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Frames**: Text frames received, undecodable frames skipped
//! - **Records**: COMPACT records decoded by event kind
//! - **Connections**: Open DXLink sockets and `AUTH` attempts
//! - **Collection**: Historical download duration and rows returned
//! - **Session**: Symbols with a live price
//!
//! # Integration
//!
//! When a port is configured, the exporter serves `/metrics` on it. Recording
//! functions are no-ops until a recorder is installed.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::subscription::EventKind;

static INSTALLED: OnceLock<SocketAddr> = OnceLock::new();

// =============================================================================
// Initialization
// =============================================================================

/// Install the Prometheus recorder with an HTTP listener on `port`.
///
/// Port 0 disables export. Returns the listen address when the exporter is
/// running; a second call returns the first call's address.
///
/// # Errors
///
/// Returns an error if the recorder or listener cannot be installed.
pub fn init_metrics(port: u16) -> Result<Option<SocketAddr>, BuildError> {
    if port == 0 {
        return Ok(None);
    }
    if let Some(addr) = INSTALLED.get() {
        return Ok(Some(*addr));
    }

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();

    Ok(Some(*INSTALLED.get_or_init(|| addr)))
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "dxlink_feed_frames_received_total",
        "Total text frames received from DXLink"
    );
    describe_counter!(
        "dxlink_feed_decode_errors_total",
        "Total frames skipped because they could not be decoded"
    );
    describe_counter!(
        "dxlink_feed_records_decoded_total",
        "Total COMPACT records decoded by event kind"
    );
    describe_counter!(
        "dxlink_feed_auth_attempts_total",
        "Total AUTH messages sent"
    );
    describe_gauge!(
        "dxlink_feed_connections",
        "Number of open DXLink connections"
    );
    describe_gauge!(
        "dxlink_feed_live_symbols",
        "Number of symbols with a live mid price"
    );
    describe_histogram!(
        "dxlink_feed_collection_seconds",
        "Wall time of one historical collection"
    );
    describe_counter!(
        "dxlink_feed_collected_rows_total",
        "Total historical rows returned to callers"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

const fn kind_label(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Quote => "quote",
        EventKind::Candle => "candle",
    }
}

/// Record one received text frame.
pub fn record_frame_received() {
    counter!("dxlink_feed_frames_received_total").increment(1);
}

/// Record one skipped, undecodable frame.
pub fn record_decode_error() {
    counter!("dxlink_feed_decode_errors_total").increment(1);
}

/// Record decoded records.
pub fn record_records_decoded(kind: EventKind, count: usize) {
    counter!(
        "dxlink_feed_records_decoded_total",
        "kind" => kind_label(kind)
    )
    .increment(count as u64);
}

/// Record one `AUTH` message sent.
pub fn record_auth_attempt() {
    counter!("dxlink_feed_auth_attempts_total").increment(1);
}

/// Record a connection task starting.
pub fn record_connection_opened() {
    gauge!("dxlink_feed_connections").increment(1.0);
}

/// Record a connection task ending.
pub fn record_connection_closed() {
    gauge!("dxlink_feed_connections").decrement(1.0);
}

/// Record one finished historical collection.
pub fn record_collection(duration: Duration, rows: usize) {
    histogram!("dxlink_feed_collection_seconds").record(duration.as_secs_f64());
    counter!("dxlink_feed_collected_rows_total").increment(rows as u64);
}

/// Set the number of symbols with a live price.
#[allow(clippy::cast_precision_loss)]
pub fn set_live_symbols(count: usize) {
    gauge!("dxlink_feed_live_symbols").set(count as f64);
}
