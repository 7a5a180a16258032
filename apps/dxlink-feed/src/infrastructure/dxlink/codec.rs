//! COMPACT Codec
//!
//! Decoding for DXLink text frames and the COMPACT feed payload.
//!
//! # COMPACT Format
//!
//! A `FEED_DATA` payload is a flat list of `[kind, values]` pairs. `values`
//! is one long array holding consecutive records, each exactly as wide as the
//! field list negotiated for `kind` in `FEED_SETUP`:
//!
//! ```json
//! ["Candle", ["Candle", "AAPL{=5m}", 1705330800000, 185.2,
//!             "Candle", "AAPL{=5m}", 1705331100000, 185.4]]
//! ```
//!
//! A trailing partial record is dropped, never padded.

use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;
use tracing::debug;

use crate::domain::streaming::{CandleRecord, CompactRecord, QuoteRecord};
use crate::domain::subscription::{
    EventKind, FIELD_ASK_PRICE, FIELD_BID_PRICE, FIELD_EVENT_SYMBOL, FIELD_TIME, FieldSchema,
    SubscriptionSpec,
};
use crate::domain::history::CandleField;
use crate::infrastructure::dxlink::messages::{FeedSubscriptionMessage, ServerMessage};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is not a JSON object.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// Split a flat COMPACT value list into records of `stride` values.
///
/// Returns `⌊values.len() / stride⌋` records; a zero stride yields none.
#[must_use]
pub fn decode_feed_data(kind: EventKind, values: &[Value], stride: usize) -> Vec<CompactRecord> {
    if stride == 0 {
        return Vec::new();
    }

    let chunks = values.chunks_exact(stride);
    if !chunks.remainder().is_empty() {
        debug!(
            kind = %kind,
            stride,
            dropped = chunks.remainder().len(),
            "Dropping partial COMPACT record"
        );
    }

    chunks
        .map(|chunk| CompactRecord::new(kind, chunk.to_vec()))
        .collect()
}

/// Build the `FEED_SUBSCRIPTION` for a set of specs, `None` when there is nothing to subscribe.
#[must_use]
pub fn encode_subscription(
    channel: u32,
    specs: &[SubscriptionSpec],
) -> Option<FeedSubscriptionMessage> {
    if specs.is_empty() {
        return None;
    }
    Some(FeedSubscriptionMessage::reset_with(channel, specs))
}

/// Parse a wire number into a decimal.
///
/// Numbers go through their decimal text form so `10.2` stays exactly `10.2`.
/// Numeric strings are accepted; `"NaN"` and other placeholders give `None`.
#[must_use]
pub fn decimal_value(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.clone(),
        _ => return None,
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn millis_value(value: &Value) -> Option<i64> {
    match value {
        #[allow(clippy::cast_possible_truncation)]
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

/// Decoder bound to the field schemas negotiated for one feed channel.
#[derive(Debug, Clone, Default)]
pub struct CompactCodec {
    schemas: HashMap<EventKind, FieldSchema>,
}

impl CompactCodec {
    /// Create a codec for the given schemas (one per event kind).
    #[must_use]
    pub fn new(schemas: impl IntoIterator<Item = FieldSchema>) -> Self {
        Self {
            schemas: schemas
                .into_iter()
                .map(|schema| (schema.kind(), schema))
                .collect(),
        }
    }

    /// Schema for an event kind.
    #[must_use]
    pub fn schema(&self, kind: EventKind) -> Option<&FieldSchema> {
        self.schemas.get(&kind)
    }

    /// All schemas, ordered by event kind.
    #[must_use]
    pub fn schemas(&self) -> Vec<FieldSchema> {
        let mut schemas: Vec<FieldSchema> = self.schemas.values().cloned().collect();
        schemas.sort_by_key(FieldSchema::kind);
        schemas
    }

    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object or does not match
    /// any known message shape.
    pub fn decode_message(&self, text: &str) -> Result<ServerMessage, CodecError> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}",
                trimmed.chars().take(50).collect::<String>()
            )));
        }
        Ok(serde_json::from_str(trimmed)?)
    }

    /// Decode a `FEED_DATA` payload into records.
    ///
    /// Pairs whose kind has no schema, or whose values are not an array, are skipped.
    #[must_use]
    pub fn decode_payload(&self, data: &[Value]) -> Vec<CompactRecord> {
        let mut records = Vec::new();

        for pair in data.chunks(2) {
            let [kind, values] = pair else {
                debug!("Ignoring unpaired COMPACT element");
                continue;
            };

            let Some(schema) = kind
                .as_str()
                .and_then(EventKind::from_wire)
                .and_then(|kind| self.schemas.get(&kind))
            else {
                debug!(kind = %kind, "Ignoring COMPACT data for unconfigured event kind");
                continue;
            };

            let Some(values) = values.as_array() else {
                debug!(kind = %schema.kind(), "COMPACT values are not an array");
                continue;
            };

            records.extend(decode_feed_data(schema.kind(), values, schema.stride()));
        }

        records
    }

    fn field<'a>(&self, record: &'a CompactRecord, name: &str) -> Option<&'a Value> {
        self.schemas
            .get(&record.kind())
            .and_then(|schema| schema.index_of(name))
            .and_then(|index| record.value(index))
    }

    /// Quote view of a record, `None` if the symbol or either price is missing.
    #[must_use]
    pub fn quote(&self, record: &CompactRecord) -> Option<QuoteRecord> {
        if record.kind() != EventKind::Quote {
            return None;
        }

        Some(QuoteRecord {
            symbol: self.field(record, FIELD_EVENT_SYMBOL)?.as_str()?.to_string(),
            bid: decimal_value(self.field(record, FIELD_BID_PRICE)?)?,
            ask: decimal_value(self.field(record, FIELD_ASK_PRICE)?)?,
        })
    }

    /// Candle view of a record, `None` if the symbol or time is missing.
    #[must_use]
    pub fn candle(&self, record: &CompactRecord) -> Option<CandleRecord> {
        if record.kind() != EventKind::Candle {
            return None;
        }

        let price = |field: CandleField| self.field(record, field.as_str()).and_then(decimal_value);

        Some(CandleRecord {
            symbol: self.field(record, FIELD_EVENT_SYMBOL)?.as_str()?.to_string(),
            time: millis_value(self.field(record, FIELD_TIME)?)?,
            open: price(CandleField::Open),
            high: price(CandleField::High),
            low: price(CandleField::Low),
            close: price(CandleField::Close),
            volume: price(CandleField::Volume),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn candle_schema() -> FieldSchema {
        FieldSchema::new(
            EventKind::Candle,
            ["eventType", "eventSymbol", "time", "close"],
        )
    }

    #[test]
    fn splits_values_by_stride() {
        let values = vec![
            json!("Quote"), json!("SPY"), json!(10.0), json!(10.2),
            json!("Quote"), json!("QQQ"), json!(20.0), json!(20.5),
        ];
        let records = decode_feed_data(EventKind::Quote, &values, 4);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].value(1), Some(&json!("QQQ")));
    }

    #[test]
    fn drops_partial_trailing_record() {
        let values = vec![json!("Quote"), json!("SPY"), json!(10.0), json!(10.2), json!("Quote")];
        assert_eq!(decode_feed_data(EventKind::Quote, &values, 4).len(), 1);
    }

    #[test]
    fn zero_stride_yields_nothing() {
        assert!(decode_feed_data(EventKind::Quote, &[json!(1)], 0).is_empty());
    }

    #[test]
    fn empty_subscription_is_none() {
        assert!(encode_subscription(3, &[]).is_none());
        let msg = encode_subscription(3, &[SubscriptionSpec::quote("SPY")]).unwrap();
        assert!(msg.reset);
        assert_eq!(msg.add.len(), 1);
    }

    #[test]
    fn decimal_parsing() {
        assert_eq!(decimal_value(&json!(10.2)), Decimal::from_str("10.2").ok());
        assert_eq!(decimal_value(&json!(185)), Some(Decimal::from(185)));
        assert_eq!(decimal_value(&json!("12.5")), Decimal::from_str("12.5").ok());
        assert_eq!(decimal_value(&json!(1.5e3)), Some(Decimal::from(1500)));
        assert_eq!(decimal_value(&json!("NaN")), None);
        assert_eq!(decimal_value(&Value::Null), None);
    }

    #[test]
    fn decode_message_rejects_non_objects() {
        let codec = CompactCodec::default();
        assert!(matches!(
            codec.decode_message("[1,2,3]"),
            Err(CodecError::InvalidFormat(_))
        ));
        assert!(matches!(codec.decode_message("{not json"), Err(CodecError::Json(_))));
    }

    #[test]
    fn payload_decodes_configured_kinds_only() {
        let codec = CompactCodec::new([FieldSchema::quote()]);
        let data = vec![
            json!("Quote"),
            json!(["Quote", "SPY", 10.0, 10.2]),
            json!("Trade"),
            json!(["Trade", "SPY", 10.1]),
            json!("Candle"),
            json!(["Candle", "SPY{=1d}", 0, 1.0]),
        ];
        let records = codec.decode_payload(&data);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind(), EventKind::Quote);
    }

    #[test]
    fn payload_handles_multiple_pairs() {
        let codec = CompactCodec::new([FieldSchema::quote(), candle_schema()]);
        let data = vec![
            json!("Quote"),
            json!(["Quote", "SPY", 10.0, 10.2]),
            json!("Candle"),
            json!(["Candle", "AAPL{=5m}", 1_705_330_800_000_i64, 185.2]),
        ];
        let records = codec.decode_payload(&data);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].kind(), EventKind::Candle);
    }

    #[test]
    fn quote_view() {
        let codec = CompactCodec::new([FieldSchema::quote()]);
        let record = CompactRecord::new(
            EventKind::Quote,
            vec![json!("Quote"), json!("SPY"), json!(10.0), json!(10.2)],
        );
        let quote = codec.quote(&record).unwrap();
        assert_eq!(quote.symbol, "SPY");
        assert_eq!(quote.mid(), Decimal::from_str("10.1").ok());
    }

    #[test]
    fn quote_view_skips_nan_prices() {
        let codec = CompactCodec::new([FieldSchema::quote()]);
        let record = CompactRecord::new(
            EventKind::Quote,
            vec![json!("Quote"), json!("SPY"), json!("NaN"), json!(10.2)],
        );
        assert!(codec.quote(&record).is_none());
    }

    #[test]
    fn candle_view() {
        let codec = CompactCodec::new([candle_schema()]);
        let record = CompactRecord::new(
            EventKind::Candle,
            vec![
                json!("Candle"),
                json!("AAPL{=5m}"),
                json!(1_705_330_800_000_i64),
                json!(185.25),
            ],
        );
        let candle = codec.candle(&record).unwrap();
        assert_eq!(candle.symbol, "AAPL{=5m}");
        assert_eq!(candle.time, 1_705_330_800_000);
        assert_eq!(candle.close, Decimal::from_str("185.25").ok());
        assert_eq!(candle.open, None);
        assert!(codec.quote(&record).is_none());
    }

    proptest! {
        #[test]
        fn record_count_is_floor_of_len_over_stride(len in 0usize..200, stride in 1usize..12) {
            let values: Vec<Value> = (0..len).map(|i| json!(i)).collect();
            let records = decode_feed_data(EventKind::Candle, &values, stride);
            prop_assert_eq!(records.len(), len / stride);
            for (i, record) in records.iter().enumerate() {
                prop_assert_eq!(record.values().len(), stride);
                prop_assert_eq!(record.value(0), Some(&json!(i * stride)));
            }
        }
    }
}
