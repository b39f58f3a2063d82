//! Price Frame Codec
//!
//! Decodes inbound price feed frames into [`PriceUpdateEvent`]s.
//!
//! # Frame Format
//!
//! Each frame is a single JSON object mapping a symbol id to its new price,
//! encoded as a string:
//!
//! ```json
//! {"bitcoin":"6929.82","ethereum":"404.97"}
//! ```
//!
//! Only symbols whose price changed are present. Field order is preserved
//! (`serde_json` is built with `preserve_order`) and events are produced in
//! that order.
//!
//! # Failure Handling
//!
//! A field whose price cannot be parsed is skipped on its own. A frame that
//! is not a JSON object is rejected as a whole; the caller logs it and keeps
//! reading.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::streaming::{PriceBook, PriceUpdateEvent};
use crate::domain::subscription::normalize_symbol;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Frame is not valid JSON.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is JSON but not an object.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),
}

/// Result of decoding one frame.
#[derive(Debug, Clone, Default)]
pub struct DecodedFrame {
    /// Events in frame field order.
    pub events: Vec<PriceUpdateEvent>,
    /// Field names that were skipped because their value was unusable.
    pub skipped: Vec<String>,
}

/// JSON codec for the price feed.
#[derive(Debug, Default, Clone)]
pub struct PriceFrameDecoder;

impl PriceFrameDecoder {
    /// Create a new decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a frame, stamping events with the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object.
    pub fn decode(&self, text: &str, book: &mut PriceBook) -> Result<DecodedFrame, DecodeError> {
        self.decode_at(text, book, Utc::now())
    }

    /// Decode a frame, stamping events with `timestamp`.
    ///
    /// Updates `book` with every price that was decoded.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object.
    pub fn decode_at(
        &self,
        text: &str,
        book: &mut PriceBook,
        timestamp: DateTime<Utc>,
    ) -> Result<DecodedFrame, DecodeError> {
        let value: Value = serde_json::from_str(text.trim())?;

        let Value::Object(fields) = value else {
            return Err(DecodeError::InvalidFormat(format!(
                "expected JSON object, got: {}...",
                preview(text)
            )));
        };

        let mut decoded = DecodedFrame {
            events: Vec::with_capacity(fields.len()),
            skipped: Vec::new(),
        };

        for (key, raw_price) in fields {
            let (Some(symbol), Some(price)) = (normalize_symbol(&key), parse_price(&raw_price))
            else {
                tracing::debug!(field = %key, value = %raw_price, "Skipping unusable price field");
                decoded.skipped.push(key);
                continue;
            };

            let previous = book.observe(&symbol, price);
            decoded
                .events
                .push(PriceUpdateEvent::new(symbol, price, previous, timestamp));
        }

        Ok(decoded)
    }
}

/// Parse a price value.
///
/// The feed sends strings; bare JSON numbers are accepted as well. Non-finite
/// values are rejected since they have no meaningful direction.
fn parse_price(value: &Value) -> Option<f64> {
    let price = match value {
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Number(n) => n.as_f64()?,
        _ => return None,
    };
    price.is_finite().then_some(price)
}

fn preview(text: &str) -> &str {
    let trimmed = text.trim();
    let end = trimmed
        .char_indices()
        .nth(50)
        .map_or(trimmed.len(), |(idx, _)| idx);
    &trimmed[..end]
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::domain::streaming::PriceDirection;

    fn decode(text: &str, book: &mut PriceBook) -> DecodedFrame {
        PriceFrameDecoder::new().decode(text, book).unwrap()
    }

    #[test]
    fn first_sample_is_unchanged() {
        let mut book = PriceBook::new();

        let frame = decode(r#"{"bitcoin":"100.0"}"#, &mut book);

        assert_eq!(frame.events.len(), 1);
        let event = &frame.events[0];
        assert_eq!(event.symbol(), "bitcoin");
        assert!((event.price() - 100.0).abs() < f64::EPSILON);
        assert!((event.previous_price() - 100.0).abs() < f64::EPSILON);
        assert_eq!(event.direction(), PriceDirection::Unchanged);
    }

    #[test]
    fn second_sample_carries_previous_price() {
        let mut book = PriceBook::new();
        decode(r#"{"bitcoin":"100.0"}"#, &mut book);

        let up = decode(r#"{"bitcoin":"105.0"}"#, &mut book);
        assert!((up.events[0].previous_price() - 100.0).abs() < f64::EPSILON);
        assert_eq!(up.events[0].direction(), PriceDirection::Up);

        let down = decode(r#"{"bitcoin":"99.5"}"#, &mut book);
        assert!((down.events[0].previous_price() - 105.0).abs() < f64::EPSILON);
        assert_eq!(down.events[0].direction(), PriceDirection::Down);
    }

    #[test]
    fn events_follow_field_order() {
        let mut book = PriceBook::new();

        let frame = decode(
            r#"{"solana":"20.1","bitcoin":"6929.82","ethereum":"404.97"}"#,
            &mut book,
        );

        let symbols: Vec<_> = frame.events.iter().map(PriceUpdateEvent::symbol).collect();
        assert_eq!(symbols, vec!["solana", "bitcoin", "ethereum"]);
    }

    #[test]
    fn bad_field_is_skipped_alone() {
        let mut book = PriceBook::new();

        let frame = decode(
            r#"{"bitcoin":"abc","ethereum":"404.97","monero":null}"#,
            &mut book,
        );

        assert_eq!(frame.events.len(), 1);
        assert_eq!(frame.events[0].symbol(), "ethereum");
        assert_eq!(frame.skipped, vec!["bitcoin", "monero"]);
        assert!(book.last_price("bitcoin").is_none());
    }

    #[test]
    fn frame_with_only_bad_field_emits_nothing() {
        let mut book = PriceBook::new();

        let frame = decode(r#"{"bitcoin":"not-a-number"}"#, &mut book);

        assert!(frame.events.is_empty());
        assert!(book.is_empty());
    }

    #[test]
    fn numeric_prices_are_accepted() {
        let mut book = PriceBook::new();

        let frame = decode(r#"{"bitcoin":101.25}"#, &mut book);

        assert!((frame.events[0].price() - 101.25).abs() < f64::EPSILON);
    }

    #[test_case(r#"{"bitcoin":"NaN"}"#)]
    #[test_case(r#"{"bitcoin":"inf"}"#)]
    #[test_case(r#"{"bitcoin":""}"#)]
    #[test_case(r#"{"bitcoin":true}"#)]
    #[test_case(r#"{"bitcoin":["1.0"]}"#)]
    #[test_case(r#"{"  ":"1.0"}"#)]
    fn unusable_fields(text: &str) {
        let mut book = PriceBook::new();
        let frame = decode(text, &mut book);
        assert!(frame.events.is_empty());
        assert_eq!(frame.skipped.len(), 1);
    }

    #[test]
    fn keys_are_normalized() {
        let mut book = PriceBook::new();

        let frame = decode(r#"{"Bitcoin":"1.5"}"#, &mut book);

        assert_eq!(frame.events[0].symbol(), "bitcoin");
        assert_eq!(book.last_price("bitcoin"), Some(1.5));
    }

    #[test]
    fn empty_object_is_valid() {
        let mut book = PriceBook::new();
        let frame = decode("{}", &mut book);
        assert!(frame.events.is_empty());
        assert!(frame.skipped.is_empty());
    }

    #[test_case("not json at all")]
    #[test_case("")]
    #[test_case(r#"{"bitcoin":"1.0""#)]
    fn non_json_frames_fail(text: &str) {
        let mut book = PriceBook::new();
        let result = PriceFrameDecoder::new().decode(text, &mut book);
        assert!(matches!(result, Err(DecodeError::Json(_))));
        assert!(book.is_empty());
    }

    #[test_case(r#"["bitcoin","1.0"]"#)]
    #[test_case("42")]
    #[test_case(r#""bitcoin""#)]
    fn non_object_frames_fail(text: &str) {
        let mut book = PriceBook::new();
        let result = PriceFrameDecoder::new().decode(text, &mut book);
        assert!(matches!(result, Err(DecodeError::InvalidFormat(_))));
    }

    #[test]
    fn decode_at_uses_given_timestamp() {
        let mut book = PriceBook::new();
        let at = DateTime::parse_from_rfc3339("2024-03-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let frame = PriceFrameDecoder::new()
            .decode_at(r#"{"bitcoin":"1"}"#, &mut book, at)
            .unwrap();

        assert_eq!(frame.events[0].timestamp(), at);
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let long = "é".repeat(80);
        assert_eq!(preview(&long).chars().count(), 50);
        assert_eq!(preview("  short "), "short");
    }
}
