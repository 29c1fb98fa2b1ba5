//! Record Data Model
//!
//! One decoded JSON event from a tape. Every record carries a `receive_time`
//! in milliseconds since the Unix epoch; `receive_time` is monotone within a
//! single tape but not across tapes - the merger restores the global order.
//!
//! Records round-trip losslessly: fields this crate does not interpret are
//! kept in `extra` and re-emitted verbatim by the merge CLI.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Milliseconds since Unix epoch. f64 so any JSON number is representable;
/// comparisons go through `total_cmp`, never `PartialOrd`.
pub type Millis = f64;

/// Comparison key for a handle with no pending record.
pub const EXHAUSTED_KEY: Millis = f64::INFINITY;

/// One decoded tape record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Ingest timestamp in epoch milliseconds. Required on every record.
    pub receive_time: Millis,
    /// Upstream symbol, when the record is symbol-scoped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Event wrapper: an object whose single key names the event type and
    /// whose value is the event payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<Map<String, Value>>,
    /// Set on incremental book updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_partial: Option<bool>,
    /// Book payload; for partial updates it carries the origin-side event
    /// timestamp `E` (epoch milliseconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_book: Option<Value>,
    /// Fields this crate does not interpret, preserved for re-emission.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record {
    /// The event type: the sole key of the `event` object.
    ///
    /// An absent `event`, or one with zero or several keys, violates the
    /// upstream structural contract and yields a [`ClassifyError`].
    pub fn event_type(&self) -> Result<&str, ClassifyError> {
        let event = self.event.as_ref().ok_or(ClassifyError::MissingEvent)?;
        let mut keys = event.keys();
        match (keys.next(), keys.next()) {
            (Some(key), None) => Ok(key),
            (None, _) => Err(ClassifyError::MissingEvent),
            (Some(_), Some(_)) => Err(ClassifyError::AmbiguousEvent {
                key_count: event.len(),
            }),
        }
    }

    /// Payload of the event, if the record carries a well-formed `event`.
    pub fn event_payload(&self) -> Option<&Value> {
        let event = self.event.as_ref()?;
        if event.len() == 1 {
            event.values().next()
        } else {
            None
        }
    }

    /// True when the record is flagged as a partial book update.
    pub fn is_partial(&self) -> bool {
        self.is_partial.unwrap_or(false)
    }

    /// Origin-side event timestamp (`order_book.E`) in epoch milliseconds.
    pub fn origin_event_time(&self) -> Option<Millis> {
        self.order_book.as_ref()?.get("E")?.as_f64()
    }

    /// Drift between ingest and origin for a partial update:
    /// `receive_time - order_book.E`. `None` unless the record is partial
    /// and carries a numeric origin timestamp.
    pub fn drift(&self) -> Option<Millis> {
        if !self.is_partial() {
            return None;
        }
        self.origin_event_time()
            .map(|origin| self.receive_time - origin)
    }

    /// The symbol, or `"?"` for records without one (display paths only).
    pub fn symbol_or_unknown(&self) -> &str {
        self.symbol.as_deref().unwrap_or("?")
    }
}

/// Render epoch milliseconds as wall-clock `HH:MM:SS.mmm`.
///
/// Out-of-range timestamps fall back to the raw number rather than failing a
/// display path.
pub fn format_millis(ms: Millis) -> String {
    let secs = (ms / 1000.0).floor() as i64;
    let sub_ms = (ms - secs as f64 * 1000.0).max(0.0) as u32;
    match chrono::DateTime::from_timestamp(secs, sub_ms * 1_000_000) {
        Some(ts) => ts.format("%H:%M:%S%.3f").to_string(),
        None => format!("{ms}"),
    }
}

/// Structural failure while classifying a record by event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    /// The record has no `event` object (or an empty one).
    MissingEvent,
    /// The `event` object names more than one type.
    AmbiguousEvent { key_count: usize },
    /// The event type is not in the format table.
    UnknownEventType { event_type: String },
}

impl fmt::Display for ClassifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingEvent => write!(f, "record has no event object"),
            Self::AmbiguousEvent { key_count } => {
                write!(f, "event object has {key_count} keys, expected exactly 1")
            }
            Self::UnknownEventType { event_type } => {
                write!(f, "unknown event type: {event_type}")
            }
        }
    }
}

impl std::error::Error for ClassifyError {}
