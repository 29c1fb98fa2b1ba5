//! Windowed Aggregator
//!
//! Turns the merged stream into display-ready state without unbounded
//! growth: a capped formatted history per event type, a capped best-bid
//! series per symbol for book snapshots, and ingest-vs-origin drift samples
//! for partial updates.
//!
//! The aggregator has two states: running, and closed once the merger
//! reports exhaustion. Closing is terminal - there is no reconnection or
//! replay at this layer.

use crate::record::{format_millis, ClassifyError, Millis, Record};
use crate::window::Window;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Event types the format table knows about, in display order. Anything else
/// is a classification error, never silently ignored.
pub const KNOWN_EVENT_TYPES: &[&str] = &[
    "PartialOrderBook",
    "FullOrderBook",
    "OrderTradeEvent",
    "AccountInformation",
    "OpenOrders",
];

/// Options for the aggregator; usually derived from
/// [`WatchConfig`](crate::config::WatchConfig).
#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    /// Max entries per event history and per symbol series.
    pub capacity: usize,
    /// Max retained drift samples.
    pub drift_capacity: usize,
    /// When set, only these symbols get a time series.
    pub tracked_symbols: Option<HashSet<String>>,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            capacity: 100,
            drift_capacity: 1024,
            tracked_symbols: None,
        }
    }
}

/// Running summary over all drift samples seen, independent of the capped
/// sample window.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DriftStats {
    pub count: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub latest: Option<f64>,
}

impl DriftStats {
    fn record(&mut self, sample: f64) {
        self.count += 1;
        self.sum += sample;
        self.min = Some(self.min.map_or(sample, |m| m.min(sample)));
        self.max = Some(self.max.map_or(sample, |m| m.max(sample)));
        self.latest = Some(sample);
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// What one applied record contributed.
#[derive(Debug, Clone, Serialize)]
pub struct Applied {
    pub event_type: String,
    pub line: String,
    pub drift: Option<Millis>,
}

/// The aggregator. One per merge session.
pub struct WindowedAggregator {
    options: AggregatorOptions,
    /// Formatted one-line summaries per event type. BTreeMap keeps display
    /// order stable across refreshes.
    histories: BTreeMap<String, Window<String>>,
    /// Best-bid series per symbol, fed by full book snapshots.
    series: BTreeMap<String, Window<f64>>,
    drift_samples: Window<Millis>,
    drift_stats: DriftStats,
    last_applied: Option<Applied>,
    records_applied: u64,
    closed: bool,
}

impl WindowedAggregator {
    pub fn new(options: AggregatorOptions) -> Self {
        Self {
            drift_samples: Window::new(options.drift_capacity),
            options,
            histories: BTreeMap::new(),
            series: BTreeMap::new(),
            drift_stats: DriftStats::default(),
            last_applied: None,
            records_applied: 0,
            closed: false,
        }
    }

    /// Fold one merged record into the windows.
    ///
    /// Classification errors (missing/ambiguous `event`, unknown type) leave
    /// the aggregator state untouched; the session decides whether they skip
    /// or halt.
    pub fn apply(&mut self, record: &Record) -> Result<Applied, ClassifyError> {
        debug_assert!(!self.closed, "apply after close");

        let event_type = record.event_type()?;
        let line = format_line(event_type, record)?;

        self.histories
            .entry(event_type.to_string())
            .or_insert_with(|| Window::new(self.options.capacity))
            .push(line.clone());

        let drift = record.drift();
        if let Some(sample) = drift {
            self.drift_samples.push(sample);
            self.drift_stats.record(sample);
        }

        if event_type == "FullOrderBook" {
            self.update_series(record);
        }

        self.records_applied += 1;
        let applied = Applied {
            event_type: event_type.to_string(),
            line,
            drift,
        };
        self.last_applied = Some(applied.clone());
        Ok(applied)
    }

    /// Append the snapshot's best bid to the symbol series. A symbol with no
    /// bids in this snapshot is skipped, never zero-filled.
    fn update_series(&mut self, record: &Record) {
        let Some(symbol) = record.symbol.as_deref() else {
            return;
        };
        if let Some(tracked) = &self.options.tracked_symbols {
            if !tracked.contains(symbol) {
                return;
            }
        }
        let Some(bid) = best_price(record.event_payload(), "bids") else {
            return;
        };
        self.series
            .entry(symbol.to_string())
            .or_insert_with(|| Window::new(self.options.capacity))
            .push(bid);
    }

    /// Mark the session exhausted. Idempotent and terminal.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn records_applied(&self) -> u64 {
        self.records_applied
    }

    /// What the most recent `apply` produced.
    pub fn last_applied(&self) -> Option<&Applied> {
        self.last_applied.as_ref()
    }

    /// Formatted history for one event type.
    pub fn history(&self, event_type: &str) -> Option<&Window<String>> {
        self.histories.get(event_type)
    }

    /// All histories, keyed by event type, in stable order.
    pub fn histories(&self) -> impl Iterator<Item = (&str, &Window<String>)> {
        self.histories.iter().map(|(k, w)| (k.as_str(), w))
    }

    /// Best-bid series for one symbol.
    pub fn series(&self, symbol: &str) -> Option<&Window<f64>> {
        self.series.get(symbol)
    }

    /// All symbol series in stable order.
    pub fn all_series(&self) -> impl Iterator<Item = (&str, &Window<f64>)> {
        self.series.iter().map(|(k, w)| (k.as_str(), w))
    }

    pub fn drift_samples(&self) -> &Window<Millis> {
        &self.drift_samples
    }

    pub fn drift_stats(&self) -> &DriftStats {
        &self.drift_stats
    }
}

/// The fixed format table: event type -> one-line summary.
fn format_line(event_type: &str, record: &Record) -> Result<String, ClassifyError> {
    let time = format_millis(record.receive_time);
    let symbol = record.symbol_or_unknown();
    let payload = record.event_payload();

    match event_type {
        "PartialOrderBook" => {
            let drift = record
                .drift()
                .map(|d| format!("  drift {d:+.1}ms"))
                .unwrap_or_default();
            Ok(format!("{time}  {symbol:<12}{drift}"))
        }
        "FullOrderBook" => {
            let bid = best_price(payload, "bids");
            let ask = best_price(payload, "asks");
            Ok(format!(
                "{time}  {symbol:<12}  bid {:<12}  ask {:<12}",
                fmt_price(bid),
                fmt_price(ask)
            ))
        }
        "OrderTradeEvent" => Ok(format!("{time}  {symbol:<12}  order update")),
        "AccountInformation" => {
            let balances = payload
                .and_then(|p| p.get("balances"))
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            Ok(format!("{time}  account  {balances} balances"))
        }
        "OpenOrders" => {
            let orders = payload.and_then(Value::as_array).map_or(0, Vec::len);
            Ok(format!("{time}  {orders} open orders"))
        }
        other => Err(ClassifyError::UnknownEventType {
            event_type: other.to_string(),
        }),
    }
}

/// Top-of-book price from a snapshot payload: `payload[side][0]["price"]`.
fn best_price(payload: Option<&Value>, side: &str) -> Option<f64> {
    payload?.get(side)?.get(0)?.get("price")?.as_f64()
}

fn fmt_price(price: Option<f64>) -> String {
    price.map_or_else(|| "-".to_string(), |p| format!("{p}"))
}
