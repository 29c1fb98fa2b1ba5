//! Presenter boundary
//!
//! Rendering is an external collaborator: the session calls `refresh` at
//! least once per successfully processed record and the presenter re-renders
//! from the aggregator's read-only state. Presenters never mutate that state.

use crate::aggregate::WindowedAggregator;
use std::io::{self, Write};

/// Sink for aggregator state.
pub trait Presenter {
    /// Called after each successfully applied record, and once more when the
    /// session closes. Never batched away.
    fn refresh(&mut self, aggregator: &WindowedAggregator) -> io::Result<()>;
}

/// Discards refreshes. Useful for batch merging and tests.
#[derive(Debug, Default)]
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn refresh(&mut self, _aggregator: &WindowedAggregator) -> io::Result<()> {
        Ok(())
    }
}

/// Writes each newly formatted summary line to a sink. The scrolling-log
/// presenter for non-TUI terminals.
pub struct LinePresenter<W> {
    out: W,
}

impl<W: Write> LinePresenter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> Presenter for LinePresenter<W> {
    fn refresh(&mut self, aggregator: &WindowedAggregator) -> io::Result<()> {
        if let Some(applied) = aggregator.last_applied() {
            writeln!(self.out, "{:<18} {}", applied.event_type, applied.line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregatorOptions;

    #[test]
    fn test_line_presenter_writes_last_line() {
        let mut agg = WindowedAggregator::new(AggregatorOptions::default());
        let record = serde_json::from_str(
            r#"{"receive_time": 1000.0, "symbol": "BTCUSDT",
                "event": {"PartialOrderBook": {}}}"#,
        )
        .unwrap();
        agg.apply(&record).unwrap();

        let mut buffer = Vec::new();
        LinePresenter::new(&mut buffer).refresh(&agg).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.starts_with("PartialOrderBook"));
        assert!(text.contains("BTCUSDT"));
    }

    #[test]
    fn test_refresh_before_any_record_writes_nothing() {
        let agg = WindowedAggregator::new(AggregatorOptions::default());
        let mut buffer = Vec::new();
        LinePresenter::new(&mut buffer).refresh(&agg).unwrap();
        assert!(buffer.is_empty());
    }
}
