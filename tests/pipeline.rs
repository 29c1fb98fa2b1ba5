//! End-to-end pipeline tests: tape directory -> merge -> aggregate windows.

use std::io::Write;
use std::path::Path;
use tapemux::presenter::{LinePresenter, NullPresenter, Presenter};
use tapemux::session::MergeSession;
use tapemux::{ClassifyPolicy, WatchConfig, WindowedAggregator};

fn write_tape(dir: &Path, name: &str, lines: &[String]) {
    let mut file = std::fs::File::create(dir.join(name)).unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
}

fn partial(time: f64, symbol: &str, origin: f64) -> String {
    format!(
        r#"{{"receive_time": {time}, "symbol": "{symbol}", "is_partial": true, "order_book": {{"E": {origin}}}, "event": {{"PartialOrderBook": {{}}}}}}"#
    )
}

fn full(time: f64, symbol: &str, bid: f64, ask: f64) -> String {
    format!(
        r#"{{"receive_time": {time}, "symbol": "{symbol}", "is_partial": false, "event": {{"FullOrderBook": {{"bids": [{{"price": {bid}, "qty": 1.0}}], "asks": [{{"price": {ask}, "qty": 1.0}}]}}}}}}"#
    )
}

/// Presenter that records the receive_time order it was refreshed in.
#[derive(Default)]
struct OrderProbe {
    lines: Vec<String>,
    refreshes: u64,
}

impl Presenter for OrderProbe {
    fn refresh(&mut self, aggregator: &WindowedAggregator) -> std::io::Result<()> {
        self.refreshes += 1;
        if let Some(applied) = aggregator.last_applied() {
            self.lines.push(applied.line.clone());
        }
        Ok(())
    }
}

#[test]
fn merges_three_tapes_in_global_receive_time_order() {
    let dir = tempfile::tempdir().unwrap();
    write_tape(
        dir.path(),
        "a.json",
        &[
            partial(1.0, "AAA", 1.0),
            partial(4.0, "AAA", 4.0),
            partial(7.0, "AAA", 7.0),
        ],
    );
    write_tape(
        dir.path(),
        "b.json",
        &[partial(2.0, "BBB", 2.0), partial(3.0, "BBB", 3.0)],
    );
    write_tape(
        dir.path(),
        "c.json",
        &[partial(5.0, "CCC", 5.0), partial(6.0, "CCC", 6.0)],
    );

    let config = WatchConfig::default();
    let mut session = MergeSession::from_directory(dir.path(), &config).unwrap();
    let mut probe = OrderProbe::default();
    let summary = session.run(&mut probe).unwrap();

    assert_eq!(summary.records_applied, 7);
    assert_eq!(summary.merger.per_source, vec![3, 2, 2]);

    // History preserves the merged 1,2,3,4,5,6,7 order: symbols interleave
    // as A B B A C C A.
    let symbols: Vec<&str> = session
        .aggregator()
        .history("PartialOrderBook")
        .unwrap()
        .iter()
        .map(|line| {
            if line.contains("AAA") {
                "A"
            } else if line.contains("BBB") {
                "B"
            } else {
                "C"
            }
        })
        .collect();
    assert_eq!(symbols, vec!["A", "B", "B", "A", "C", "C", "A"]);

    // One refresh per applied record plus the closing refresh.
    assert_eq!(probe.refreshes, 8);
}

#[test]
fn windows_stay_bounded_and_drift_accumulates() {
    let dir = tempfile::tempdir().unwrap();
    let lines: Vec<String> = (0..250)
        .map(|n| {
            if n % 2 == 0 {
                partial(n as f64, "BTCUSDT", n as f64 - 3.0)
            } else {
                full(n as f64, "BTCUSDT", 100.0 + n as f64, 101.0 + n as f64)
            }
        })
        .collect();
    write_tape(dir.path(), "btc.json", &lines);

    let config = WatchConfig::default();
    let mut session = MergeSession::from_directory(dir.path(), &config).unwrap();
    session.run(&mut NullPresenter).unwrap();

    let aggregator = session.aggregator();
    // 125 partials and 125 fulls went in; capacity 100 holds.
    assert_eq!(aggregator.history("PartialOrderBook").unwrap().len(), 100);
    assert_eq!(aggregator.history("FullOrderBook").unwrap().len(), 100);
    assert_eq!(aggregator.series("BTCUSDT").unwrap().len(), 100);

    // Every partial drifted by exactly 3ms.
    assert_eq!(aggregator.drift_stats().count, 125);
    assert_eq!(aggregator.drift_stats().mean(), Some(3.0));
    assert!(aggregator
        .drift_samples()
        .iter()
        .all(|&sample| sample == 3.0));
}

#[test]
fn tie_break_follows_sorted_tape_order_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    write_tape(dir.path(), "x_late.json", &[partial(5.0, "LATE", 5.0)]);
    write_tape(dir.path(), "a_early.json", &[partial(5.0, "EARLY", 5.0)]);

    for _ in 0..5 {
        let config = WatchConfig::default();
        let mut session = MergeSession::from_directory(dir.path(), &config).unwrap();
        let mut probe = OrderProbe::default();
        session.run(&mut probe).unwrap();

        // a_early.json sorts first, registers first, wins the tie.
        assert!(probe.lines[0].contains("EARLY"));
        assert!(probe.lines[1].contains("LATE"));
    }
}

#[test]
fn unclassifiable_records_skip_under_default_policy() {
    let dir = tempfile::tempdir().unwrap();
    write_tape(
        dir.path(),
        "mixed.json",
        &[
            partial(1.0, "AAA", 1.0),
            r#"{"receive_time": 2.0, "symbol": "AAA"}"#.to_string(),
            r#"{"receive_time": 3.0, "event": {"Mystery": {}}}"#.to_string(),
            partial(4.0, "AAA", 4.0),
        ],
    );

    let config = WatchConfig::default();
    let mut session = MergeSession::from_directory(dir.path(), &config).unwrap();
    let summary = session.run(&mut NullPresenter).unwrap();

    assert_eq!(summary.records_applied, 2);
    assert_eq!(summary.records_skipped, 2);
}

#[test]
fn halt_policy_and_corrupt_tape_both_stop_the_session() {
    let dir = tempfile::tempdir().unwrap();
    write_tape(
        dir.path(),
        "bad.json",
        &[partial(1.0, "AAA", 1.0), "{{{ not json".to_string()],
    );

    let config = WatchConfig::default();
    let mut session = MergeSession::from_directory(dir.path(), &config).unwrap();
    let error = session.run(&mut NullPresenter).unwrap_err();
    // Decode errors carry the source identity for fault localization.
    assert!(format!("{error:#}").contains("bad.json"));

    let dir = tempfile::tempdir().unwrap();
    write_tape(
        dir.path(),
        "strange.json",
        &[r#"{"receive_time": 1.0, "event": {"Mystery": {}}}"#.to_string()],
    );
    let config = WatchConfig {
        unknown_events: ClassifyPolicy::Halt,
        ..WatchConfig::default()
    };
    let mut session = MergeSession::from_directory(dir.path(), &config).unwrap();
    assert!(session.run(&mut NullPresenter).is_err());
}

#[test]
fn line_presenter_streams_summaries() {
    let dir = tempfile::tempdir().unwrap();
    write_tape(
        dir.path(),
        "btc.json",
        &[full(1000.0, "BTCUSDT", 42000.5, 42001.0)],
    );

    let config = WatchConfig::default();
    let mut session = MergeSession::from_directory(dir.path(), &config).unwrap();
    let mut buffer = Vec::new();
    session.run(&mut LinePresenter::new(&mut buffer)).unwrap();

    let text = String::from_utf8(buffer).unwrap();
    assert!(text.contains("FullOrderBook"));
    assert!(text.contains("BTCUSDT"));
    assert!(text.contains("42000.5"));
}
