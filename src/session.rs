//! Merge session
//!
//! Wires enumeration -> sources -> merger -> aggregator -> presenter and
//! drives the loop. One logical thread of control: each record is fully
//! processed (merge selection, classify, history update, refresh signal)
//! before the next is considered.
//!
//! The source set is fixed at session start. Tapes appearing in the
//! directory afterwards are not picked up: handle cardinality is fixed at
//! merge init, by design.

use crate::aggregate::WindowedAggregator;
use crate::config::{ClassifyPolicy, WatchConfig};
use crate::merge::{ChronologicalMerger, MergerStats};
use crate::presenter::Presenter;
use crate::source::{JsonLinesSource, LiveHandle, LiveSource, RecordSource};
use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Cancels a running session from another thread. Cheap to clone.
#[derive(Clone)]
pub struct SessionCancel {
    stopped: Arc<AtomicBool>,
    live: Vec<LiveHandle>,
}

impl SessionCancel {
    /// Stop the session: flags the loop and cancels every live source so
    /// blocked reads wake promptly. Safe to call more than once.
    pub fn cancel(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        for handle in &self.live {
            handle.cancel();
        }
    }
}

/// Outcome of a completed (or cancelled) session.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub records_applied: u64,
    pub records_skipped: u64,
    pub cancelled: bool,
    pub merger: MergerStats,
}

/// One merge session over a fixed set of tapes.
pub struct MergeSession {
    merger: ChronologicalMerger,
    aggregator: WindowedAggregator,
    policy: ClassifyPolicy,
    stopped: Arc<AtomicBool>,
    live: Vec<LiveHandle>,
}

impl MergeSession {
    /// Session over every regular file in `dir`, sorted by path so
    /// registration order (and therefore tie-breaking) is reproducible.
    pub fn from_directory(dir: impl AsRef<Path>, config: &WatchConfig) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .with_context(|| format!("failed to list tape directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        if paths.is_empty() {
            bail!("no tape files in {}", dir.display());
        }

        let mut sources: Vec<Box<dyn RecordSource>> = Vec::with_capacity(paths.len());
        for path in &paths {
            sources.push(Box::new(JsonLinesSource::open(path)?));
        }
        info!(tapes = sources.len(), dir = %dir.display(), "opened tape directory");
        Self::from_sources(sources, Vec::new(), config)
    }

    /// Session over live pipes, one `sh -c` command per source, registered
    /// in the given order.
    pub fn from_commands(commands: &[String], config: &WatchConfig) -> Result<Self> {
        if commands.is_empty() {
            bail!("no source commands given");
        }
        let mut sources: Vec<Box<dyn RecordSource>> = Vec::with_capacity(commands.len());
        let mut live = Vec::with_capacity(commands.len());
        for command in commands {
            let (source, handle) =
                LiveSource::spawn_command(command, config.malformed_lines)?;
            sources.push(Box::new(source));
            live.push(handle);
        }
        info!(pipes = live.len(), "spawned live sources");
        Self::from_sources(sources, live, config)
    }

    /// Session over pre-built sources. `live` handles are adopted for
    /// cancellation.
    pub fn from_sources(
        sources: Vec<Box<dyn RecordSource>>,
        live: Vec<LiveHandle>,
        config: &WatchConfig,
    ) -> Result<Self> {
        let merger = ChronologicalMerger::with_config(sources, config.merger_config())
            .context("failed to prime merge")?;
        Ok(Self {
            merger,
            aggregator: WindowedAggregator::new(config.aggregator_options()),
            policy: config.unknown_events,
            stopped: Arc::new(AtomicBool::new(false)),
            live,
        })
    }

    /// Handle for cancelling `run` from another thread.
    pub fn cancel_token(&self) -> SessionCancel {
        SessionCancel {
            stopped: Arc::clone(&self.stopped),
            live: self.live.clone(),
        }
    }

    /// Drive the pipeline until exhaustion, cancellation, or a fatal source
    /// failure. The presenter is refreshed after every applied record and
    /// once more when the session closes.
    pub fn run(&mut self, presenter: &mut dyn Presenter) -> Result<SessionSummary> {
        let mut skipped = 0u64;

        loop {
            if self.stopped.load(Ordering::SeqCst) {
                info!("session cancelled");
                break;
            }
            let record = match self.merger.advance() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(error) => {
                    // Fatal by default: a merge that silently drops a source
                    // would change the stream's meaning.
                    self.shutdown();
                    return Err(error).context("merge halted on source failure");
                }
            };

            match self.aggregator.apply(&record) {
                Ok(_) => presenter
                    .refresh(&self.aggregator)
                    .context("presenter refresh failed")?,
                Err(error) => match self.policy {
                    ClassifyPolicy::SkipAndLog => {
                        skipped += 1;
                        warn!(
                            %error,
                            receive_time = record.receive_time,
                            symbol = record.symbol_or_unknown(),
                            "skipping unclassifiable record"
                        );
                    }
                    ClassifyPolicy::Halt => {
                        self.shutdown();
                        return Err(error).context("record classification failed");
                    }
                },
            }
        }

        self.shutdown();
        presenter
            .refresh(&self.aggregator)
            .context("final presenter refresh failed")?;

        let summary = SessionSummary {
            records_applied: self.aggregator.records_applied(),
            records_skipped: skipped,
            cancelled: self.stopped.load(Ordering::SeqCst),
            merger: self.merger.stats().clone(),
        };
        info!(
            applied = summary.records_applied,
            skipped = summary.records_skipped,
            "session closed"
        );
        Ok(summary)
    }

    fn shutdown(&mut self) {
        for handle in &self.live {
            handle.cancel();
        }
        self.aggregator.close();
    }

    /// Read access to the aggregator (during or after a run).
    pub fn aggregator(&self) -> &WindowedAggregator {
        &self.aggregator
    }

    pub fn merger_stats(&self) -> &MergerStats {
        self.merger.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presenter::NullPresenter;
    use std::io::Write;

    fn write_tape(dir: &Path, name: &str, lines: &[&str]) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
    }

    #[test]
    fn test_directory_session_merges_and_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        write_tape(
            dir.path(),
            "a.json",
            &[
                r#"{"receive_time": 1, "symbol": "A", "event": {"PartialOrderBook": {}}}"#,
                r#"{"receive_time": 4, "symbol": "A", "event": {"PartialOrderBook": {}}}"#,
            ],
        );
        write_tape(
            dir.path(),
            "b.json",
            &[r#"{"receive_time": 2, "symbol": "B", "event": {"PartialOrderBook": {}}}"#],
        );

        let config = WatchConfig::default();
        let mut session = MergeSession::from_directory(dir.path(), &config).unwrap();
        let summary = session.run(&mut NullPresenter).unwrap();

        assert_eq!(summary.records_applied, 3);
        assert_eq!(summary.records_skipped, 0);
        assert!(!summary.cancelled);
        assert_eq!(
            session.aggregator().history("PartialOrderBook").unwrap().len(),
            3
        );
        assert!(session.aggregator().is_closed());
    }

    #[test]
    fn test_skip_policy_counts_unclassifiable_records() {
        let dir = tempfile::tempdir().unwrap();
        write_tape(
            dir.path(),
            "a.json",
            &[
                r#"{"receive_time": 1, "event": {"PartialOrderBook": {}}}"#,
                r#"{"receive_time": 2}"#,
                r#"{"receive_time": 3, "event": {"Mystery": {}}}"#,
                r#"{"receive_time": 4, "event": {"PartialOrderBook": {}}}"#,
            ],
        );

        let config = WatchConfig::default();
        let mut session = MergeSession::from_directory(dir.path(), &config).unwrap();
        let summary = session.run(&mut NullPresenter).unwrap();

        assert_eq!(summary.records_applied, 2);
        assert_eq!(summary.records_skipped, 2);
    }

    #[test]
    fn test_halt_policy_stops_on_unclassifiable_record() {
        let dir = tempfile::tempdir().unwrap();
        write_tape(dir.path(), "a.json", &[r#"{"receive_time": 1}"#]);

        let config = WatchConfig {
            unknown_events: ClassifyPolicy::Halt,
            ..WatchConfig::default()
        };
        let mut session = MergeSession::from_directory(dir.path(), &config).unwrap();
        assert!(session.run(&mut NullPresenter).is_err());
    }

    #[test]
    fn test_decode_error_halts_session() {
        let dir = tempfile::tempdir().unwrap();
        write_tape(
            dir.path(),
            "a.json",
            &[r#"{"receive_time": 1, "event": {"PartialOrderBook": {}}}"#, "not json"],
        );

        let config = WatchConfig::default();
        let mut session = MergeSession::from_directory(dir.path(), &config).unwrap();
        assert!(session.run(&mut NullPresenter).is_err());
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = WatchConfig::default();
        assert!(MergeSession::from_directory(dir.path(), &config).is_err());
    }
}
