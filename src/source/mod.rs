//! Record Sources
//!
//! A record source wraps one append-only line-delimited JSON tape and hands
//! out decoded records one at a time. Finite tapes end with an explicit
//! [`SourceItem::EndOfStream`]; live pipes block until a line arrives and end
//! only through cancellation.
//!
//! Exhaustion is idempotent: once a source has reported `EndOfStream`, every
//! further call reports `EndOfStream` again - never an error, never a block.
//! That is what lets the merger treat exhausted and live handles uniformly.

use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

mod jsonl;
mod live;

pub use jsonl::JsonLinesSource;
pub use live::{LiveHandle, LiveSource};

/// Outcome of pulling once from a source.
#[derive(Debug)]
pub enum SourceItem {
    /// The next decoded record.
    Record(Record),
    /// The tape is exhausted (finite sources) or the session was cancelled
    /// (live sources). Terminal and idempotent.
    EndOfStream,
}

/// One input stream of records.
pub trait RecordSource: Send {
    /// Pull the next record. Blocks for live sources until a line is
    /// available or the source is cancelled.
    ///
    /// Blank lines are skipped, never surfaced. Malformed JSON is a
    /// [`SourceError::Decode`] - fatal for the source by default, because
    /// silently dropping lines would corrupt downstream ordering assumptions
    /// about what was lost.
    fn next_record(&mut self) -> Result<SourceItem, SourceError>;

    /// Source identifier for diagnostics (file path, command line).
    fn name(&self) -> &str;

    /// True for unbounded pipe-backed sources.
    fn is_live(&self) -> bool {
        false
    }
}

/// What to do with a malformed line on a live source.
///
/// Finite tapes always halt: a corrupt recorded tape is a data defect. For
/// live pipes the observed upstream behavior is unspecified, so the policy is
/// a configuration choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedLinePolicy {
    /// Surface a decode error and stop the source (default).
    #[default]
    Halt,
    /// Log a warning and keep reading.
    Skip,
}

/// Failure local to one source.
#[derive(Debug)]
pub enum SourceError {
    /// The underlying reader failed.
    Io { source_name: String, error: io::Error },
    /// A line was not valid JSON, or not a valid record.
    Decode {
        source_name: String,
        line_number: u64,
        line: String,
        error: serde_json::Error,
    },
    /// The source command could not be spawned.
    Spawn { source_name: String, error: io::Error },
}

impl SourceError {
    /// Identity of the failing source.
    pub fn source_name(&self) -> &str {
        match self {
            Self::Io { source_name, .. }
            | Self::Decode { source_name, .. }
            | Self::Spawn { source_name, .. } => source_name,
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { source_name, error } => {
                write!(f, "read error on source {source_name}: {error}")
            }
            Self::Decode {
                source_name,
                line_number,
                line,
                error,
            } => write!(
                f,
                "decode error on source {source_name} line {line_number}: {error} (line: {line:?})"
            ),
            Self::Spawn { source_name, error } => {
                write!(f, "failed to spawn source {source_name}: {error}")
            }
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { error, .. } | Self::Spawn { error, .. } => Some(error),
            Self::Decode { error, .. } => Some(error),
        }
    }
}
