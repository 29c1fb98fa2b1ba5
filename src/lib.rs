//! tapemux
//!
//! Chronological multiplexer for append-only JSON event tapes. N independent
//! tapes (one per upstream feed), each monotone in `receive_time`, are merged
//! into one globally time-ordered stream and folded into bounded windows of
//! recent activity per event type.
//!
//! ```text
//!  tape a ──▶ RecordSource ─┐
//!  tape b ──▶ RecordSource ─┼──▶ ChronologicalMerger ──▶ WindowedAggregator ──▶ Presenter
//!  pipe c ──▶ RecordSource ─┘      (one pending slot        (capped histories,
//!                                   per source, min          symbol series,
//!                                   receive_time next)       drift samples)
//! ```
//!
//! The merger holds exactly one pending record per source - memory is O(N)
//! regardless of stream length - and breaks `receive_time` ties by source
//! registration order, so output is reproducible. [`MergeSession`] wires the
//! pipeline together for a tape directory or a set of live pipe commands.

pub mod aggregate;
pub mod config;
pub mod merge;
pub mod presenter;
pub mod record;
pub mod session;
pub mod source;
pub mod window;

pub use aggregate::{AggregatorOptions, WindowedAggregator};
pub use config::{ClassifyPolicy, WatchConfig};
pub use merge::{ChronologicalMerger, MergeError, MergerConfig, MergerStats};
pub use presenter::{LinePresenter, NullPresenter, Presenter};
pub use record::{ClassifyError, Millis, Record};
pub use session::{MergeSession, SessionCancel, SessionSummary};
pub use source::{
    JsonLinesSource, LiveHandle, LiveSource, MalformedLinePolicy, RecordSource, SourceError,
    SourceItem,
};
pub use window::Window;
