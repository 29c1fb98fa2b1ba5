//! Session configuration
//!
//! Capacities and error policies for a merge session, with serde defaults so
//! a partial TOML file (or none at all) works.

use crate::aggregate::AggregatorOptions;
use crate::merge::MergerConfig;
use crate::source::MalformedLinePolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What to do when a merged record fails classification (missing/ambiguous
/// `event` key, unknown event type).
///
/// Skip-and-log is the default: display tooling favors availability over
/// strict completeness. Decode errors are never subject to this policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifyPolicy {
    #[default]
    SkipAndLog,
    Halt,
}

/// Configuration for a merge session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Max entries retained per event history and per symbol series.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Max retained drift samples.
    #[serde(default = "default_drift_capacity")]
    pub drift_capacity: usize,

    /// Malformed-line handling for live sources. Finite tapes always halt.
    #[serde(default)]
    pub malformed_lines: MalformedLinePolicy,

    /// Classification-failure handling at the session loop.
    #[serde(default)]
    pub unknown_events: ClassifyPolicy,

    /// Treat per-source `receive_time` regressions as fatal.
    #[serde(default)]
    pub strict_monotonic: bool,

    /// When set, only these symbols keep a best-bid series.
    #[serde(default)]
    pub tracked_symbols: Option<Vec<String>>,
}

fn default_capacity() -> usize {
    100
}

fn default_drift_capacity() -> usize {
    1024
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            drift_capacity: default_drift_capacity(),
            malformed_lines: MalformedLinePolicy::default(),
            unknown_events: ClassifyPolicy::default(),
            strict_monotonic: false,
            tracked_symbols: None,
        }
    }
}

impl WatchConfig {
    /// Load from a TOML file; absent keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&body)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn aggregator_options(&self) -> AggregatorOptions {
        AggregatorOptions {
            capacity: self.capacity,
            drift_capacity: self.drift_capacity,
            tracked_symbols: self
                .tracked_symbols
                .as_ref()
                .map(|symbols| symbols.iter().cloned().collect()),
        }
    }

    pub fn merger_config(&self) -> MergerConfig {
        MergerConfig {
            strict_monotonic: self.strict_monotonic,
        }
    }
}
