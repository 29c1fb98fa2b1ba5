//! Tape Interleaver CLI
//!
//! Merges a directory of JSON-lines tapes into one chronologically ordered
//! stream on stdout, one record per line. Unknown record fields pass through
//! untouched, so the output is a drop-in replacement for the concatenation
//! of the inputs, re-sequenced by `receive_time`.
//!
//! Usage:
//!   tapemux data/
//!   tapemux data/ --strict --stats
//!   tapemux data/ | your-consumer

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tapemux::merge::{ChronologicalMerger, MergerConfig};
use tapemux::source::{JsonLinesSource, RecordSource};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "tapemux")]
#[command(about = "Merge JSON event tapes into one time-ordered stream")]
struct Args {
    /// Directory of tape files (one JSON record per line)
    path: PathBuf,

    /// Fail on per-source receive_time regressions instead of warning
    #[arg(long)]
    strict: bool,

    /// Log merge counters on exit
    #[arg(long)]
    stats: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tapemux=info".parse().expect("static directive")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut paths: Vec<_> = std::fs::read_dir(&args.path)
        .with_context(|| format!("failed to list {}", args.path.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    paths.sort();
    if paths.is_empty() {
        bail!("no tape files in {}", args.path.display());
    }

    let mut sources: Vec<Box<dyn RecordSource>> = Vec::with_capacity(paths.len());
    for path in &paths {
        sources.push(Box::new(JsonLinesSource::open(path)?));
    }

    let mut merger = ChronologicalMerger::with_config(
        sources,
        MergerConfig {
            strict_monotonic: args.strict,
        },
    )
    .context("failed to prime merge")?;

    let stdout = std::io::stdout().lock();
    let mut out = BufWriter::new(stdout);
    while let Some(record) = merger.advance().context("merge halted")? {
        serde_json::to_writer(&mut out, &record)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;

    if args.stats {
        let stats = merger.stats();
        info!(
            total = stats.total_emitted,
            ties = stats.ties,
            per_source = ?stats.per_source,
            monotonicity_violations = stats.monotonicity_violations,
            "merge complete"
        );
    }
    Ok(())
}
