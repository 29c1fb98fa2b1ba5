//! Live Tape Watcher
//!
//! Full-screen presenter for a merge session: follows a directory of tapes
//! (or replays it), runs the merge/aggregate pipeline on a worker thread,
//! and renders the bounded windows - per-type event histories, per-symbol
//! best-bid sparklines, and drift statistics.
//!
//! Usage:
//!   tapemux-watch data/                # follow tapes live (tail -fq)
//!   tapemux-watch data/ --replay      # one pass over finite tapes
//!   tapemux-watch data/ --capacity 50
//!
//! Keys: q / Esc / Ctrl-C quit and cancel the session.

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use parking_lot::RwLock;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    widgets::{Block, Borders, Paragraph, Sparkline},
    Frame, Terminal,
};
use std::io::{self, Stdout};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tapemux::aggregate::{DriftStats, WindowedAggregator};
use tapemux::presenter::Presenter;
use tapemux::session::{MergeSession, SessionCancel};
use tapemux::source::MalformedLinePolicy;
use tapemux::WatchConfig;

#[derive(Parser, Debug)]
#[command(name = "tapemux-watch")]
#[command(about = "Watch merged tape activity in the terminal")]
struct Args {
    /// Directory of tape files
    path: PathBuf,

    /// Read the tapes once instead of following them
    #[arg(long)]
    replay: bool,

    /// Optional TOML config file
    #[arg(long, env = "TAPEMUX_CONFIG")]
    config: Option<PathBuf>,

    /// Override the window capacity
    #[arg(long)]
    capacity: Option<usize>,

    /// Skip malformed lines on live tapes instead of halting
    #[arg(long)]
    skip_malformed: bool,
}

/// Immutable render snapshot, rebuilt by the presenter on each refresh and
/// read by the draw loop.
#[derive(Debug, Clone, Default)]
struct ViewSnapshot {
    histories: Vec<(String, Vec<String>)>,
    /// Per-symbol best-bid series, rescaled to u64 for the sparkline.
    series: Vec<(String, Vec<u64>)>,
    drift: DriftStats,
    records: u64,
    closed: bool,
}

impl ViewSnapshot {
    fn from_aggregator(aggregator: &WindowedAggregator) -> Self {
        let histories = aggregator
            .histories()
            .map(|(event_type, window)| (event_type.to_string(), window.to_vec()))
            .collect();

        let series = aggregator
            .all_series()
            .map(|(symbol, window)| {
                let values = window.to_vec();
                let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
                let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let span = (max - min).max(f64::EPSILON);
                // Sparkline scales by max, so normalize each series to 1..=100
                // or a near-flat series renders as nothing.
                let scaled = values
                    .iter()
                    .map(|v| (1.0 + 99.0 * (v - min) / span) as u64)
                    .collect();
                (symbol.to_string(), scaled)
            })
            .collect();

        Self {
            histories,
            series,
            drift: aggregator.drift_stats().clone(),
            records: aggregator.records_applied(),
            closed: aggregator.is_closed(),
        }
    }
}

/// Presenter half: publishes a fresh snapshot after every applied record.
struct SharedViewPresenter {
    shared: Arc<RwLock<ViewSnapshot>>,
}

impl Presenter for SharedViewPresenter {
    fn refresh(&mut self, aggregator: &WindowedAggregator) -> io::Result<()> {
        *self.shared.write() = ViewSnapshot::from_aggregator(aggregator);
        Ok(())
    }
}

struct WatchApp {
    running: bool,
    shared: Arc<RwLock<ViewSnapshot>>,
    cancel: SessionCancel,
}

impl WatchApp {
    fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        match (key.modifiers, key.code) {
            (_, KeyCode::Esc | KeyCode::Char('q'))
            | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                self.cancel.cancel();
                self.running = false;
            }
            _ => {}
        }
    }

    fn render(&self, frame: &mut Frame) {
        let snapshot = self.shared.read().clone();

        let master = Layout::default()
            .direction(Direction::Vertical)
            .constraints(vec![
                Constraint::Length(3),
                Constraint::Fill(2),
                Constraint::Fill(1),
            ])
            .split(frame.size());

        self.render_header(frame, master[0], &snapshot);
        self.render_middle(frame, master[1], &snapshot);
        self.render_histories(frame, master[2], &snapshot);
    }

    fn render_header(&self, frame: &mut Frame, area: Rect, snapshot: &ViewSnapshot) {
        let status = if snapshot.closed { "closed" } else { "live" };
        let header = format!("tapemux  |  {} records  |  {status}", snapshot.records);
        frame.render_widget(
            Paragraph::new(header)
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::ALL)),
            area,
        );
    }

    fn render_middle(&self, frame: &mut Frame, area: Rect, snapshot: &ViewSnapshot) {
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(vec![Constraint::Fill(3), Constraint::Fill(1)])
            .split(area);

        // One sparkline row per tracked symbol, newest window of best bids.
        let visible = snapshot.series.len().clamp(1, 6);
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints(vec![Constraint::Fill(1); visible])
            .split(columns[0]);

        if snapshot.series.is_empty() {
            frame.render_widget(
                Paragraph::new("waiting for book snapshots...")
                    .block(Block::default().borders(Borders::ALL).title("Best Bid")),
                rows[0],
            );
        } else {
            for ((symbol, values), row) in snapshot.series.iter().zip(rows.iter()) {
                frame.render_widget(
                    Sparkline::default()
                        .block(
                            Block::default()
                                .borders(Borders::ALL)
                                .title(format!("Best Bid {symbol}")),
                        )
                        .data(values),
                    *row,
                );
            }
        }

        let drift = &snapshot.drift;
        let drift_text = match drift.mean() {
            Some(mean) => format!(
                "samples {}\nlatest {:+.1}ms\nmean   {:+.1}ms\nmin    {:+.1}ms\nmax    {:+.1}ms",
                drift.count,
                drift.latest.unwrap_or(0.0),
                mean,
                drift.min.unwrap_or(0.0),
                drift.max.unwrap_or(0.0),
            ),
            None => "no partial updates yet".to_string(),
        };
        frame.render_widget(
            Paragraph::new(drift_text)
                .block(Block::default().borders(Borders::ALL).title("Drift")),
            columns[1],
        );
    }

    fn render_histories(&self, frame: &mut Frame, area: Rect, snapshot: &ViewSnapshot) {
        let panel_count = snapshot.histories.len().max(1);
        let panels = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(vec![Constraint::Fill(1); panel_count])
            .split(area);

        if snapshot.histories.is_empty() {
            frame.render_widget(
                Paragraph::new("waiting for events...")
                    .block(Block::default().borders(Borders::ALL).title("Events")),
                panels[0],
            );
            return;
        }

        for ((event_type, lines), panel) in snapshot.histories.iter().zip(panels.iter()) {
            // Scroll to the newest entries, like a tail.
            let visible = panel.height.saturating_sub(2) as usize;
            let offset = lines.len().saturating_sub(visible);
            frame.render_widget(
                Paragraph::new(lines.join("\n"))
                    .scroll((offset as u16, 0))
                    .block(
                        Block::default()
                            .borders(Borders::ALL)
                            .title(event_type.clone()),
                    ),
                *panel,
            );
        }
    }
}

type WatchTerminal = Terminal<CrosstermBackend<Stdout>>;

fn init_terminal() -> io::Result<WatchTerminal> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    Terminal::new(CrosstermBackend::new(stdout))
}

fn restore_terminal(terminal: &mut WatchTerminal) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_event_loop(terminal: &mut WatchTerminal, app: &mut WatchApp) -> io::Result<()> {
    let tick_rate = Duration::from_millis(50);
    let mut last_tick = Instant::now();

    while app.running {
        terminal.draw(|frame| app.render(frame))?;

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                app.handle_key(key);
            }
        }
        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }
    }
    Ok(())
}

fn build_session(args: &Args, config: &WatchConfig) -> Result<MergeSession> {
    if args.replay {
        return MergeSession::from_directory(&args.path, config);
    }

    let mut paths: Vec<_> = std::fs::read_dir(&args.path)
        .with_context(|| format!("failed to list {}", args.path.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    paths.sort();
    if paths.is_empty() {
        bail!("no tape files in {}", args.path.display());
    }

    let commands: Vec<String> = paths
        .iter()
        .map(|path| format!("tail -fq -n +1 '{}'", path.display()))
        .collect();
    MergeSession::from_commands(&commands, config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => WatchConfig::from_file(path)?,
        None => WatchConfig::default(),
    };
    if let Some(capacity) = args.capacity {
        config.capacity = capacity;
    }
    if args.skip_malformed {
        config.malformed_lines = MalformedLinePolicy::Skip;
    }

    let mut session = build_session(&args, &config)?;
    let cancel = session.cancel_token();

    let shared = Arc::new(RwLock::new(ViewSnapshot::default()));
    let mut presenter = SharedViewPresenter {
        shared: Arc::clone(&shared),
    };
    let worker = std::thread::spawn(move || session.run(&mut presenter));

    let mut terminal = init_terminal()?;
    let mut app = WatchApp {
        running: true,
        shared,
        cancel,
    };
    let loop_result = run_event_loop(&mut terminal, &mut app);
    restore_terminal(&mut terminal)?;
    loop_result?;

    app.cancel.cancel();
    match worker.join() {
        Ok(summary) => {
            let summary = summary?;
            eprintln!(
                "session closed: {} records applied, {} skipped",
                summary.records_applied, summary.records_skipped
            );
            Ok(())
        }
        Err(_) => bail!("pipeline worker panicked"),
    }
}
