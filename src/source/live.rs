//! Live pipe-backed source.
//!
//! Each live source owns one listener thread doing the blocking reads and a
//! bounded channel feeding the merge thread. The channel is a readiness hint
//! only - emission order is still decided by `receive_time` in the merger,
//! never by arrival order across sources.

use super::{MalformedLinePolicy, RecordSource, SourceError, SourceItem};
use crate::record::Record;
use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// Per-source channel depth. Deep enough to ride out a render stall, small
/// enough to keep memory bounded when one tape bursts.
const CHANNEL_DEPTH: usize = 256;

/// An unbounded source fed by a listener thread.
///
/// `next_record` blocks until a line is available or the source is cancelled
/// through its [`LiveHandle`]; it never synthesizes `EndOfStream` while the
/// upstream pipe is open.
pub struct LiveSource {
    name: String,
    records: Receiver<Result<Record, SourceError>>,
    cancel: Receiver<()>,
    done: bool,
    stopped: Arc<AtomicBool>,
}

/// Cancellation handle for one live source. Cheap to clone; cancelling kills
/// the child process (if any) so a listener blocked in a pipe read wakes up,
/// and wakes a merge thread blocked in `next_record` immediately.
#[derive(Clone)]
pub struct LiveHandle {
    stopped: Arc<AtomicBool>,
    cancel: Sender<()>,
    child: Arc<Mutex<Option<Child>>>,
}

impl LiveHandle {
    /// Cancel the source. Safe to call more than once.
    pub fn cancel(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(child) = self.child.lock().as_mut() {
            let _ = child.kill();
        }
        // Wake a blocked `next_record`. Send failure just means the source
        // already went away.
        let _ = self.cancel.try_send(());
    }
}

impl LiveSource {
    /// Spawn `sh -c <command>` and follow its stdout as a tape.
    pub fn spawn_command(
        command: &str,
        policy: MalformedLinePolicy,
    ) -> Result<(Self, LiveHandle), SourceError> {
        let name = command.to_string();
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|error| SourceError::Spawn {
                source_name: name.clone(),
                error,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| SourceError::Spawn {
            source_name: name.clone(),
            error: std::io::Error::other("child has no stdout"),
        })?;

        let (source, handle) =
            Self::from_reader(name, BufReader::new(stdout), policy);
        *handle.child.lock() = Some(child);
        Ok((source, handle))
    }

    /// Wrap any blocking reader in a listener thread.
    pub fn from_reader<R>(
        name: impl Into<String>,
        reader: R,
        policy: MalformedLinePolicy,
    ) -> (Self, LiveHandle)
    where
        R: BufRead + Send + 'static,
    {
        let name = name.into();
        let (record_tx, record_rx) = bounded(CHANNEL_DEPTH);
        let (cancel_tx, cancel_rx) = bounded(1);
        let stopped = Arc::new(AtomicBool::new(false));

        let handle = LiveHandle {
            stopped: Arc::clone(&stopped),
            cancel: cancel_tx,
            child: Arc::new(Mutex::new(None)),
        };

        let listener_name = name.clone();
        let listener_stop = Arc::clone(&stopped);
        thread::Builder::new()
            .name(format!("tape-listener:{listener_name}"))
            .spawn(move || {
                listen(&listener_name, reader, policy, &record_tx, &listener_stop);
            })
            .ok();

        let source = Self {
            name,
            records: record_rx,
            cancel: cancel_rx,
            done: false,
            stopped,
        };
        (source, handle)
    }
}

fn listen<R: BufRead>(
    name: &str,
    reader: R,
    policy: MalformedLinePolicy,
    tx: &Sender<Result<Record, SourceError>>,
    stopped: &AtomicBool,
) {
    debug!(source = name, "listener started");
    let mut line_number = 0u64;

    for line in reader.lines() {
        if stopped.load(Ordering::SeqCst) {
            break;
        }
        let line = match line {
            Ok(line) => line,
            Err(error) => {
                let _ = tx.send(Err(SourceError::Io {
                    source_name: name.to_string(),
                    error,
                }));
                break;
            }
        };
        line_number += 1;

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<Record>(trimmed) {
            Ok(record) => {
                if tx.send(Ok(record)).is_err() {
                    // Merge side hung up.
                    break;
                }
            }
            Err(error) => match policy {
                MalformedLinePolicy::Skip => {
                    warn!(
                        source = name,
                        line_number,
                        %error,
                        "skipping malformed line"
                    );
                }
                MalformedLinePolicy::Halt => {
                    let _ = tx.send(Err(SourceError::Decode {
                        source_name: name.to_string(),
                        line_number,
                        line: trimmed.to_string(),
                        error,
                    }));
                    break;
                }
            },
        }
    }
    debug!(source = name, "listener stopped");
}

impl RecordSource for LiveSource {
    fn next_record(&mut self) -> Result<SourceItem, SourceError> {
        if self.done {
            return Ok(SourceItem::EndOfStream);
        }

        enum Woke {
            Message(Result<Record, SourceError>),
            Disconnected,
            Cancelled,
        }

        let woke = crossbeam::select! {
            recv(self.records) -> msg => match msg {
                Ok(result) => Woke::Message(result),
                Err(_) => Woke::Disconnected,
            },
            recv(self.cancel) -> _ => Woke::Cancelled,
        };

        match woke {
            Woke::Message(Ok(record)) => Ok(SourceItem::Record(record)),
            Woke::Message(Err(error)) => {
                self.done = true;
                Err(error)
            }
            Woke::Disconnected => {
                // Listener gone: either cancelled or the pipe itself closed
                // (child exited). Terminal either way.
                self.done = true;
                if !self.stopped.load(Ordering::SeqCst) {
                    warn!(source = %self.name, "live source ended");
                }
                Ok(SourceItem::EndOfStream)
            }
            Woke::Cancelled => {
                self.done = true;
                debug!(source = %self.name, "source cancelled");
                Ok(SourceItem::EndOfStream)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_live(&self) -> bool {
        true
    }
}
