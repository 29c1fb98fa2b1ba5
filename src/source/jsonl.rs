//! Finite JSON-lines tape source.

use super::{RecordSource, SourceError, SourceItem};
use crate::record::Record;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A finite tape backed by any `BufRead`: one JSON record per line, blank
/// lines skipped.
///
/// A decode failure marks the source done so a later pull reports
/// `EndOfStream` instead of re-reading past the corrupt line; the merge as a
/// whole is expected to halt on the surfaced error anyway.
pub struct JsonLinesSource<R> {
    name: String,
    reader: R,
    line_number: u64,
    done: bool,
}

impl JsonLinesSource<BufReader<File>> {
    /// Open a tape file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let file = File::open(path).map_err(|error| SourceError::Io {
            source_name: name.clone(),
            error,
        })?;
        Ok(Self::new(name, BufReader::new(file)))
    }
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader,
            line_number: 0,
            done: false,
        }
    }
}

impl<R: BufRead + Send> RecordSource for JsonLinesSource<R> {
    fn next_record(&mut self) -> Result<SourceItem, SourceError> {
        if self.done {
            return Ok(SourceItem::EndOfStream);
        }

        let mut line = String::new();
        loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .map_err(|error| SourceError::Io {
                    source_name: self.name.clone(),
                    error,
                })?;

            if read == 0 {
                self.done = true;
                return Ok(SourceItem::EndOfStream);
            }
            self.line_number += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                // Blank line: skip, not end-of-stream.
                continue;
            }

            return match serde_json::from_str::<Record>(trimmed) {
                Ok(record) => Ok(SourceItem::Record(record)),
                Err(error) => {
                    self.done = true;
                    Err(SourceError::Decode {
                        source_name: self.name.clone(),
                        line_number: self.line_number,
                        line: trimmed.to_string(),
                        error,
                    })
                }
            };
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
