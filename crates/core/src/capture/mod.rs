//! Capture parsing.
//!
//! Reads the delimited text export of a logic analyzer and yields access
//! records in file order. Metadata lines before the header are skipped; a data
//! row that fails to decode is reported as [`CaptureError::MalformedRecord`]
//! and parsing carries on with the next row.

pub mod decoder;
pub mod instructions;
pub mod row;

use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::AccessRecord;
use decoder::{Decoder, Emitter};
pub use row::{CaptureFormat, Sample};

/// Error type for capture parsing.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The capture file does not exist.
    #[error("Capture file not found: {0}")]
    NotFound(PathBuf),

    /// Reading the capture failed.
    #[error("Failed to read capture {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// No known header line was found.
    #[error("No recognised capture header in {0}")]
    UnrecognizedFormat(PathBuf),

    /// A single data row could not be decoded. Recoverable: the row is skipped.
    #[error("Malformed record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },
}

impl CaptureError {
    /// Whether parsing can continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CaptureError::MalformedRecord { .. })
    }
}

/// Counters collected while decoding a capture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseStats {
    /// Data rows seen after the header (including malformed ones).
    pub rows: u64,
    /// Rows skipped as malformed.
    pub malformed_rows: u64,
    /// Bytes that did not start a known instruction.
    pub invalid_opcodes: u64,
    /// Known instructions that do not produce access records, by name.
    pub other_instructions: BTreeMap<String, u64>,
    /// Commands cut off by the end of the capture.
    pub truncated_commands: u64,
}

/// Entry point for parsing one capture file.
#[derive(Debug, Clone)]
pub struct CaptureParser {
    path: PathBuf,
}

impl CaptureParser {
    /// Create a parser for `path`, failing early if the file is missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(CaptureError::NotFound(path));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start a fresh pass over the file. Each call restarts from the beginning.
    pub fn records(&self) -> Result<Records<BufReader<File>>, CaptureError> {
        let file = File::open(&self.path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => CaptureError::NotFound(self.path.clone()),
            _ => CaptureError::Io { path: self.path.clone(), source },
        })?;
        Records::new(BufReader::new(file), self.path.clone())
    }
}

/// Parse a capture from any buffered reader.
pub fn parse_reader<R: BufRead>(reader: R) -> Result<Records<R>, CaptureError> {
    Records::new(reader, PathBuf::from("<reader>"))
}

/// Lazy sequence of decoded records.
///
/// Yields `Err(CaptureError::MalformedRecord)` for rows that fail to decode
/// and keeps going; any other error ends the sequence.
pub struct Records<R> {
    lines: Lines<R>,
    path: PathBuf,
    line_no: usize,
    format: CaptureFormat,
    decoder: Decoder,
    emitter: Emitter,
    errors: VecDeque<CaptureError>,
    stats: ParseStats,
    /// Time of the last sample handed to the decoder.
    last_time: Option<f64>,
    /// Newest valid sample and its line, held until the next row confirms it.
    held: Option<(usize, Sample)>,
    limit: Option<usize>,
    yielded: usize,
    finished: bool,
}

impl<R: BufRead> Records<R> {
    fn new(reader: R, path: PathBuf) -> Result<Self, CaptureError> {
        let mut lines = reader.lines();
        let mut line_no = 0;

        let format = loop {
            let Some(line) = lines.next() else {
                return Err(CaptureError::UnrecognizedFormat(path));
            };
            let line = line.map_err(|source| CaptureError::Io { path: path.clone(), source })?;
            line_no += 1;
            match CaptureFormat::detect(&line) {
                Some(format) => break format,
                None => debug!(line = line_no, "skipping metadata line before capture header"),
            }
        };
        debug!(?format, header_line = line_no, "detected capture format");

        Ok(Self {
            lines,
            path,
            line_no,
            format,
            decoder: Decoder::new(format),
            emitter: Emitter::default(),
            errors: VecDeque::new(),
            stats: ParseStats::default(),
            last_time: None,
            held: None,
            limit: None,
            yielded: 0,
            finished: false,
        })
    }

    /// Stop after the first `limit` records.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn format(&self) -> CaptureFormat {
        self.format
    }

    /// Counters so far; complete once the iterator is exhausted.
    pub fn stats(&self) -> &ParseStats {
        &self.stats
    }

    /// Consume one more line into the decoder. Returns `false` at end of input.
    fn pump(&mut self) -> Result<bool, CaptureError> {
        let Some(line) = self.lines.next() else {
            if let Some((_, sample)) = self.held.take() {
                self.deliver(sample);
            }
            self.decoder.finish(&mut self.emitter, &mut self.stats);
            return Ok(false);
        };
        let line = line.map_err(|source| CaptureError::Io { path: self.path.clone(), source })?;
        self.line_no += 1;
        if line.trim().is_empty() {
            return Ok(true);
        }
        self.stats.rows += 1;

        match row::decode_row(self.format, &line) {
            Ok(sample) => self.sequence(sample),
            Err(reason) => self.reject(self.line_no, reason),
        }
        Ok(true)
    }

    /// Order check with one row of lookahead. A row that steps back behind
    /// the held row, but not behind the last delivered one, marks the held
    /// row as a timestamp jumping ahead; otherwise the new row is rejected.
    fn sequence(&mut self, sample: Sample) {
        let time = sample.time();
        if let Some(last) = self.last_time.filter(|last| time < *last) {
            self.reject(self.line_no, format!("timestamp {time} precedes previous row ({last})"));
            return;
        }
        match self.held.take() {
            Some((line, held)) if time < held.time() => {
                self.reject(
                    line,
                    format!("timestamp {} out of sequence (next row at {time})", held.time()),
                );
            }
            Some((_, held)) => self.deliver(held),
            None => {}
        }
        self.held = Some((self.line_no, sample));
    }

    fn deliver(&mut self, sample: Sample) {
        self.last_time = Some(sample.time());
        self.decoder.feed(sample, &mut self.emitter, &mut self.stats);
    }

    fn reject(&mut self, line: usize, reason: String) {
        self.stats.malformed_rows += 1;
        self.errors.push_back(CaptureError::MalformedRecord { line, reason });
    }
}

impl<R: BufRead> Iterator for Records<R> {
    type Item = Result<AccessRecord, CaptureError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.limit.is_some_and(|limit| self.yielded >= limit) {
            return None;
        }
        loop {
            if let Some(err) = self.errors.pop_front() {
                return Some(Err(err));
            }
            if let Some(record) = self.emitter.ready.pop_front() {
                self.yielded += 1;
                return Some(Ok(record));
            }
            if self.finished {
                return None;
            }
            match self.pump() {
                Ok(true) => {}
                Ok(false) => self.finished = true,
                Err(err) => {
                    warn!(error = %err, "aborting capture parse");
                    self.finished = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
