//! On-disk cache of parsed captures.
//!
//! Parsing a multi-million row export dominates run time, so the complete
//! record sequence is persisted after the first parse and reused while the
//! capture file is unchanged.
//!
//! The cache file holds three consecutive MessagePack values:
//! - a preamble (`magic`, `format_version`) that stays stable across versions,
//! - a header with the capture identity, format, record count, and parse stats,
//! - the records.

pub mod identity;
pub mod storage;

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::capture::{CaptureError, CaptureFormat, CaptureParser, ParseStats};
use crate::model::AccessRecord;
pub use identity::CaptureIdentity;
pub use storage::{CacheStorage, FileStorage};

/// Magic string at the start of every cache file.
pub const CACHE_MAGIC: &str = "PSPTRACE";

/// Cache layout version this crate reads and writes.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Malformed rows reported individually before switching to a summary.
const MALFORMED_WARN_LIMIT: u64 = 10;

/// Error type for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache was written by an incompatible engine version.
    #[error("Cache format version {found} is not supported (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },

    /// The cache could not be decoded.
    #[error("Cache is corrupt: {0}")]
    Corrupt(String),

    /// Persisting the cache failed.
    #[error("Failed to write cache {location}: {source}")]
    WriteFailed {
        location: String,
        #[source]
        source: io::Error,
    },

    /// Reading the cache failed for a reason other than its contents.
    #[error("Failed to read cache {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: io::Error,
    },
}

/// Where a parsed capture came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    /// Decoded from a valid cache without touching the capture parser.
    Hit,
    /// Parsed from the capture file.
    Built,
}

/// Fully parsed capture.
#[derive(Debug, Clone)]
pub struct ParsedCapture {
    pub records: Vec<AccessRecord>,
    pub format: CaptureFormat,
    pub stats: ParseStats,
    pub source: CacheSource,
}

#[derive(Debug, Serialize, Deserialize)]
struct Preamble {
    magic: String,
    format_version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheHeader {
    identity: CaptureIdentity,
    format: CaptureFormat,
    record_count: u64,
    stats: ParseStats,
}

/// Cache for one capture file, bound to that file's identity.
#[derive(Debug)]
pub struct CaptureCache<S = FileStorage> {
    storage: S,
    identity: CaptureIdentity,
}

impl CaptureCache<FileStorage> {
    /// File-backed cache stored at the capture path with `suffix` appended.
    pub fn for_capture(capture: &Path, suffix: &str) -> Result<Self, CaptureError> {
        let identity = CaptureIdentity::of_file(capture).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => CaptureError::NotFound(capture.to_path_buf()),
            _ => CaptureError::Io { path: capture.to_path_buf(), source },
        })?;
        Ok(Self::new(FileStorage::for_capture(capture, suffix), identity))
    }
}

impl<S: CacheStorage> CaptureCache<S> {
    pub fn new(storage: S, identity: CaptureIdentity) -> Self {
        Self { storage, identity }
    }

    pub fn identity(&self) -> &CaptureIdentity {
        &self.identity
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Decode the stored cache. `Ok(None)` means nothing reusable is stored
    /// (no cache, or a cache for a different version of the capture).
    pub fn load(&self) -> Result<Option<ParsedCapture>, CacheError> {
        let location = self.storage.describe();
        let reader = match self.storage.open() {
            Ok(Some(reader)) => reader,
            Ok(None) => return Ok(None),
            Err(source) => return Err(CacheError::Io { location, source }),
        };
        let mut de = rmp_serde::Deserializer::new(reader);

        let preamble = Preamble::deserialize(&mut de)
            .map_err(|err| CacheError::Corrupt(format!("unreadable preamble: {err}")))?;
        if preamble.magic != CACHE_MAGIC {
            return Err(CacheError::Corrupt(format!("unexpected magic {:?}", preamble.magic)));
        }
        if preamble.format_version != CACHE_FORMAT_VERSION {
            return Err(CacheError::VersionMismatch {
                found: preamble.format_version,
                expected: CACHE_FORMAT_VERSION,
            });
        }

        let header = CacheHeader::deserialize(&mut de)
            .map_err(|err| CacheError::Corrupt(format!("unreadable header: {err}")))?;
        if header.identity != self.identity {
            debug!(cache = %location, "cache was built from a different capture");
            return Ok(None);
        }

        let records = Vec::<AccessRecord>::deserialize(&mut de)
            .map_err(|err| CacheError::Corrupt(format!("unreadable records: {err}")))?;
        if records.len() as u64 != header.record_count {
            return Err(CacheError::Corrupt(format!(
                "expected {} records, found {}",
                header.record_count,
                records.len()
            )));
        }

        Ok(Some(ParsedCapture {
            records,
            format: header.format,
            stats: header.stats,
            source: CacheSource::Hit,
        }))
    }

    /// Persist `capture` atomically.
    pub fn store(&self, capture: &ParsedCapture) -> Result<(), CacheError> {
        let preamble =
            Preamble { magic: CACHE_MAGIC.to_string(), format_version: CACHE_FORMAT_VERSION };
        let header = CacheHeader {
            identity: self.identity.clone(),
            format: capture.format,
            record_count: capture.records.len() as u64,
            stats: capture.stats.clone(),
        };

        self.storage
            .commit(&mut |writer| {
                let mut ser = rmp_serde::Serializer::new(writer);
                preamble.serialize(&mut ser).map_err(encode_error)?;
                header.serialize(&mut ser).map_err(encode_error)?;
                capture.records.serialize(&mut ser).map_err(encode_error)?;
                Ok(())
            })
            .map_err(|source| CacheError::WriteFailed { location: self.storage.describe(), source })
    }

    /// Return the parsed capture, from the cache when it is valid, otherwise by
    /// parsing the capture and writing a fresh cache.
    ///
    /// Cache problems never fail the call: incompatible or corrupt caches are
    /// discarded and rebuilt, write failures leave the run without a cache.
    pub fn load_or_build(&self, parser: &CaptureParser) -> Result<ParsedCapture, CaptureError> {
        let location = self.storage.describe();
        match self.load() {
            Ok(Some(capture)) => {
                info!(cache = %location, records = capture.records.len(), "loaded capture from cache");
                return Ok(capture);
            }
            Ok(None) => info!(cache = %location, "no reusable cache; parsing capture"),
            Err(err @ (CacheError::VersionMismatch { .. } | CacheError::Corrupt(_))) => {
                warn!(cache = %location, error = %err, "discarding cache and re-parsing capture");
                if let Err(discard) = self.storage.discard() {
                    warn!(cache = %location, error = %discard, "failed to remove stale cache");
                }
            }
            Err(err) => warn!(cache = %location, error = %err, "cache unreadable; re-parsing capture"),
        }

        let capture = parse_all(parser)?;
        match self.store(&capture) {
            Ok(()) => info!(cache = %location, records = capture.records.len(), "stored capture cache"),
            Err(err) => warn!(error = %err, "continuing without a reusable cache"),
        }
        Ok(capture)
    }
}

fn encode_error(err: rmp_serde::encode::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

/// Parse the whole capture, skipping malformed rows with a warning.
pub fn parse_all(parser: &CaptureParser) -> Result<ParsedCapture, CaptureError> {
    let mut records_iter = parser.records()?;
    let format = records_iter.format();
    let mut records = Vec::new();

    #[allow(clippy::while_let_on_iterator)]
    while let Some(item) = records_iter.next() {
        match item {
            Ok(record) => records.push(record),
            Err(err) if err.is_recoverable() => {
                let skipped = records_iter.stats().malformed_rows;
                if skipped <= MALFORMED_WARN_LIMIT {
                    warn!(error = %err, "skipping capture row");
                } else {
                    debug!(error = %err, "skipping capture row");
                }
            }
            Err(err) => return Err(err),
        }
    }

    let stats = records_iter.stats().clone();
    if stats.malformed_rows > MALFORMED_WARN_LIMIT {
        warn!(skipped = stats.malformed_rows, "malformed capture rows skipped in total");
    }
    info!(
        rows = stats.rows,
        records = records.len(),
        invalid_opcodes = stats.invalid_opcodes,
        "parsed capture {}",
        parser.path().display()
    );
    for (name, count) in &stats.other_instructions {
        debug!(instruction = %name, count, "instructions without an access record");
    }

    Ok(ParsedCapture { records, format, stats, source: CacheSource::Built })
}
