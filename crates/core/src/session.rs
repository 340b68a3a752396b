//! End-to-end run over one capture and one ROM file.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::aggregate;
use crate::cache::{CacheError, CacheSource, CaptureCache, ParsedCapture};
use crate::capture::{CaptureError, CaptureParser};
use crate::config::{TraceConfig, ViewOptions};
use crate::layout::{self, LayoutError, LayoutIndex};
use crate::model::{AccessRecord, TraceRow};

/// Fatal errors of a trace run.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Capture file not found: {0}")]
    CaptureNotFound(PathBuf),

    #[error("ROM file not found: {0}")]
    RomNotFound(PathBuf),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Parsed capture plus layout index, ready to render any number of views.
#[derive(Debug)]
pub struct TraceSession {
    capture_path: PathBuf,
    config: TraceConfig,
    index: LayoutIndex,
    capture: ParsedCapture,
}

impl TraceSession {
    /// Check both inputs, build the layout index, then load the capture from
    /// its cache or parse it.
    pub fn open(csv: &Path, rom: &Path, config: TraceConfig) -> Result<Self, SessionError> {
        if !csv.is_file() {
            return Err(SessionError::CaptureNotFound(csv.to_path_buf()));
        }
        if !rom.is_file() {
            return Err(SessionError::RomNotFound(rom.to_path_buf()));
        }
        debug!(?config, "trace configuration");

        let index = layout::load_index(rom).map_err(|err| match err {
            LayoutError::RomNotFound(path) => SessionError::RomNotFound(path),
            other => SessionError::Layout(other),
        })?;

        let parser = CaptureParser::open(csv).map_err(not_found_capture)?;
        let cache = CaptureCache::for_capture(csv, &config.cache_suffix).map_err(not_found_capture)?;
        let capture = cache.load_or_build(&parser).map_err(not_found_capture)?;
        info!(
            records = capture.records.len(),
            entries = index.len(),
            cached = capture.source == CacheSource::Hit,
            "trace session ready"
        );

        Ok(Self { capture_path: csv.to_path_buf(), config, index, capture })
    }

    /// Assemble a session from parts already in memory.
    pub fn from_parts(capture: ParsedCapture, index: LayoutIndex, config: TraceConfig) -> Self {
        Self { capture_path: PathBuf::new(), config, index, capture }
    }

    pub fn capture_path(&self) -> &Path {
        &self.capture_path
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    pub fn index(&self) -> &LayoutIndex {
        &self.index
    }

    pub fn capture(&self) -> &ParsedCapture {
        &self.capture
    }

    /// Records considered by `options`, honouring the row limit.
    pub fn records(&self, options: &ViewOptions) -> &[AccessRecord] {
        let records = &self.capture.records;
        match options.limit {
            Some(limit) if limit < records.len() => &records[..limit],
            _ => records,
        }
    }

    /// Classify and aggregate the capture for one view.
    pub fn run(&self, options: &ViewOptions) -> Vec<TraceRow> {
        let records = self.records(options);
        debug!(?options, records = records.len(), "rendering trace view");
        aggregate::trace(records, &self.index, options, &self.config)
    }
}

fn not_found_capture(err: CaptureError) -> SessionError {
    match err {
        CaptureError::NotFound(path) => SessionError::CaptureNotFound(path),
        other => SessionError::Capture(other),
    }
}
