//! Firmware layout of the flash image and the address index built from it.
//!
//! A [`LayoutProvider`] turns a ROM file into a flat list of
//! [`FirmwareEntry`] values; [`LayoutIndex`] answers "which entries contain
//! this address" for every access in the capture.

pub mod entry_types;
pub mod manifest;
pub mod psp;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::model::{EntryId, EntryRef, FirmwareEntry};
pub use manifest::ManifestLayout;
pub use psp::PspImageLayout;

/// Error type for layout loading.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// The ROM file does not exist.
    #[error("ROM file not found: {0}")]
    RomNotFound(PathBuf),

    /// Reading the ROM file failed.
    #[error("Failed to read ROM {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// No layout could be derived from the ROM file.
    #[error("No firmware layout available for {path}: {reason}")]
    Unavailable { path: PathBuf, reason: String },
}

impl LayoutError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => LayoutError::RomNotFound(path.to_path_buf()),
            _ => LayoutError::Io { path: path.to_path_buf(), source },
        }
    }

    pub(crate) fn unavailable(path: &Path, reason: impl Into<String>) -> Self {
        LayoutError::Unavailable { path: path.to_path_buf(), reason: reason.into() }
    }
}

/// Source of firmware entries for a ROM file.
pub trait LayoutProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn entries(&self, rom: &Path) -> Result<Vec<FirmwareEntry>, LayoutError>;
}

/// Pick the provider for `rom`: manifests by extension, raw images otherwise.
pub fn provider_for(rom: &Path) -> Box<dyn LayoutProvider> {
    match ManifestLayout::for_path(rom) {
        Some(manifest) => Box::new(manifest),
        None => Box::new(PspImageLayout::default()),
    }
}

/// Load the entries of `rom` with the matching provider and index them.
pub fn load_index(rom: &Path) -> Result<LayoutIndex, LayoutError> {
    if !rom.is_file() {
        return Err(LayoutError::RomNotFound(rom.to_path_buf()));
    }
    let provider = provider_for(rom);
    let entries = provider.entries(rom)?;
    info!(provider = provider.name(), entries = entries.len(), "loaded firmware layout");
    Ok(LayoutIndex::build(entries))
}

/// Immutable interval index over firmware entries.
///
/// Entries are sorted by start. A max-end segment tree over that order lets a
/// query skip every run of entries that ends at or before the address, so a
/// single wide entry early in the flash does not make later lookups linear.
#[derive(Debug, Clone, Default)]
pub struct LayoutIndex {
    /// Entries in layout order; positions are their [`EntryId`]s.
    entries: Vec<FirmwareEntry>,
    /// Entry positions sorted by `(start, position)`.
    order: Vec<usize>,
    starts: Vec<u32>,
    /// Implicit segment tree: node `1` is the root, leaves start at `width`.
    max_end: Vec<u64>,
    width: usize,
}

impl LayoutIndex {
    pub fn build(entries: Vec<FirmwareEntry>) -> Self {
        let mut order: Vec<usize> = (0..entries.len()).collect();
        order.sort_by_key(|&pos| (entries[pos].start, pos));

        let starts = order.iter().map(|&pos| entries[pos].start).collect();
        let width = order.len().next_power_of_two();
        let mut max_end = vec![0u64; 2 * width];
        for (sorted, &pos) in order.iter().enumerate() {
            max_end[width + sorted] = entries[pos].end();
        }
        for node in (1..width).rev() {
            max_end[node] = max_end[2 * node].max(max_end[2 * node + 1]);
        }

        debug!(entries = entries.len(), "built layout index");
        Self { entries, order, starts, max_end, width }
    }

    /// Every entry containing `address`, smallest first, ties in layout order.
    /// An empty result means the address lies in the Unknown area.
    ///
    /// Runs in `O((k + 1) log n)` for `k` hits among `n` entries.
    pub fn query(&self, address: u32) -> Vec<EntryRef<'_>> {
        let upper = self.starts.partition_point(|&start| start <= address);
        let reach = u64::from(address);
        let mut hits = Vec::new();
        if upper == 0 {
            return hits;
        }

        let mut pending = vec![(1usize, 0usize, self.width)];
        while let Some((node, lo, span)) = pending.pop() {
            if lo >= upper || self.max_end[node] <= reach {
                continue;
            }
            if span == 1 {
                let pos = self.order[lo];
                let entry = &self.entries[pos];
                if entry.contains(address) {
                    hits.push(EntryRef { id: entry_id(pos), entry });
                }
                continue;
            }
            let half = span / 2;
            pending.push((2 * node + 1, lo + half, half));
            pending.push((2 * node, lo, half));
        }
        hits.sort_by_key(|hit| (hit.size, hit.id));
        hits
    }

    pub fn entry(&self, id: EntryId) -> Option<EntryRef<'_>> {
        let pos = usize::try_from(id.0).ok()?;
        self.entries.get(pos).map(|entry| EntryRef { id, entry })
    }

    pub fn entries(&self) -> &[FirmwareEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn entry_id(pos: usize) -> EntryId {
    EntryId(u32::try_from(pos).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_reaches_wide_entry_past_short_entries() {
        let index = LayoutIndex::build(vec![
            FirmwareEntry::new(0x0, 0x1000, "outer"),
            FirmwareEntry::new(0x100, 0x10, "short"),
            FirmwareEntry::new(0x200, 0x10, "other"),
        ]);
        let found = index.query(0x800);
        let hits: Vec<&str> = found.iter().map(|e| e.type_tag.as_str()).collect();
        assert_eq!(hits, vec!["outer"]);
    }

    #[test]
    fn end_is_exclusive() {
        let index = LayoutIndex::build(vec![FirmwareEntry::new(0x10, 0x10, "a")]);
        assert_eq!(index.query(0x1f).len(), 1);
        assert!(index.query(0x20).is_empty());
        assert!(index.query(0x0f).is_empty());
    }

    #[test]
    fn provider_selection_follows_extension() {
        assert_eq!(provider_for(Path::new("layout.yaml")).name(), "manifest");
        assert_eq!(provider_for(Path::new("layout.JSON")).name(), "manifest");
        assert_eq!(provider_for(Path::new("bios.bin")).name(), "psp-image");
    }
}
