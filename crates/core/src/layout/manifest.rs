//! Layout read from a JSON or YAML manifest.
//!
//! A manifest is either a list of entries or a table with an `entries` list:
//!
//! ```yaml
//! entries:
//!   - { start: "0x20000", size: 64, type: Firmware Entry Table }
//!   - { start: "0x77000", size: 4096, type: PSP_FW_BOOT_LOADER, info: L2, source: 0 }
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;

use super::{LayoutError, LayoutProvider};
use crate::model::FirmwareEntry;

/// Serialization flavour of a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Json,
    Yaml,
}

/// Provider reading entries from a manifest file.
#[derive(Debug, Clone, Copy)]
pub struct ManifestLayout {
    format: ManifestFormat,
}

impl ManifestLayout {
    pub fn new(format: ManifestFormat) -> Self {
        Self { format }
    }

    /// Manifest provider for `path` if its extension names a manifest format.
    pub fn for_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Self::new(ManifestFormat::Json)),
            "yaml" | "yml" => Some(Self::new(ManifestFormat::Yaml)),
            _ => None,
        }
    }

    pub fn format(&self) -> ManifestFormat {
        self.format
    }

    /// Parse manifest text without touching the filesystem.
    pub fn parse(&self, text: &str, path: &Path) -> Result<Vec<FirmwareEntry>, LayoutError> {
        let manifest: Manifest = match self.format {
            ManifestFormat::Json => serde_json::from_str(text)
                .map_err(|err| LayoutError::unavailable(path, format!("invalid JSON manifest: {err}")))?,
            ManifestFormat::Yaml => serde_yaml::from_str(text)
                .map_err(|err| LayoutError::unavailable(path, format!("invalid YAML manifest: {err}")))?,
        };
        let raw = match manifest {
            Manifest::List(entries) | Manifest::Table { entries } => entries,
        };

        raw.into_iter()
            .enumerate()
            .map(|(idx, entry)| entry.into_entry().map_err(|reason| {
                LayoutError::unavailable(path, format!("entry {idx}: {reason}"))
            }))
            .collect()
    }
}

impl LayoutProvider for ManifestLayout {
    fn name(&self) -> &'static str {
        "manifest"
    }

    fn entries(&self, rom: &Path) -> Result<Vec<FirmwareEntry>, LayoutError> {
        let text = fs::read_to_string(rom).map_err(|err| LayoutError::io(rom, err))?;
        self.parse(&text, rom)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Manifest {
    List(Vec<ManifestEntry>),
    Table { entries: Vec<ManifestEntry> },
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    start: Offset,
    size: Offset,
    #[serde(rename = "type")]
    type_tag: String,
    #[serde(default)]
    info: Option<String>,
    #[serde(default)]
    source: Option<u32>,
}

impl ManifestEntry {
    fn into_entry(self) -> Result<FirmwareEntry, String> {
        let start = self.start.value("start")?;
        let size = self.size.value("size")?;
        if self.type_tag.trim().is_empty() {
            return Err("empty type".to_string());
        }
        Ok(FirmwareEntry {
            start,
            size,
            type_tag: self.type_tag,
            info_tag: self.info.filter(|info| !info.is_empty()),
            source_id: self.source,
        })
    }
}

/// Integer written either as a number or as a (hex) string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Offset {
    Number(u64),
    Text(String),
}

impl Offset {
    fn value(&self, field: &str) -> Result<u32, String> {
        let wide = match self {
            Offset::Number(value) => *value,
            Offset::Text(text) => {
                let text = text.trim();
                let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                    Some(hex) => u64::from_str_radix(hex, 16),
                    None => text.parse::<u64>(),
                };
                parsed.map_err(|err| format!("invalid {field} {text:?}: {err}"))?
            }
        };
        u32::try_from(wide).map_err(|_| format!("{field} 0x{wide:x} exceeds the 32-bit address space"))
    }
}
