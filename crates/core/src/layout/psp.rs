//! Minimal walker for AMD PSP flash images.
//!
//! Finds the Firmware Entry Table in each 16 MiB half of the image and follows
//! its pointers through PSP, BIOS, and combo directories. Every directory and
//! every directory entry becomes one [`FirmwareEntry`]; the half an entry was
//! found in is its `source_id`.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use super::entry_types::{self, BIOS_L2_DIRECTORY, PSP_L2_DIRECTORY};
use super::{LayoutError, LayoutProvider};
use crate::model::FirmwareEntry;

/// Signature opening the Firmware Entry Table.
pub const FET_SIGNATURE: u32 = 0x55AA_55AA;

/// Offsets inside a 16 MiB half where the Firmware Entry Table may live.
pub const FET_OFFSETS: [usize; 6] = [0x02_0000, 0x82_0000, 0xC2_0000, 0xE2_0000, 0xF2_0000, 0xFA_0000];

pub const FET_SIZE: u32 = 0x40;

/// Size of one independently addressed ROM half.
pub const ROM_HALF_SIZE: usize = 0x100_0000;

/// Type tag of the Firmware Entry Table itself.
pub const FET_TYPE: &str = "Firmware Entry Table";

/// Pointers are memory mapped at the top of the 4 GiB space, so the flash
/// offset is the pointer reduced modulo the chip size (at most one half).
fn address_mask(image_len: usize) -> u64 {
    let window = image_len.clamp(1, ROM_HALF_SIZE).next_power_of_two();
    u64::try_from(window).map_or(u64::MAX, |window| window - 1)
}

/// Entries with this size carry an inline value instead of pointing at data.
const VALUE_ENTRY_SIZE: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectoryKind {
    Psp,
    Bios,
    Combo,
}

impl DirectoryKind {
    fn from_magic(magic: &[u8]) -> Option<Self> {
        match magic {
            b"$PSP" | b"$PL2" => Some(DirectoryKind::Psp),
            b"$BHD" | b"$BL2" => Some(DirectoryKind::Bios),
            b"2PSP" | b"2BHD" => Some(DirectoryKind::Combo),
            _ => None,
        }
    }

    fn header_len(self) -> usize {
        match self {
            DirectoryKind::Combo => 32,
            DirectoryKind::Psp | DirectoryKind::Bios => 16,
        }
    }

    fn entry_len(self) -> usize {
        match self {
            DirectoryKind::Bios => 24,
            DirectoryKind::Psp | DirectoryKind::Combo => 16,
        }
    }
}

/// Provider reading the directory structure of a raw flash image.
#[derive(Debug, Clone, Copy, Default)]
pub struct PspImageLayout;

impl PspImageLayout {
    /// Walk an in-memory image.
    pub fn parse(&self, image: &[u8], path: &Path) -> Result<Vec<FirmwareEntry>, LayoutError> {
        let mut entries = Vec::new();
        let mask = address_mask(image.len());
        for half in 0..image.len().div_ceil(ROM_HALF_SIZE) {
            let base = half * ROM_HALF_SIZE;
            let Some(fet) = find_fet(image, base) else {
                debug!(half, "no Firmware Entry Table in ROM half");
                continue;
            };
            let source = u32::try_from(half).unwrap_or(u32::MAX);
            let mut walker =
                Walker { image, base, mask, source, visited: HashSet::new(), entries: Vec::new() };
            walker.walk_fet(fet);
            debug!(half, fet = format_args!("0x{fet:x}"), entries = walker.entries.len(), "walked ROM half");
            entries.append(&mut walker.entries);
        }

        if entries.is_empty() {
            return Err(LayoutError::unavailable(path, "no Firmware Entry Table found"));
        }
        Ok(entries)
    }
}

impl LayoutProvider for PspImageLayout {
    fn name(&self) -> &'static str {
        "psp-image"
    }

    fn entries(&self, rom: &Path) -> Result<Vec<FirmwareEntry>, LayoutError> {
        let image = fs::read(rom).map_err(|err| LayoutError::io(rom, err))?;
        self.parse(&image, rom)
    }
}

fn find_fet(image: &[u8], base: usize) -> Option<usize> {
    FET_OFFSETS
        .iter()
        .map(|offset| base + offset)
        .find(|&pos| read_u32(image, pos) == Some(FET_SIGNATURE))
}

fn read_u32(image: &[u8], pos: usize) -> Option<u32> {
    let bytes = image.get(pos..pos.checked_add(4)?)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

fn read_u64(image: &[u8], pos: usize) -> Option<u64> {
    let bytes = image.get(pos..pos.checked_add(8)?)?;
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}

struct Walker<'a> {
    image: &'a [u8],
    base: usize,
    mask: u64,
    source: u32,
    visited: HashSet<usize>,
    entries: Vec<FirmwareEntry>,
}

impl Walker<'_> {
    fn walk_fet(&mut self, fet: usize) {
        self.push(fet, FET_SIZE, FET_TYPE.to_string(), None);
        for word in (4..FET_SIZE as usize).step_by(4) {
            let Some(pointer) = read_u32(self.image, fet + word) else { break };
            if pointer == 0 || pointer == u32::MAX {
                continue;
            }
            if let Some(target) = self.resolve(u64::from(pointer)) {
                self.walk_directory(target);
            }
        }
    }

    fn resolve(&self, location: u64) -> Option<usize> {
        let offset = usize::try_from(location & self.mask).ok()?;
        let address = self.base + offset;
        (address < self.image.len()).then_some(address)
    }

    fn walk_directory(&mut self, address: usize) {
        let Some(magic) = self.image.get(address..address + 4) else { return };
        let Some(kind) = DirectoryKind::from_magic(magic) else { return };
        if !self.visited.insert(address) {
            return;
        }
        let level2 = matches!(magic, b"$PL2" | b"$BL2");
        let magic = String::from_utf8_lossy(magic).into_owned();

        let Some(count) = read_u32(self.image, address + 8) else { return };
        let table_len = usize::try_from(count)
            .ok()
            .and_then(|count| count.checked_mul(kind.entry_len()))
            .and_then(|len| len.checked_add(kind.header_len()))
            .filter(|len| address + len <= self.image.len());
        let Some(table_len) = table_len else {
            warn!(directory = %magic, address = format_args!("0x{address:x}"), count, "directory exceeds ROM; skipping");
            return;
        };
        let Ok(table_size) = u32::try_from(table_len) else { return };
        self.push(address, table_size, format!("Directory: {magic}"), None);

        for idx in 0..count as usize {
            let at = address + kind.header_len() + idx * kind.entry_len();
            match kind {
                DirectoryKind::Combo => {
                    if let Some(target) = read_u64(self.image, at + 8).and_then(|loc| self.resolve(loc)) {
                        self.walk_directory(target);
                    }
                }
                DirectoryKind::Psp | DirectoryKind::Bios => self.walk_entry(kind, at, level2),
            }
        }
    }

    fn walk_entry(&mut self, kind: DirectoryKind, at: usize, level2: bool) {
        let (Some(&type_byte), Some(size), Some(location)) =
            (self.image.get(at), read_u32(self.image, at + 4), read_u64(self.image, at + 8))
        else {
            return;
        };
        if size == VALUE_ENTRY_SIZE || size == 0 {
            return;
        }
        let Some(target) = self.resolve(location) else { return };

        let (l2_pointer, name) = match kind {
            DirectoryKind::Bios => {
                (type_byte == BIOS_L2_DIRECTORY, entry_types::bios_entry_name(type_byte))
            }
            _ => (type_byte == PSP_L2_DIRECTORY, entry_types::psp_entry_name(type_byte)),
        };
        if l2_pointer {
            self.walk_directory(target);
            return;
        }
        self.push(target, size, name, level2.then(|| "L2".to_string()));
    }

    fn push(&mut self, address: usize, size: u32, type_tag: String, info_tag: Option<String>) {
        let Ok(start) = u32::try_from(address) else { return };
        self.entries.push(FirmwareEntry {
            start,
            size,
            type_tag,
            info_tag,
            source_id: Some(self.source),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_without_fet_is_unavailable() {
        let image = vec![0xFFu8; 0x30000];
        let err = PspImageLayout.parse(&image, Path::new("rom.bin")).unwrap_err();
        assert!(matches!(err, LayoutError::Unavailable { .. }));
    }

    #[test]
    fn fet_alone_yields_its_own_entry() {
        let mut image = vec![0xFFu8; 0x30000];
        image[0x20000..0x20004].copy_from_slice(&FET_SIGNATURE.to_le_bytes());
        let entries = PspImageLayout.parse(&image, Path::new("rom.bin")).expect("parse");
        assert_eq!(entries, vec![FirmwareEntry::new(0x20000, 0x40, FET_TYPE).with_source(0)]);
    }

    #[test]
    fn truncated_directory_is_skipped() {
        let mut image = vec![0xFFu8; 0x30000];
        image[0x20000..0x20004].copy_from_slice(&FET_SIGNATURE.to_le_bytes());
        image[0x20004..0x20008].copy_from_slice(&0x2F000u32.to_le_bytes());
        image[0x2F000..0x2F004].copy_from_slice(b"$PSP");
        image[0x2F008..0x2F00C].copy_from_slice(&0x1000u32.to_le_bytes());
        let entries = PspImageLayout.parse(&image, Path::new("rom.bin")).expect("parse");
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn address_mask_follows_chip_size() {
        assert_eq!(address_mask(0x30000), 0x3FFFF);
        assert_eq!(address_mask(0x80_0000), 0x7F_FFFF);
        assert_eq!(address_mask(0x200_0000), 0xFF_FFFF);
    }
}
