#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use psptrace_core::model::{AccessRecord, Direction, FirmwareEntry};

pub const SPI_HEADER: &str = "Time [s],Packet ID,MOSI,MISO";
pub const QSPI_HEADER: &str = "Time [s],Value";

/// Seconds between two bytes on the bus in generated captures.
pub const BYTE_TIME_S: f64 = 1e-8;

pub fn write_file(dir: &Path, name: &str, contents: impl AsRef<[u8]>) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write fixture");
    path
}

/// One `Read Data` transaction as SPI export rows, starting at `start_us`.
pub fn spi_read_rows(start_us: f64, address: u32, len: u32) -> Vec<String> {
    let mut bytes = vec![(0x03u8, 0xFFu8)];
    bytes.extend(address.to_be_bytes()[1..].iter().map(|b| (*b, 0xFF)));
    bytes.extend((0..len).map(|i| (0x00, (i & 0xFF) as u8)));
    spi_rows(start_us, &bytes)
}

/// SPI export rows for raw `(mosi, miso)` byte pairs.
pub fn spi_rows(start_us: f64, bytes: &[(u8, u8)]) -> Vec<String> {
    bytes
        .iter()
        .enumerate()
        .map(|(i, (mosi, miso))| {
            let time = start_us / 1e6 + i as f64 * BYTE_TIME_S;
            format!("{time:.9},{i},0x{mosi:02X},0x{miso:02X}")
        })
        .collect()
}

/// A complete SPI export of `reads` given as `(start_us, address, len)`.
pub fn spi_capture(reads: &[(f64, u32, u32)]) -> String {
    let mut lines = vec![SPI_HEADER.to_string()];
    for (start_us, address, len) in reads {
        lines.extend(spi_read_rows(*start_us, *address, *len));
    }
    lines.join("\n") + "\n"
}

/// A complete Quad-SPI export of quad reads given as `(start_us, address, len)`.
pub fn qspi_capture(reads: &[(f64, u32, u32)]) -> String {
    let mut lines = vec![QSPI_HEADER.to_string()];
    for (start_us, address, len) in reads {
        // The first value after the address is the mode/dummy value, counted as data.
        let mut values = vec![0xEBu32, *address];
        values.extend((0..*len).map(|i| (i + 0x10) & 0xFF));
        for (i, value) in values.iter().enumerate() {
            let time = start_us / 1e6 + i as f64 * BYTE_TIME_S;
            lines.push(format!("{time:.9},0x{value:X}"));
        }
    }
    lines.join("\n") + "\n"
}

/// Access record built directly, `len` bytes long at one byte per [`BYTE_TIME_S`].
pub fn read(seq: u64, start_us: f64, address: u32, len: u32) -> AccessRecord {
    let timestamp = start_us / 1e6;
    AccessRecord {
        sequence_index: seq,
        timestamp,
        end_timestamp: timestamp + f64::from(len) * BYTE_TIME_S,
        address,
        length: len,
        direction: Direction::Read,
        opcode: 0x03,
        raw_payload: Vec::new(),
    }
}

/// Layout of the boot scenario: the Firmware Entry Table plus two `$PSP`
/// directory copies from different ROM halves mapped at the same address.
pub fn scenario_layout() -> Vec<FirmwareEntry> {
    vec![
        FirmwareEntry::new(0x020000, 0x40, "Firmware Entry Table"),
        FirmwareEntry::new(0x077000, 0x400, "Directory: $PSP").with_source(0),
        FirmwareEntry::new(0x077000, 0x400, "Directory: $PSP").with_source(1),
    ]
}

/// Little endian image builder for PSP flash fixtures.
pub struct RomBuilder {
    image: Vec<u8>,
}

impl RomBuilder {
    pub fn new(size: usize) -> Self {
        Self { image: vec![0xFF; size] }
    }

    pub fn put(&mut self, at: usize, bytes: &[u8]) -> &mut Self {
        self.image[at..at + bytes.len()].copy_from_slice(bytes);
        self
    }

    pub fn fet(&mut self, at: usize, pointers: &[u32]) -> &mut Self {
        self.put(at, &0x55AA_55AAu32.to_le_bytes());
        for (i, pointer) in pointers.iter().enumerate() {
            self.put(at + 4 + i * 4, &pointer.to_le_bytes());
        }
        self
    }

    fn dir_header(&mut self, at: usize, magic: &[u8; 4], count: usize) {
        self.put(at, magic);
        self.put(at + 4, &0u32.to_le_bytes());
        self.put(at + 8, &(count as u32).to_le_bytes());
        self.put(at + 12, &0u32.to_le_bytes());
    }

    /// `$PSP`/`$PL2` directory with `(type, size, location)` entries.
    pub fn psp_dir(&mut self, at: usize, magic: &[u8; 4], entries: &[(u8, u32, u64)]) -> &mut Self {
        self.dir_header(at, magic, entries.len());
        for (i, (kind, size, location)) in entries.iter().enumerate() {
            let base = at + 16 + i * 16;
            self.put(base, &[*kind, 0, 0, 0]);
            self.put(base + 4, &size.to_le_bytes());
            self.put(base + 8, &location.to_le_bytes());
        }
        self
    }

    /// `$BHD`/`$BL2` directory with `(type, size, location)` entries.
    pub fn bios_dir(&mut self, at: usize, magic: &[u8; 4], entries: &[(u8, u32, u64)]) -> &mut Self {
        self.dir_header(at, magic, entries.len());
        for (i, (kind, size, location)) in entries.iter().enumerate() {
            let base = at + 16 + i * 24;
            self.put(base, &[*kind, 0, 0, 0]);
            self.put(base + 4, &size.to_le_bytes());
            self.put(base + 8, &location.to_le_bytes());
            self.put(base + 16, &u64::MAX.to_le_bytes());
        }
        self
    }

    /// `2PSP`/`2BHD` combo directory pointing at `targets`.
    pub fn combo_dir(&mut self, at: usize, magic: &[u8; 4], targets: &[u64]) -> &mut Self {
        self.dir_header(at, magic, targets.len());
        self.put(at + 16, &[0u8; 16]);
        for (i, target) in targets.iter().enumerate() {
            let base = at + 32 + i * 16;
            self.put(base, &0u32.to_le_bytes());
            self.put(base + 4, &(i as u32).to_le_bytes());
            self.put(base + 8, &target.to_le_bytes());
        }
        self
    }

    pub fn build(&self) -> Vec<u8> {
        self.image.clone()
    }
}

/// Single-half image with a `$PSP` directory (including a level 2 directory)
/// and a `$BHD` directory.
pub fn psp_image() -> Vec<u8> {
    let mut rom = RomBuilder::new(0x10_0000);
    rom.fet(0x20000, &[0xFF07_7000, 0x0008_8000])
        .psp_dir(
            0x77000,
            b"$PSP",
            &[
                (0x00, 0x240, 0x77400),
                (0x01, 0x8000, 0x78000),
                (0x0B, 0xFFFF_FFFF, 0x1),
                (0x40, 0x1000, 0x90000),
            ],
        )
        .psp_dir(0x90000, b"$PL2", &[(0x02, 0x4000, 0x91000)])
        .bios_dir(0x88000, b"$BHD", &[(0x62, 0x2000, 0x89000)]);
    rom.build()
}
