//! Serial NOR flash instruction set (Winbond W25Q-compatible).

use crate::model::Direction;

/// How an instruction maps onto an access record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessKind {
    pub direction: Direction,
    /// Address bytes following the opcode (big endian).
    pub address_bytes: usize,
}

/// One entry of the instruction table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: u8,
    pub name: &'static str,
    /// Opcode plus positional bytes (address, mode, dummy) before any data.
    pub header_len: usize,
    pub expects_data: bool,
    pub access: Option<AccessKind>,
}

const fn plain(opcode: u8, name: &'static str, header_len: usize, expects_data: bool) -> Instruction {
    Instruction { opcode, name, header_len, expects_data, access: None }
}

const fn read(opcode: u8, name: &'static str, header_len: usize, address_bytes: usize) -> Instruction {
    Instruction {
        opcode,
        name,
        header_len,
        expects_data: true,
        access: Some(AccessKind { direction: Direction::Read, address_bytes }),
    }
}

const fn write(opcode: u8, name: &'static str) -> Instruction {
    Instruction {
        opcode,
        name,
        header_len: 4,
        expects_data: true,
        access: Some(AccessKind { direction: Direction::Write, address_bytes: 3 }),
    }
}

// From the W25Q128JV datasheet, rev. B.
static INSTRUCTIONS: &[Instruction] = &[
    plain(0x06, "Write Enable", 1, false),
    plain(0x50, "Volatile SR Write Enable", 1, false),
    plain(0x04, "Write Disable", 1, false),
    plain(0xAB, "Release Power-down / ID", 4, true),
    plain(0x90, "Manufacturer/Device ID", 4, true),
    plain(0x9F, "JEDEC ID", 1, true),
    plain(0x4B, "Read Unique ID", 5, true),
    read(0x03, "Read Data", 4, 3),
    read(0x0B, "Fast Read", 5, 3),
    read(0x13, "Read Data with 4-Byte Address", 5, 4),
    write(0x02, "Page Program"),
    plain(0x20, "Sector Erase (4KB)", 4, false),
    plain(0x52, "Block Erase (32KB)", 4, false),
    plain(0xD8, "Block Erase (64KB)", 4, false),
    plain(0xC7, "Chip Erase (0xC7)", 1, false),
    plain(0x60, "Chip Erase (0x60)", 1, false),
    plain(0x05, "Read Status Register-1", 1, true),
    plain(0x01, "Write Status Register-1", 1, true),
    plain(0x35, "Read Status Register-2", 1, true),
    plain(0x31, "Write Status Register-2", 1, true),
    plain(0x15, "Read Status Register-3", 1, true),
    plain(0x11, "Write Status Register-3", 1, true),
    plain(0x5A, "Read SFDP Register", 5, true),
    plain(0x44, "Erase Security Register", 4, false),
    plain(0x42, "Program Security Register", 6, false),
    plain(0x48, "Read Security Register", 5, true),
    plain(0x7E, "Global Block Lock", 1, false),
    plain(0x98, "Global Block Unlock", 1, false),
    plain(0x3D, "Read Block Lock", 4, true),
    plain(0x36, "Individual Block Lock", 4, false),
    plain(0x39, "Individual Block Unlock", 4, false),
    plain(0x75, "Erase / Program Suspend", 1, false),
    plain(0x7A, "Erase / Program Resume", 1, false),
    plain(0xB9, "Power-down", 1, false),
    plain(0x66, "Enable Reset", 1, false),
    plain(0x99, "Reset Device", 1, false),
    plain(0xEB, "Fast Read Quad I/O", 4, true),
    plain(0xE7, "Word Read Quad I/O", 4, true),
    plain(0xE3, "Octal Word Read Quad I/O", 4, true),
    plain(0x94, "Mftr./Device ID Quad I/O", 4, true),
];

/// Look up an opcode in the instruction table.
pub fn lookup(opcode: u8) -> Option<&'static Instruction> {
    INSTRUCTIONS.iter().find(|insn| insn.opcode == opcode)
}

/// Whether `byte` starts a known instruction.
pub fn is_opcode(byte: u8) -> bool {
    lookup(byte).is_some()
}

/// Read opcodes recognised in Quad-SPI value exports.
pub const QSPI_READ_OPCODES: [u8; 6] = [0x03, 0x0B, 0xEB, 0xE7, 0xE3, 0xEC];

/// Reads that move the address and data over four I/O lines.
pub fn is_quad_read(opcode: u8) -> bool {
    matches!(opcode, 0xEB | 0xE7 | 0xE3 | 0xEC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcodes_are_unique() {
        for (i, a) in INSTRUCTIONS.iter().enumerate() {
            for b in &INSTRUCTIONS[i + 1..] {
                assert_ne!(a.opcode, b.opcode, "{} and {} share an opcode", a.name, b.name);
            }
        }
    }

    #[test]
    fn data_filler_bytes_are_not_opcodes() {
        assert!(!is_opcode(0x00));
        assert!(!is_opcode(0xFF));
    }

    #[test]
    fn read_data_has_three_address_bytes() {
        let insn = lookup(0x03).expect("read data");
        assert_eq!(insn.access.map(|a| a.address_bytes), Some(3));
        assert_eq!(insn.header_len, 4);
    }
}
