//! Transaction decoders turning per-row samples into access records.
//!
//! The exports carry no chip-select information, so transaction boundaries are
//! inferred: an SPI command ends when the next byte on MOSI is a known opcode,
//! a Quad-SPI read ends when the next read opcode followed by an address shows up.

use std::collections::VecDeque;

use tracing::debug;

use super::instructions::{self, Instruction, QSPI_READ_OPCODES};
use super::row::{CaptureFormat, Sample};
use super::ParseStats;
use crate::model::{AccessRecord, Direction};

/// Receives finished records and hands out sequence indices.
#[derive(Debug, Default)]
pub(crate) struct Emitter {
    next_index: u64,
    pub(crate) ready: VecDeque<AccessRecord>,
}

impl Emitter {
    #[allow(clippy::too_many_arguments)]
    fn emit(
        &mut self,
        timestamp: f64,
        end_timestamp: f64,
        address: u32,
        length: u32,
        direction: Direction,
        opcode: u8,
        raw_payload: Vec<u8>,
    ) {
        let record = AccessRecord {
            sequence_index: self.next_index,
            timestamp,
            end_timestamp,
            address,
            length,
            direction,
            opcode,
            raw_payload,
        };
        self.next_index += 1;
        self.ready.push_back(record);
    }
}

/// Format-specific decoding state.
#[derive(Debug)]
pub(crate) enum Decoder {
    Spi(SpiDecoder),
    QuadSpi(QspiDecoder),
}

impl Decoder {
    pub(crate) fn new(format: CaptureFormat) -> Self {
        match format {
            CaptureFormat::Spi { .. } => Decoder::Spi(SpiDecoder::default()),
            CaptureFormat::QuadSpi => Decoder::QuadSpi(QspiDecoder::default()),
        }
    }

    pub(crate) fn feed(&mut self, sample: Sample, out: &mut Emitter, stats: &mut ParseStats) {
        match (self, sample) {
            (Decoder::Spi(decoder), Sample::Spi { time, mosi, miso }) => {
                decoder.feed(time, mosi, miso, out, stats)
            }
            (Decoder::QuadSpi(decoder), Sample::QuadSpi { time, value }) => {
                decoder.feed(time, value, out)
            }
            // Rows are decoded with the format the decoder was built for.
            _ => {}
        }
    }

    pub(crate) fn finish(&mut self, out: &mut Emitter, stats: &mut ParseStats) {
        match self {
            Decoder::Spi(decoder) => decoder.finish(out, stats),
            Decoder::QuadSpi(decoder) => decoder.finish(out),
        }
    }
}

#[derive(Debug)]
struct Command {
    insn: &'static Instruction,
    start: f64,
    end: f64,
    header: Vec<u8>,
    data_len: u32,
    payload: Vec<u8>,
}

impl Command {
    fn new(insn: &'static Instruction, time: f64) -> Self {
        Self {
            insn,
            start: time,
            end: time,
            header: vec![insn.opcode],
            data_len: 0,
            payload: Vec::new(),
        }
    }

    fn header_complete(&self) -> bool {
        self.header.len() >= self.insn.header_len
    }
}

#[derive(Debug, Default)]
enum SpiPhase {
    #[default]
    Idle,
    Header(Command),
    Data(Command),
}

/// Decoder for byte-per-row SPI exports.
#[derive(Debug, Default)]
pub(crate) struct SpiDecoder {
    phase: SpiPhase,
}

impl SpiDecoder {
    fn feed(
        &mut self,
        time: f64,
        mosi: u8,
        miso: Option<u8>,
        out: &mut Emitter,
        stats: &mut ParseStats,
    ) {
        match std::mem::take(&mut self.phase) {
            SpiPhase::Idle => self.start(time, mosi, out, stats),
            SpiPhase::Header(mut cmd) => {
                cmd.header.push(mosi);
                cmd.end = time;
                self.advance(cmd, out, stats);
            }
            SpiPhase::Data(mut cmd) => {
                // The first data byte is always consumed; after that a known
                // opcode marks the start of the next command.
                if cmd.data_len > 0 && instructions::is_opcode(mosi) {
                    finalize(cmd, out, stats);
                    self.start(time, mosi, out, stats);
                } else {
                    cmd.data_len += 1;
                    cmd.end = time;
                    if let Some(byte) = miso {
                        cmd.payload.push(byte);
                    }
                    self.phase = SpiPhase::Data(cmd);
                }
            }
        }
    }

    fn start(&mut self, time: f64, opcode: u8, out: &mut Emitter, stats: &mut ParseStats) {
        match instructions::lookup(opcode) {
            Some(insn) => self.advance(Command::new(insn, time), out, stats),
            None => {
                stats.invalid_opcodes += 1;
                self.phase = SpiPhase::Idle;
            }
        }
    }

    fn advance(&mut self, cmd: Command, out: &mut Emitter, stats: &mut ParseStats) {
        self.phase = if !cmd.header_complete() {
            SpiPhase::Header(cmd)
        } else if cmd.insn.expects_data {
            SpiPhase::Data(cmd)
        } else {
            finalize(cmd, out, stats);
            SpiPhase::Idle
        };
    }

    fn finish(&mut self, out: &mut Emitter, stats: &mut ParseStats) {
        match std::mem::take(&mut self.phase) {
            SpiPhase::Idle => {}
            SpiPhase::Header(cmd) => {
                debug!(
                    instruction = cmd.insn.name,
                    "capture ends inside an instruction header; dropping it"
                );
                stats.truncated_commands += 1;
            }
            SpiPhase::Data(cmd) => finalize(cmd, out, stats),
        }
    }
}

fn finalize(cmd: Command, out: &mut Emitter, stats: &mut ParseStats) {
    let Some(access) = cmd.insn.access else {
        *stats.other_instructions.entry(cmd.insn.name.to_string()).or_insert(0) += 1;
        return;
    };

    let address = cmd.header[1..=access.address_bytes]
        .iter()
        .fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte));
    out.emit(
        cmd.start,
        cmd.end,
        address,
        cmd.data_len,
        access.direction,
        cmd.insn.opcode,
        cmd.payload,
    );
}

#[derive(Debug)]
struct QspiRead {
    opcode: u8,
    start: f64,
    end: f64,
    address: u32,
    data_len: u32,
    payload: Vec<u8>,
}

/// Decoder for value-per-row Quad-SPI exports.
#[derive(Debug, Default)]
pub(crate) struct QspiDecoder {
    open: Option<QspiRead>,
    candidate: Option<(f64, u8)>,
    /// The value right after an address is a mode/dummy value, never an opcode.
    after_address: bool,
}

impl QspiDecoder {
    fn feed(&mut self, time: f64, value: u32, out: &mut Emitter) {
        if let Some((opcode_time, opcode)) = self.candidate.take() {
            if value > 0xFF {
                self.close(out);
                self.open = Some(QspiRead {
                    opcode,
                    start: opcode_time,
                    end: time,
                    address: value,
                    data_len: 0,
                    payload: Vec::new(),
                });
                self.after_address = true;
                return;
            }
            // Not followed by an address: the opcode-looking value was data.
            self.data(opcode_time, u32::from(opcode));
        }

        if self.after_address {
            self.after_address = false;
            self.data(time, value);
            return;
        }

        match u8::try_from(value) {
            Ok(byte) if QSPI_READ_OPCODES.contains(&byte) => self.candidate = Some((time, byte)),
            _ => self.data(time, value),
        }
    }

    fn data(&mut self, time: f64, value: u32) {
        if let Some(read) = self.open.as_mut() {
            read.data_len += 1;
            read.end = time;
            if let Ok(byte) = u8::try_from(value) {
                read.payload.push(byte);
            }
        }
    }

    fn close(&mut self, out: &mut Emitter) {
        if let Some(read) = self.open.take() {
            out.emit(
                read.start,
                read.end,
                read.address,
                read.data_len,
                Direction::Read,
                read.opcode,
                read.payload,
            );
        }
    }

    fn finish(&mut self, out: &mut Emitter) {
        if let Some((time, opcode)) = self.candidate.take() {
            self.data(time, u32::from(opcode));
        }
        self.after_address = false;
        self.close(out);
    }
}
