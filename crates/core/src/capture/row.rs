//! Strict schema decoding of single export rows.

use serde::{Deserialize, Serialize};

/// Column layout of a capture export, detected from its header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureFormat {
    /// Standard SPI analyzer export: `Time [s],Packet ID,MOSI[,MISO]`, one byte per row.
    Spi { has_miso: bool },
    /// Quad-SPI analyzer export: `Time [s],Value`, one bus value per row.
    QuadSpi,
}

impl CaptureFormat {
    /// Match a header line against the known export layouts.
    pub fn detect(line: &str) -> Option<Self> {
        let fields: Vec<&str> = split_fields(line).collect();
        match fields.as_slice() {
            ["Time [s]", "Packet ID", "MOSI", "MISO"] => Some(CaptureFormat::Spi { has_miso: true }),
            ["Time [s]", "Packet ID", "MOSI"] => Some(CaptureFormat::Spi { has_miso: false }),
            ["Time [s]", "Value"] => Some(CaptureFormat::QuadSpi),
            _ => None,
        }
    }

    fn column_count(self) -> usize {
        match self {
            CaptureFormat::Spi { has_miso: true } => 4,
            CaptureFormat::Spi { has_miso: false } => 3,
            CaptureFormat::QuadSpi => 2,
        }
    }
}

/// One decoded data row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    Spi { time: f64, mosi: u8, miso: Option<u8> },
    QuadSpi { time: f64, value: u32 },
}

impl Sample {
    pub fn time(&self) -> f64 {
        match *self {
            Sample::Spi { time, .. } | Sample::QuadSpi { time, .. } => time,
        }
    }
}

/// Split a comma separated line, trimming whitespace and surrounding quotes.
pub(crate) fn split_fields(line: &str) -> impl Iterator<Item = &str> {
    line.split(',').map(|field| field.trim().trim_matches('"').trim())
}

/// Decode one row according to `format`. The error string describes the
/// offending field.
pub fn decode_row(format: CaptureFormat, line: &str) -> Result<Sample, String> {
    let fields: Vec<&str> = split_fields(line).collect();
    if fields.len() != format.column_count() {
        return Err(format!("expected {} fields, found {}", format.column_count(), fields.len()));
    }

    let time = parse_time(fields[0])?;
    match format {
        CaptureFormat::Spi { has_miso } => {
            if !fields[1].is_empty() {
                fields[1]
                    .parse::<u64>()
                    .map_err(|_| format!("invalid packet id {:?}", fields[1]))?;
            }
            let mosi = parse_byte("MOSI", fields[2])?;
            let miso = if has_miso && !fields[3].is_empty() {
                Some(parse_byte("MISO", fields[3])?)
            } else {
                None
            };
            Ok(Sample::Spi { time, mosi, miso })
        }
        CaptureFormat::QuadSpi => {
            let value = parse_hex("Value", fields[1])?;
            Ok(Sample::QuadSpi { time, value })
        }
    }
}

fn parse_time(field: &str) -> Result<f64, String> {
    match field.parse::<f64>() {
        Ok(time) if time.is_finite() => Ok(time),
        _ => Err(format!("invalid timestamp {field:?}")),
    }
}

fn parse_hex(column: &str, field: &str) -> Result<u32, String> {
    let digits = field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
        .unwrap_or(field);
    if digits.is_empty() {
        return Err(format!("empty {column} field"));
    }
    u32::from_str_radix(digits, 16).map_err(|_| format!("invalid {column} value {field:?}"))
}

fn parse_byte(column: &str, field: &str) -> Result<u8, String> {
    let value = parse_hex(column, field)?;
    u8::try_from(value).map_err(|_| format!("{column} value {field:?} does not fit in a byte"))
}
