use std::io::{self, Write};

use anyhow::{Context, Result};

/// Write `text` to stdout. A closed pipe (e.g. `| head`) ends output quietly.
pub fn write_stdout(text: &str) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    match handle.write_all(text.as_bytes()).and_then(|()| handle.flush()) {
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other.context("Failed to write trace to stdout"),
    }
}

/// Flash address as shown in tables, e.g. `0x020000`.
pub fn hex_address(address: u64) -> String {
    format!("0x{address:06x}")
}

/// Byte count as shown in tables, e.g. `0x1c`.
pub fn hex_size(size: u64) -> String {
    format!("0x{size:02x}")
}

/// Seconds rendered as whole nanoseconds.
pub fn nanoseconds(seconds: f64) -> String {
    format!("{}", (seconds * 1e9).round() as i64)
}
