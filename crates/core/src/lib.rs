//! psptrace-core
//!
//! Core library correlating logic-analyzer captures of a serial flash bus with
//! the firmware layout of the flash image that was being read.
//!
//! This crate defines the data model, the capture parser and its on-disk cache,
//! the address-range layout index, the correlator that classifies each access,
//! and the aggregator that turns classified accesses into report rows.
//!
//! All substantive logic lives here so it is fully testable and reusable from
//! multiple frontends; the `psptrace` CLI is a thin wrapper around it.

pub mod aggregate;
pub mod cache;
pub mod capture;
pub mod config;
pub mod correlate;
pub mod layout;
pub mod model;
pub mod session;

/// Returns the library version as encoded at compile time.
///
/// Useful for tests and for frontends to report consistent version info.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
