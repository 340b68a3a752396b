//! Library side of the `psptrace` binary: command implementations and report
//! rendering, kept out of `main.rs` so integration tests can call them.

pub mod commands;

pub use commands::*;
