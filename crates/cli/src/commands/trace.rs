use std::path::PathBuf;

use anyhow::{Context, Result};
use psptrace_core::config::{TraceConfig, ViewOptions};
use psptrace_core::session::TraceSession;
use tracing::debug;

use crate::commands::{render_trace, write_stdout};

/// Inputs of one trace run.
#[derive(Debug, Clone)]
pub struct TraceArgs {
    pub csvfile: PathBuf,
    pub romfile: PathBuf,
    pub options: ViewOptions,
    /// Include timing columns in the table.
    pub verbose: bool,
}

/// Correlate the capture with the ROM layout and print the access table.
pub fn trace_command(args: &TraceArgs) -> Result<()> {
    let table = trace_table(args)?;
    write_stdout(&table)
}

/// Render the access table for `args` without printing it.
pub fn trace_table(args: &TraceArgs) -> Result<String> {
    let session = TraceSession::open(&args.csvfile, &args.romfile, TraceConfig::default())
        .with_context(|| {
            format!(
                "Failed to correlate {} with {}",
                args.csvfile.display(),
                args.romfile.display()
            )
        })?;

    let rows = session.run(&args.options);
    debug!(rows = rows.len(), "aggregated trace rows");
    Ok(render_trace(&rows, &args.options, args.verbose))
}
