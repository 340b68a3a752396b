use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use psptrace::{trace_command, TraceArgs};
use psptrace_core::config::ViewOptions;
use tracing_subscriber::EnvFilter;

/// Flash access chronology for PSP boot captures.
///
/// This CLI is a thin wrapper around `psptrace-core` (exposed in code as
/// `psptrace_core`). The first run over a capture parses it and stores a
/// cache next to it; later runs over the same file load that cache.
#[derive(Parser, Debug)]
#[command(
    name = "psptrace",
    version,
    about = "Read an SPI capture of a logic analyzer and a ROM file resembling the flash contents and display an access chronology",
    long_about = None
)]
struct Cli {
    /// CSV export of the SPI capture.
    csvfile: PathBuf,

    /// ROM file of the SPI flash contents, or a JSON/YAML layout manifest.
    romfile: PathBuf,

    /// Aggregate consecutive accesses to the same firmware entry.
    #[arg(short = 'o', long = "overview-mode", default_value_t = false)]
    overview_mode: bool,

    /// Hide duplicate accesses (e.g. caused by multiple PSPs).
    #[arg(short = 'n', long, default_value_t = false)]
    no_duplicates: bool,

    /// Collapse consecutive reads of the same entry type; inexact merges are marked with `~`.
    #[arg(short = 'c', long, default_value_t = false)]
    collapse: bool,

    /// Rebase displayed timestamps on the first access.
    #[arg(short = 't', long, default_value_t = false)]
    normalize_timestamps: bool,

    /// Limit the processed rows to a maximum of LIMIT_ROWS.
    #[arg(short = 'l', long, value_name = "LIMIT_ROWS")]
    limit_rows: Option<usize>,

    /// Show timing columns and debug logging.
    #[arg(short = 'v', long, default_value_t = false)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let args = TraceArgs {
        csvfile: cli.csvfile,
        romfile: cli.romfile,
        options: ViewOptions {
            overview: cli.overview_mode,
            collapse: cli.collapse,
            no_duplicates: cli.no_duplicates,
            normalize_timestamps: cli.normalize_timestamps,
            limit: cli.limit_rows,
        },
        verbose: cli.verbose,
    };
    trace_command(&args)
}
