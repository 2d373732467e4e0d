//! Dump chat state from Antigravity's `state.vscdb`.
//!
//! Usage:
//! ```text
//! agstate [--prefix chat.] [--table ItemTable] [DATABASE]
//! ```

use std::path::PathBuf;

use antigravity_capture::config::Settings;
use antigravity_capture::inspect::inspect;
use antigravity_capture::logging::init_tracing;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "agstate", version)]
#[command(about = "Inspect the Antigravity state database (read-only)")]
struct Cli {
    /// Database file; defaults to the global Antigravity state.vscdb
    database: Option<PathBuf>,

    /// TOML settings file
    #[arg(long, env = "AGCAPTURE_CONFIG")]
    config: Option<PathBuf>,

    /// Table holding the key/value rows
    #[arg(long)]
    table: Option<String>,

    /// Key prefix to dump
    #[arg(long)]
    prefix: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        println!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    let _log_guard = init_tracing(&settings.logging, cli.verbose);

    let mut config = settings.inspect;
    if let Some(database) = cli.database {
        config.database = database;
    }
    if let Some(table) = cli.table {
        config.table = table;
    }
    if let Some(prefix) = cli.prefix {
        config.key_prefix = prefix;
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    inspect(&config, &mut out)?;
    Ok(())
}
