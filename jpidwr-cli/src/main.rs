//! jpidwr CLI - manage the local jp-idwr-db data cache.

mod commands;
mod error;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use console::style;

use commands::data::DataCommands;
use error::CliError;

/// Versioned, checksum-verified cache of Japanese infectious disease tables
#[derive(Debug, Parser)]
#[command(name = "jpidwr", version, about)]
struct Cli {
    /// Cache root directory (overrides JPINFECT_CACHE_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Release server base URL (overrides JPINFECT_DATA_BASE_URL)
    #[arg(long, global = true, value_name = "URL")]
    base_url: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download, inspect and remove cached data releases
    Data {
        #[command(subcommand)]
        command: DataCommands,
    },
}

fn main() {
    let cli = Cli::parse();
    jpidwr::logging::init_logging(cli.verbose);

    let global = commands::GlobalArgs {
        cache_dir: cli.cache_dir,
        base_url: cli.base_url,
    };

    let result: Result<(), CliError> = match cli.command {
        Commands::Data { command } => commands::data::run(command, &global),
    };

    if let Err(e) = result {
        eprintln!("{} {}", style("error:").red().bold(), e);
        process::exit(e.exit_code());
    }
}
