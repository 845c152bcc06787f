#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `gva`: query the Gun Violence Archive from the command line.
//!
//! Runs one search through the archive's export workflow and prints the
//! incidents, joined with their map coordinates, as CSV on stdout. Logs and
//! the progress bar go to stderr (via [`gva_cli_utils::init_logger`]), so
//! the output can be piped straight into a file.

mod query;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "gva", about = "Gun Violence Archive client")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[allow(clippy::large_enum_variant)]
#[derive(Subcommand)]
enum Commands {
    /// Queries the Gun Violence Archive and prints matching incidents as CSV
    Query(query::QueryArgs),
    /// Print the version of the client CLI
    Version {
        /// Use shortened output for version information
        #[arg(short, long)]
        short: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let multi = gva_cli_utils::init_logger(cli.verbose);

    match cli.command {
        Commands::Query(args) => {
            if let Err(e) = query::run(&args, &multi).await {
                log::error!("Query failed: {e}");
                return Err(e.into());
            }
        }
        Commands::Version { short } => {
            if short {
                println!("{}", env!("CARGO_PKG_VERSION"));
            } else {
                let version = serde_json::json!({
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                });
                println!("{version}");
            }
        }
    }

    Ok(())
}
