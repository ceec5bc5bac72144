use std::path::PathBuf;

mod commands;
mod logger;

use clap::{Parser, Subcommand};

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "paramz-console")]
#[command(about = "Inspect paramz schemas, overrides and merges")]
struct Cli {
    /// Output structured JSON logs
    #[arg(long, global = true)]
    json_logs: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse a schema and report its size and fingerprint
    Check {
        schema: PathBuf,
        /// Overrides file applied while parsing
        #[arg(long)]
        overrides: Option<PathBuf>,
    },
    /// List every key with its kind, access, default and range
    Keys {
        schema: PathBuf,
        #[arg(long)]
        overrides: Option<PathBuf>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Re-emit a schema in canonical form
    Canonical { schema: PathBuf },
    /// Merge one store per schema and show the surviving keys
    Merge {
        #[arg(required = true, num_args = 1..)]
        schemas: Vec<PathBuf>,
    },
}

fn main() -> CliResult {
    let cli = Cli::parse();

    logger::init_logger(cli.json_logs, cli.debug);

    match cli.command {
        Command::Check { schema, overrides } => commands::check(&schema, overrides.as_deref()),
        Command::Keys {
            schema,
            overrides,
            json,
        } => commands::keys(&schema, overrides.as_deref(), json),
        Command::Canonical { schema } => commands::canonical(&schema),
        Command::Merge { schemas } => commands::merge(&schemas),
    }
    .inspect_err(|e| tracing::error!("{}", e))
}
