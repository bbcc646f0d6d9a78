//! mariapool CLI - pooled MySQL/MariaDB access from the shell
//!
//! - `ping`: check that a pool can be opened and answers `SELECT 1`
//! - `query`: run one statement with bound values and `%d`/`%t` identifiers
//! - `run`: run a file of statements in a single transaction

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod ui;

use config::ConnectionArgs;

#[derive(Parser, Debug)]
#[command(
    name = "mariapool",
    author,
    version,
    about = "Run statements against a pooled MySQL/MariaDB connection",
    long_about = "Run statements against a pooled MySQL/MariaDB connection. Connection \
                  settings come from flags, DATABASE_* environment variables, .env files \
                  or a TOML file passed with --config."
)]
struct Cli {
    /// Suppress spinners and progress bars (for script consumption)
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect and run SELECT 1
    Ping,
    /// Run one statement and print rows or write metadata as JSON
    Query(commands::query::QueryArgs),
    /// Run a file of statements in one transaction, rolling back on failure
    Run(commands::run::RunArgs),
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|err| anyhow!(err))
}

#[tokio::main]
async fn main() -> Result<()> {
    // First, so RUST_LOG and clap's env fallbacks see .env values
    let dotenv_files = config::load_dotenv();
    init_tracing().ok();
    config::report_dotenv(&dotenv_files);
    let cli = Cli::parse();

    ui::init_quiet_mode(cli.quiet);

    match cli.command {
        Commands::Ping => commands::run_ping(&cli.connection).await?,
        Commands::Query(args) => commands::run_query(args, &cli.connection).await?,
        Commands::Run(args) => commands::run_script(args, &cli.connection).await?,
    }
    Ok(())
}
