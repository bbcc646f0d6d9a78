//! Connection settings for the CLI
//!
//! Precedence, highest first: command-line flags, environment variables
//! (including `.env` files), the `--config` TOML file, built-in defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use mariapool_core::ConnectOptions;
use tracing::{debug, info};

#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Server host name or IP address
    #[arg(long, env = "DATABASE_IP", global = true)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, env = "DATABASE_PORT", global = true)]
    pub port: Option<u16>,

    /// User name
    #[arg(long, env = "DATABASE_USER", global = true)]
    pub user: Option<String>,

    /// Password
    #[arg(long, env = "DATABASE_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// Default schema for unqualified table names
    #[arg(long, env = "DATABASE_DATABASE", global = true)]
    pub schema: Option<String>,

    /// Maximum number of pooled connections
    #[arg(long, value_name = "N", global = true)]
    pub connection_limit: Option<u32>,

    /// TOML file with connection options (flags and env override it)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log pool acquire/release events
    #[arg(long, global = true)]
    pub log_connections: bool,
}

impl ConnectionArgs {
    /// Merge file, environment and flags into validated options
    pub fn resolve(&self) -> Result<ConnectOptions> {
        let mut options = match &self.config {
            Some(path) => ConnectOptions::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => ConnectOptions::default(),
        };

        if let Some(host) = &self.host {
            options.host = host.clone();
        }
        if let Some(port) = self.port {
            options.port = port;
        }
        if let Some(user) = &self.user {
            options.user = user.clone();
        }
        if let Some(password) = &self.password {
            options.password = Some(password.clone());
        }
        if let Some(schema) = &self.schema {
            options.database = Some(schema.clone());
        }
        if let Some(limit) = self.connection_limit {
            options.connection_limit = limit;
        }

        options.validate().context("invalid connection options")?;
        debug!(?options, "resolved connection options");
        Ok(options)
    }
}

/// Load `.env` from the current directory, then `~/.mariapool/.env`.
///
/// Variables already set in the environment are never overwritten. Runs
/// before tracing is set up (so `RUST_LOG` may come from a `.env`), hence
/// it returns the files it loaded for [`report_dotenv`] instead of logging.
pub fn load_dotenv() -> Vec<PathBuf> {
    let mut loaded_from = Vec::new();

    if let Ok(path) = dotenvy::dotenv() {
        loaded_from.push(path);
    }

    if let Some(env_file) = config_dir().map(|dir| dir.join(".env")) {
        if env_file.exists() && dotenvy::from_path(&env_file).is_ok() {
            loaded_from.push(env_file);
        }
    }

    loaded_from
}

pub fn report_dotenv(loaded_from: &[PathBuf]) {
    if loaded_from.is_empty() {
        debug!("No .env files found (current dir or ~/.mariapool)");
    } else {
        let paths: Vec<String> = loaded_from.iter().map(|p| p.display().to_string()).collect();
        info!("Loaded environment from: {}", paths.join(", "));
    }
}

/// `~/.mariapool`
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".mariapool"))
}
