//! Command implementations for the mariapool CLI

pub mod ping;
pub mod query;
pub mod run;

pub use ping::run_ping;
pub use query::run_query;
pub use run::run_script;

use anyhow::{Context, Result};
use mariapool_core::Client;
use serde::Serialize;

use crate::config::ConnectionArgs;
use crate::ui;

/// Resolve options and open the pool under a spinner
pub async fn connect(conn: &ConnectionArgs) -> Result<Client> {
    let options = conn.resolve()?;
    let target = format!("{}:{}", options.host, options.port);
    let client = Client::new(options).log_connections(conn.log_connections);

    ui::with_spinner(
        format!("Connecting to {}", target),
        format!("Connected to {}", target),
        client.connect(),
    )
    .await
    .with_context(|| format!("failed to connect to {}", target))?;

    Ok(client)
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
