//! Connectivity check
//!
//! Command: ping

use anyhow::{Context, Result};
use mariapool_core::Query;

use super::connect;
use crate::config::ConnectionArgs;

pub async fn run_ping(conn: &ConnectionArgs) -> Result<()> {
    let client = connect(conn).await?;

    let result = client.query(Query::new("SELECT 1")).await;
    client.close().await;
    result.context("SELECT 1 failed")?;

    println!("ok");
    Ok(())
}
