//! One-off statement execution
//!
//! Command: query

use anyhow::{Context, Result};
use clap::Parser;
use mariapool_core::{Identifiers, Query, StatementKind};
use serde_json::Value;
use tracing::debug;

use super::{connect, print_json};
use crate::config::ConnectionArgs;

#[derive(Parser, Debug)]
pub struct QueryArgs {
    /// SQL statement; `%d`/`%t` (or `%d0`, `%t1`, ...) become quoted identifiers
    pub sql: String,

    /// Bound value for the next `?` (JSON; anything else is sent as a string)
    #[arg(short = 'p', long = "param", value_name = "JSON")]
    pub params: Vec<String>,

    /// Database name for `%d`; repeat for `%d0`, `%d1`, ...
    #[arg(short = 'd', long = "database", value_name = "NAME")]
    pub databases: Vec<String>,

    /// Table name for `%t`; repeat for `%t0`, `%t1`, ...
    #[arg(short = 't', long = "table", value_name = "NAME")]
    pub tables: Vec<String>,

    /// Treat the statement as returning rows
    #[arg(long, conflicts_with = "write")]
    pub read: bool,

    /// Treat the statement as returning write metadata
    #[arg(long)]
    pub write: bool,
}

impl QueryArgs {
    pub fn to_query(&self) -> Query {
        let mut query = Query::new(self.sql.as_str())
            .values(self.params.iter().map(|p| parse_param(p)));

        if let Some(databases) = identifiers(&self.databases) {
            query = query.database(databases);
        }
        if let Some(tables) = identifiers(&self.tables) {
            query = query.table(tables);
        }
        if self.read {
            query = query.kind(StatementKind::Read);
        } else if self.write {
            query = query.kind(StatementKind::Write);
        }
        query
    }
}

pub async fn run_query(args: QueryArgs, conn: &ConnectionArgs) -> Result<()> {
    let query = args.to_query();
    debug!(params = query.values.len(), "running statement");

    let client = connect(conn).await?;
    let result = client.query(query).await;
    client.close().await;

    let output = result.context("query failed")?;
    print_json(&output)
}

/// One name selects the plain form, several the indexed form
fn identifiers(names: &[String]) -> Option<Identifiers> {
    match names {
        [] => None,
        [name] => Some(Identifiers::from(name.as_str())),
        many => Some(Identifiers::from(many.to_vec())),
    }
}

fn parse_param(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
