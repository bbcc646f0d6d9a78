//! MySQL/MariaDB driver on top of the sqlx pool.
//!
//! Parameterless statements go over the text protocol, the way the
//! MariaDB connector sends them, so transaction control statements
//! (`START TRANSACTION`, `SET autocommit=0`) are never prepared.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Number, Value};
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlPoolOptions, MySqlRow};
use sqlx::pool::PoolConnection;
use sqlx::query::Query as SqlxQuery;
use sqlx::{Column, Executor, MySql, Row as _, TypeInfo, ValueRef};
use tracing::{debug, info, warn};

use crate::config::ConnectOptions;
use crate::driver::{Connection, Driver, Pool};
use crate::error::Result;
use crate::events::ConnectionLog;
use crate::statement::{PreparedStatement, QueryOutput, Row, StatementKind, WriteResult};

/// sqlx-backed driver
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDriver;

/// Pool created by [`MySqlDriver`]
pub struct MySqlPool {
    pool: sqlx::MySqlPool,
    log: ConnectionLog,
    max_connections: u32,
    next_id: AtomicU64,
}

/// A connection checked out of a [`MySqlPool`]
pub struct MySqlConnection {
    id: u64,
    conn: PoolConnection<MySql>,
}

fn connect_options(options: &ConnectOptions) -> MySqlConnectOptions {
    let mut connect = MySqlConnectOptions::new()
        .host(&options.host)
        .port(options.port)
        .username(&options.user);

    if let Some(password) = &options.password {
        connect = connect.password(password);
    }
    if let Some(database) = &options.database {
        connect = connect.database(database);
    }
    connect
}

#[async_trait]
impl Driver for MySqlDriver {
    type Pool = MySqlPool;

    async fn create_pool(&self, options: &ConnectOptions, log_connections: bool) -> Result<MySqlPool> {
        options.validate()?;

        let mut pool_options = MySqlPoolOptions::new()
            .max_connections(options.connection_limit)
            .acquire_timeout(options.acquire_timeout());

        if log_connections {
            // Acquire and release lines come from `MySqlPool`, which sees
            // fresh and reused connections alike.
            pool_options = pool_options.after_connect(|_conn, meta| {
                Box::pin(async move {
                    debug!(age = ?meta.age, "[MYSQL] Connection opened");
                    Ok(())
                })
            });
        }

        let pool = pool_options.connect_with(connect_options(options)).await?;

        info!(
            host = %options.host,
            port = options.port,
            max_connections = options.connection_limit,
            "[MYSQL] Created MySQL connection pool"
        );

        Ok(MySqlPool {
            pool,
            log: ConnectionLog::new(log_connections),
            max_connections: options.connection_limit,
            next_id: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl Pool for MySqlPool {
    type Connection = MySqlConnection;

    async fn execute(&self, stmt: &PreparedStatement) -> Result<QueryOutput> {
        let mut conn = self.acquire().await?;
        let output = conn.execute(stmt).await;
        self.release(conn);
        output
    }

    async fn acquire(&self) -> Result<MySqlConnection> {
        self.log.before_acquire(
            self.pool.num_idle(),
            self.pool.size() as usize,
            self.max_connections as usize,
        );
        let conn = self.pool.acquire().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.log.acquired(id);
        Ok(MySqlConnection { id, conn })
    }

    fn release(&self, conn: MySqlConnection) {
        self.log.released(conn.id);
        // Dropping a PoolConnection hands it back to the pool.
        drop(conn.conn);
    }

    fn discard(&self, conn: MySqlConnection) {
        let raw = conn.conn.detach();
        warn!(connection = conn.id, "[MYSQL] Discarding connection");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = sqlx::Connection::close(raw).await {
                        debug!("closing discarded connection failed: {}", e);
                    }
                });
            }
            Err(_) => drop(raw),
        }
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("[MYSQL] Closed MySQL connection pool");
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    fn id(&self) -> u64 {
        self.id
    }

    async fn execute(&mut self, stmt: &PreparedStatement) -> Result<QueryOutput> {
        run(&mut *self.conn, stmt).await
    }
}

async fn run<'c, E>(executor: E, stmt: &PreparedStatement) -> Result<QueryOutput>
where
    E: Executor<'c, Database = MySql>,
{
    match stmt.kind {
        StatementKind::Read => {
            let rows = if stmt.values.is_empty() {
                executor.fetch_all(stmt.sql.as_str()).await?
            } else {
                bind_values(sqlx::query(&stmt.sql), &stmt.values)
                    .fetch_all(executor)
                    .await?
            };

            rows.iter()
                .map(convert_row)
                .collect::<Result<Vec<_>>>()
                .map(QueryOutput::Rows)
        }
        StatementKind::Write => {
            let done = if stmt.values.is_empty() {
                executor.execute(stmt.sql.as_str()).await?
            } else {
                bind_values(sqlx::query(&stmt.sql), &stmt.values)
                    .execute(executor)
                    .await?
            };

            // sqlx does not surface the OK packet's warning count.
            Ok(QueryOutput::Write(WriteResult {
                affected_rows: done.rows_affected(),
                insert_id: done.last_insert_id(),
                warning_status: 0,
            }))
        }
    }
}

fn bind_values<'q>(
    mut query: SqlxQuery<'q, MySql, MySqlArguments>,
    values: &'q [Value],
) -> SqlxQuery<'q, MySql, MySqlArguments> {
    for value in values {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    query.bind(i)
                } else if let Some(u) = n.as_u64() {
                    query.bind(u)
                } else {
                    query.bind(n.as_f64())
                }
            }
            Value::String(s) => query.bind(s.as_str()),
            // Arrays and objects go over as JSON documents
            other => query.bind(sqlx::types::Json(other)),
        };
    }
    query
}

fn convert_row(row: &MySqlRow) -> Result<Row> {
    let mut out = Row::new();
    for column in row.columns() {
        let value = decode_column(row, column.ordinal(), column.type_info().name())?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn decode_column(row: &MySqlRow, index: usize, type_name: &str) -> Result<Value> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Value::Null);
    }

    let value = match type_name {
        "BOOLEAN" => Value::Bool(row.try_get::<bool, _>(index)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            Value::from(row.try_get::<i64, _>(index)?)
        }
        name if name.ends_with("UNSIGNED") => Value::from(row.try_get::<u64, _>(index)?),
        "YEAR" => Value::from(row.try_get_unchecked::<u16, _>(index)?),
        "FLOAT" => float(f64::from(row.try_get::<f32, _>(index)?)),
        "DOUBLE" => float(row.try_get::<f64, _>(index)?),
        // Exact decimals stay textual so no precision is lost
        "DECIMAL" => Value::String(row.try_get_unchecked::<String, _>(index)?),
        "DATE" => Value::String(row.try_get::<NaiveDate, _>(index)?.to_string()),
        "DATETIME" => Value::String(
            row.try_get::<NaiveDateTime, _>(index)?
                .format("%Y-%m-%d %H:%M:%S%.f")
                .to_string(),
        ),
        "TIMESTAMP" => Value::String(row.try_get::<DateTime<Utc>, _>(index)?.to_rfc3339()),
        "TIME" => Value::String(row.try_get::<NaiveTime, _>(index)?.to_string()),
        "JSON" => row.try_get::<Value, _>(index)?,
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => {
            bytes(row.try_get::<Vec<u8>, _>(index)?)
        }
        _ => match row.try_get::<String, _>(index) {
            Ok(s) => Value::String(s),
            Err(_) => bytes(row.try_get_unchecked::<Vec<u8>, _>(index)?),
        },
    };
    Ok(value)
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

// Binary columns often hold text (information_schema, binary collations);
// anything else is base64.
fn bytes(raw: Vec<u8>) -> Value {
    match String::from_utf8(raw) {
        Ok(s) => Value::String(s),
        Err(e) => Value::String(base64::engine::general_purpose::STANDARD.encode(e.into_bytes())),
    }
}
