//! Pooled database client with a pinnable transaction connection.
//!
//! # Lifecycle
//!
//! - `connect` builds the pool; `close` tears it down. Query methods fail
//!   with [`Error::NotConnected`] outside that window.
//! - `start` pins one connection and opens a transaction on it. Until
//!   `end`, `rollback` or `release`, every client-level query runs on that
//!   connection, one at a time. One client therefore carries at most one
//!   pinned transaction; use [`Client::transaction`] for concurrent ones.
//! - `start`, `end`, `rollback`, `release`, `close`, `get_connection` and
//!   `release_connection` are no-ops while disconnected, so cleanup paths
//!   can call them unconditionally.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::ConnectOptions;
use crate::driver::{Connection, Driver, Pool};
use crate::error::{Error, Result};
use crate::mysql::MySqlDriver;
use crate::statement::{
    DeleteResult, InsertResult, PreparedStatement, Query, QueryOutput, StatementKind, UpdateResult,
};
use crate::transaction::{self, Transaction, AUTOCOMMIT_ON, COMMIT, ROLLBACK};

/// Connection type handed out by a driver's pool
pub type PoolConnection<D> = <<D as Driver>::Pool as Pool>::Connection;

/// Pooled MySQL/MariaDB client
pub struct Client<D: Driver = MySqlDriver> {
    driver: D,
    options: ConnectOptions,
    log_connections: bool,
    pool: RwLock<Option<Arc<D::Pool>>>,
    pinned: Mutex<Option<PoolConnection<D>>>,
}

impl Client<MySqlDriver> {
    pub fn new(options: ConnectOptions) -> Self {
        Self::with_driver(MySqlDriver, options)
    }
}

impl<D: Driver> Client<D> {
    pub fn with_driver(driver: D, options: ConnectOptions) -> Self {
        Self {
            driver,
            options,
            log_connections: false,
            pool: RwLock::new(None),
            pinned: Mutex::new(None),
        }
    }

    /// Log pool acquire/release/slot-wait events
    pub fn log_connections(mut self, enabled: bool) -> Self {
        self.log_connections = enabled;
        self
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub async fn is_connected(&self) -> bool {
        self.pool.read().await.is_some()
    }

    /// True between `start` and `end`/`rollback`/`release`
    pub async fn in_transaction(&self) -> bool {
        self.pinned.lock().await.is_some()
    }

    /// Build the pool.
    ///
    /// Fails with [`Error::AlreadyConnected`] if a pool already exists.
    pub async fn connect(&self) -> Result<()> {
        let mut slot = self.pool.write().await;
        if slot.is_some() {
            return Err(Error::AlreadyConnected);
        }

        let pool = self
            .driver
            .create_pool(&self.options, self.log_connections)
            .await?;
        *slot = Some(Arc::new(pool));
        Ok(())
    }

    async fn current_pool(&self) -> Option<Arc<D::Pool>> {
        self.pool.read().await.clone()
    }

    /// Run one statement.
    ///
    /// `%d`/`%t` identifiers are substituted first. Statements starting
    /// with `SELECT` (or marked [`StatementKind::Read`]) yield rows;
    /// everything else yields write metadata.
    pub async fn query(&self, query: impl Into<Query>) -> Result<QueryOutput> {
        let pool = self.current_pool().await.ok_or(Error::NotConnected)?;
        let stmt = query.into().prepare();
        self.run(&pool, &stmt).await
    }

    // The pinned slot stays locked for the whole statement so concurrent
    // callers queue up behind the transaction.
    async fn run(&self, pool: &D::Pool, stmt: &PreparedStatement) -> Result<QueryOutput> {
        let mut pinned = self.pinned.lock().await;
        if let Some(conn) = pinned.as_mut() {
            debug!(
                connection = conn.id(),
                params = stmt.values.len(),
                sql = %stmt.sql,
                "query"
            );
            return conn.execute(stmt).await;
        }
        drop(pinned);

        debug!(params = stmt.values.len(), sql = %stmt.sql, "query");
        pool.execute(stmt).await
    }

    /// Rows deserialized into `T`
    pub async fn select<T: DeserializeOwned>(&self, query: impl Into<Query>) -> Result<Vec<T>> {
        self.query(query.into().kind_or(StatementKind::Read))
            .await?
            .decode()
    }

    pub async fn insert(&self, query: impl Into<Query>) -> Result<InsertResult> {
        let output = self.query(query.into().kind_or(StatementKind::Write)).await?;
        Ok(output.into_write()?.into())
    }

    pub async fn update(&self, query: impl Into<Query>) -> Result<UpdateResult> {
        let output = self.query(query.into().kind_or(StatementKind::Write)).await?;
        Ok(output.into_write()?.into())
    }

    pub async fn delete(&self, query: impl Into<Query>) -> Result<DeleteResult> {
        let output = self.query(query.into().kind_or(StatementKind::Write)).await?;
        Ok(output.into_write()?.into())
    }

    /// Pin a connection and open a transaction on it.
    ///
    /// No-op while disconnected. Fails with
    /// [`Error::TransactionInProgress`] if a connection is already pinned.
    pub async fn start(&self) -> Result<()> {
        let Some(pool) = self.current_pool().await else {
            return Ok(());
        };

        let mut pinned = self.pinned.lock().await;
        if pinned.is_some() {
            return Err(Error::TransactionInProgress);
        }

        let mut conn = pool.acquire().await?;
        if let Err(e) = transaction::open_on(&mut conn).await {
            pool.discard(conn);
            return Err(e);
        }

        debug!(connection = conn.id(), "transaction started");
        *pinned = Some(conn);
        Ok(())
    }

    /// Commit, restore autocommit and unpin. No-op while disconnected.
    pub async fn end(&self) -> Result<()> {
        self.finish(COMMIT).await
    }

    /// Roll back, restore autocommit and unpin. No-op while disconnected.
    pub async fn rollback(&self) -> Result<()> {
        self.finish(ROLLBACK).await
    }

    async fn finish(&self, terminator: &str) -> Result<()> {
        let Some(pool) = self.current_pool().await else {
            return Ok(());
        };

        let mut pinned = self.pinned.lock().await;
        let Some(mut conn) = pinned.take() else {
            drop(pinned);
            // Nothing pinned: the statements run on the pool like any query.
            for sql in [terminator, AUTOCOMMIT_ON] {
                pool.execute(&PreparedStatement::control(sql)).await?;
            }
            return Ok(());
        };

        match transaction::close_on(&mut conn, terminator).await {
            Ok(()) => {
                debug!(connection = conn.id(), terminator, "transaction finished");
                pool.release(conn);
                Ok(())
            }
            Err(e) => {
                pool.discard(conn);
                Err(e)
            }
        }
    }

    /// Unpin without commit or rollback.
    ///
    /// For callers that issue `COMMIT`/`ROLLBACK` themselves. No-op while
    /// disconnected or when nothing is pinned.
    pub async fn release(&self) {
        let Some(pool) = self.current_pool().await else {
            return;
        };

        if let Some(conn) = self.pinned.lock().await.take() {
            debug!(connection = conn.id(), "pinned connection released");
            pool.release(conn);
        }
    }

    /// Start an independent transaction on its own connection
    pub async fn transaction(&self) -> Result<Transaction<D::Pool>> {
        let pool = self.current_pool().await.ok_or(Error::NotConnected)?;
        Transaction::begin(pool).await
    }

    /// Borrow a raw connection, bypassing pinning. `None` while
    /// disconnected. Pair every call with [`release_connection`](Self::release_connection).
    pub async fn get_connection(&self) -> Result<Option<PoolConnection<D>>> {
        match self.current_pool().await {
            Some(pool) => pool.acquire().await.map(Some),
            None => Ok(None),
        }
    }

    /// Return a connection from [`get_connection`](Self::get_connection)
    pub async fn release_connection(&self, conn: PoolConnection<D>) {
        if let Some(pool) = self.current_pool().await {
            pool.release(conn);
        }
    }

    /// Shut the pool down. A pinned connection is discarded first, which
    /// rolls its transaction back. `connect` may be called again afterwards.
    pub async fn close(&self) {
        let mut slot = self.pool.write().await;
        let Some(pool) = slot.take() else {
            return;
        };

        if let Some(conn) = self.pinned.lock().await.take() {
            warn!(
                connection = conn.id(),
                "closing with an open transaction, rolling it back"
            );
            pool.discard(conn);
        }

        pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LogCapture;
    use crate::mock::{MockDriver, PoolEvent, Target};
    use serde_json::json;

    fn client() -> (MockDriver, Client<MockDriver>) {
        let driver = MockDriver::new();
        let client = Client::with_driver(driver.clone(), ConnectOptions::default());
        (driver, client)
    }

    #[tokio::test]
    async fn connect_twice_is_rejected() {
        let (driver, client) = client();
        client.connect().await.unwrap();

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, Error::AlreadyConnected));
        assert_eq!(driver.pools_created(), 1);
    }

    #[tokio::test]
    async fn failed_connect_leaves_client_disconnected() {
        let (driver, client) = client();
        driver.fail_connect("access denied");

        assert!(client.connect().await.is_err());
        assert!(!client.is_connected().await);

        client.connect().await.unwrap();
        assert!(client.is_connected().await);
    }

    #[tokio::test]
    async fn log_flag_reaches_driver() {
        let driver = MockDriver::new();
        let client = Client::with_driver(driver.clone(), ConnectOptions::default())
            .log_connections(true);
        client.connect().await.unwrap();

        assert_eq!(
            driver.events(),
            vec![PoolEvent::Created {
                log_connections: true
            }]
        );
    }

    #[tokio::test]
    async fn connection_events_are_logged_when_enabled() {
        let logs = LogCapture::default();
        let _guard = logs.install();

        let driver = MockDriver::new();
        let client = Client::with_driver(driver, ConnectOptions::default().connection_limit(1))
            .log_connections(true);
        client.connect().await.unwrap();

        client.start().await.unwrap();
        // The only slot is pinned, so this borrow has to wait
        let raw = client.get_connection().await.unwrap().expect("connected");
        client.release_connection(raw).await;
        client.end().await.unwrap();

        assert_eq!(logs.count("[MYSQL] Connection acquired"), 2);
        assert_eq!(logs.count("[MYSQL] Connection released"), 2);
        assert_eq!(logs.count("[MYSQL] Waiting for available connection slot"), 1);
    }

    #[tokio::test]
    async fn connection_events_are_quiet_by_default() {
        let logs = LogCapture::default();
        let _guard = logs.install();

        let (_driver, client) = client();
        client.connect().await.unwrap();
        client.start().await.unwrap();
        client.end().await.unwrap();

        assert_eq!(logs.count("[MYSQL] Connection"), 0);
    }

    #[tokio::test]
    async fn query_without_pin_uses_pool() {
        let (driver, client) = client();
        client.connect().await.unwrap();
        client.query("UPDATE t SET x = 1").await.unwrap();

        assert_eq!(driver.statements()[0].target, Target::Pool);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let (driver, client) = client();
        client.connect().await.unwrap();
        client.start().await.unwrap();

        let err = client.start().await.unwrap_err();
        assert!(matches!(err, Error::TransactionInProgress));
        assert_eq!(driver.checked_out(), 1);
    }

    #[tokio::test]
    async fn failed_start_discards_connection() {
        let (driver, client) = client();
        client.connect().await.unwrap();
        driver.fail_next("lock wait timeout");

        assert!(client.start().await.is_err());
        assert!(!client.in_transaction().await);
        assert_eq!(driver.events().last(), Some(&PoolEvent::Discarded(1)));
    }

    #[tokio::test]
    async fn failed_commit_discards_connection() {
        let (driver, client) = client();
        client.connect().await.unwrap();
        client.start().await.unwrap();
        client.insert("INSERT INTO t VALUES (1)").await.unwrap();

        driver.fail_next("connection reset");
        assert!(client.end().await.is_err());
        assert!(!client.in_transaction().await);
        assert!(driver.committed_writes().is_empty());
        assert_eq!(driver.checked_out(), 0);
    }

    #[tokio::test]
    async fn end_without_pin_goes_to_pool() {
        let (driver, client) = client();
        client.connect().await.unwrap();
        client.end().await.unwrap();

        let statements = driver.statements();
        assert_eq!(driver.sql_log(), vec!["COMMIT;", "SET autocommit=1;"]);
        assert!(statements.iter().all(|s| s.target == Target::Pool));
    }

    #[tokio::test]
    async fn close_discards_pinned_connection() {
        let (driver, client) = client();
        client.connect().await.unwrap();
        client.start().await.unwrap();
        client.insert("INSERT INTO t VALUES (1)").await.unwrap();
        client.close().await;

        assert!(!client.in_transaction().await);
        assert_eq!(driver.rolled_back_writes(), vec!["INSERT INTO t VALUES (1)"]);
        assert_eq!(
            &driver.events()[driver.events().len() - 2..],
            &[PoolEvent::Discarded(1), PoolEvent::Closed]
        );
    }

    #[tokio::test]
    async fn reconnect_after_close() {
        let (driver, client) = client();
        client.connect().await.unwrap();
        client.close().await;
        client.connect().await.unwrap();

        driver.push_rows(vec![json!({"n": 1})]);
        let rows: Vec<serde_json::Value> = client.select("SELECT 1 AS n").await.unwrap();
        assert_eq!(rows, vec![json!({"n": 1})]);
        assert_eq!(driver.pools_created(), 2);
    }

    #[tokio::test]
    async fn raw_connections_bypass_pin() {
        let (driver, client) = client();
        client.connect().await.unwrap();
        client.start().await.unwrap();

        let mut raw = client.get_connection().await.unwrap().expect("connected");
        raw.execute(&Query::new("SELECT 1").prepare()).await.unwrap();
        let raw_id = raw.id();
        client.release_connection(raw).await;

        let last = driver.statements().pop().unwrap();
        assert_eq!(last.target, Target::Connection(raw_id));
        assert_ne!(raw_id, 1);
        assert_eq!(driver.checked_out(), 1);
    }
}
