//! Explicit transaction handle.
//!
//! A [`Transaction`] owns one pooled connection for its whole life, so
//! several can run side by side on one client. It ends through `commit`,
//! `rollback` or `release`; dropping it unfinished discards the connection,
//! which makes the server roll back.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::driver::{Connection, Pool};
use crate::error::Result;
use crate::statement::{
    DeleteResult, InsertResult, PreparedStatement, Query, QueryOutput, StatementKind, UpdateResult,
};

pub(crate) const AUTOCOMMIT_OFF: &str = "SET autocommit=0;";
pub(crate) const AUTOCOMMIT_ON: &str = "SET autocommit=1;";
pub(crate) const START_TRANSACTION: &str = "START TRANSACTION;";
pub(crate) const COMMIT: &str = "COMMIT;";
pub(crate) const ROLLBACK: &str = "ROLLBACK;";

/// Turn autocommit off and open a transaction on `conn`
pub(crate) async fn open_on<C: Connection>(conn: &mut C) -> Result<()> {
    conn.execute(&PreparedStatement::control(AUTOCOMMIT_OFF)).await?;
    conn.execute(&PreparedStatement::control(START_TRANSACTION)).await?;
    Ok(())
}

/// Run `terminator` (`COMMIT;` or `ROLLBACK;`) and restore autocommit
pub(crate) async fn close_on<C: Connection>(conn: &mut C, terminator: &str) -> Result<()> {
    conn.execute(&PreparedStatement::control(terminator)).await?;
    conn.execute(&PreparedStatement::control(AUTOCOMMIT_ON)).await?;
    Ok(())
}

/// A transaction pinned to one pooled connection
pub struct Transaction<P: Pool> {
    pool: Arc<P>,
    conn: Option<P::Connection>,
}

impl<P: Pool> Transaction<P> {
    pub(crate) async fn begin(pool: Arc<P>) -> Result<Self> {
        let mut conn = pool.acquire().await?;
        if let Err(e) = open_on(&mut conn).await {
            pool.discard(conn);
            return Err(e);
        }

        debug!(connection = conn.id(), "transaction started");
        Ok(Self {
            pool,
            conn: Some(conn),
        })
    }

    // `conn` is only emptied by the consuming methods and by Drop, so a
    // live handle always holds it.
    fn conn(&mut self) -> &mut P::Connection {
        match self.conn.as_mut() {
            Some(conn) => conn,
            None => unreachable!("transaction connection taken while the handle is live"),
        }
    }

    /// Handle id of the pinned connection
    pub fn connection_id(&self) -> Option<u64> {
        self.conn.as_ref().map(Connection::id)
    }

    pub async fn query(&mut self, query: impl Into<Query>) -> Result<QueryOutput> {
        let stmt = query.into().prepare();
        let conn = self.conn();
        debug!(
            connection = conn.id(),
            params = stmt.values.len(),
            sql = %stmt.sql,
            "query"
        );
        conn.execute(&stmt).await
    }

    pub async fn select<T: DeserializeOwned>(&mut self, query: impl Into<Query>) -> Result<Vec<T>> {
        self.query(query.into().kind_or(StatementKind::Read))
            .await?
            .decode()
    }

    pub async fn insert(&mut self, query: impl Into<Query>) -> Result<InsertResult> {
        let output = self.query(query.into().kind_or(StatementKind::Write)).await?;
        Ok(output.into_write()?.into())
    }

    pub async fn update(&mut self, query: impl Into<Query>) -> Result<UpdateResult> {
        let output = self.query(query.into().kind_or(StatementKind::Write)).await?;
        Ok(output.into_write()?.into())
    }

    pub async fn delete(&mut self, query: impl Into<Query>) -> Result<DeleteResult> {
        let output = self.query(query.into().kind_or(StatementKind::Write)).await?;
        Ok(output.into_write()?.into())
    }

    /// `COMMIT`, restore autocommit, return the connection
    pub async fn commit(mut self) -> Result<()> {
        self.finish(COMMIT).await
    }

    /// `ROLLBACK`, restore autocommit, return the connection
    pub async fn rollback(mut self) -> Result<()> {
        self.finish(ROLLBACK).await
    }

    /// Return the connection without ending the transaction.
    ///
    /// For callers that already issued their own `COMMIT`/`ROLLBACK`
    /// through [`query`](Self::query).
    pub fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            debug!(connection = conn.id(), "transaction connection released");
            self.pool.release(conn);
        }
    }

    async fn finish(&mut self, terminator: &str) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        match close_on(&mut conn, terminator).await {
            Ok(()) => {
                debug!(connection = conn.id(), terminator, "transaction finished");
                self.pool.release(conn);
                Ok(())
            }
            Err(e) => {
                self.pool.discard(conn);
                Err(e)
            }
        }
    }
}

impl<P: Pool> Drop for Transaction<P> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!(
                connection = conn.id(),
                "transaction dropped without commit or rollback"
            );
            self.pool.discard(conn);
        }
    }
}
