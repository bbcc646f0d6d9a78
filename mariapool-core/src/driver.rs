//! Driver seam between the client and a pooled-connection backend.
//!
//! Provides the traits the [`Client`](crate::Client) is generic over, with:
//! - [`MySqlDriver`](crate::mysql::MySqlDriver) on top of sqlx
//! - [`MockDriver`](crate::mock::MockDriver) for tests

use async_trait::async_trait;

use crate::config::ConnectOptions;
use crate::error::Result;
use crate::statement::{PreparedStatement, QueryOutput};

/// Builds pools. One `create_pool` call per `Client::connect`.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    type Pool: Pool;

    /// Build a pool. With `log_connections` set the pool reports acquire,
    /// release and slot-wait events through `tracing`.
    async fn create_pool(&self, options: &ConnectOptions, log_connections: bool)
        -> Result<Self::Pool>;
}

/// A shared set of connections, safe for concurrent borrow and return
#[async_trait]
pub trait Pool: Send + Sync + 'static {
    type Connection: Connection;

    /// Run one statement on a connection borrowed for this call only
    async fn execute(&self, stmt: &PreparedStatement) -> Result<QueryOutput>;

    /// Borrow a connection until it is released or discarded
    async fn acquire(&self) -> Result<Self::Connection>;

    /// Return a connection for reuse
    fn release(&self, conn: Self::Connection);

    /// Drop a connection without returning it. The server ends the
    /// session, rolling back anything uncommitted.
    fn discard(&self, conn: Self::Connection);

    /// Tear down every connection
    async fn close(&self);
}

/// One borrowed session. Statements run in issue order.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Handle identity, unique per driver instance
    fn id(&self) -> u64;

    async fn execute(&mut self, stmt: &PreparedStatement) -> Result<QueryOutput>;
}
