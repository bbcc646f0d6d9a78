//! mariapool-core: pooled MySQL/MariaDB access with pinned transactions
//!
//! - [`Client`] owns a connection pool and, optionally, one pinned
//!   connection that scopes a transaction (`start` .. `end`/`rollback`)
//! - [`Transaction`] is the explicit, drop-safe alternative
//! - `%d`/`%t` placeholders splice quoted identifiers into statements
//!   before values are bound

pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod mock;
pub mod mysql;
pub mod placeholder;
pub mod statement;
pub mod transaction;

pub use client::{Client, PoolConnection};
pub use config::ConnectOptions;
pub use driver::{Connection, Driver, Pool};
pub use error::{BoxError, Error, Result};
pub use events::ConnectionLog;
pub use mysql::MySqlDriver;
pub use placeholder::Identifiers;
pub use statement::{
    DeleteResult, InsertResult, PreparedStatement, Query, QueryOutput, Row, StatementKind,
    UpdateResult, WriteResult,
};
pub use transaction::Transaction;
