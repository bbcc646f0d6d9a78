//! In-memory driver for tests.
//!
//! Records every statement together with the handle that ran it, tracks
//! pool events, and keeps writes made inside a transaction pending until
//! the connection commits or rolls back. Read results and failures are
//! scripted up front.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::config::ConnectOptions;
use crate::driver::{Connection, Driver, Pool};
use crate::error::{Error, Result};
use crate::events::ConnectionLog;
use crate::statement::{PreparedStatement, QueryOutput, Row, StatementKind, WriteResult};

/// Where a statement ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Borrowed from the pool for one call
    Pool,
    /// A checked-out connection, by handle id
    Connection(u64),
}

/// One statement as the driver received it
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    pub sql: String,
    pub values: Vec<Value>,
    pub kind: StatementKind,
    pub target: Target,
}

/// Pool lifecycle as seen by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    Created { log_connections: bool },
    Acquired(u64),
    Released(u64),
    Discarded(u64),
    Closed,
}

#[derive(Default)]
struct MockState {
    statements: Vec<ExecutedStatement>,
    events: Vec<PoolEvent>,
    rows: VecDeque<Vec<Row>>,
    failures: VecDeque<String>,
    connect_failure: Option<String>,
    committed: Vec<String>,
    rolled_back: Vec<String>,
    pending: HashMap<u64, Vec<String>>,
    in_transaction: HashSet<u64>,
    next_connection: u64,
    next_insert_id: u64,
}

impl MockState {
    fn apply(&mut self, target: Target, stmt: &PreparedStatement) -> Result<QueryOutput> {
        self.statements.push(ExecutedStatement {
            sql: stmt.sql.clone(),
            values: stmt.values.clone(),
            kind: stmt.kind,
            target,
        });

        if let Some(message) = self.failures.pop_front() {
            return Err(Error::driver(message));
        }

        let normalized = stmt.sql.trim().trim_end_matches(';').trim().to_uppercase();
        let id = match target {
            Target::Connection(id) => Some(id),
            Target::Pool => None,
        };

        match (normalized.as_str(), id) {
            ("START TRANSACTION" | "BEGIN", Some(id)) => {
                self.in_transaction.insert(id);
                return Ok(QueryOutput::Write(WriteResult::default()));
            }
            ("COMMIT", Some(id)) => {
                self.in_transaction.remove(&id);
                let writes = self.pending.remove(&id).unwrap_or_default();
                self.committed.extend(writes);
                return Ok(QueryOutput::Write(WriteResult::default()));
            }
            ("ROLLBACK", Some(id)) => {
                self.in_transaction.remove(&id);
                self.roll_back(id);
                return Ok(QueryOutput::Write(WriteResult::default()));
            }
            ("START TRANSACTION" | "BEGIN" | "COMMIT" | "ROLLBACK", None) => {
                return Ok(QueryOutput::Write(WriteResult::default()));
            }
            (sql, _) if sql.starts_with("SET ") => {
                return Ok(QueryOutput::Write(WriteResult::default()));
            }
            _ => {}
        }

        match stmt.kind {
            StatementKind::Read => Ok(QueryOutput::Rows(self.rows.pop_front().unwrap_or_default())),
            StatementKind::Write => {
                match id.filter(|id| self.in_transaction.contains(id)) {
                    Some(id) => self.pending.entry(id).or_default().push(stmt.sql.clone()),
                    None => self.committed.push(stmt.sql.clone()),
                }
                self.next_insert_id += 1;
                Ok(QueryOutput::Write(WriteResult {
                    affected_rows: 1,
                    insert_id: self.next_insert_id,
                    warning_status: 0,
                }))
            }
        }
    }

    fn checked_out(&self) -> usize {
        self.events.iter().fold(0usize, |open, event| match event {
            PoolEvent::Acquired(_) => open + 1,
            PoolEvent::Released(_) | PoolEvent::Discarded(_) => open.saturating_sub(1),
            _ => open,
        })
    }

    fn roll_back(&mut self, id: u64) {
        let writes = self.pending.remove(&id).unwrap_or_default();
        self.rolled_back.extend(writes);
    }
}

/// Scriptable test double; clones share state
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rows for the next read statement. Non-object values are skipped.
    pub fn push_rows(&self, rows: impl IntoIterator<Item = Value>) {
        let rows = rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.state().rows.push_back(rows);
    }

    /// Fail the next statement with a driver error
    pub fn fail_next(&self, message: impl Into<String>) {
        self.state().failures.push_back(message.into());
    }

    /// Fail the next `create_pool`
    pub fn fail_connect(&self, message: impl Into<String>) {
        self.state().connect_failure = Some(message.into());
    }

    pub fn statements(&self) -> Vec<ExecutedStatement> {
        self.state().statements.clone()
    }

    /// Statement text only, in execution order
    pub fn sql_log(&self) -> Vec<String> {
        self.state().statements.iter().map(|s| s.sql.clone()).collect()
    }

    pub fn events(&self) -> Vec<PoolEvent> {
        self.state().events.clone()
    }

    /// Writes that are durable: autocommitted or committed
    pub fn committed_writes(&self) -> Vec<String> {
        self.state().committed.clone()
    }

    /// Writes undone by `ROLLBACK` or by discarding their connection
    pub fn rolled_back_writes(&self) -> Vec<String> {
        self.state().rolled_back.clone()
    }

    pub fn pools_created(&self) -> usize {
        self.state()
            .events
            .iter()
            .filter(|e| matches!(e, PoolEvent::Created { .. }))
            .count()
    }

    /// Connections acquired and not yet released or discarded
    pub fn checked_out(&self) -> usize {
        self.state().checked_out()
    }
}

#[async_trait]
impl Driver for MockDriver {
    type Pool = MockPool;

    async fn create_pool(&self, options: &ConnectOptions, log_connections: bool) -> Result<MockPool> {
        options.validate()?;

        let mut state = self.state();
        if let Some(message) = state.connect_failure.take() {
            return Err(Error::driver(message));
        }
        state.events.push(PoolEvent::Created { log_connections });

        Ok(MockPool {
            state: Arc::clone(&self.state),
            log: ConnectionLog::new(log_connections),
            limit: options.connection_limit as usize,
        })
    }
}

/// Pool handed out by [`MockDriver`].
///
/// Never blocks: past `connection_limit` it only logs the slot wait.
/// Statements run through [`Pool::execute`] are not counted as checkouts.
pub struct MockPool {
    state: Arc<Mutex<MockState>>,
    log: ConnectionLog,
    limit: usize,
}

impl MockPool {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Pool for MockPool {
    type Connection = MockConnection;

    async fn execute(&self, stmt: &PreparedStatement) -> Result<QueryOutput> {
        self.state().apply(Target::Pool, stmt)
    }

    async fn acquire(&self) -> Result<MockConnection> {
        let mut state = self.state();
        self.log.before_acquire(0, state.checked_out(), self.limit);
        state.next_connection += 1;
        let id = state.next_connection;
        state.events.push(PoolEvent::Acquired(id));
        self.log.acquired(id);

        Ok(MockConnection {
            id,
            state: Arc::clone(&self.state),
        })
    }

    fn release(&self, conn: MockConnection) {
        self.state().events.push(PoolEvent::Released(conn.id));
        self.log.released(conn.id);
    }

    fn discard(&self, conn: MockConnection) {
        let mut state = self.state();
        state.in_transaction.remove(&conn.id);
        state.roll_back(conn.id);
        state.events.push(PoolEvent::Discarded(conn.id));
    }

    async fn close(&self) {
        self.state().events.push(PoolEvent::Closed);
    }
}

/// Connection handed out by [`MockPool`]
pub struct MockConnection {
    id: u64,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl Connection for MockConnection {
    fn id(&self) -> u64 {
        self.id
    }

    async fn execute(&mut self, stmt: &PreparedStatement) -> Result<QueryOutput> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(Target::Connection(self.id), stmt)
    }
}
