//! Statement description and result shapes shared by the client and drivers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::placeholder::{self, Identifiers};

/// One result row, keyed by column name
pub type Row = serde_json::Map<String, Value>;

/// Whether a statement yields rows or write metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    Read,
    Write,
}

impl StatementKind {
    /// Text heuristic: statements that literally start with `SELECT` read.
    ///
    /// Case-sensitive and without trimming, so ` SELECT`, `select` and
    /// `WITH ...` all count as writes. Pass an explicit kind for those.
    pub fn detect(sql: &str) -> Self {
        if sql.starts_with("SELECT") {
            Self::Read
        } else {
            Self::Write
        }
    }
}

/// A statement plus everything needed to run it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub sql: String,
    pub values: Vec<Value>,
    pub database: Option<Identifiers>,
    pub table: Option<Identifiers>,
    pub kind: Option<StatementKind>,
}

impl Query {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    /// Append one bound value for the next `?`
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.values.push(value.into());
        self
    }

    pub fn values(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.values.extend(values);
        self
    }

    /// Names for `%d` (single) or `%d0`, `%d1`, ... (list)
    pub fn database(mut self, database: impl Into<Identifiers>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Names for `%t` (single) or `%t0`, `%t1`, ... (list)
    pub fn table(mut self, table: impl Into<Identifiers>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Override the `SELECT` prefix heuristic
    pub fn kind(mut self, kind: StatementKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub(crate) fn kind_or(mut self, kind: StatementKind) -> Self {
        self.kind.get_or_insert(kind);
        self
    }

    /// Substitute identifiers and settle the statement kind.
    ///
    /// The heuristic looks at the substituted text, which is what the
    /// driver receives.
    pub fn prepare(self) -> PreparedStatement {
        let sql = placeholder::substitute(&self.sql, self.database.as_ref(), self.table.as_ref());
        let kind = self.kind.unwrap_or_else(|| StatementKind::detect(&sql));
        PreparedStatement {
            sql,
            values: self.values,
            kind,
        }
    }
}

impl From<&str> for Query {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for Query {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}

/// Statement text after identifier substitution, ready for a driver
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedStatement {
    pub sql: String,
    pub values: Vec<Value>,
    pub kind: StatementKind,
}

impl PreparedStatement {
    /// Control statement with no parameters (transaction bookkeeping)
    pub fn control(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            values: Vec::new(),
            kind: StatementKind::Write,
        }
    }
}

/// Affected-rows metadata of a write statement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResult {
    pub affected_rows: u64,
    pub insert_id: u64,
    pub warning_status: u16,
}

/// What a driver hands back for one statement
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryOutput {
    Rows(Vec<Row>),
    Write(WriteResult),
}

impl QueryOutput {
    pub fn into_rows(self) -> Result<Vec<Row>> {
        match self {
            Self::Rows(rows) => Ok(rows),
            Self::Write(_) => Err(Error::UnexpectedOutput { expected: "rows" }),
        }
    }

    pub fn into_write(self) -> Result<WriteResult> {
        match self {
            Self::Write(result) => Ok(result),
            Self::Rows(_) => Err(Error::UnexpectedOutput {
                expected: "write metadata",
            }),
        }
    }

    /// Deserialize every row into `T`
    pub fn decode<T: serde::de::DeserializeOwned>(self) -> Result<Vec<T>> {
        self.into_rows()?
            .into_iter()
            .map(|row| serde_json::from_value(Value::Object(row)).map_err(Error::from))
            .collect()
    }
}

/// Result of an `INSERT`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertResult {
    pub affected_rows: u64,
    pub insert_id: u64,
    pub warning_status: u16,
}

/// Result of an `UPDATE`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub affected_rows: u64,
    pub warning_status: u16,
}

/// Result of a `DELETE`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub affected_rows: u64,
    pub warning_status: u16,
}

impl From<WriteResult> for InsertResult {
    fn from(r: WriteResult) -> Self {
        Self {
            affected_rows: r.affected_rows,
            insert_id: r.insert_id,
            warning_status: r.warning_status,
        }
    }
}

impl From<WriteResult> for UpdateResult {
    fn from(r: WriteResult) -> Self {
        Self {
            affected_rows: r.affected_rows,
            warning_status: r.warning_status,
        }
    }
}

impl From<WriteResult> for DeleteResult {
    fn from(r: WriteResult) -> Self {
        Self {
            affected_rows: r.affected_rows,
            warning_status: r.warning_status,
        }
    }
}
