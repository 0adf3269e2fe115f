//! Database facade
//!
//! Thin typed layer over the pluggable SQL engines. Exposes value and row
//! types, transactions with a lock kind, chunked deletes, and transparent
//! retry of busy/timeout errors. The index core never touches an engine
//! driver directly.
//!
//! Statements are written with `?` placeholders; backings that use a
//! different syntax rewrite them before dispatch. Untrusted input never
//! reaches a statement except as a bound parameter.

pub mod filter;
pub mod fts;
pub mod migrations;

mod sqlite;

#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "postgres")]
mod postgres;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::id::DatabaseId;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Database error classification
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Another connection holds a conflicting lock; transient
    #[error("database busy: {0}")]
    Busy(String),
    /// Statement exceeded the configured timeout; transient
    #[error("database timeout: {0}")]
    Timeout(String),
    /// No row matched; finders translate this to a none handle
    #[error("database entry not found")]
    NotFound,
    /// Uniqueness or foreign-key violation
    #[error("constraint violation: {0}")]
    Constraint(String),
    /// Connection-level failure
    #[error("connection error: {0}")]
    Connection(String),
    /// The engine ran out of memory
    #[error("insufficient memory: {0}")]
    InsufficientMemory(String),
    /// A column value could not be coerced to the requested type
    #[error("type error: {0}")]
    Type(String),
    /// Malformed engine location
    #[error("invalid database location: {0}")]
    Uri(String),
    /// Engine error outside the classified kinds
    #[error("database error: {0}")]
    Other(String),
}

/// Database result type
pub type DbResult<T> = std::result::Result<T, DatabaseError>;

impl DatabaseError {
    /// True for errors a bounded retry may clear.
    pub fn is_transient(&self) -> bool {
        matches!(self, DatabaseError::Busy(_) | DatabaseError::Timeout(_))
    }
}

// ============================================================================
// ENGINE LOCATION
// ============================================================================

/// Location of the backing engine.
///
/// Rendered and parsed as a URI string: `sqlite:PATH`, `postgresql://...`
/// or `mysql://...`. A bare path selects the embedded engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum DatabaseUri {
    Sqlite(PathBuf),
    Postgres(String),
    Mysql(String),
}

impl Default for DatabaseUri {
    fn default() -> Self {
        DatabaseUri::Sqlite(PathBuf::from("arkiv-index.db"))
    }
}

impl DatabaseUri {
    /// Parse an engine location string.
    pub fn parse(s: &str) -> DbResult<Self> {
        if let Some(path) = s.strip_prefix("sqlite:") {
            if path.is_empty() {
                return Err(DatabaseError::Uri("empty sqlite path".to_string()));
            }
            Ok(DatabaseUri::Sqlite(PathBuf::from(path)))
        } else if s.starts_with("postgresql://") || s.starts_with("postgres://") {
            Ok(DatabaseUri::Postgres(s.to_string()))
        } else if s.starts_with("mysql://") {
            Ok(DatabaseUri::Mysql(s.to_string()))
        } else if s.is_empty() {
            Err(DatabaseError::Uri("empty database location".to_string()))
        } else {
            Ok(DatabaseUri::Sqlite(PathBuf::from(s)))
        }
    }

    /// Engine dialect selected by this location.
    pub fn dialect(&self) -> Dialect {
        match self {
            DatabaseUri::Sqlite(_) => Dialect::Sqlite,
            DatabaseUri::Postgres(_) => Dialect::Postgres,
            DatabaseUri::Mysql(_) => Dialect::Mysql,
        }
    }
}

impl std::fmt::Display for DatabaseUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseUri::Sqlite(path) => write!(f, "sqlite:{}", path.display()),
            DatabaseUri::Postgres(uri) | DatabaseUri::Mysql(uri) => write!(f, "{}", uri),
        }
    }
}

impl From<DatabaseUri> for String {
    fn from(uri: DatabaseUri) -> String {
        uri.to_string()
    }
}

impl TryFrom<String> for DatabaseUri {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        DatabaseUri::parse(&s).map_err(|e| e.to_string())
    }
}

/// SQL dialect of a backing engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
    Mysql,
}

// ============================================================================
// VALUES & ROWS
// ============================================================================

/// A bound statement parameter or a fetched column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Row-id parameter.
    pub fn key(id: DatabaseId) -> Value {
        Value::Int(id)
    }

    /// Epoch-seconds timestamp parameter.
    pub fn datetime(epoch: i64) -> Value {
        Value::Int(epoch)
    }

    pub fn text(s: impl Into<String>) -> Value {
        Value::Text(s.into())
    }

    /// Text parameter or NULL.
    pub fn opt_text(s: Option<impl Into<String>>) -> Value {
        match s {
            Some(s) => Value::Text(s.into()),
            None => Value::Null,
        }
    }

    pub fn uint(v: u64) -> Value {
        Value::UInt(v)
    }

    pub fn int(v: i64) -> Value {
        Value::Int(v)
    }

    pub fn bool(v: bool) -> Value {
        Value::Bool(v)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Value {
        Value::UInt(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Value {
        Value::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::Text(v)
    }
}

/// One fetched result row; columns are addressed by position.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn value(&self, index: usize) -> DbResult<&Value> {
        self.values.get(index).ok_or_else(|| {
            DatabaseError::Type(format!(
                "column index {} out of range ({} columns)",
                index,
                self.values.len()
            ))
        })
    }

    /// Signed integer column; text columns are parsed (sum results on some
    /// engines arrive as decimal text).
    pub fn as_i64(&self, index: usize) -> DbResult<i64> {
        match self.value(index)? {
            Value::Int(v) => Ok(*v),
            Value::UInt(v) => i64::try_from(*v)
                .map_err(|_| DatabaseError::Type(format!("u64 value {} exceeds i64", v))),
            Value::Bool(v) => Ok(*v as i64),
            Value::Float(v) => Ok(*v as i64),
            Value::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| DatabaseError::Type(format!("not an integer: {:?}", s))),
            Value::Null => Err(DatabaseError::Type(format!("column {} is NULL", index))),
        }
    }

    /// Signed integer column, NULL mapped to `None`.
    pub fn as_opt_i64(&self, index: usize) -> DbResult<Option<i64>> {
        match self.value(index)? {
            Value::Null => Ok(None),
            _ => self.as_i64(index).map(Some),
        }
    }

    pub fn as_u64(&self, index: usize) -> DbResult<u64> {
        match self.value(index)? {
            Value::UInt(v) => Ok(*v),
            _ => {
                let v = self.as_i64(index)?;
                u64::try_from(v)
                    .map_err(|_| DatabaseError::Type(format!("negative value {} as u64", v)))
            }
        }
    }

    pub fn as_u32(&self, index: usize) -> DbResult<u32> {
        let v = self.as_i64(index)?;
        u32::try_from(v).map_err(|_| DatabaseError::Type(format!("value {} as u32", v)))
    }

    pub fn as_bool(&self, index: usize) -> DbResult<bool> {
        Ok(self.as_i64(index)? != 0)
    }

    pub fn as_f64(&self, index: usize) -> DbResult<f64> {
        match self.value(index)? {
            Value::Float(v) => Ok(*v),
            _ => self.as_i64(index).map(|v| v as f64),
        }
    }

    pub fn as_id(&self, index: usize) -> DbResult<DatabaseId> {
        self.as_i64(index)
    }

    pub fn as_str(&self, index: usize) -> DbResult<&str> {
        match self.value(index)? {
            Value::Text(s) => Ok(s.as_str()),
            Value::Null => Err(DatabaseError::Type(format!("column {} is NULL", index))),
            other => Err(DatabaseError::Type(format!("not text: {:?}", other))),
        }
    }

    pub fn as_text(&self, index: usize) -> DbResult<String> {
        self.as_str(index).map(|s| s.to_string())
    }

    /// Text column, NULL mapped to `None`.
    pub fn as_opt_text(&self, index: usize) -> DbResult<Option<String>> {
        match self.value(index)? {
            Value::Null => Ok(None),
            _ => self.as_text(index).map(Some),
        }
    }
}

// ============================================================================
// BACKEND CONTRACT
// ============================================================================

/// Lock kind a transaction is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    /// No lock until the first statement
    Deferred,
    /// Read intent
    Read,
    /// Write intent; serializes concurrent writers of the same rows
    ReadWrite,
}

/// One backing-engine connection.
pub(crate) trait Backend: Send {
    fn dialect(&self) -> Dialect;

    /// Run a statement, returning the affected row count.
    fn execute(&mut self, sql: &str, params: &[Value]) -> DbResult<u64>;

    /// Run an INSERT, returning the new surrogate key.
    fn insert(&mut self, sql: &str, params: &[Value]) -> DbResult<DatabaseId>;

    /// Run a query, fetching all result rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>>;

    /// Run a multi-statement script (DDL).
    fn execute_script(&mut self, sql: &str) -> DbResult<()>;
}

// ============================================================================
// DATABASE
// ============================================================================

/// Retry budget for transient errors outside a transaction.
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// One connection to the backing engine, with retry and transaction state.
pub struct Database {
    backend: Box<dyn Backend>,
    in_transaction: bool,
}

impl Database {
    /// Open a connection to the engine at `uri`.
    pub fn open(uri: &DatabaseUri, timeout: Duration) -> DbResult<Self> {
        let backend: Box<dyn Backend> = match uri {
            DatabaseUri::Sqlite(path) => Box::new(sqlite::SqliteBackend::open(path, timeout)?),
            #[cfg(feature = "postgres")]
            DatabaseUri::Postgres(uri) => {
                Box::new(postgres::PostgresBackend::connect(uri, timeout)?)
            }
            #[cfg(not(feature = "postgres"))]
            DatabaseUri::Postgres(_) => {
                return Err(DatabaseError::Uri(
                    "postgres support not compiled in".to_string(),
                ));
            }
            #[cfg(feature = "mysql")]
            DatabaseUri::Mysql(uri) => Box::new(mysql::MysqlBackend::connect(uri, timeout)?),
            #[cfg(not(feature = "mysql"))]
            DatabaseUri::Mysql(_) => {
                return Err(DatabaseError::Uri(
                    "mysql support not compiled in".to_string(),
                ));
            }
        };
        Ok(Self {
            backend,
            in_transaction: false,
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.backend.dialect()
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Retry transient errors with bounded exponential back-off. Statements
    /// inside a transaction are never retried; the whole transaction is the
    /// retry unit there.
    fn with_retry<T>(&mut self, mut op: impl FnMut(&mut dyn Backend) -> DbResult<T>) -> DbResult<T> {
        if self.in_transaction {
            return op(self.backend.as_mut());
        }
        let mut attempt = 0;
        loop {
            match op(self.backend.as_mut()) {
                Err(e) if e.is_transient() && attempt + 1 < RETRY_ATTEMPTS => {
                    let backoff = RETRY_BACKOFF * 2u32.pow(attempt);
                    tracing::warn!(
                        error = %e,
                        attempt = attempt + 1,
                        "transient database error, retrying in {:?}",
                        backoff
                    );
                    std::thread::sleep(backoff);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    pub fn execute(&mut self, sql: &str, params: &[Value]) -> DbResult<u64> {
        self.with_retry(|b| b.execute(sql, params))
    }

    pub fn insert(&mut self, sql: &str, params: &[Value]) -> DbResult<DatabaseId> {
        self.with_retry(|b| b.insert(sql, params))
    }

    pub fn query(&mut self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        self.with_retry(|b| b.query(sql, params))
    }

    /// Query expecting exactly one row.
    pub fn query_row(&mut self, sql: &str, params: &[Value]) -> DbResult<Row> {
        self.query_row_opt(sql, params)?.ok_or(DatabaseError::NotFound)
    }

    /// Query returning the first row, if any.
    pub fn query_row_opt(&mut self, sql: &str, params: &[Value]) -> DbResult<Option<Row>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }

    /// Single integer result (COUNT, SUM, ...).
    pub fn get_i64(&mut self, sql: &str, params: &[Value]) -> DbResult<i64> {
        self.query_row(sql, params)?.as_i64(0)
    }

    /// Single optional id result.
    pub fn get_id(&mut self, sql: &str, params: &[Value]) -> DbResult<Option<DatabaseId>> {
        match self.query_row_opt(sql, params)? {
            Some(row) => Ok(Some(row.as_id(0)?)),
            None => Ok(None),
        }
    }

    /// Id list result.
    pub fn get_ids(&mut self, sql: &str, params: &[Value]) -> DbResult<Vec<DatabaseId>> {
        self.query(sql, params)?
            .iter()
            .map(|row| row.as_id(0))
            .collect()
    }

    /// Existence check: `SELECT 1 FROM {tables} WHERE {condition} LIMIT 1`.
    pub fn exists(&mut self, tables: &str, condition: &str, params: &[Value]) -> DbResult<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE {} LIMIT 1", tables, condition);
        Ok(self.query_row_opt(&sql, params)?.is_some())
    }

    pub fn execute_script(&mut self, sql: &str) -> DbResult<()> {
        self.with_retry(|b| b.execute_script(sql))
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    pub fn begin(&mut self, lock: LockKind) -> DbResult<()> {
        if self.in_transaction {
            return Err(DatabaseError::Other(
                "transaction already open on this connection".to_string(),
            ));
        }
        let stmt = match (self.dialect(), lock) {
            (Dialect::Sqlite, LockKind::ReadWrite) => "BEGIN IMMEDIATE",
            (Dialect::Sqlite, _) => "BEGIN DEFERRED",
            (Dialect::Postgres, _) => "BEGIN",
            (Dialect::Mysql, _) => "START TRANSACTION",
        };
        self.with_retry(|b| b.execute_script(stmt))?;
        self.in_transaction = true;
        Ok(())
    }

    pub fn commit(&mut self) -> DbResult<()> {
        if !self.in_transaction {
            return Err(DatabaseError::Other("no open transaction".to_string()));
        }
        self.backend.execute_script("COMMIT")?;
        self.in_transaction = false;
        Ok(())
    }

    pub fn rollback(&mut self) -> DbResult<()> {
        if !self.in_transaction {
            return Err(DatabaseError::Other("no open transaction".to_string()));
        }
        self.backend.execute_script("ROLLBACK")?;
        self.in_transaction = false;
        Ok(())
    }

    /// Run `body` inside a transaction, committing on success and rolling
    /// back on error.
    pub fn transaction<T, E, F>(&mut self, lock: LockKind, body: F) -> Result<T, E>
    where
        E: From<DatabaseError>,
        F: FnOnce(&mut Database) -> Result<T, E>,
    {
        self.begin(lock)?;
        match body(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_error) = self.rollback() {
                    tracing::error!(error = %rollback_error, "rollback failed");
                }
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Dialect-aware helpers
    // ------------------------------------------------------------------

    /// Wrap an aggregate expression so every engine returns it as a plain
    /// 64-bit integer (SUM over bigint columns is DECIMAL/NUMERIC on the
    /// client/server engines).
    pub fn bigint(&self, expr: &str) -> String {
        match self.dialect() {
            Dialect::Sqlite => expr.to_string(),
            Dialect::Postgres => format!("CAST({} AS BIGINT)", expr),
            Dialect::Mysql => format!("CAST({} AS SIGNED)", expr),
        }
    }

    /// Delete at most `limit` rows matching `condition`. Uses a derived-table
    /// subselect, the one chunked-delete form all three engines accept.
    pub fn delete_limited(
        &mut self,
        table: &str,
        condition: &str,
        params: &[Value],
        limit: u64,
    ) -> DbResult<u64> {
        let sql = format!(
            "DELETE FROM {table} WHERE id IN \
             (SELECT id FROM (SELECT id FROM {table} WHERE {condition} LIMIT {limit}) AS _chunk)",
            table = table,
            condition = condition,
            limit = limit
        );
        self.execute(&sql, params)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dialect", &self.dialect())
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}
