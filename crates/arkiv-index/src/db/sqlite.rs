//! Embedded engine backing (SQLite)

use std::path::Path;
use std::time::Duration;

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ToSql};

use super::{Backend, DatabaseError, DbResult, Dialect, Row, Value};
use crate::id::DatabaseId;

pub(crate) struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    pub(crate) fn open(path: &Path, timeout: Duration) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DatabaseError::Connection(e.to_string()))?;
            }
        }
        let conn = Connection::open(path).map_err(map_error)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(map_error)?;
        conn.pragma_update(None, "busy_timeout", timeout.as_millis() as i64)
            .map_err(map_error)?;

        Ok(Self { conn })
    }
}

impl Backend for SqliteBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> DbResult<u64> {
        let changed = self
            .conn
            .execute(sql, rusqlite::params_from_iter(params.iter().map(Param)))
            .map_err(map_error)?;
        Ok(changed as u64)
    }

    fn insert(&mut self, sql: &str, params: &[Value]) -> DbResult<DatabaseId> {
        self.execute(sql, params)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        let mut stmt = self.conn.prepare(sql).map_err(map_error)?;
        let column_count = stmt.column_count();
        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter().map(Param)))
            .map_err(map_error)?;

        let mut result = Vec::new();
        while let Some(row) = rows.next().map_err(map_error)? {
            let mut values = Vec::with_capacity(column_count);
            for index in 0..column_count {
                values.push(read_value(row.get_ref(index).map_err(map_error)?)?);
            }
            result.push(Row::new(values));
        }
        Ok(result)
    }

    fn execute_script(&mut self, sql: &str) -> DbResult<()> {
        self.conn.execute_batch(sql).map_err(map_error)
    }
}

/// Parameter binding adapter.
struct Param<'a>(&'a Value);

impl ToSql for Param<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.0 {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Bool(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*v as i64)),
            Value::Int(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*v)),
            Value::UInt(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*v as i64)),
            Value::Float(v) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*v)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

fn read_value(value: ValueRef<'_>) -> DbResult<Value> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Float(v),
        ValueRef::Text(bytes) => Value::Text(
            std::str::from_utf8(bytes)
                .map_err(|e| DatabaseError::Type(format!("non-utf8 text column: {}", e)))?
                .to_string(),
        ),
        ValueRef::Blob(_) => {
            return Err(DatabaseError::Type("unexpected blob column".to_string()));
        }
    })
}

fn map_error(error: rusqlite::Error) -> DatabaseError {
    match &error {
        rusqlite::Error::QueryReturnedNoRows => DatabaseError::NotFound,
        rusqlite::Error::SqliteFailure(code, message) => {
            let text = message
                .clone()
                .unwrap_or_else(|| code.to_string());
            match code.code {
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    DatabaseError::Busy(text)
                }
                rusqlite::ErrorCode::ConstraintViolation => DatabaseError::Constraint(text),
                rusqlite::ErrorCode::OutOfMemory => {
                    // Embedded engine OOM is unrecoverable in-process
                    tracing::error!("sqlite out of memory, halting: {}", text);
                    std::process::abort();
                }
                rusqlite::ErrorCode::CannotOpen | rusqlite::ErrorCode::NotADatabase => {
                    DatabaseError::Connection(text)
                }
                _ => DatabaseError::Other(text),
            }
        }
        other => DatabaseError::Other(other.to_string()),
    }
}
