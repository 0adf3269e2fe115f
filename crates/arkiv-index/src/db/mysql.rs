//! Client/server engine backing (MySQL/MariaDB)
//!
//! Placeholders are `?` natively. Full-text matching runs against FULLTEXT
//! indexes on the base tables, so the FTS shim keeps no shadow rows here.

use std::time::Duration;

use mysql::prelude::Queryable;
use mysql::{Conn, Opts, Params};

use super::{Backend, DatabaseError, DbResult, Dialect, Row, Value};
use crate::id::DatabaseId;

pub(crate) struct MysqlBackend {
    conn: Conn,
}

impl MysqlBackend {
    pub(crate) fn connect(uri: &str, timeout: Duration) -> DbResult<Self> {
        let opts = Opts::from_url(uri)
            .map_err(|e| DatabaseError::Uri(e.to_string()))?;
        let mut conn = Conn::new(opts).map_err(map_error)?;

        // MySQL bounds SELECT statements; MariaDB spells the knob differently
        let millis = timeout.as_millis();
        if conn
            .query_drop(format!("SET SESSION max_execution_time = {}", millis))
            .is_err()
        {
            let seconds = timeout.as_secs();
            if let Err(e) =
                conn.query_drop(format!("SET SESSION max_statement_time = {}", seconds))
            {
                tracing::debug!(error = %e, "statement timeout not supported by server");
            }
        }

        Ok(Self { conn })
    }
}

impl Backend for MysqlBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> DbResult<u64> {
        let result = self
            .conn
            .exec_iter(sql, to_params(params))
            .map_err(map_error)?;
        Ok(result.affected_rows())
    }

    fn insert(&mut self, sql: &str, params: &[Value]) -> DbResult<DatabaseId> {
        let result = self
            .conn
            .exec_iter(sql, to_params(params))
            .map_err(map_error)?;
        let id = result.last_insert_id().ok_or_else(|| {
            DatabaseError::Other("insert did not produce a row id".to_string())
        })?;
        Ok(id as DatabaseId)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        let rows: Vec<mysql::Row> = self
            .conn
            .exec(sql, to_params(params))
            .map_err(map_error)?;

        rows.into_iter().map(read_row).collect()
    }

    fn execute_script(&mut self, sql: &str) -> DbResult<()> {
        for statement in sql.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            self.conn.query_drop(statement).map_err(map_error)?;
        }
        Ok(())
    }
}

fn to_params(params: &[Value]) -> Params {
    if params.is_empty() {
        return Params::Empty;
    }
    Params::Positional(
        params
            .iter()
            .map(|value| match value {
                Value::Null => mysql::Value::NULL,
                Value::Bool(v) => mysql::Value::Int(*v as i64),
                Value::Int(v) => mysql::Value::Int(*v),
                Value::UInt(v) => mysql::Value::UInt(*v),
                Value::Float(v) => mysql::Value::Double(*v),
                Value::Text(s) => mysql::Value::Bytes(s.as_bytes().to_vec()),
            })
            .collect(),
    )
}

fn read_row(row: mysql::Row) -> DbResult<Row> {
    let mut values = Vec::with_capacity(row.len());
    for value in row.unwrap() {
        values.push(match value {
            mysql::Value::NULL => Value::Null,
            mysql::Value::Int(v) => Value::Int(v),
            mysql::Value::UInt(v) => Value::UInt(v),
            mysql::Value::Float(v) => Value::Float(v as f64),
            mysql::Value::Double(v) => Value::Float(v),
            // DECIMAL and text columns both arrive as bytes
            mysql::Value::Bytes(bytes) => Value::Text(
                String::from_utf8(bytes)
                    .map_err(|e| DatabaseError::Type(format!("non-utf8 column: {}", e)))?,
            ),
            other => {
                return Err(DatabaseError::Type(format!(
                    "unsupported column value: {:?}",
                    other
                )));
            }
        });
    }
    Ok(Row::new(values))
}

fn map_error(error: mysql::Error) -> DatabaseError {
    match &error {
        mysql::Error::MySqlError(e) => match e.code {
            // ER_DUP_ENTRY, ER_NO_REFERENCED_ROW_2, ER_ROW_IS_REFERENCED_2
            1062 | 1452 | 1451 => DatabaseError::Constraint(e.message.clone()),
            // ER_LOCK_WAIT_TIMEOUT, ER_LOCK_DEADLOCK
            1205 | 1213 => DatabaseError::Busy(e.message.clone()),
            // ER_QUERY_TIMEOUT / MAX_EXECUTION_TIME exceeded
            1907 | 3024 => DatabaseError::Timeout(e.message.clone()),
            // ER_OUT_OF_RESOURCES, ER_OUTOFMEMORY
            1040 | 1037 | 1038 => DatabaseError::InsufficientMemory(e.message.clone()),
            _ => DatabaseError::Other(e.message.clone()),
        },
        mysql::Error::IoError(e) => DatabaseError::Connection(e.to_string()),
        other => DatabaseError::Other(other.to_string()),
    }
}
