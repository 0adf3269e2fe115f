//! Client/server engine backing (PostgreSQL)
//!
//! Statements arrive with `?` placeholders and are rewritten to `$n` before
//! dispatch. Inserts return the surrogate key via `RETURNING id`.

use std::time::Duration;

use postgres::error::SqlState;
use postgres::types::{ToSql, Type};
use postgres::{Client, NoTls};

use super::{Backend, DatabaseError, DbResult, Dialect, Row, Value};
use crate::id::DatabaseId;

pub(crate) struct PostgresBackend {
    client: Client,
}

impl PostgresBackend {
    pub(crate) fn connect(uri: &str, timeout: Duration) -> DbResult<Self> {
        let mut client = Client::connect(uri, NoTls).map_err(map_error)?;
        client
            .batch_execute(&format!(
                "SET statement_timeout = {}",
                timeout.as_millis()
            ))
            .map_err(map_error)?;
        Ok(Self { client })
    }

    fn bind<'a>(
        params: &'a [Box<dyn ToSql + Sync>],
    ) -> Vec<&'a (dyn ToSql + Sync)> {
        params.iter().map(|p| p.as_ref()).collect()
    }
}

impl Backend for PostgresBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> DbResult<u64> {
        let sql = rewrite_placeholders(sql);
        let owned = to_sql_params(params);
        self.client
            .execute(&sql, &Self::bind(&owned))
            .map_err(map_error)
    }

    fn insert(&mut self, sql: &str, params: &[Value]) -> DbResult<DatabaseId> {
        let sql = format!("{} RETURNING id", rewrite_placeholders(sql));
        let owned = to_sql_params(params);
        let row = self
            .client
            .query_one(&sql, &Self::bind(&owned))
            .map_err(map_error)?;
        row.try_get::<_, i64>(0).map_err(map_error)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        let sql = rewrite_placeholders(sql);
        let owned = to_sql_params(params);
        let rows = self
            .client
            .query(&sql, &Self::bind(&owned))
            .map_err(map_error)?;

        rows.iter().map(read_row).collect()
    }

    fn execute_script(&mut self, sql: &str) -> DbResult<()> {
        self.client.batch_execute(sql).map_err(map_error)
    }
}

/// Rewrite `?` placeholders to `$1..$n`, leaving quoted literals alone.
fn rewrite_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    let mut in_literal = false;
    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_literal = !in_literal;
                out.push(ch);
            }
            '?' if !in_literal => {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            }
            _ => out.push(ch),
        }
    }
    out
}

fn to_sql_params(params: &[Value]) -> Vec<Box<dyn ToSql + Sync>> {
    params
        .iter()
        .map(|value| -> Box<dyn ToSql + Sync> {
            match value {
                Value::Null => Box::new(Option::<String>::None),
                Value::Bool(v) => Box::new(*v as i64),
                Value::Int(v) => Box::new(*v),
                Value::UInt(v) => Box::new(*v as i64),
                Value::Float(v) => Box::new(*v),
                Value::Text(s) => Box::new(s.clone()),
            }
        })
        .collect()
}

fn read_row(row: &postgres::Row) -> DbResult<Row> {
    let mut values = Vec::with_capacity(row.len());
    for (index, column) in row.columns().iter().enumerate() {
        let column_type = column.type_();
        let value = if *column_type == Type::INT2 {
            row.try_get::<_, Option<i16>>(index)
                .map_err(map_error)?
                .map(|v| Value::Int(v as i64))
        } else if *column_type == Type::INT4 {
            row.try_get::<_, Option<i32>>(index)
                .map_err(map_error)?
                .map(|v| Value::Int(v as i64))
        } else if *column_type == Type::INT8 {
            row.try_get::<_, Option<i64>>(index)
                .map_err(map_error)?
                .map(Value::Int)
        } else if *column_type == Type::BOOL {
            row.try_get::<_, Option<bool>>(index)
                .map_err(map_error)?
                .map(Value::Bool)
        } else if *column_type == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(index)
                .map_err(map_error)?
                .map(|v| Value::Float(v as f64))
        } else if *column_type == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(index)
                .map_err(map_error)?
                .map(Value::Float)
        } else if *column_type == Type::TEXT
            || *column_type == Type::VARCHAR
            || *column_type == Type::BPCHAR
            || *column_type == Type::NAME
        {
            row.try_get::<_, Option<String>>(index)
                .map_err(map_error)?
                .map(Value::Text)
        } else {
            return Err(DatabaseError::Type(format!(
                "unsupported column type {} at index {}",
                column_type, index
            )));
        };
        values.push(value.unwrap_or(Value::Null));
    }
    Ok(Row::new(values))
}

fn map_error(error: postgres::Error) -> DatabaseError {
    if error.is_closed() {
        return DatabaseError::Connection(error.to_string());
    }
    match error.code() {
        Some(state) if *state == SqlState::UNIQUE_VIOLATION => {
            DatabaseError::Constraint(error.to_string())
        }
        Some(state) if *state == SqlState::FOREIGN_KEY_VIOLATION => {
            DatabaseError::Constraint(error.to_string())
        }
        Some(state) if *state == SqlState::QUERY_CANCELED => {
            DatabaseError::Timeout(error.to_string())
        }
        Some(state)
            if *state == SqlState::LOCK_NOT_AVAILABLE
                || *state == SqlState::T_R_DEADLOCK_DETECTED
                || *state == SqlState::T_R_SERIALIZATION_FAILURE =>
        {
            DatabaseError::Busy(error.to_string())
        }
        Some(state) if *state == SqlState::OUT_OF_MEMORY => {
            DatabaseError::InsufficientMemory(error.to_string())
        }
        _ => DatabaseError::Other(error.to_string()),
    }
}
