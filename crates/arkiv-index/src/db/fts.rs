//! Full-text search shim
//!
//! The three backings disagree about name search: the embedded engine keeps
//! FTS5 virtual shadow tables, MySQL matches FULLTEXT indexes on the base
//! tables directly, and PostgreSQL keeps shadow tables with a host-tokenized
//! tsvector column. Writers call one API and never see the difference.

use super::{Database, DbResult, Dialect, Value};
use crate::id::DatabaseId;

/// Searchable object kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtsObject {
    Storage,
    Entry,
}

impl FtsObject {
    /// Shadow table on backings that keep one.
    pub fn shadow_table(self) -> &'static str {
        match self {
            FtsObject::Storage => "FTS_storages",
            FtsObject::Entry => "FTS_entries",
        }
    }

    /// Key column of the shadow table.
    pub fn key_column(self) -> &'static str {
        match self {
            FtsObject::Storage => "storageId",
            FtsObject::Entry => "entryId",
        }
    }

    /// Base-table column matched on backings without shadow rows.
    fn base_column(self) -> &'static str {
        match self {
            FtsObject::Storage => "storages.name",
            FtsObject::Entry => "entries.name",
        }
    }

    /// Base-table id column the match condition restricts.
    fn base_id(self) -> &'static str {
        match self {
            FtsObject::Storage => "storages.id",
            FtsObject::Entry => "entries.id",
        }
    }
}

/// Mirror a freshly inserted row into the name index.
pub fn insert(
    db: &mut Database,
    object: FtsObject,
    id: DatabaseId,
    name: &str,
) -> DbResult<()> {
    match db.dialect() {
        Dialect::Sqlite => {
            let sql = format!(
                "INSERT INTO {} ({}, name) VALUES (?, ?)",
                object.shadow_table(),
                object.key_column()
            );
            db.execute(&sql, &[Value::key(id), Value::text(name)])?;
        }
        Dialect::Postgres => {
            let tokens = tokenize(name).join(" ");
            let sql = format!(
                "INSERT INTO {} ({}, nameTokens) VALUES (?, CAST(? AS tsvector))",
                object.shadow_table(),
                object.key_column()
            );
            db.execute(&sql, &[Value::key(id), Value::text(tokens)])?;
        }
        // Native FULLTEXT on the base table; nothing to mirror
        Dialect::Mysql => {}
    }
    Ok(())
}

/// Replace the indexed text of a row (rename).
pub fn update(
    db: &mut Database,
    object: FtsObject,
    id: DatabaseId,
    name: &str,
) -> DbResult<()> {
    delete(db, object, id)?;
    insert(db, object, id, name)
}

/// Drop the name-index row of a deleted object.
pub fn delete(db: &mut Database, object: FtsObject, id: DatabaseId) -> DbResult<()> {
    match db.dialect() {
        Dialect::Sqlite | Dialect::Postgres => {
            let sql = format!(
                "DELETE FROM {} WHERE {}=?",
                object.shadow_table(),
                object.key_column()
            );
            db.execute(&sql, &[Value::key(id)])?;
        }
        Dialect::Mysql => {}
    }
    Ok(())
}

/// Condition fragment matching `pattern` against the object's name, with its
/// bound parameters. `None` when the pattern carries no searchable tokens
/// (callers then apply no name restriction).
pub fn match_condition(
    dialect: Dialect,
    object: FtsObject,
    pattern: &str,
) -> Option<(String, Vec<Value>)> {
    let tokens = tokenize(pattern);
    if tokens.is_empty() {
        return None;
    }
    match dialect {
        Dialect::Sqlite => {
            let query = tokens
                .iter()
                .map(|t| format!("\"{}\"*", t))
                .collect::<Vec<_>>()
                .join(" ");
            let condition = format!(
                "{} IN (SELECT {} FROM {} WHERE {} MATCH ?)",
                object.base_id(),
                object.key_column(),
                object.shadow_table(),
                object.shadow_table()
            );
            Some((condition, vec![Value::text(query)]))
        }
        Dialect::Postgres => {
            let query = tokens
                .iter()
                .map(|t| format!("'{}':*", t))
                .collect::<Vec<_>>()
                .join(" & ");
            let condition = format!(
                "{} IN (SELECT {} FROM {} WHERE nameTokens @@ to_tsquery(?))",
                object.base_id(),
                object.key_column(),
                object.shadow_table()
            );
            Some((condition, vec![Value::text(query)]))
        }
        Dialect::Mysql => {
            let query = tokens
                .iter()
                .map(|t| format!("+{}*", t))
                .collect::<Vec<_>>()
                .join(" ");
            let condition = format!(
                "MATCH ({}) AGAINST (? IN BOOLEAN MODE)",
                object.base_column()
            );
            Some((condition, vec![Value::text(query)]))
        }
    }
}

/// Split a name into searchable tokens: case folded, characters outside
/// alphanumeric and `/ . _ -` act as separators, single-character tokens are
/// dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() || matches!(ch, '/' | '.' | '_' | '-') {
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            if current.chars().count() > 1 {
                tokens.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        }
    }
    if current.chars().count() > 1 {
        tokens.push(current);
    }
    tokens
}
