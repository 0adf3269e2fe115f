//! Filter and ordering builder
//!
//! Composes parameterized WHERE and ORDER BY clauses. Conditions that do not
//! hold contribute nothing; enumeration sets render as `IN (...)` lists over
//! their members. Values only ever travel as bound parameters.

use super::Value;
use crate::types::SortOrdering;

/// Join operator between clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOp {
    And,
    Or,
}

impl JoinOp {
    fn keyword(self) -> &'static str {
        match self {
            JoinOp::And => " AND ",
            JoinOp::Or => " OR ",
        }
    }
}

/// Parameterized WHERE-clause builder.
#[derive(Debug, Default)]
pub struct FilterBuilder {
    clause: String,
    params: Vec<Value>,
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `clause` with its parameters when `condition` holds.
    pub fn add(
        &mut self,
        condition: bool,
        join: JoinOp,
        clause: &str,
        params: Vec<Value>,
    ) -> &mut Self {
        if !condition {
            return self;
        }
        if !self.clause.is_empty() {
            self.clause.push_str(join.keyword());
        }
        self.clause.push('(');
        self.clause.push_str(clause);
        self.clause.push(')');
        self.params.extend(params);
        self
    }

    /// Append unconditionally, joined with AND.
    pub fn and(&mut self, clause: &str, params: Vec<Value>) -> &mut Self {
        self.add(true, JoinOp::And, clause, params)
    }

    /// Append when `condition` holds, joined with AND.
    pub fn and_if(&mut self, condition: bool, clause: &str, params: Vec<Value>) -> &mut Self {
        self.add(condition, JoinOp::And, clause, params)
    }

    /// Render `column IN (v1, v2, ...)` over the set members. An empty set
    /// contributes nothing (it means "no restriction" to every caller).
    pub fn and_in(&mut self, column: &str, values: &[i64]) -> &mut Self {
        if values.is_empty() {
            return self;
        }
        let placeholders = vec!["?"; values.len()].join(",");
        let clause = format!("{} IN ({})", column, placeholders);
        let params = values.iter().map(|v| Value::Int(*v)).collect();
        self.add(true, JoinOp::And, &clause, params)
    }

    pub fn is_empty(&self) -> bool {
        self.clause.is_empty()
    }

    /// The bare condition text, `1=1` when nothing was added.
    pub fn clause(&self) -> String {
        if self.clause.is_empty() {
            "1=1".to_string()
        } else {
            self.clause.clone()
        }
    }

    /// `WHERE ...` or the empty string.
    pub fn where_clause(&self) -> String {
        if self.clause.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clause)
        }
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn into_parts(self) -> (String, Vec<Value>) {
        (self.clause, self.params)
    }
}

/// Render an ORDER BY clause for a sort column, or nothing.
pub fn order_clause(column: Option<&str>, ordering: SortOrdering) -> String {
    match (column, ordering) {
        (Some(column), SortOrdering::Ascending) => format!("ORDER BY {} ASC", column),
        (Some(column), SortOrdering::Descending) => format!("ORDER BY {} DESC", column),
        _ => String::new(),
    }
}

/// Render LIMIT/OFFSET. Every engine accepts `LIMIT n OFFSET m`; an offset
/// without a limit needs an explicit maximum on some of them.
pub fn limit_clause(offset: u64, limit: Option<u64>) -> String {
    match (offset, limit) {
        (0, None) => String::new(),
        (0, Some(limit)) => format!("LIMIT {}", limit),
        (offset, Some(limit)) => format!("LIMIT {} OFFSET {}", limit, offset),
        (offset, None) => format!("LIMIT {} OFFSET {}", i64::MAX, offset),
    }
}
