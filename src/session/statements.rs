// ============================================================================
// Statement Cache
// ============================================================================
//
// Prepared statements are checked out of the cache while in use and put back
// afterwards, so a statement is never shared between two open cursors.
// Mapped statements (per table and statement kind) are kept for the session
// lifetime; ad-hoc statements are bounded by an LRU.
//
// ============================================================================

use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::connection::SqlStatement;

pub const SQL_INSERT: usize = 0;
pub const SQL_UPDATE: usize = 1;
pub const SQL_DELETE: usize = 2;
pub const SQL_DELETE_VERSIONED: usize = 3;
pub const SQL_SELECT_BY_ID: usize = 4;
pub const FIRST_SQL_SELECT_SET: usize = 5;

/// Double-quotes an identifier.
pub fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatementKey {
    /// Statement `index` of mapping `mapping`.
    Mapped(usize, usize),
    Sql(String),
}

/// A select statement kept in parts, so the count variant does not have to
/// be cut out of the rendered text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SelectSql {
    pub columns: Vec<String>,
    pub from: String,
    pub joins: Vec<String>,
    pub condition: Option<String>,
    pub order_by: Option<String>,
}

impl SelectSql {
    pub fn new(columns: Vec<String>, from: impl Into<String>) -> Self {
        Self {
            columns,
            from: from.into(),
            ..Default::default()
        }
    }

    pub fn join(mut self, join: impl Into<String>) -> Self {
        self.joins.push(join.into());
        self
    }

    pub fn condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    fn tail(&self) -> String {
        let mut sql = format!(" from {}", self.from);
        for join in &self.joins {
            sql.push_str(" join ");
            sql.push_str(join);
        }
        if let Some(condition) = &self.condition {
            sql.push_str(" where ");
            sql.push_str(condition);
        }
        sql
    }

    pub fn to_sql(&self) -> String {
        let mut sql = format!("select {}{}", self.columns.join(", "), self.tail());
        if let Some(order_by) = &self.order_by {
            sql.push_str(" order by ");
            sql.push_str(order_by);
        }
        sql
    }

    pub fn count_sql(&self) -> String {
        format!("select count(*){}", self.tail())
    }
}

pub(crate) struct StatementCache {
    mapped: HashMap<(usize, usize), Vec<Box<dyn SqlStatement>>>,
    adhoc: LruCache<String, Vec<Box<dyn SqlStatement>>>,
}

impl StatementCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            mapped: HashMap::new(),
            adhoc: LruCache::new(capacity),
        }
    }

    pub fn take(&mut self, key: &StatementKey) -> Option<Box<dyn SqlStatement>> {
        match key {
            StatementKey::Mapped(mapping, index) => {
                self.mapped.get_mut(&(*mapping, *index)).and_then(|v| v.pop())
            }
            StatementKey::Sql(sql) => self.adhoc.get_mut(sql).and_then(|v| v.pop()),
        }
    }

    pub fn put(&mut self, key: StatementKey, mut statement: Box<dyn SqlStatement>) {
        statement.reset();
        match key {
            StatementKey::Mapped(mapping, index) => {
                self.mapped.entry((mapping, index)).or_default().push(statement);
            }
            StatementKey::Sql(sql) => match self.adhoc.get_mut(&sql) {
                Some(statements) => statements.push(statement),
                None => {
                    self.adhoc.put(sql, vec![statement]);
                }
            },
        }
    }

    pub fn clear(&mut self) {
        self.mapped.clear();
        self.adhoc.clear();
    }

    pub fn adhoc_len(&self) -> usize {
        self.adhoc.len()
    }
}
