// ============================================================================
// SQLite Backend
// ============================================================================
//
// SqlConnection/SqlStatement over rusqlite. A statement buffers its result
// rows when executed, so a collection may keep iterating while other
// statements run on the same connection.
//
// Storage conventions:
// - booleans are 0/1 integers
// - dates and timestamps are ISO-8601 text
// - durations are `HH:MM:SS.mmm` text
//
// ============================================================================

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, trace};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, params_from_iter};

use super::{ConnectionConfig, SqlConnection, SqlStatement};
use crate::core::value::format_duration;
use crate::core::{DboError, Result, SqlValue};

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";
pub(crate) const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

fn log_sql(show_queries: bool, sql: &str) {
    if show_queries {
        info!(target: "rustdbo::sql", "{}", sql);
    } else {
        trace!(target: "rustdbo::sql", "{}", sql);
    }
}

/// SQLite connection
pub struct Sqlite3 {
    conn: Arc<Mutex<Connection>>,
    show_queries: bool,
}

impl Sqlite3 {
    /// Open the database described by `config`
    pub fn open(config: &ConnectionConfig) -> Result<Self> {
        config.validate()?;

        let conn = if config.is_in_memory() {
            Connection::open_in_memory()?
        } else {
            Connection::open(&config.path)?
        };

        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        if config.foreign_keys {
            conn.execute_batch("PRAGMA foreign_keys = ON")?;
        }

        debug!("Opened sqlite3 database {}", config.path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            show_queries: config.show_queries,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(&ConnectionConfig::in_memory())
    }

    pub fn set_show_queries(&mut self, show: bool) {
        self.show_queries = show;
    }

    fn batch(&mut self, sql: &str) -> Result<()> {
        log_sql(self.show_queries, sql);
        let conn = self.conn.lock()?;
        conn.execute_batch(sql)?;
        Ok(())
    }
}

impl SqlConnection for Sqlite3 {
    fn execute_sql(&mut self, sql: &str) -> Result<()> {
        self.batch(sql)
    }

    fn start_transaction(&mut self) -> Result<()> {
        self.batch("begin transaction")
    }

    fn commit_transaction(&mut self) -> Result<()> {
        self.batch("commit transaction")
    }

    fn rollback_transaction(&mut self) -> Result<()> {
        self.batch("rollback transaction")
    }

    fn prepare_statement(&mut self, sql: &str) -> Result<Box<dyn SqlStatement>> {
        // Compile once up front so syntax errors surface at prepare time.
        {
            let conn = self.conn.lock()?;
            conn.prepare_cached(sql)?;
        }

        Ok(Box::new(Sqlite3Statement {
            conn: Arc::clone(&self.conn),
            sql: sql.to_string(),
            params: Vec::new(),
            columns: Vec::new(),
            rows: Vec::new(),
            current: None,
            affected: 0,
            last_id: -1,
            show_queries: self.show_queries,
        }))
    }

    fn show_queries(&self) -> bool {
        self.show_queries
    }
}

struct Sqlite3Statement {
    conn: Arc<Mutex<Connection>>,
    sql: String,
    params: Vec<Value>,
    columns: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
    current: Option<usize>,
    affected: usize,
    last_id: i64,
    show_queries: bool,
}

fn to_sqlite(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Integer(i),
        SqlValue::Float(f) => Value::Real(f),
        SqlValue::Text(s) => Value::Text(s),
        SqlValue::Boolean(b) => Value::Integer(b as i64),
        SqlValue::Blob(b) => Value::Blob(b),
        SqlValue::Date(d) => Value::Text(d.format(DATE_FORMAT).to_string()),
        SqlValue::DateTime(dt) => Value::Text(dt.format(DATE_TIME_FORMAT).to_string()),
        SqlValue::Time(t) => Value::Text(format_duration(&t)),
    }
}

fn from_sqlite(value: ValueRef<'_>) -> Result<SqlValue> {
    Ok(match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(f) => SqlValue::Float(f),
        ValueRef::Text(t) => {
            let text = std::str::from_utf8(t)
                .map_err(|e| DboError::TypeMismatch(format!("text column is not valid UTF-8: {}", e)))?;
            SqlValue::Text(text.to_string())
        }
        ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
    })
}

impl SqlStatement for Sqlite3Statement {
    fn reset(&mut self) {
        self.params.clear();
        self.rows.clear();
        self.current = None;
        self.affected = 0;
    }

    fn bind(&mut self, column: usize, value: SqlValue) {
        if self.params.len() <= column {
            self.params.resize(column + 1, Value::Null);
        }
        self.params[column] = to_sqlite(value);
    }

    fn execute(&mut self) -> Result<()> {
        log_sql(self.show_queries, &self.sql);

        self.rows.clear();
        self.current = None;

        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare_cached(&self.sql)?;
        let column_count = stmt.column_count();

        if column_count > 0 {
            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
            let mut rows = Vec::new();
            let mut query_rows = stmt.query(params_from_iter(self.params.iter()))?;
            while let Some(row) = query_rows.next()? {
                let mut values = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    values.push(from_sqlite(row.get_ref(i)?)?);
                }
                rows.push(values);
            }
            drop(query_rows);

            self.columns = columns;
            self.affected = rows.len();
            self.rows = rows;
        } else {
            self.affected = stmt.execute(params_from_iter(self.params.iter()))?;
            self.last_id = conn.last_insert_rowid();
        }

        Ok(())
    }

    fn next_row(&mut self) -> Result<bool> {
        let next = match self.current {
            None => 0,
            Some(i) => i + 1,
        };

        if next < self.rows.len() {
            self.current = Some(next);
            Ok(true)
        } else {
            self.current = Some(self.rows.len());
            Ok(false)
        }
    }

    fn get_result(&self, column: usize) -> Result<SqlValue> {
        let row = self
            .current
            .and_then(|i| self.rows.get(i))
            .ok_or_else(|| DboError::NoStatement(format!("no current row for: {}", self.sql)))?;

        row.get(column).cloned().ok_or_else(|| {
            DboError::Backend(format!("column {} out of range for: {}", column, self.sql))
        })
    }

    fn affected_row_count(&self) -> usize {
        self.affected
    }

    fn inserted_id(&self) -> i64 {
        self.last_id
    }

    fn sql(&self) -> &str {
        &self.sql
    }

    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_buffers_rows() {
        let mut conn = Sqlite3::open_in_memory().unwrap();
        conn.execute_sql("create table t (a integer, b text)").unwrap();

        let mut insert = conn.prepare_statement("insert into t (a, b) values (?, ?)").unwrap();
        for i in 0..3 {
            insert.reset();
            insert.bind(0, SqlValue::Integer(i));
            insert.bind(1, SqlValue::Text(format!("row{}", i)));
            insert.execute().unwrap();
            assert_eq!(insert.affected_row_count(), 1);
            assert_eq!(insert.inserted_id(), i + 1);
        }

        let mut select = conn.prepare_statement("select a, b from t order by a").unwrap();
        select.execute().unwrap();
        assert_eq!(select.column_count(), 2);

        // A second statement runs while the first still has rows pending.
        let mut count = conn.prepare_statement("select count(*) from t").unwrap();
        count.execute().unwrap();
        assert!(count.next_row().unwrap());
        assert_eq!(count.get_result(0).unwrap(), SqlValue::Integer(3));

        let mut seen = Vec::new();
        while select.next_row().unwrap() {
            seen.push(select.get_result(1).unwrap());
        }
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2], SqlValue::Text("row2".into()));
        assert!(select.get_result(0).is_err());
    }

    #[test]
    fn test_bind_converts_storage_formats() {
        let mut conn = Sqlite3::open_in_memory().unwrap();
        conn.execute_sql("create table t (flag boolean, day date)").unwrap();

        let day = chrono::NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let mut insert = conn.prepare_statement("insert into t values (?, ?)").unwrap();
        insert.bind(0, SqlValue::Boolean(true));
        insert.bind(1, SqlValue::Date(day));
        insert.execute().unwrap();

        let mut select = conn.prepare_statement("select flag, day from t").unwrap();
        select.execute().unwrap();
        assert!(select.next_row().unwrap());
        assert_eq!(select.get_result(0).unwrap(), SqlValue::Integer(1));
        assert_eq!(select.get_result(1).unwrap(), SqlValue::Text("2024-02-29".into()));
    }

    #[test]
    fn test_invalid_utf8_text_is_type_mismatch() {
        let mut conn = Sqlite3::open_in_memory().unwrap();
        let mut select = conn.prepare_statement("select cast(x'ff00fe' as text)").unwrap();
        let err = select.execute().unwrap_err();
        assert!(matches!(err, DboError::TypeMismatch(_)));
    }

    #[test]
    fn test_prepare_reports_syntax_errors() {
        let mut conn = Sqlite3::open_in_memory().unwrap();
        assert!(conn.prepare_statement("selec nothing").is_err());
    }
}
