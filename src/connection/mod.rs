pub mod config;
pub mod sqlite3;

use crate::core::{Result, SqlDateTimeType, SqlValue};

pub use config::ConnectionConfig;
pub use sqlite3::Sqlite3;

/// A prepared statement.
///
/// Parameters and result columns are addressed by 0-based position. A
/// statement is reused after `reset()`; the session keeps statements it is
/// not using in its cache.
pub trait SqlStatement {
    /// Clears bound parameters and any pending result rows.
    fn reset(&mut self);

    fn bind(&mut self, column: usize, value: SqlValue);

    fn bind_null(&mut self, column: usize) {
        self.bind(column, SqlValue::Null);
    }

    fn execute(&mut self) -> Result<()>;

    /// Advances to the next result row. Returns false past the last row.
    fn next_row(&mut self) -> Result<bool>;

    /// Value of a column in the current row.
    fn get_result(&self, column: usize) -> Result<SqlValue>;

    fn affected_row_count(&self) -> usize;

    fn inserted_id(&self) -> i64;

    fn sql(&self) -> &str;

    /// Number of columns in a result row.
    fn column_count(&self) -> usize;

    /// Column names of the result rows.
    fn column_names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A connection to one database, owned by a `Session`.
///
/// The dialect hooks have defaults matching SQLite.
pub trait SqlConnection {
    /// Executes a statement that returns no rows, typically DDL.
    fn execute_sql(&mut self, sql: &str) -> Result<()>;

    fn start_transaction(&mut self) -> Result<()>;

    fn commit_transaction(&mut self) -> Result<()>;

    fn rollback_transaction(&mut self) -> Result<()>;

    fn prepare_statement(&mut self, sql: &str) -> Result<Box<dyn SqlStatement>>;

    fn autoincrement_type(&self) -> &'static str {
        "integer"
    }

    fn autoincrement_sql(&self) -> &'static str {
        "autoincrement"
    }

    /// Suffix for insert statements that should return the new id.
    fn autoincrement_insert_suffix(&self, _id_name: &str) -> String {
        String::new()
    }

    fn date_time_type(&self, kind: SqlDateTimeType) -> &'static str {
        match kind {
            SqlDateTimeType::Date => "date",
            SqlDateTimeType::DateTime => "datetime",
            SqlDateTimeType::Time => "text",
        }
    }

    fn blob_type(&self) -> &'static str {
        "blob"
    }

    fn text_type(&self, size: i32) -> String {
        if size > 0 {
            format!("varchar({})", size)
        } else {
            "text".to_string()
        }
    }

    fn long_long_type(&self) -> &'static str {
        "integer"
    }

    fn boolean_type(&self) -> &'static str {
        "boolean"
    }

    /// Whether executed statements are logged at info level.
    fn show_queries(&self) -> bool {
        false
    }
}
