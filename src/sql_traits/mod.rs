// ============================================================================
// Value Traits
// ============================================================================
//
// Conversion between Rust field types and statement values, plus the DDL
// column type each field type maps to.
//
// ============================================================================

mod chrono_traits;
mod json;
mod std_traits;

pub use json::Json;

use crate::connection::SqlConnection;
use crate::core::{DboError, Result, SqlValue};

const NOT_NULL: &str = " not null";

/// A type that can be stored in a single column.
pub trait SqlValueTraits: Sized {
    /// Column type for DDL, including `not null` unless the type is nullable.
    ///
    /// `size` is the declared size of the field, or -1 when none was given.
    fn sql_type(conn: &dyn SqlConnection, size: i32) -> String;

    fn to_value(&self) -> SqlValue;

    /// Like `to_value`, for types whose conversion can fail. Statements bind
    /// values through this.
    fn try_to_value(&self) -> Result<SqlValue> {
        Ok(self.to_value())
    }

    fn from_value(value: SqlValue) -> Result<Self>;
}

impl<T: SqlValueTraits> SqlValueTraits for Option<T> {
    fn sql_type(conn: &dyn SqlConnection, size: i32) -> String {
        let sql_type = T::sql_type(conn, size);
        match sql_type.strip_suffix(NOT_NULL) {
            Some(nullable) => nullable.to_string(),
            None => sql_type,
        }
    }

    fn to_value(&self) -> SqlValue {
        match self {
            Some(v) => v.to_value(),
            None => SqlValue::Null,
        }
    }

    fn try_to_value(&self) -> Result<SqlValue> {
        match self {
            Some(v) => v.try_to_value(),
            None => Ok(SqlValue::Null),
        }
    }

    fn from_value(value: SqlValue) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

pub(crate) fn not_null(sql_type: &str) -> String {
    format!("{}{}", sql_type, NOT_NULL)
}

/// Strips a trailing `not null`, giving the bare column type.
pub(crate) fn nullable(sql_type: &str) -> &str {
    sql_type.strip_suffix(NOT_NULL).unwrap_or(sql_type)
}

pub(crate) fn mismatch(expected: &str, got: &SqlValue) -> DboError {
    DboError::TypeMismatch(format!("expected {}, got {} ({})", expected, got.type_name(), got))
}
