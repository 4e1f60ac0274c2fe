use uuid::Uuid;

use super::{SqlValueTraits, mismatch, not_null};
use crate::connection::SqlConnection;
use crate::core::{DboError, Result, SqlValue};

impl SqlValueTraits for bool {
    fn sql_type(conn: &dyn SqlConnection, _size: i32) -> String {
        not_null(conn.boolean_type())
    }

    fn to_value(&self) -> SqlValue {
        SqlValue::Boolean(*self)
    }

    fn from_value(value: SqlValue) -> Result<Self> {
        match value {
            SqlValue::Boolean(b) => Ok(b),
            SqlValue::Integer(i) => Ok(i != 0),
            other => Err(mismatch("boolean", &other)),
        }
    }
}

macro_rules! impl_integer_traits {
    ($ty:ty, |$conn:ident| $sql:expr) => {
        impl SqlValueTraits for $ty {
            fn sql_type($conn: &dyn SqlConnection, _size: i32) -> String {
                not_null($sql)
            }

            fn to_value(&self) -> SqlValue {
                SqlValue::Integer(*self as i64)
            }

            fn from_value(value: SqlValue) -> Result<Self> {
                let i = value
                    .as_i64()
                    .ok_or_else(|| mismatch(stringify!($ty), &value))?;
                <$ty>::try_from(i).map_err(|_| {
                    DboError::TypeMismatch(format!("{} out of range for {}", i, stringify!($ty)))
                })
            }
        }
    };
}

impl_integer_traits!(i16, |_conn| "smallint");
impl_integer_traits!(i32, |_conn| "integer");
impl_integer_traits!(i64, |conn| conn.long_long_type());

impl SqlValueTraits for f64 {
    fn sql_type(_conn: &dyn SqlConnection, _size: i32) -> String {
        not_null("double precision")
    }

    fn to_value(&self) -> SqlValue {
        SqlValue::Float(*self)
    }

    fn from_value(value: SqlValue) -> Result<Self> {
        value.as_f64().ok_or_else(|| mismatch("double", &value))
    }
}

impl SqlValueTraits for f32 {
    fn sql_type(_conn: &dyn SqlConnection, _size: i32) -> String {
        not_null("real")
    }

    fn to_value(&self) -> SqlValue {
        SqlValue::Float(*self as f64)
    }

    fn from_value(value: SqlValue) -> Result<Self> {
        value
            .as_f64()
            .map(|f| f as f32)
            .ok_or_else(|| mismatch("real", &value))
    }
}

impl SqlValueTraits for String {
    fn sql_type(conn: &dyn SqlConnection, size: i32) -> String {
        not_null(&conn.text_type(size))
    }

    fn to_value(&self) -> SqlValue {
        SqlValue::Text(self.clone())
    }

    fn from_value(value: SqlValue) -> Result<Self> {
        match value {
            SqlValue::Text(s) => Ok(s),
            other => Err(mismatch("text", &other)),
        }
    }
}

impl SqlValueTraits for Vec<u8> {
    fn sql_type(conn: &dyn SqlConnection, _size: i32) -> String {
        not_null(conn.blob_type())
    }

    fn to_value(&self) -> SqlValue {
        SqlValue::Blob(self.clone())
    }

    fn from_value(value: SqlValue) -> Result<Self> {
        match value {
            SqlValue::Blob(b) => Ok(b),
            SqlValue::Text(s) => Ok(s.into_bytes()),
            other => Err(mismatch("blob", &other)),
        }
    }
}

impl SqlValueTraits for Uuid {
    fn sql_type(conn: &dyn SqlConnection, _size: i32) -> String {
        not_null(&conn.text_type(36))
    }

    fn to_value(&self) -> SqlValue {
        SqlValue::Text(self.to_string())
    }

    fn from_value(value: SqlValue) -> Result<Self> {
        match value {
            SqlValue::Text(s) => Uuid::parse_str(&s)
                .map_err(|e| DboError::TypeMismatch(format!("invalid uuid '{}': {}", s, e))),
            SqlValue::Blob(b) => Uuid::from_slice(&b)
                .map_err(|e| DboError::TypeMismatch(format!("invalid uuid bytes: {}", e))),
            other => Err(mismatch("uuid", &other)),
        }
    }
}
