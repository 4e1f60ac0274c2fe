use std::ops::{Deref, DerefMut};

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{SqlValueTraits, mismatch, not_null};
use crate::connection::SqlConnection;
use crate::core::{Result, SqlValue};

/// Any serde type, stored as JSON text in a single column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Json<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for Json<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

impl<T: Serialize + DeserializeOwned> SqlValueTraits for Json<T> {
    fn sql_type(conn: &dyn SqlConnection, size: i32) -> String {
        not_null(&conn.text_type(size))
    }

    /// `Null` when the value cannot be serialized; `try_to_value` reports
    /// the error instead.
    fn to_value(&self) -> SqlValue {
        self.try_to_value().unwrap_or_else(|e| {
            log::warn!("Failed to serialize JSON field: {}", e);
            SqlValue::Null
        })
    }

    fn try_to_value(&self) -> Result<SqlValue> {
        Ok(SqlValue::Text(serde_json::to_string(&self.0)?))
    }

    fn from_value(value: SqlValue) -> Result<Self> {
        match value {
            SqlValue::Text(text) => Ok(Json(serde_json::from_str(&text)?)),
            other => Err(mismatch("json text", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Settings {
        theme: String,
        tags: Vec<String>,
    }

    #[test]
    fn test_json_column() {
        let settings = Json(Settings {
            theme: "dark".into(),
            tags: vec!["a".into(), "b".into()],
        });

        let value = settings.to_value();
        assert_eq!(
            value,
            SqlValue::Text(r#"{"theme":"dark","tags":["a","b"]}"#.into())
        );
        assert_eq!(Json::<Settings>::from_value(value).unwrap(), settings);
    }

    #[test]
    fn test_unserializable_value_is_serialization_error() {
        let mut grid = BTreeMap::new();
        grid.insert((0, 1), 5);
        let value = Json(grid);

        let err = value.try_to_value().unwrap_err();
        assert!(matches!(err, crate::core::DboError::Serialization(_)));
        assert_eq!(value.to_value(), SqlValue::Null);
    }

    #[test]
    fn test_invalid_json_is_serialization_error() {
        let err = Json::<Settings>::from_value(SqlValue::Text("{".into())).unwrap_err();
        assert!(matches!(err, crate::core::DboError::Serialization(_)));
    }
}
