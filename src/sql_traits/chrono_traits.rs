use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

use super::{SqlValueTraits, mismatch, not_null};
use crate::connection::SqlConnection;
use crate::connection::sqlite3::{DATE_FORMAT, DATE_TIME_FORMAT};
use crate::core::value::parse_duration;
use crate::core::{DboError, Result, SqlDateTimeType, SqlValue};

fn parse_date_time(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, DATE_TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .map_err(|e| DboError::TypeMismatch(format!("invalid timestamp '{}': {}", s, e)))
}

impl SqlValueTraits for NaiveDate {
    fn sql_type(conn: &dyn SqlConnection, _size: i32) -> String {
        not_null(conn.date_time_type(SqlDateTimeType::Date))
    }

    fn to_value(&self) -> SqlValue {
        SqlValue::Date(*self)
    }

    fn from_value(value: SqlValue) -> Result<Self> {
        match value {
            SqlValue::Date(d) => Ok(d),
            SqlValue::DateTime(dt) => Ok(dt.date()),
            SqlValue::Text(s) => NaiveDate::parse_from_str(&s, DATE_FORMAT)
                .map_err(|e| DboError::TypeMismatch(format!("invalid date '{}': {}", s, e))),
            other => Err(mismatch("date", &other)),
        }
    }
}

impl SqlValueTraits for NaiveDateTime {
    fn sql_type(conn: &dyn SqlConnection, _size: i32) -> String {
        not_null(conn.date_time_type(SqlDateTimeType::DateTime))
    }

    fn to_value(&self) -> SqlValue {
        SqlValue::DateTime(*self)
    }

    fn from_value(value: SqlValue) -> Result<Self> {
        match value {
            SqlValue::DateTime(dt) => Ok(dt),
            SqlValue::Text(s) => parse_date_time(&s),
            other => Err(mismatch("datetime", &other)),
        }
    }
}

/// Stored as a UTC timestamp without offset.
impl SqlValueTraits for DateTime<Utc> {
    fn sql_type(conn: &dyn SqlConnection, size: i32) -> String {
        NaiveDateTime::sql_type(conn, size)
    }

    fn to_value(&self) -> SqlValue {
        SqlValue::DateTime(self.naive_utc())
    }

    fn from_value(value: SqlValue) -> Result<Self> {
        NaiveDateTime::from_value(value).map(|dt| dt.and_utc())
    }
}

impl SqlValueTraits for Duration {
    fn sql_type(conn: &dyn SqlConnection, _size: i32) -> String {
        not_null(conn.date_time_type(SqlDateTimeType::Time))
    }

    fn to_value(&self) -> SqlValue {
        SqlValue::Time(*self)
    }

    fn from_value(value: SqlValue) -> Result<Self> {
        match value {
            SqlValue::Time(t) => Ok(t),
            SqlValue::Text(s) => parse_duration(&s)
                .ok_or_else(|| DboError::TypeMismatch(format!("invalid time '{}'", s))),
            other => Err(mismatch("time", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_from_stored_text() {
        let d = NaiveDate::from_value(SqlValue::Text("2023-11-05".into())).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2023, 11, 5).unwrap());
        assert!(NaiveDate::from_value(SqlValue::Text("yesterday".into())).is_err());
    }

    #[test]
    fn test_timestamp_accepts_both_separators() {
        let expected = NaiveDate::from_ymd_opt(2023, 1, 2)
            .unwrap()
            .and_hms_milli_opt(3, 4, 5, 600)
            .unwrap();
        let spaced = NaiveDateTime::from_value(SqlValue::Text("2023-01-02 03:04:05.600".into()));
        let iso = NaiveDateTime::from_value(SqlValue::Text("2023-01-02T03:04:05.600".into()));
        assert_eq!(spaced.unwrap(), expected);
        assert_eq!(iso.unwrap(), expected);
    }

    #[test]
    fn test_utc_timestamp() {
        let now = Utc::now();
        let back = DateTime::<Utc>::from_value(now.to_value()).unwrap();
        assert_eq!(back, now);
    }

    #[test]
    fn test_duration_from_text() {
        let t = Duration::from_value(SqlValue::Text("00:01:30.250".into())).unwrap();
        assert_eq!(t, Duration::milliseconds(90_250));
    }
}
