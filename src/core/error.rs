use thiserror::Error;

#[derive(Error, Debug)]
pub enum DboError {
    #[error("Class '{0}' was not mapped")]
    NotMapped(String),

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Stale object, {table}: id = {id}, version = {version}")]
    StaleObject {
        table: String,
        id: String,
        version: i64,
    },

    #[error("Object not found in {table}: id = {id}")]
    ObjectNotFound { table: String, id: String },

    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Operation requires an active transaction")]
    NoTransaction,

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("No statement: {0}")]
    NoStatement(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Invalid usage: {0}")]
    Usage(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, DboError>;

impl DboError {
    /// True for optimistic-concurrency conflicts; callers may reload and retry.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleObject { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ObjectNotFound { .. })
    }
}

impl<T> From<std::sync::PoisonError<T>> for DboError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<rusqlite::Error> for DboError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for DboError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
