use serde::{Deserialize, Serialize};

use crate::core::{DboError, Result};

const URL_SCHEME: &str = "sqlite3:";
const MEMORY_PATH: &str = ":memory:";

/// Connection configuration for the SQLite backend
///
/// Built with the builder methods, parsed from a `sqlite3:` URL, or
/// deserialized from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Database file, or `:memory:`
    pub path: String,

    /// Log every executed statement at info level
    pub show_queries: bool,

    /// Enforce foreign key constraints
    pub foreign_keys: bool,

    /// How long to wait on a locked database, in milliseconds
    pub busy_timeout_ms: u64,

    /// Maximum number of cached ad-hoc statements
    pub statement_cache_capacity: usize,
}

impl ConnectionConfig {
    /// Create a configuration for a database file
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            show_queries: false,
            foreign_keys: true,
            busy_timeout_ms: 5000,
            statement_cache_capacity: 64,
        }
    }

    /// Create a configuration for a private in-memory database
    pub fn in_memory() -> Self {
        Self::new(MEMORY_PATH)
    }

    pub fn is_in_memory(&self) -> bool {
        self.path == MEMORY_PATH
    }

    /// Set whether executed statements are logged
    pub fn show_queries(mut self, show: bool) -> Self {
        self.show_queries = show;
        self
    }

    /// Set foreign key enforcement
    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    /// Set the busy timeout
    pub fn busy_timeout_ms(mut self, ms: u64) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    /// Set the ad-hoc statement cache capacity
    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    /// Parse from connection string
    ///
    /// Format: `sqlite3:///path/to/file.db`, `sqlite3://relative.db` or
    /// `sqlite3::memory:`
    ///
    /// # Examples
    ///
    /// ```
    /// use rustdbo::ConnectionConfig;
    ///
    /// let config = ConnectionConfig::from_url("sqlite3:///tmp/blog.db").unwrap();
    /// assert_eq!(config.path, "/tmp/blog.db");
    /// ```
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix(URL_SCHEME)
            .ok_or_else(|| DboError::Config(format!("URL must start with '{}'", URL_SCHEME)))?;

        if rest == MEMORY_PATH {
            return Ok(Self::in_memory());
        }

        let path = rest
            .strip_prefix("//")
            .ok_or_else(|| DboError::Config(format!("Invalid URL format: {}", url)))?;

        if path.is_empty() {
            return Err(DboError::Config("Database path cannot be empty".to_string()));
        }

        Ok(Self::new(path))
    }

    /// Convert to connection string
    pub fn to_url(&self) -> String {
        if self.is_in_memory() {
            format!("{}{}", URL_SCHEME, MEMORY_PATH)
        } else {
            format!("{}//{}", URL_SCHEME, self.path)
        }
    }

    /// Load a configuration from JSON text; missing keys take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(DboError::Config("Database path cannot be empty".to_string()));
        }

        if self.statement_cache_capacity == 0 {
            return Err(DboError::Config(
                "statement_cache_capacity must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert!(config.is_in_memory());
        assert!(config.foreign_keys);
        assert!(!config.show_queries);
    }

    #[test]
    fn test_builder_pattern() {
        let config = ConnectionConfig::new("blog.db")
            .show_queries(true)
            .foreign_keys(false)
            .busy_timeout_ms(100)
            .statement_cache_capacity(8);

        assert_eq!(config.path, "blog.db");
        assert!(config.show_queries);
        assert!(!config.foreign_keys);
        assert_eq!(config.busy_timeout_ms, 100);
        assert_eq!(config.statement_cache_capacity, 8);
    }

    #[test]
    fn test_from_url() {
        let config = ConnectionConfig::from_url("sqlite3:///var/data/app.db").unwrap();
        assert_eq!(config.path, "/var/data/app.db");

        let relative = ConnectionConfig::from_url("sqlite3://app.db").unwrap();
        assert_eq!(relative.path, "app.db");

        let memory = ConnectionConfig::from_url("sqlite3::memory:").unwrap();
        assert!(memory.is_in_memory());
    }

    #[test]
    fn test_invalid_url() {
        assert!(ConnectionConfig::from_url("postgres://localhost/db").is_err());
        assert!(ConnectionConfig::from_url("sqlite3:app.db").is_err());
        assert!(ConnectionConfig::from_url("sqlite3://").is_err());
    }

    #[test]
    fn test_url_round_trip() {
        let config = ConnectionConfig::new("/tmp/x.db");
        assert_eq!(config.to_url(), "sqlite3:///tmp/x.db");
        assert_eq!(ConnectionConfig::in_memory().to_url(), "sqlite3::memory:");
    }

    #[test]
    fn test_validate() {
        assert!(ConnectionConfig::new("a.db").validate().is_ok());
        assert!(ConnectionConfig::new("").validate().is_err());
        assert!(
            ConnectionConfig::new("a.db")
                .statement_cache_capacity(0)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_from_json_uses_defaults() {
        let config = ConnectionConfig::from_json(r#"{"path": "x.db", "show_queries": true}"#).unwrap();
        assert_eq!(config.path, "x.db");
        assert!(config.show_queries);
        assert!(config.foreign_keys);
        assert_eq!(config.statement_cache_capacity, 64);

        assert!(ConnectionConfig::from_json(r#"{"path": ""}"#).is_err());
    }
}
