use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::SqlPoolError;

/// The database backends a dispatcher can be configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// `SQLite` database; `name` is the database file path
    Sqlite,
}

/// Settings consumed when a dispatcher is built: where to connect, how many
/// workers to start and how writes are batched into transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub db_type: DatabaseType,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Schema name, or file path for file-based backends
    pub name: String,
    /// Number of workers, each with its own connection
    pub connections_count: usize,
    /// Asynchronous queries per transaction. Values above 1 disable
    /// autocommit and commit every worker once the threshold is reached.
    pub queries_per_transaction: u32,
    /// Extra connection attempts per worker before giving up
    pub connect_retries: u32,
    pub connect_retry_delay_ms: u64,
    /// Bounded wait for each worker when the dispatcher finishes
    pub finish_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: DatabaseType::Sqlite,
            host: "localhost".into(),
            port: 3306,
            user: String::new(),
            password: String::new(),
            name: String::new(),
            connections_count: 1,
            queries_per_transaction: 1,
            connect_retries: 0,
            connect_retry_delay_ms: 5000,
            finish_timeout_secs: 20,
        }
    }
}

impl DatabaseConfig {
    #[must_use]
    pub fn builder(name: impl Into<String>) -> DatabaseConfigBuilder {
        DatabaseConfigBuilder::new(name)
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns `SqlPoolError::ConfigError` if the JSON is malformed or the
    /// resulting configuration is invalid.
    pub fn from_json_str(json: &str) -> Result<Self, SqlPoolError> {
        let config: DatabaseConfig = serde_json::from_str(json)
            .map_err(|e| SqlPoolError::ConfigError(format!("invalid database config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns `SqlPoolError::ConfigError` when no worker would be started.
    pub fn validate(&self) -> Result<(), SqlPoolError> {
        if self.connections_count == 0 {
            return Err(SqlPoolError::ConfigError(
                "connections_count must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Whether asynchronous queries are grouped into explicit transactions.
    #[must_use]
    pub fn batches_transactions(&self) -> bool {
        self.queries_per_transaction > 1
    }

    #[must_use]
    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    #[must_use]
    pub fn finish_timeout(&self) -> Duration {
        Duration::from_secs(self.finish_timeout_secs)
    }
}

/// Fluent builder for [`DatabaseConfig`].
#[derive(Debug, Clone)]
pub struct DatabaseConfigBuilder {
    config: DatabaseConfig,
}

impl DatabaseConfigBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: DatabaseConfig {
                name: name.into(),
                ..DatabaseConfig::default()
            },
        }
    }

    #[must_use]
    pub fn db_type(mut self, db_type: DatabaseType) -> Self {
        self.config.db_type = db_type;
        self
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.host = host.into();
        self.config.port = port;
        self
    }

    #[must_use]
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.user = user.into();
        self.config.password = password.into();
        self
    }

    #[must_use]
    pub fn connections(mut self, count: usize) -> Self {
        self.config.connections_count = count;
        self
    }

    #[must_use]
    pub fn queries_per_transaction(mut self, count: u32) -> Self {
        self.config.queries_per_transaction = count;
        self
    }

    #[must_use]
    pub fn connect_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.config.connect_retries = retries;
        self.config.connect_retry_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn finish_timeout(mut self, timeout: Duration) -> Self {
        self.config.finish_timeout_secs = timeout.as_secs();
        self
    }

    /// # Errors
    /// Returns `SqlPoolError::ConfigError` if the configuration is invalid.
    pub fn finish(self) -> Result<DatabaseConfig, SqlPoolError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
