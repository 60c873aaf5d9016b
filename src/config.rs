/*!
Store configuration: default thread, logical table name, and the validation
applied before any connection or query is issued.

Table names cannot be passed as bound parameters, so they are interpolated
directly into schema/DML text. [`TableName::parse`] is therefore an injection
defense, not cosmetic normalization: every name is normalized and checked
against an alphanumeric-plus-underscore alphabet, and anything else fails
with a configuration error before any I/O happens.
*/

use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

/// Logical table name used when none is configured.
pub const DEFAULT_TABLE: &str = "checkpoints";

/// Thread id used when neither the ref nor the config carries one.
pub const DEFAULT_THREAD: &str = "default";

/// Configuration failures, surfaced synchronously before any I/O.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("invalid table name {name:?}")]
    #[diagnostic(
        code(loompoint::config::table_name),
        help("Table names may only contain ASCII letters, digits, and underscores after normalization.")
    )]
    InvalidTableName { name: String },

    #[error("invalid connection config: {message}")]
    #[diagnostic(
        code(loompoint::config::connection),
        help("Check the database URL scheme, host, and port for this backend.")
    )]
    Connection { message: String },
}

/// Per-store settings shared by every backend.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Default thread for refs that do not name one.
    pub thread_id: String,
    /// Logical checkpoint table name; validated by [`StoreConfig::checkpoint_table`].
    pub table: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            thread_id: DEFAULT_THREAD.to_string(),
            table: DEFAULT_TABLE.to_string(),
        }
    }
}

impl StoreConfig {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            table: DEFAULT_TABLE.to_string(),
        }
    }

    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    #[must_use]
    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = thread_id.into();
        self
    }

    /// Normalize and validate the configured table name.
    pub fn checkpoint_table(&self) -> Result<TableName, ConfigError> {
        TableName::parse(&self.table)
    }
}

/// A table name that has passed normalization and validation.
///
/// Parsing trims, lower-cases, and collapses whitespace runs to underscores,
/// then requires the result to be non-empty and match `[a-z0-9_]+`:
///
/// ```rust
/// use loompoint::TableName;
///
/// let name = TableName::parse("  Agent Checkpoints ").unwrap();
/// assert_eq!(name.as_str(), "agent_checkpoints");
/// assert!(TableName::parse("checkpoints; DROP TABLE users").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName(String);

impl TableName {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let normalized = raw
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_");
        let valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(ConfigError::InvalidTableName {
                name: raw.to_string(),
            });
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the companion pending-writes table. Stays within the
    /// validated alphabet since only `[a-z_]` characters are appended.
    #[must_use]
    pub fn writes_table(&self) -> TableName {
        TableName(format!("{}_writes", self.0))
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve the database URL from the environment, with a local SQLite file
/// fallback for development.
pub fn database_url_from_env() -> String {
    dotenvy::dotenv().ok();
    std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://loompoint.db".to_string())
}

/// Validate a database URL against a backend's accepted schemes and denied
/// ports. Fails fast so misconfiguration never reaches the driver.
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub(crate) fn validate_url(
    database_url: &str,
    schemes: &[&str],
    denied_ports: &[u16],
) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(database_url).map_err(|e| ConfigError::Connection {
        message: format!("unparseable database url: {e}"),
    })?;
    if !schemes.contains(&parsed.scheme()) {
        return Err(ConfigError::Connection {
            message: format!("unsupported url scheme {:?} for this backend", parsed.scheme()),
        });
    }
    if let Some(port) = parsed.port() {
        if denied_ports.contains(&port) {
            return Err(ConfigError::Connection {
                message: format!("port {port} is not allowed for this backend"),
            });
        }
    }
    Ok(())
}
