//! Error types for msorm

use thiserror::Error;

/// Result type alias for msorm operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for database operations
#[derive(Debug, Error)]
pub enum OrmError {
    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Pool error
    #[error("Pool error: {0}")]
    Pool(String),

    /// API misuse (e.g. mutating a union-sourced plan)
    #[error("Usage error: {0}")]
    Usage(String),

    /// A relation path could not be resolved against the catalog or prior joins
    #[error("Schema error: {0}")]
    Schema(String),

    /// A single-result call found zero or more than one row
    #[error("Cardinality error: {0}")]
    Cardinality(String),

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Driver-reported execution failure, carrying the offending SQL text
    #[error("Query error: {message} (sql: {sql})")]
    Execution {
        message: String,
        sql: String,
        /// Additional server messages reported before the failing one.
        preceding: Vec<String>,
        #[source]
        source: tiberius::error::Error,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),
}

impl OrmError {
    /// Create a usage error
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// Create a schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    /// Create a cardinality error
    pub fn cardinality(message: impl Into<String>) -> Self {
        Self::Cardinality(message.into())
    }

    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Wrap a driver error together with the SQL text that produced it.
    ///
    /// Server errors keep their server-side message; any further messages the
    /// driver attached to the same batch are collected as preceding errors.
    pub fn from_db_error(sql: impl Into<String>, err: tiberius::error::Error) -> Self {
        let (message, preceding) = match &err {
            tiberius::error::Error::Server(token) => {
                (format!("ERROR: {}", token.message()), Vec::new())
            }
            other => (format!("ERROR: {other}"), Vec::new()),
        };
        Self::Execution {
            message,
            sql: sql.into(),
            preceding,
            source: err,
        }
    }

    /// Check if this is a cardinality error
    pub fn is_cardinality(&self) -> bool {
        matches!(self, Self::Cardinality(_))
    }

    /// Check if this is a usage error
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }

    /// Check if this is a schema error
    pub fn is_schema(&self) -> bool {
        matches!(self, Self::Schema(_))
    }
}

impl<E: std::fmt::Display> From<deadpool::managed::PoolError<E>> for OrmError {
    fn from(err: deadpool::managed::PoolError<E>) -> Self {
        Self::Pool(err.to_string())
    }
}
