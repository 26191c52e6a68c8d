//! Driver error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while connecting to or querying a single schema.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Connection attempt exceeded the connect timeout.
    #[error("Connection timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// Server rejected the credentials.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Socket or TLS failure.
    #[error("Network error: {0}")]
    Network(String),

    /// Any other failure while establishing the connection.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The query failed on an open connection.
    #[error("Query failed: {0}")]
    Query(String),

    /// No driver registered for the database kind.
    #[error("Unsupported database type: {0}")]
    Unsupported(String),

    /// Invalid connection parameters.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DriverError {
    /// Classify an error raised while opening a connection.
    pub fn from_connect(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => {
                if is_auth_failure(db.code().as_deref()) {
                    DriverError::Auth(db.message().to_string())
                } else {
                    DriverError::Connection(db.message().to_string())
                }
            }
            sqlx::Error::Io(e) => DriverError::Network(e.to_string()),
            sqlx::Error::Tls(e) => DriverError::Network(e.to_string()),
            sqlx::Error::Configuration(e) => DriverError::Configuration(e.to_string()),
            other => DriverError::Connection(other.to_string()),
        }
    }

    /// Classify an error raised while running a query.
    pub fn from_query(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(e) => DriverError::Network(e.to_string()),
            sqlx::Error::Database(db) => DriverError::Query(db.message().to_string()),
            other => DriverError::Query(other.to_string()),
        }
    }
}

/// SQLSTATE class 28 is "invalid authorization specification" on both
/// MySQL and PostgreSQL. MySQL also reports `ER_ACCESS_DENIED_ERROR` as 1045.
fn is_auth_failure(code: Option<&str>) -> bool {
    match code {
        Some(code) => code.starts_with("28") || code == "1045",
        None => false,
    }
}
