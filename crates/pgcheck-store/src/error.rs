//! Error types for store operations.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by a store connection.
///
/// Connection-level failures are kept apart from data-level ones so the
/// caller can decide whether the handle has to be replaced.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport, authentication, or availability failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// No counter row exists for the identity.
    #[error("no counter row for id {id:?}")]
    NotFound { id: String },

    /// The backend rejected a statement for a reason unrelated to the transport.
    #[error("statement failed: {0}")]
    Statement(String),

    #[error("invalid store configuration: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether the error leaves the connection unusable.
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }

    /// Whether the counter row was missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// SQLSTATE classes that describe a broken or unavailable session rather
/// than a bad statement.
///
/// 08: connection exception, 28: invalid authorization, 53: insufficient
/// resources, 57P: operator intervention (admin shutdown, crash shutdown,
/// cannot connect now).
fn is_connection_sqlstate(code: &str) -> bool {
    code.starts_with("08") || code.starts_with("28") || code.starts_with("53") || code.starts_with("57P")
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
                if is_connection_sqlstate(&code) {
                    StoreError::Connection(format!("{db_err} (sqlstate {code})"))
                } else {
                    StoreError::Statement(format!("{db_err} (sqlstate {code})"))
                }
            }
            sqlx::Error::Configuration(e) => StoreError::Config(e.to_string()),
            sqlx::Error::Io(e) => StoreError::Connection(e.to_string()),
            sqlx::Error::Tls(e) => StoreError::Connection(format!("tls: {e}")),
            sqlx::Error::Protocol(msg) => StoreError::Connection(format!("protocol: {msg}")),
            sqlx::Error::PoolTimedOut => StoreError::Connection("timed out".to_string()),
            sqlx::Error::PoolClosed => StoreError::Connection("connection closed".to_string()),
            sqlx::Error::WorkerCrashed => StoreError::Connection("driver worker crashed".to_string()),
            other => StoreError::Statement(other.to_string()),
        }
    }
}
