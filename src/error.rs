//! Error types for the db-hub core.
//!
//! All fallible core operations return [`CoreResult`]. Variants carry enough
//! context (native driver message plus a classified kind) for an operator to
//! act on; nothing is collapsed into a generic failure.

use crate::db::tunnel::TunnelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Connection '{connection_id}' not found")]
    NotFound { connection_id: String },

    #[error("Connect failed: {message}")]
    Connect { message: String },

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error("Connection '{connection_id}' is not connected")]
    NotConnected { connection_id: String },

    /// The native engine rejected or failed the query. The message is the
    /// engine's own text, passed through verbatim.
    #[error("Query failed: {message}")]
    Query {
        message: String,
        /// True when the failure indicates the underlying connection is gone,
        /// as opposed to the query itself being rejected.
        connection_lost: bool,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },
}

impl CoreError {
    pub fn not_found(connection_id: impl Into<String>) -> Self {
        Self::NotFound {
            connection_id: connection_id.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    pub fn not_connected(connection_id: impl Into<String>) -> Self {
        Self::NotConnected {
            connection_id: connection_id.into(),
        }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            connection_lost: false,
        }
    }

    pub fn query_lost(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            connection_lost: true,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// True when this error means the live connection is unusable and the
    /// owning entry should be flipped to the error state.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            Self::Query {
                connection_lost: true,
                ..
            }
        )
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            // The engine saw the statement and rejected it - keep its message.
            sqlx::Error::Database(db_err) => CoreError::query(db_err.message()),
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => CoreError::query_lost(err.to_string()),
            _ => CoreError::query(err.to_string()),
        }
    }
}

impl From<mongodb::error::Error> for CoreError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;
        let lost = matches!(
            *err.kind,
            ErrorKind::Io(_)
                | ErrorKind::ServerSelection { .. }
                | ErrorKind::ConnectionPoolCleared { .. }
        );
        if lost {
            CoreError::query_lost(err.to_string())
        } else {
            CoreError::query(err.to_string())
        }
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            CoreError::query_lost(err.to_string())
        } else {
            CoreError::query(err.to_string())
        }
    }
}

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
