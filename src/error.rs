//! Error types for SQL Pilot.
//!
//! Every failure the service can report is a [`DbError`]. The variants follow
//! the four stages a request passes through (validation, connection, schema
//! introspection, execution) plus collaborator and input failures, and each
//! renders to a message that is safe to hand back to the caller.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Stable message returned for credential problems, never the raw driver string.
pub const AUTH_FAILED_MESSAGE: &str =
    "Authentication failed: the database rejected the username or password.";

/// What went wrong while establishing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionFailure {
    /// The server rejected the credentials.
    Authentication,
    /// Host unreachable, refused, TLS or protocol failure.
    Unreachable,
    /// The URL or connect options are unusable.
    Configuration,
    /// Pool exhausted, closed, or over the configured pool cap.
    Pool,
}

/// Why a statement failed after reaching the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionFailure {
    Timeout,
    /// Syntax, permission or other runtime SQL error.
    Database,
    Decode,
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Connection failed: {message}")]
    Connection {
        kind: ConnectionFailure,
        message: String,
        suggestion: String,
    },

    #[error("Failed to read database schema: {message}")]
    Schema { message: String },

    #[error("SQL execution failed: {message}")]
    Execution {
        kind: ExecutionFailure,
        message: String,
        /// e.g. "42S02" for an unknown table
        sql_state: Option<String>,
    },

    #[error("SQL generation failed: {message}")]
    Generation { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(
        kind: ConnectionFailure,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Connection {
            kind,
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create the stable authentication failure error.
    pub fn authentication() -> Self {
        Self::connection(
            ConnectionFailure::Authentication,
            AUTH_FAILED_MESSAGE,
            "Verify the username and password for this database",
        )
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create an execution error.
    pub fn execution(
        kind: ExecutionFailure,
        message: impl Into<String>,
        sql_state: Option<String>,
    ) -> Self {
        Self::Execution {
            kind,
            message: message.into(),
            sql_state,
        }
    }

    /// Create a statement timeout error.
    pub fn timeout(timeout_secs: u64) -> Self {
        Self::execution(
            ExecutionFailure::Timeout,
            format!("query exceeded the {}s statement timeout", timeout_secs),
            None,
        )
    }

    /// Create a generation error.
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// True when the database rejected the supplied credentials.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Self::Connection {
                kind: ConnectionFailure::Authentication,
                ..
            }
        )
    }

    /// True for statement timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Execution {
                kind: ExecutionFailure::Timeout,
                ..
            }
        )
    }

    /// Re-tag a driver error that surfaced while reading metadata.
    ///
    /// Connection problems keep their identity so callers can still tell a
    /// bad password apart from a broken catalog query.
    pub fn into_schema_error(self) -> Self {
        match self {
            err @ Self::Connection { .. } => err,
            Self::Execution { message, .. } => Self::schema(message),
            other => Self::schema(other.to_string()),
        }
    }

    /// Report any failure as a connection failure, keeping the underlying
    /// message. Already-classified connection errors pass through untouched.
    pub fn into_connection_error(self) -> Self {
        match self {
            err @ Self::Connection { .. } => err,
            Self::Schema { message } | Self::Execution { message, .. } => Self::connection(
                ConnectionFailure::Unreachable,
                message,
                "Check the database URL, credentials and server status",
            ),
            other => Self::connection(
                ConnectionFailure::Unreachable,
                other.to_string(),
                "Check the database URL, credentials and server status",
            ),
        }
    }
}

/// Check whether a driver error carries an authentication SQLSTATE.
///
/// MySQL reports 28000 ("Access denied for user ..."), PostgreSQL reports
/// 28P01 ("password authentication failed ..."). Permission errors such as
/// MySQL 1044/1227 also say "Access denied" but carry 42000 and stay
/// statement errors.
pub fn is_auth_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .is_some_and(|code| code == "28000" || code == "28P01"),
        _ => false,
    }
}

/// Message-based check for credential rejection during connection setup,
/// where a driver may not expose a SQLSTATE. Never applied to statement errors.
pub fn is_auth_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    (lower.contains("access denied for user") && lower.contains("using password"))
        || lower.contains("password authentication failed")
}

/// Convert sqlx errors to DbError.
///
/// Statement-level failures become `Execution`; everything that happens
/// before a statement can run becomes `Connection`.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        if is_auth_error(&err) {
            return DbError::authentication();
        }

        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                ConnectionFailure::Configuration,
                msg.to_string(),
                "Check the database URL format and connect options",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::execution(ExecutionFailure::Database, db_err.message(), code)
            }
            sqlx::Error::PoolTimedOut => DbError::connection(
                ConnectionFailure::Pool,
                "Timed out waiting for a pooled connection",
                "The database may be unreachable or every connection is busy; try again later",
            ),
            sqlx::Error::PoolClosed => DbError::connection(
                ConnectionFailure::Pool,
                "Connection pool is closed",
                "Retry the request to open a new pool",
            ),
            sqlx::Error::Io(io_err) => DbError::connection(
                ConnectionFailure::Unreachable,
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                ConnectionFailure::Unreachable,
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                ConnectionFailure::Unreachable,
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnDecode { index, source } => DbError::execution(
                ExecutionFailure::Decode,
                format!("Failed to decode column {}: {}", index, source),
                None,
            ),
            sqlx::Error::Decode(source) => DbError::execution(
                ExecutionFailure::Decode,
                format!("Decode error: {}", source),
                None,
            ),
            sqlx::Error::RowNotFound => {
                DbError::execution(ExecutionFailure::Database, "No rows returned", None)
            }
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            other => DbError::internal(format!("Unknown database error: {}", other)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Uniform failure envelope: every error is a 400 with `{"error": "<message>"}`.
impl IntoResponse for DbError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.to_string() });
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}
