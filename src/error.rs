use opentelemetry_semantic_conventions::{attribute::OTEL_STATUS_CODE, trace::ERROR_TYPE};
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{Span, error, warn};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn log_and_record(&self, ctx: &str) {
        let current_span = Span::current();
        let is_valid_span = !current_span.is_none();

        let message = self.to_string();
        let error_kind = match self {
            AppError::Database(err) => {
                error!(error = %message, context = %ctx, db_error = %err, "Database error");
                "database_error"
            }
            AppError::Authentication(msg) => {
                warn!(message = %msg, context = %ctx, "Authentication error");
                "authentication_error"
            }
            AppError::Authorization(msg) => {
                warn!(message = %msg, context = %ctx, "Authorization error");
                "authorization_error"
            }
            AppError::NotFound(msg) => {
                warn!(message = %msg, context = %ctx, "Not found error");
                "not_found_error"
            }
            AppError::Validation(msg) => {
                warn!(message = %msg, context = %ctx, "Validation error");
                "validation_error"
            }
            AppError::Internal(msg) => {
                error!(message = %msg, context = %ctx, "Internal server error");
                "internal_error"
            }
        };

        if is_valid_span {
            current_span.record("error", tracing::field::display(true));
            current_span.record(ERROR_TYPE, tracing::field::display(error_kind));
            current_span.record("error.message", tracing::field::display(&message));

            if matches!(self, AppError::Database(_) | AppError::Internal(_)) {
                current_span.record(OTEL_STATUS_CODE, tracing::field::display("ERROR"));
            }
        }
    }

    pub fn status_code(&self) -> Status {
        match self {
            AppError::Database(_) => Status::InternalServerError,
            AppError::Authentication(_) => Status::Unauthorized,
            AppError::Authorization(_) => Status::Forbidden,
            AppError::NotFound(_) => Status::NotFound,
            AppError::Validation(_) => Status::BadRequest,
            AppError::Internal(_) => Status::InternalServerError,
        }
    }

    /// True when the underlying store rejected a write on a UNIQUE constraint.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            AppError::Database(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
            _ => false,
        }
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(error: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("Cryptography error: {}", error))
    }
}

/// Failure classes of the connection lifecycle. Callers match on these,
/// the accompanying message is for humans only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionErrorKind {
    NotAuthenticated,
    InvalidCode,
    SelfConnection,
    AlreadyConnected,
    RequestPending,
    AlreadyResponded,
    NotFound,
    InternalError,
}

impl ConnectionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionErrorKind::NotAuthenticated => "not_authenticated",
            ConnectionErrorKind::InvalidCode => "invalid_code",
            ConnectionErrorKind::SelfConnection => "self_connection",
            ConnectionErrorKind::AlreadyConnected => "already_connected",
            ConnectionErrorKind::RequestPending => "request_pending",
            ConnectionErrorKind::AlreadyResponded => "already_responded",
            ConnectionErrorKind::NotFound => "not_found",
            ConnectionErrorKind::InternalError => "internal_error",
        }
    }

    pub fn status_code(&self) -> Status {
        match self {
            ConnectionErrorKind::NotAuthenticated => Status::Unauthorized,
            ConnectionErrorKind::InvalidCode => Status::NotFound,
            ConnectionErrorKind::SelfConnection => Status::BadRequest,
            ConnectionErrorKind::AlreadyConnected
            | ConnectionErrorKind::RequestPending
            | ConnectionErrorKind::AlreadyResponded => Status::Conflict,
            ConnectionErrorKind::NotFound => Status::NotFound,
            ConnectionErrorKind::InternalError => Status::InternalServerError,
        }
    }
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

impl ConnectionError {
    pub fn new(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_authenticated() -> Self {
        Self::new(ConnectionErrorKind::NotAuthenticated, "Not authenticated")
    }

    pub fn invalid_code() -> Self {
        Self::new(ConnectionErrorKind::InvalidCode, "Invalid invite code")
    }

    pub fn not_found() -> Self {
        Self::new(ConnectionErrorKind::NotFound, "Connection not found")
    }
}

impl From<AppError> for ConnectionError {
    fn from(err: AppError) -> Self {
        err.log_and_record("Connection lifecycle");
        ConnectionError::new(
            ConnectionErrorKind::InternalError,
            "An unexpected error occurred",
        )
    }
}

impl From<sqlx::Error> for ConnectionError {
    fn from(err: sqlx::Error) -> Self {
        ConnectionError::from(AppError::from(err))
    }
}

/// JSON body sent for a failed connection operation.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectionFailure {
    pub success: bool,
    pub error: ConnectionErrorKind,
    pub message: String,
}

impl From<ConnectionError> for ConnectionFailure {
    fn from(err: ConnectionError) -> Self {
        Self {
            success: false,
            error: err.kind,
            message: err.message,
        }
    }
}

impl<'r> rocket::response::Responder<'r, 'static> for ConnectionError {
    fn respond_to(self, req: &'r rocket::Request<'_>) -> rocket::response::Result<'static> {
        let status = self.kind.status_code();
        warn!(
            kind = %self.kind,
            message = %self.message,
            method = %req.method(),
            uri = %req.uri(),
            "Connection operation rejected"
        );
        Custom(status, Json(ConnectionFailure::from(self))).respond_to(req)
    }
}
