//! Error types shared by the tiering engine and its HTTP surface.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

/// Result type for tiering operations.
pub type TierResult<T> = Result<T, TierError>;

/// How a failure should be treated by the manipulator that hit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network or backend hiccup. Leave the object where it is and retry next pass.
    Transient,
    /// Copy finished but the integrity check did not match. Never commits a move.
    Verification,
    /// Ground truth is lost (e.g. the local source vanished). The object goes to ERROR.
    Structural,
    /// Configuration or programmer error. Fails the run at startup.
    Fatal,
}

#[derive(Debug, Error)]
pub enum TierError {
    #[error("invalid content hash `{0}`")]
    InvalidHash(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("local copy of {hash} is missing")]
    LocalMissing { hash: String },
    #[error("remote copy of {hash} is missing")]
    RemoteMissing { hash: String },
    #[error("verification failed for {hash}: expected md5 {expected}, got {actual}")]
    VerificationFailed {
        hash: String,
        expected: String,
        actual: String,
    },
    #[error("{hash} is {size} bytes, above the remote limit of {limit}")]
    TooLarge { hash: String, size: u64, limit: u64 },
    #[error("{hash} has no verified remote copy, refusing to delete the local one")]
    NotDuplicated { hash: String },
    #[error("remote {operation} failed for {hash}: {message}")]
    Remote {
        operation: &'static str,
        hash: String,
        message: String,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TierError {
    pub fn remote(operation: &'static str, hash: impl fmt::Display, message: impl fmt::Display) -> Self {
        Self::Remote {
            operation,
            hash: hash.to_string(),
            message: message.to_string(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidHash(_) | Self::InvalidConfig(_) => ErrorClass::Fatal,
            Self::LocalMissing { .. } | Self::RemoteMissing { .. } => ErrorClass::Structural,
            Self::VerificationFailed { .. } | Self::NotDuplicated { .. } => {
                ErrorClass::Verification
            }
            Self::TooLarge { .. } | Self::Remote { .. } | Self::Sqlx(_) | Self::Io(_) => {
                ErrorClass::Transient
            }
        }
    }

    pub fn is_structural(&self) -> bool {
        self.class() == ErrorClass::Structural
    }
}

/// A lightweight wrapper for HTTP-facing errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<TierError> for AppError {
    fn from(err: TierError) -> Self {
        match err {
            TierError::InvalidHash(_) => AppError::new(StatusCode::BAD_REQUEST, err.to_string()),
            other => AppError::internal(other.to_string()),
        }
    }
}
