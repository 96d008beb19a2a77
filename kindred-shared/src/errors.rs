use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::types::ApiErrorResponse;

/// Application error codes following the pattern E{range}{sequence}
///
/// Ranges:
/// - E0xxx: Shared/infrastructure errors
/// - E2xxx: Profile errors
/// - E3xxx: Relationship lifecycle errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Shared (E0xxx)
    InternalError,
    ValidationError,
    NotFound,
    Unauthorized,
    Forbidden,
    StoreUnavailable,
    BadRequest,
    TokenExpired,
    TokenInvalid,

    // Profile (E2xxx)
    ProfileIncomplete,
    ProfileNotFound,

    // Relationship lifecycle (E3xxx)
    AlreadyRequested,
    AlreadyMatched,
    SelfAcceptDenied,
    RequestNotFound,
    PartialWriteDetected,
    PairSuppressed,
    MatchNotFound,
    CannotTargetSelf,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            // Shared
            Self::InternalError => "E0001",
            Self::ValidationError => "E0002",
            Self::NotFound => "E0003",
            Self::Unauthorized => "E0004",
            Self::Forbidden => "E0005",
            Self::StoreUnavailable => "E0007",
            Self::BadRequest => "E0008",
            Self::TokenExpired => "E0010",
            Self::TokenInvalid => "E0011",

            // Profile
            Self::ProfileIncomplete => "E2001",
            Self::ProfileNotFound => "E2002",

            // Relationship lifecycle
            Self::AlreadyRequested => "E3001",
            Self::AlreadyMatched => "E3002",
            Self::SelfAcceptDenied => "E3003",
            Self::RequestNotFound => "E3004",
            Self::PartialWriteDetected => "E3005",
            Self::PairSuppressed => "E3006",
            Self::MatchNotFound => "E3007",
            Self::CannotTargetSelf => "E3008",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::ValidationError | Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::NotFound | Self::ProfileNotFound | Self::RequestNotFound
            | Self::MatchNotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized | Self::TokenExpired | Self::TokenInvalid => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::SelfAcceptDenied | Self::CannotTargetSelf => StatusCode::FORBIDDEN,
            Self::ProfileIncomplete => StatusCode::UNPROCESSABLE_ENTITY,
            Self::AlreadyRequested | Self::AlreadyMatched | Self::PairSuppressed
            | Self::PartialWriteDetected => StatusCode::CONFLICT,
        }
    }

    /// Transient failures the client may retry as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable | Self::PartialWriteDetected)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Known {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: ErrorCode, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StoreUnavailable, message)
    }

    /// The error kind reported to callers.
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Known { code, .. } => *code,
            AppError::Internal(_) => ErrorCode::InternalError,
            AppError::Database(err) => database_error_code(err),
            AppError::Validation(_) => ErrorCode::ValidationError,
        }
    }
}

fn database_error_code(err: &diesel::result::Error) -> ErrorCode {
    use diesel::result::{DatabaseErrorKind, Error};

    match err {
        Error::NotFound => ErrorCode::NotFound,
        Error::DatabaseError(DatabaseErrorKind::ClosedConnection, _)
        | Error::DatabaseError(DatabaseErrorKind::SerializationFailure, _)
        | Error::BrokenTransactionManager => ErrorCode::StoreUnavailable,
        _ => ErrorCode::InternalError,
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            AppError::Known { code, message, details } => {
                let status = code.status_code();
                let mut resp = ApiErrorResponse::new(code.code(), message);
                if let Some(d) = details {
                    resp = resp.with_details(d.clone());
                }
                (status, resp)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorResponse::new("E0001", "internal server error"),
                )
            }
            AppError::Database(err) => {
                tracing::error!(error = %err, "database error");
                let code = database_error_code(err);
                let message = match code {
                    ErrorCode::NotFound => "resource not found",
                    ErrorCode::StoreUnavailable => "store unavailable",
                    _ => "database error",
                };
                (code.status_code(), ApiErrorResponse::new(code.code(), message))
            }
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ApiErrorResponse::new("E0002", msg),
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
