use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("duplicate name: {0}")]
    DuplicateName(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("invalid page token: {0}")]
    InvalidToken(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("deadline exceeded after {0} ms")]
    DeadlineExceeded(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl Error {
    /// Stable category name, used in transport bodies and CLI messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NotFound",
            Error::AlreadyExists(_) => "AlreadyExists",
            Error::DuplicateName(_) => "DuplicateName",
            Error::InvalidFormat(_) => "InvalidFormat",
            Error::InvalidToken(_) => "InvalidToken",
            Error::BackendUnavailable(_) => "BackendUnavailable",
            Error::InvalidInput(_) => "InvalidInput",
            Error::DeadlineExceeded(_) => "DeadlineExceeded",
            Error::Io(_) => "IOFailure",
            Error::Internal(_) => "InternalError",
        }
    }

    /// Process exit code used by the repository tool.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::NotFound(_) => 2,
            Error::AlreadyExists(_) | Error::DuplicateName(_) => 3,
            Error::InvalidFormat(_) | Error::InvalidInput(_) => 4,
            Error::InvalidToken(_) => 5,
            Error::BackendUnavailable(_) => 6,
            Error::Io(_) => 7,
            Error::DeadlineExceeded(_) | Error::Internal(_) => 70,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AlreadyExists(_) | Error::DuplicateName(_) => StatusCode::CONFLICT,
            Error::InvalidFormat(_) | Error::InvalidToken(_) | Error::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Io(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.kind(),
                message: self.to_string(),
            },
        };
        (self.status_code(), axum::Json(body)).into_response()
    }
}
