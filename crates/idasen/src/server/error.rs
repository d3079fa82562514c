//! API errors and their HTTP rendering

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use desk_runtime::DeskError;

/// Errors returned by HTTP handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid desk address: {0}")]
    InvalidAddress(String),

    #[error("Missing or invalid API token")]
    Unauthorized,

    #[error(transparent)]
    Desk(#[from] DeskError),
}

/// JSON body of an error response
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidAddress(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Desk(e) => match e {
                DeskError::InvalidHeight { .. } => StatusCode::BAD_REQUEST,
                DeskError::NotRunning | DeskError::NotFound { .. } => StatusCode::SERVICE_UNAVAILABLE,
                DeskError::Cancelled => StatusCode::CONFLICT,
                DeskError::TimedOut => StatusCode::GATEWAY_TIMEOUT,
                DeskError::Transport(_) | DeskError::Initialization { .. } | DeskError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    /// Machine-readable error name
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::InvalidAddress(_) => "invalid_address",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Desk(e) => e.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, kind = self.kind(), "Request failed");
        } else {
            tracing::debug!(error = %self, kind = self.kind(), "Request rejected");
        }

        let body = Json(ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}
