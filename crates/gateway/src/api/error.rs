//! The uniform API error envelope.
//!
//! Every failure leaves the API as
//! `{ "error": { "code", "message", "requestId", "details"? } }` with
//! a matching HTTP status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;

use loom_domain::error::Error;

/// A failed API request, ready to serialize as the error envelope.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub request_id: String,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        request_id: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            request_id: request_id.to_owned(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Map a domain error to its API shape.
    pub fn from_domain(request_id: &str, error: &Error) -> Self {
        match error {
            Error::RunNotFound(run_id) => Self::new(
                StatusCode::NOT_FOUND,
                "RUN_NOT_FOUND",
                request_id,
                format!("no run with ID {run_id}"),
            ),
            Error::GameProjectNotFound(id) => Self::new(
                StatusCode::NOT_FOUND,
                "GAME_PROJECT_NOT_FOUND",
                request_id,
                format!("no game project with ID {id}"),
            ),
            Error::ExecutionAlreadyExists { turn } => Self::new(
                StatusCode::CONFLICT,
                "STEP_EXECUTION_CONFLICT",
                request_id,
                format!("an execution already exists for turn {turn}"),
            ),
            Error::Store(_) | Error::Io(_) | Error::Json(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORE_FAILURE",
                request_id,
                error.to_string(),
            ),
            Error::Network(_) | Error::Timeout(_) | Error::Http { .. } | Error::Schema { .. } => {
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "TURN_PROCESSING_FAILED",
                    request_id,
                    error.to_string(),
                )
            }
            Error::Config(_) | Error::Other(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                request_id,
                error.to_string(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut error = serde_json::json!({
            "code": self.code,
            "message": self.message,
            "requestId": self.request_id,
        });
        if let Some(details) = self.details {
            error["details"] = details;
        }
        (self.status, Json(serde_json::json!({ "error": error }))).into_response()
    }
}
