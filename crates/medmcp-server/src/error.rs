use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use medmcp_core::McpError;

/// JSON error body `{ "error": message }` with a status derived from the
/// orchestrator error.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<McpError> for ApiError {
    fn from(err: McpError) -> Self {
        let status = match &err {
            McpError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            McpError::SessionClosed(_) | McpError::MissingDiagnosis => StatusCode::CONFLICT,
            McpError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            McpError::CreateSession(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            tracing::warn!(error = %err, "request failed");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}
