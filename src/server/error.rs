//! Non-stream HTTP error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::errors::{DeskPilotError, PROVIDER_FAILURE_MESSAGE};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{message}")]
    Internal {
        message: String,
        details: Option<String>,
    },
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            details: None,
        }
    }

    pub fn with_details(msg: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            details: Some(details.into()),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        let (error, details) = match self {
            ApiError::BadRequest(msg) => {
                tracing::debug!(error_code = code, message = %msg, "client error");
                (msg, None)
            }
            ApiError::Internal { message, details } => {
                tracing::error!(error_code = code, message = %message, ?details, "API error");
                (message, details)
            }
        };

        (status, Json(ErrorResponse { error, code, details })).into_response()
    }
}

/// Setup failures, before any event was streamed.
impl From<DeskPilotError> for ApiError {
    fn from(err: DeskPilotError) -> Self {
        match err {
            DeskPilotError::Config(msg) => ApiError::internal(msg),
            DeskPilotError::ResourceConnect(detail) => {
                ApiError::with_details("Failed to connect to sandbox", detail)
            }
            DeskPilotError::Cancelled => ApiError::internal("Request cancelled"),
            other => ApiError::with_details(PROVIDER_FAILURE_MESSAGE, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_failure_maps_to_fixed_message() {
        let err: ApiError = DeskPilotError::ResourceConnect("sandbox sbx-9 not found".into()).into();
        match err {
            ApiError::Internal { message, details } => {
                assert_eq!(message, "Failed to connect to sandbox");
                assert_eq!(details.as_deref(), Some("sandbox sbx-9 not found"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn config_error_keeps_its_message() {
        let err: ApiError = DeskPilotError::Config("no AI provider available".into()).into();
        assert_eq!(err.to_string(), "no AI provider available");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn bad_request_status() {
        assert_eq!(ApiError::bad_request("x").status_code(), StatusCode::BAD_REQUEST);
    }
}
