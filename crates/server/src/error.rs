//! HTTP rendering of pipeline failures.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use slipwise_ocr::{ErrorClass, PipelineError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Request rejected before the pipeline ran (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Body missing, not JSON, or over the size limit
    #[error("Invalid request body: {0}")]
    Body(#[from] JsonRejection),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Body(rejection) => rejection.status(),
            ApiError::Pipeline(e) => match e.class() {
                ErrorClass::CallerInputError => StatusCode::BAD_REQUEST,
                ErrorClass::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                ErrorClass::MalformedUpstreamResponse => StatusCode::BAD_GATEWAY,
                ErrorClass::Cancelled => StatusCode::REQUEST_TIMEOUT,
            },
        }
    }

    pub fn code(&self) -> String {
        match self {
            ApiError::BadRequest(_) | ApiError::Body(_) => ErrorClass::CallerInputError.to_string(),
            ApiError::Pipeline(e) => e.class().to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
