//! API Error Handling
//!
//! Pipeline errors map to HTTP statuses by category. The body always carries
//! the error kind, message and user hint.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sdk::errors::{ModelCallError, PipelineError};
use serde_json::json;

use crate::pipeline::ErrorBody;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Pipeline(PipelineError),
}

/// Status code for a pipeline error
pub fn status_for(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::Validation(_) | PipelineError::Extraction(_) => StatusCode::BAD_REQUEST,
        PipelineError::ModelCall(ModelCallError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        PipelineError::ModelCall(_) => StatusCode::BAD_GATEWAY,
        PipelineError::PortExhaustion { .. } => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::ProcessSpawn { .. } | PipelineError::HealthCheckTimeout { .. } => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": { "kind": "not_found", "message": msg } })),
            )
                .into_response(),
            ApiError::Pipeline(error) => {
                let status = status_for(&error);
                if status.is_server_error() {
                    tracing::error!(kind = error.kind(), "Request failed: {}", error);
                }
                (status, Json(json!({ "error": ErrorBody::from(&error) }))).into_response()
            }
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError::Pipeline(err)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&PipelineError::Validation("empty".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&ModelCallError::Timeout(5).into()),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&ModelCallError::Unavailable("down".into()).into()),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&PipelineError::PortExhaustion { start: 1, end: 2 }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&PipelineError::Integration("disk".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
