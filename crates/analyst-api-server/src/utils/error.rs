use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::crawler::CrawlError;
use crate::services::llm_service::LlmError;
use crate::services::prompt_loader::PromptError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Prompt error: {0}")]
    PromptError(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Service busy: {0}")]
    Busy(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::BadRequest(msg) => {
                tracing::warn!("Bad request: {}", msg);
                (StatusCode::BAD_REQUEST, "BadRequest", msg)
            }
            ApiError::PayloadTooLarge(msg) => {
                tracing::warn!("Payload too large: {}", msg);
                (StatusCode::PAYLOAD_TOO_LARGE, "PayloadTooLarge", msg)
            }
            ApiError::PromptError(msg) => {
                tracing::error!("Prompt error: {}", msg);
                (StatusCode::BAD_GATEWAY, "PromptError", msg)
            }
            ApiError::LlmError(msg) => {
                tracing::error!("LLM error: {}", msg);
                (StatusCode::BAD_GATEWAY, "LlmError", msg)
            }
            ApiError::Busy(msg) => {
                tracing::warn!("Service busy: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Busy", msg)
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalError", msg)
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<LlmError> for ApiError {
    fn from(err: LlmError) -> Self {
        ApiError::LlmError(err.to_string())
    }
}

impl From<PromptError> for ApiError {
    fn from(err: PromptError) -> Self {
        ApiError::PromptError(err.to_string())
    }
}

/// Malformed JSON, a wrong content type and oversized bodies all surface
/// as the regular `{error, message}` payload.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(rejection.body_text())
        } else {
            ApiError::BadRequest(rejection.body_text())
        }
    }
}

impl From<CrawlError> for ApiError {
    fn from(err: CrawlError) -> Self {
        match err {
            CrawlError::InvalidUrl(msg) => ApiError::BadRequest(msg),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode as UpstreamStatus;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::PayloadTooLarge("x".into()), StatusCode::PAYLOAD_TOO_LARGE),
            (ApiError::PromptError("x".into()), StatusCode::BAD_GATEWAY),
            (ApiError::LlmError("x".into()), StatusCode::BAD_GATEWAY),
            (ApiError::Busy("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (ApiError::InternalError("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_upstream_error_keeps_provider_detail() {
        let err: ApiError = LlmError::Status {
            status: UpstreamStatus::TOO_MANY_REQUESTS,
            body: "rate limited".to_string(),
        }
        .into();
        assert!(matches!(&err, ApiError::LlmError(msg) if msg.contains("429") && msg.contains("rate limited")));
    }

    #[test]
    fn test_invalid_site_url_is_client_error() {
        let err: ApiError = CrawlError::InvalidUrl("not a url".to_string()).into();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
