//! Error Handling Module
//!
//! Provides type-safe error handling with proper HTTP status code mapping.
//! Pipeline aborts keep their kind, stage and retryable flag in the response body.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::services::pipeline::{Aborted, ErrorKind, PipelineError};
use crate::services::registry::RegistryError;

/// API 에러 타입
///
/// # Status Mapping
///
/// - 400: 구조 에러 (malformed proof, schema, range, 잘못된 JSON)
/// - 404: 모델/결정 없음
/// - 409: 이미 사용된 commitment
/// - 422: proof 검증 실패, 모델 불일치
/// - 5xx: 저장소/내부 오류 (상세 정보 노출 안 함)
#[derive(Debug, Error)]
pub enum ApiError {
    // ============ 400 Bad Request ============
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // ============ 404 Not Found ============
    #[error("Resource not found: {0}")]
    NotFound(String),

    // ============ Pipeline ============
    #[error(transparent)]
    Aborted(#[from] Aborted),

    // ============ 500 Internal Server Error ============
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal server error")]
    InternalError,
}

/// API 에러 응답 구조
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub retryable: bool,
}

fn pipeline_status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::MalformedProof | ErrorKind::SchemaMismatch | ErrorKind::OutOfRange => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::ModelNotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyUsed => StatusCode::CONFLICT,
        ErrorKind::ProofInvalid | ErrorKind::ModelMismatch => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Storage => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::DuplicateCommitment | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: "Invalid request".to_string(),
                    code: "BAD_REQUEST".to_string(),
                    details: Some(msg.clone()),
                    retryable: true,
                },
            ),
            ApiError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: format!("{} not found", resource),
                    code: "NOT_FOUND".to_string(),
                    details: None,
                    retryable: false,
                },
            ),
            ApiError::Aborted(aborted) => {
                let kind = aborted.error.kind();
                let status = pipeline_status(kind);
                // 5xx는 내부 메시지 숨김
                let error = if status.is_server_error() {
                    "Submission could not be settled".to_string()
                } else {
                    aborted.error.to_string()
                };
                (
                    status,
                    ErrorResponse {
                        error,
                        code: kind.revert_reason().to_string(),
                        details: Some(format!("aborted at {}", aborted.stage)),
                        retryable: kind.retryable(),
                    },
                )
            }
            ApiError::DatabaseError(_) => {
                // 내부 에러는 클라이언트에 상세 정보 노출 안 함
                tracing::error!("Database error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: "Database error occurred".to_string(),
                        code: "DATABASE_ERROR".to_string(),
                        details: None,
                        retryable: true,
                    },
                )
            }
            ApiError::InternalError => {
                tracing::error!("Internal error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: "An internal error occurred".to_string(),
                        code: "INTERNAL_ERROR".to_string(),
                        details: None,
                        retryable: false,
                    },
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Storage(msg) => ApiError::DatabaseError(msg),
            other => {
                tracing::error!("Unexpected pipeline error: {}", other);
                ApiError::InternalError
            }
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => ApiError::NotFound(format!("Model {}", id)),
            RegistryError::Storage(msg) => ApiError::DatabaseError(msg),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::pipeline::Stage;
    use crate::types::Bytes32;

    fn aborted(stage: Stage, error: PipelineError) -> ApiError {
        ApiError::Aborted(Aborted { stage, error })
    }

    #[test]
    fn test_pipeline_status_codes() {
        let cases = [
            (aborted(Stage::ProofChecked, PipelineError::MalformedProof("x".into())), 400),
            (aborted(Stage::ProofChecked, PipelineError::ProofInvalid), 422),
            (
                aborted(
                    Stage::ModelBound,
                    PipelineError::ModelMismatch {
                        expected: Bytes32([1; 32]),
                        actual: Bytes32([2; 32]),
                    },
                ),
                422,
            ),
            (aborted(Stage::ReplayClaimed, PipelineError::AlreadyUsed(Bytes32([1; 32]))), 409),
            (aborted(Stage::ReplayClaimed, PipelineError::Storage("down".into())), 503),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status().as_u16(), expected);
        }
    }

    #[test]
    fn test_not_found_status() {
        let response = ApiError::NotFound("Decision".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
