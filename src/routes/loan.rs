//! Loan Submission Endpoints
//!
//! Proof + public signal 제출 → 파이프라인 → 기록된 결정

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde::Serialize;

use crate::{
    error::ApiError,
    services::{LoanDecision, Receipt, Submission, TransactionRequest},
    types::Bytes32,
    AppState,
};

// ============ Request/Response Types ============

/// 제출 응답
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub receipt: Receipt,
    /// `LEDGER_CONTRACT_ADDRESS` 설정 시 recordDecision 호출 데이터
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionRequest>,
    pub processing_time_ms: u64,
}

/// 감사 조회 응답
#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    pub decision: LoanDecision,
    /// 거절 사유의 컨트랙트 revert reason (승인이면 null)
    pub revert_reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionRequest>,
}

// ============ Handlers ============

/// POST /loan/submit
///
/// # Flow
///
/// 1. 모델 조회 + proof 검증
/// 2. public signal → claims (schema v1)
/// 3. claims.model_hash == 등록된 hash
/// 4. commitment 소비 + policy 결정 + 기록 (원자적)
///
/// policy 거절도 200 (결정이 기록됨). 중단은 에러 응답 + retryable 플래그
pub async fn submit_loan(
    State(state): State<AppState>,
    payload: Result<Json<Submission>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(submission) = payload?;
    let start = std::time::Instant::now();

    tracing::info!(
        model_id = %submission.model_id,
        submitter = ?submission.submitter,
        signals = submission.public_signals.len(),
        "Loan submission"
    );

    let decision = state.pipeline.submit(submission).await?;
    let transaction = state.publisher.build_record_tx(&decision);

    Ok(Json(SubmitResponse {
        receipt: Receipt::from(&decision),
        transaction,
        processing_time_ms: start.elapsed().as_millis() as u64,
    }))
}

/// GET /loan/:commitment
pub async fn get_decision(
    State(state): State<AppState>,
    Path(commitment): Path<String>,
) -> Result<Json<DecisionResponse>, ApiError> {
    let commitment: Bytes32 = commitment
        .parse()
        .map_err(|e: String| ApiError::BadRequest(format!("Invalid commitment: {}", e)))?;

    let decision = state
        .pipeline
        .lookup(&commitment)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Decision {}", commitment)))?;
    let transaction = state.publisher.build_record_tx(&decision);

    Ok(Json(DecisionResponse {
        revert_reason: decision.outcome.revert_reason(),
        decision,
        transaction,
    }))
}
