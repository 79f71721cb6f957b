//! Underwriting Pipeline
//!
//! ```text
//! Submitted → ProofChecked → ClaimsExtracted → ModelBound → ReplayClaimed → Decided → Recorded
//!     └──────────────┴──────────────┴───────────────┴──────────────┴─→ Aborted{stage, error}
//! ```
//!
//! # Interview Q&A
//!
//! Q: 왜 replay guard를 binding 이후에 두는가?
//! A: 구조적 실패는 아무것도 소비하지 않아야 함
//!    - 잘못된 proof/모델 불일치 → 수정 후 같은 proof로 재제출 가능
//!    - policy 거절은 결정이므로 commitment 소비
//!
//! Q: 요청이 중간에 취소되면?
//! A: ModelBound 이전 → 부작용 없음
//!    - settle(소비 + 결정 + 기록)은 `tokio::spawn`으로 분리
//!    - 클라이언트가 연결을 끊어도 task는 끝까지 실행 → 소비만 되고 기록이 없는 상태 불가능
//!
//! Q: 같은 commitment로 동시에 두 요청이 오면?
//! A: 둘 다 ModelBound까지 진행 가능
//!    - settle의 원자적 insert-if-absent에서 하나만 통과
//!    - 나머지는 `AlreadyUsed` (ReplayClaimed 단계에서 중단)

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::claims::{ClaimExtractor, ExtractionError};
use super::ledger::{DecisionStore, LoanDecision, SettleRequest, Settlement, StoreError};
use super::metrics::PipelineMetrics;
use super::policy::UnderwritingPolicy;
use super::registry::{bind_check, ModelRegistry, RegistryError};
use super::replay::derive_commitment;
use super::verifier::{VerifierSet, VerifyError};
use crate::types::{hex_bytes, Bytes32, FieldElement, ModelId};

/// 대출 심사 제출
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub model_id: ModelId,
    /// 필수 - 기본값 없음
    pub schema_version: u16,
    #[serde(with = "hex_bytes")]
    pub proof: Vec<u8>,
    pub public_signals: Vec<FieldElement>,
    /// 로그용 (commitment에는 포함되지 않음)
    pub submitter: Address,
}

impl Submission {
    pub fn commitment(&self) -> Bytes32 {
        derive_commitment(&self.proof, &self.public_signals)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Submitted,
    ProofChecked,
    ClaimsExtracted,
    ModelBound,
    ReplayClaimed,
    Decided,
    Recorded,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Submitted,
        Stage::ProofChecked,
        Stage::ClaimsExtracted,
        Stage::ModelBound,
        Stage::ReplayClaimed,
        Stage::Decided,
        Stage::Recorded,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn next(&self) -> Option<Stage> {
        Self::ALL.get(self.index() + 1).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Submitted => "submitted",
            Stage::ProofChecked => "proof_checked",
            Stage::ClaimsExtracted => "claims_extracted",
            Stage::ModelBound => "model_bound",
            Stage::ReplayClaimed => "replay_claimed",
            Stage::Decided => "decided",
            Stage::Recorded => "recorded",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 파이프라인 에러 (구성요소 에러를 하나로 접음)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("Malformed proof: {0}")]
    MalformedProof(String),

    #[error("Proof does not verify against the model's key")]
    ProofInvalid,

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("{field} out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },

    #[error("Model not found: {0}")]
    ModelNotFound(ModelId),

    #[error("Model hash mismatch: registered {expected}, proof claims {actual}")]
    ModelMismatch { expected: Bytes32, actual: Bytes32 },

    #[error("Commitment already used: {0}")]
    AlreadyUsed(Bytes32),

    #[error("Decision already recorded for commitment {0}")]
    DuplicateCommitment(Bytes32),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedProof,
    ProofInvalid,
    SchemaMismatch,
    OutOfRange,
    ModelNotFound,
    ModelMismatch,
    AlreadyUsed,
    DuplicateCommitment,
    Storage,
    Internal,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 10] = [
        ErrorKind::MalformedProof,
        ErrorKind::ProofInvalid,
        ErrorKind::SchemaMismatch,
        ErrorKind::OutOfRange,
        ErrorKind::ModelNotFound,
        ErrorKind::ModelMismatch,
        ErrorKind::AlreadyUsed,
        ErrorKind::DuplicateCommitment,
        ErrorKind::Storage,
        ErrorKind::Internal,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedProof => "malformed_proof",
            ErrorKind::ProofInvalid => "proof_invalid",
            ErrorKind::SchemaMismatch => "schema_mismatch",
            ErrorKind::OutOfRange => "out_of_range",
            ErrorKind::ModelNotFound => "model_not_found",
            ErrorKind::ModelMismatch => "model_mismatch",
            ErrorKind::AlreadyUsed => "already_used",
            ErrorKind::DuplicateCommitment => "duplicate_commitment",
            ErrorKind::Storage => "storage",
            ErrorKind::Internal => "internal",
        }
    }

    /// 컨트랙트 revert 문자열
    pub fn revert_reason(&self) -> &'static str {
        match self {
            ErrorKind::MalformedProof => "MalformedProof",
            ErrorKind::ProofInvalid => "ProofInvalid",
            ErrorKind::SchemaMismatch => "SchemaMismatch",
            ErrorKind::OutOfRange => "OutOfRange",
            ErrorKind::ModelNotFound => "ModelNotFound",
            ErrorKind::ModelMismatch => "ModelMismatch",
            ErrorKind::AlreadyUsed => "AlreadyUsed",
            ErrorKind::DuplicateCommitment => "DuplicateCommitment",
            ErrorKind::Storage => "StorageUnavailable",
            ErrorKind::Internal => "InternalError",
        }
    }

    /// 같은 commitment를 (수정 후) 다시 제출할 수 있는가
    ///
    /// - 구조/모델 에러: 아무것도 소비되지 않음 → true
    /// - AlreadyUsed / DuplicateCommitment: 이미 결정됨 → false
    /// - Storage: 트랜잭션 롤백 → true
    pub fn retryable(&self) -> bool {
        !matches!(
            self,
            ErrorKind::AlreadyUsed | ErrorKind::DuplicateCommitment | ErrorKind::Internal
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::MalformedProof(_) => ErrorKind::MalformedProof,
            PipelineError::ProofInvalid => ErrorKind::ProofInvalid,
            PipelineError::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            PipelineError::OutOfRange { .. } => ErrorKind::OutOfRange,
            PipelineError::ModelNotFound(_) => ErrorKind::ModelNotFound,
            PipelineError::ModelMismatch { .. } => ErrorKind::ModelMismatch,
            PipelineError::AlreadyUsed(_) => ErrorKind::AlreadyUsed,
            PipelineError::DuplicateCommitment(_) => ErrorKind::DuplicateCommitment,
            PipelineError::Storage(_) => ErrorKind::Storage,
            PipelineError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn retryable(&self) -> bool {
        self.kind().retryable()
    }

    pub fn revert_reason(&self) -> &'static str {
        self.kind().revert_reason()
    }
}

impl From<VerifyError> for PipelineError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::Malformed(reason) => PipelineError::MalformedProof(reason),
        }
    }
}

impl From<ExtractionError> for PipelineError {
    fn from(err: ExtractionError) -> Self {
        match err {
            ExtractionError::SchemaMismatch { reason } => PipelineError::SchemaMismatch(reason),
            ExtractionError::OutOfRange { field, reason } => {
                PipelineError::OutOfRange { field, reason }
            }
        }
    }
}

impl From<RegistryError> for PipelineError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => PipelineError::ModelNotFound(id),
            RegistryError::Storage(msg) => PipelineError::Storage(msg),
            other => PipelineError::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateCommitment(c) => PipelineError::DuplicateCommitment(c),
            StoreError::Storage(msg) => PipelineError::Storage(msg),
        }
    }
}

/// 종료 상태: 어느 단계에서 어떤 에러로 멈췄는가
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("aborted at {stage}: {error}")]
pub struct Aborted {
    /// 진입하지 못한 단계
    pub stage: Stage,
    pub error: PipelineError,
}

/// 한 제출의 진행 상태
struct Run<'a> {
    commitment: Bytes32,
    stage: Stage,
    metrics: &'a PipelineMetrics,
}

impl<'a> Run<'a> {
    fn start(commitment: Bytes32, metrics: &'a PipelineMetrics) -> Self {
        metrics.record_stage(Stage::Submitted);
        tracing::debug!(commitment = %commitment, "Submission received");
        Self {
            commitment,
            stage: Stage::Submitted,
            metrics,
        }
    }

    fn advance(&mut self, next: Stage) {
        debug_assert_eq!(self.stage.next(), Some(next));
        self.stage = next;
        self.metrics.record_stage(next);
        tracing::debug!(commitment = %self.commitment, stage = %next, "Stage reached");
    }

    fn abort(&self, stage: Stage, error: PipelineError) -> Aborted {
        let kind = error.kind();
        self.metrics.record_abort(kind);

        match kind {
            ErrorKind::DuplicateCommitment | ErrorKind::Storage | ErrorKind::Internal => {
                tracing::error!(commitment = %self.commitment, stage = %stage, kind = %kind, error = %error, "Pipeline aborted");
            }
            _ => {
                tracing::warn!(commitment = %self.commitment, stage = %stage, kind = %kind, error = %error, "Pipeline aborted");
            }
        }

        Aborted { stage, error }
    }
}

pub struct Pipeline {
    registry: Arc<dyn ModelRegistry>,
    store: Arc<dyn DecisionStore>,
    verifiers: VerifierSet,
    extractor: ClaimExtractor,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    pub fn new(
        registry: Arc<dyn ModelRegistry>,
        store: Arc<dyn DecisionStore>,
        verifiers: VerifierSet,
        extractor: ClaimExtractor,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            registry,
            store,
            verifiers,
            extractor,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// 제출 → 기록된 결정
    ///
    /// policy 거절도 `Ok` (결정이 기록됨). `Err`는 결정 없이 중단된 경우
    pub async fn submit(&self, submission: Submission) -> Result<LoanDecision, Aborted> {
        let started = Instant::now();
        let commitment = submission.commitment();
        let mut run = Run::start(commitment, &self.metrics);

        // 1. 모델 조회 + proof 검증
        let model = self
            .registry
            .resolve(&submission.model_id)
            .await
            .map_err(|e| run.abort(Stage::ProofChecked, e.into()))?;

        let valid = self
            .verifiers
            .verify(&submission.proof, &submission.public_signals, &model.verification_key)
            .map_err(|e| run.abort(Stage::ProofChecked, e.into()))?;
        if !valid {
            return Err(run.abort(Stage::ProofChecked, PipelineError::ProofInvalid));
        }
        run.advance(Stage::ProofChecked);

        // 2. claim 추출
        let claims = self
            .extractor
            .extract(submission.schema_version, &submission.public_signals)
            .map_err(|e| run.abort(Stage::ClaimsExtracted, e.into()))?;
        run.advance(Stage::ClaimsExtracted);

        // 3. 모델 binding (replay guard 이전)
        if !bind_check(&claims, &model) {
            let error = PipelineError::ModelMismatch {
                expected: model.content_hash,
                actual: claims.model_hash,
            };
            return Err(run.abort(Stage::ModelBound, error));
        }
        run.advance(Stage::ModelBound);

        // 4. replay 소비 + 결정 + 기록
        let policy = UnderwritingPolicy::new(model.policy.clone())
            .map_err(|e| run.abort(Stage::ReplayClaimed, PipelineError::Internal(e.to_string())))?;
        let request = SettleRequest {
            commitment,
            model_id: model.model_id.clone(),
            claims,
            policy,
        };

        // 호출자 future가 drop되어도 settle은 끝까지 실행
        let store = Arc::clone(&self.store);
        let settlement = tokio::spawn(async move { store.settle(request).await })
            .await
            .map_err(|e| {
                run.abort(
                    Stage::ReplayClaimed,
                    PipelineError::Internal(format!("settle task failed: {}", e)),
                )
            })?
            .map_err(|e| {
                let stage = match e {
                    StoreError::DuplicateCommitment(_) => Stage::Recorded,
                    StoreError::Storage(_) => Stage::ReplayClaimed,
                };
                run.abort(stage, e.into())
            })?;

        let decision = match settlement {
            Settlement::AlreadyUsed => {
                return Err(run.abort(Stage::ReplayClaimed, PipelineError::AlreadyUsed(commitment)));
            }
            Settlement::Recorded(decision) => decision,
        };
        run.advance(Stage::ReplayClaimed);
        run.advance(Stage::Decided);
        run.advance(Stage::Recorded);

        let latency = started.elapsed().as_micros() as u64;
        self.metrics
            .record_outcome(decision.outcome.is_approved(), latency);

        tracing::info!(
            commitment = %commitment,
            decision_id = %decision.decision_id,
            model_id = %decision.model_id,
            outcome = ?decision.outcome,
            latency_us = latency,
            "Loan decision recorded"
        );

        Ok(decision)
    }

    /// 감사 조회
    pub async fn lookup(&self, commitment: &Bytes32) -> Result<Option<LoanDecision>, PipelineError> {
        Ok(self.store.get(commitment).await?)
    }
}
