//! Loan Ledger
//!
//! commitment당 하나의 결정 기록 (append-only)
//!
//! # Interview Q&A
//!
//! Q: replay 소비와 결정 기록을 왜 하나의 연산(`settle`)으로 묶는가?
//! A: 부분 실패 방지
//!    - 소비만 되고 기록이 없으면 사용자는 재시도도 못하고 결과도 없음
//!    - 기록만 있고 소비가 없으면 같은 proof로 두 번째 결정 가능
//!    - 메모리: 하나의 mutex 구간 / PostgreSQL: 하나의 트랜잭션
//!
//! Q: 거절(rejected)도 기록하는가?
//! A: 예. 거절도 결정
//!    - 같은 proof를 다시 내서 다른 결과를 얻으려는 시도 차단
//!    - 재신청은 새 proof (새 commitment)로만 가능

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::chain::claims_hash;
use super::claims::PublicClaims;
use super::policy::{Outcome, UnderwritingPolicy};
use super::replay::ReplayGuard;
use crate::types::{Bytes32, ModelId};

/// 기록된 대출 결정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanDecision {
    pub decision_id: Uuid,
    pub commitment: Bytes32,
    pub model_id: ModelId,
    pub policy_version: u32,
    pub outcome: Outcome,
    pub claims: PublicClaims,
    /// keccak256(abi.encode(claims)) - 온체인 기록과 대조용
    pub claims_hash: Bytes32,
    pub decided_at: DateTime<Utc>,
}

impl LoanDecision {
    /// Policy 평가 후 결정 생성
    pub fn decide(
        commitment: Bytes32,
        model_id: ModelId,
        claims: PublicClaims,
        policy: &UnderwritingPolicy,
    ) -> Self {
        let outcome = policy.decide(&claims);
        Self {
            decision_id: Uuid::new_v4(),
            commitment,
            model_id,
            policy_version: policy.version(),
            outcome,
            claims_hash: claims_hash(&claims),
            claims,
            decided_at: Utc::now(),
        }
    }
}

/// 기록 영수증 (API 응답)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub decision_id: Uuid,
    pub commitment: Bytes32,
    pub model_id: ModelId,
    pub policy_version: u32,
    pub outcome: Outcome,
    /// 거절 시 `DtiExceeded` / `IncomeTooLow` / `CreditTierTooLow`
    pub revert_reason: Option<&'static str>,
    pub claims_hash: Bytes32,
    pub decided_at: DateTime<Utc>,
}

impl From<&LoanDecision> for Receipt {
    fn from(d: &LoanDecision) -> Self {
        Self {
            decision_id: d.decision_id,
            commitment: d.commitment,
            model_id: d.model_id.clone(),
            policy_version: d.policy_version,
            outcome: d.outcome,
            revert_reason: d.outcome.revert_reason(),
            claims_hash: d.claims_hash,
            decided_at: d.decided_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Decision already recorded for commitment {0}")]
    DuplicateCommitment(Bytes32),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}

/// Ledger 인터페이스 - 수정/삭제 없음
#[async_trait]
pub trait LoanLedger: Send + Sync {
    /// 같은 commitment로 두 번째 기록 → `DuplicateCommitment`
    async fn record(&self, decision: LoanDecision) -> Result<Receipt, StoreError>;

    async fn get(&self, commitment: &Bytes32) -> Result<Option<LoanDecision>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;
}

/// settle 입력 - 소유권을 가져서 별도 task로 넘길 수 있음
#[derive(Debug, Clone)]
pub struct SettleRequest {
    pub commitment: Bytes32,
    pub model_id: ModelId,
    pub claims: PublicClaims,
    pub policy: UnderwritingPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// commitment가 이미 소비됨 - 아무것도 기록하지 않음
    AlreadyUsed,
    Recorded(LoanDecision),
}

/// Replay 소비 + policy 결정 + 기록을 원자적으로 수행하는 저장소
///
/// 보장:
/// - `Recorded` ⇒ commitment 소비됨 ∧ 결정 정확히 1건
/// - 에러 ⇒ 둘 다 일어나지 않음
#[async_trait]
pub trait DecisionStore: ReplayGuard + LoanLedger {
    async fn settle(&self, request: SettleRequest) -> Result<Settlement, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}
