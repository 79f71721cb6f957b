//! In-memory Repository
//!
//! # Interview Q&A
//!
//! Q: Repository 패턴을 어떻게 적용했는가?
//! A: 저장소 trait (`ModelRegistry`, `ReplayGuard`, `LoanLedger`, `DecisionStore`)
//!    - 파이프라인은 `Arc<dyn DecisionStore>`만 알고 있음
//!    - PostgreSQL(`Database`)과 메모리(`MemoryStore`)가 같은 trait 구현
//!    - 테스트는 외부 서비스 없이 메모리 구현 사용
//!
//! Q: 왜 상태 전체를 하나의 Mutex로 감싸는가?
//! A: settle의 원자성
//!    - replay 소비와 결정 기록이 같은 critical section 안에서 일어나야 함
//!    - 맵마다 lock을 따로 두면 두 lock 사이에 다른 요청이 끼어들 수 있음
//!    - lock 안에서는 await 없음 → `std::sync::Mutex`로 충분

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::services::ledger::{
    DecisionStore, LoanDecision, LoanLedger, Receipt, SettleRequest, Settlement, StoreError,
};
use crate::services::registry::{ModelCommitment, ModelRegistry, RegistryError};
use crate::services::replay::{ConsumeOutcome, ReplayGuard, ReplayRecord};
use crate::types::{Bytes32, ModelId};

#[derive(Default)]
struct MemoryState {
    models: HashMap<ModelId, ModelCommitment>,
    replays: HashMap<Bytes32, ReplayRecord>,
    decisions: HashMap<Bytes32, LoanDecision>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Storage("memory store lock poisoned".to_string()))
    }
}

impl MemoryState {
    fn consume(&mut self, commitment: &Bytes32) -> ConsumeOutcome {
        if self.replays.contains_key(commitment) {
            return ConsumeOutcome::AlreadyUsed;
        }
        self.replays.insert(
            *commitment,
            ReplayRecord {
                commitment: *commitment,
                consumed_at: Utc::now(),
            },
        );
        ConsumeOutcome::Consumed
    }

    fn record(&mut self, decision: LoanDecision) -> Result<Receipt, StoreError> {
        if self.decisions.contains_key(&decision.commitment) {
            tracing::error!(commitment = %decision.commitment, "Duplicate decision record");
            return Err(StoreError::DuplicateCommitment(decision.commitment));
        }
        // 결정이 있으면 commitment도 소비된 상태
        self.replays
            .entry(decision.commitment)
            .or_insert_with(|| ReplayRecord {
                commitment: decision.commitment,
                consumed_at: decision.decided_at,
            });
        let receipt = Receipt::from(&decision);
        self.decisions.insert(decision.commitment, decision);
        Ok(receipt)
    }
}

#[async_trait]
impl ModelRegistry for MemoryStore {
    async fn resolve(&self, model_id: &ModelId) -> Result<ModelCommitment, RegistryError> {
        let state = self
            .lock()
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        state
            .models
            .get(model_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(model_id.clone()))
    }

    async fn register(&self, commitment: ModelCommitment) -> Result<(), RegistryError> {
        commitment
            .policy
            .validate()
            .map_err(|e| RegistryError::InvalidPolicy(e.to_string()))?;

        let mut state = self
            .lock()
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        if state.models.contains_key(&commitment.model_id) {
            return Err(RegistryError::AlreadyRegistered(commitment.model_id));
        }
        state.models.insert(commitment.model_id.clone(), commitment);
        Ok(())
    }
}

#[async_trait]
impl ReplayGuard for MemoryStore {
    async fn try_consume(&self, commitment: &Bytes32) -> Result<ConsumeOutcome, StoreError> {
        Ok(self.lock()?.consume(commitment))
    }

    async fn replay_record(&self, commitment: &Bytes32) -> Result<Option<ReplayRecord>, StoreError> {
        Ok(self.lock()?.replays.get(commitment).cloned())
    }
}

#[async_trait]
impl LoanLedger for MemoryStore {
    async fn record(&self, decision: LoanDecision) -> Result<Receipt, StoreError> {
        self.lock()?.record(decision)
    }

    async fn get(&self, commitment: &Bytes32) -> Result<Option<LoanDecision>, StoreError> {
        Ok(self.lock()?.decisions.get(commitment).cloned())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.lock()?.decisions.len() as u64)
    }
}

#[async_trait]
impl DecisionStore for MemoryStore {
    async fn settle(&self, request: SettleRequest) -> Result<Settlement, StoreError> {
        let mut state = self.lock()?;

        if state.replays.contains_key(&request.commitment) {
            return Ok(Settlement::AlreadyUsed);
        }
        // 소비 전에 검사: 실패 시 아무것도 바뀌지 않음 (PostgreSQL 롤백과 동일)
        if state.decisions.contains_key(&request.commitment) {
            tracing::error!(commitment = %request.commitment, "Decision exists without replay record");
            return Err(StoreError::DuplicateCommitment(request.commitment));
        }
        state.consume(&request.commitment);

        let decision = LoanDecision::decide(
            request.commitment,
            request.model_id,
            request.claims,
            &request.policy,
        );
        state.record(decision.clone())?;

        Ok(Settlement::Recorded(decision))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}
