//! Replay Guard
//!
//! # Interview Q&A
//!
//! Q: "한 번 제출, 한 번 결정"은 어떻게 보장하는가?
//! A: commitment 단위 원자적 insert-if-absent
//!    - check-then-act 금지: 두 요청이 동시에 "아직 안 씀"을 보면 둘 다 통과
//!    - 메모리: mutex 안에서 `HashMap::entry`
//!    - PostgreSQL: `INSERT … ON CONFLICT DO NOTHING` + rows_affected
//!
//! Q: commitment는 어떻게 만드는가?
//! A: keccak256("zkredit.replay.v1" ‖ len(proof) ‖ proof ‖ signals)
//!    - 요청 본문의 submitter 주소는 인증되지 않은 값 → commitment에 넣지 않음
//!    - 같은 proof는 누가 제출하든 같은 commitment
//!    - 만료 없음 (한 번 소비되면 영구)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use super::ledger::StoreError;
use crate::types::{Bytes32, FieldElement};

pub const COMMITMENT_DOMAIN: &[u8] = b"zkredit.replay.v1";

pub fn derive_commitment(proof: &[u8], public_signals: &[FieldElement]) -> Bytes32 {
    let mut hasher = Keccak256::new();
    hasher.update(COMMITMENT_DOMAIN);
    hasher.update((proof.len() as u64).to_be_bytes());
    hasher.update(proof);
    for signal in public_signals {
        hasher.update(signal.to_be_bytes());
    }
    Bytes32(hasher.finalize().into())
}

/// 소비된 commitment 기록 (삭제 없음)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRecord {
    pub commitment: Bytes32,
    pub consumed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Consumed,
    AlreadyUsed,
}

/// Replay Guard 인터페이스
///
/// 동일 commitment로 동시에 N번 호출 → 정확히 하나만 `Consumed`
#[async_trait]
pub trait ReplayGuard: Send + Sync {
    async fn try_consume(&self, commitment: &Bytes32) -> Result<ConsumeOutcome, StoreError>;

    async fn replay_record(&self, commitment: &Bytes32) -> Result<Option<ReplayRecord>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(values: &[u64]) -> Vec<FieldElement> {
        values.iter().map(|v| FieldElement::from_u64(*v)).collect()
    }

    #[test]
    fn test_commitment_deterministic() {
        assert_eq!(
            derive_commitment(b"proof", &signals(&[1, 2])),
            derive_commitment(b"proof", &signals(&[1, 2]))
        );
    }

    #[test]
    fn test_commitment_binds_proof_and_signals() {
        let base = derive_commitment(b"proof", &signals(&[1, 2]));

        assert_ne!(base, derive_commitment(b"proof2", &signals(&[1, 2])));
        assert_ne!(base, derive_commitment(b"proof", &signals(&[1, 3])));
    }
}
