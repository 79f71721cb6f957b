//! Model Commitment Registry
//!
//! model_id → (content hash, verification key, policy) 매핑
//!
//! # Interview Q&A
//!
//! Q: model binding은 무엇을 막는가?
//! A: 모델 바꿔치기 공격
//!    - 정상 회로의 proof 형식을 재사용하면서 더 약한(또는 악의적인) 모델로 점수 계산
//!    - proof의 public signal에 들어있는 model hash == 등록된 content hash 확인
//!    - 불일치 시 replay guard/policy 평가 전에 `ModelMismatch`
//!
//! Q: 모델을 업데이트하려면?
//! A: 새 model_id로 등록 (append-only)
//!    - 기존 commitment는 과거 proof 검증을 위해 그대로 유지
//!    - policy 상수도 모델과 함께 버전 관리

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::claims::PublicClaims;
use super::policy::PolicyParams;
use super::verifier::{ProofScheme, VerificationKey, VerifierSet};
use crate::types::{Bytes32, ModelId};

/// 등록된 모델 commitment (불변)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCommitment {
    pub model_id: ModelId,
    pub content_hash: Bytes32,
    pub verification_key: VerificationKey,
    pub policy: PolicyParams,
    pub registered_at: DateTime<Utc>,
}

impl ModelCommitment {
    pub fn new(
        model_id: ModelId,
        content_hash: Bytes32,
        verification_key: VerificationKey,
        policy: PolicyParams,
    ) -> Self {
        Self {
            model_id,
            content_hash,
            verification_key,
            policy,
            registered_at: Utc::now(),
        }
    }
}

/// 모델 아티팩트(ONNX 등)의 content hash - SHA-256
pub fn content_hash_of(artifact: &[u8]) -> Bytes32 {
    Bytes32(Sha256::digest(artifact).into())
}

/// claims.model_hash == commitment.content_hash
pub fn bind_check(claims: &PublicClaims, commitment: &ModelCommitment) -> bool {
    claims.model_hash == commitment.content_hash
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Model not found: {0}")]
    NotFound(ModelId),

    #[error("Model already registered: {0}")]
    AlreadyRegistered(ModelId),

    #[error("Invalid model policy: {0}")]
    InvalidPolicy(String),

    #[error("Model {0} uses proof scheme {1}, which this deployment does not accept")]
    UnsupportedScheme(ModelId, ProofScheme),

    #[error("Registry storage error: {0}")]
    Storage(String),
}

/// Model Registry 인터페이스
///
/// - resolve: 조회 (파이프라인)
/// - register: 권한 있는 등록 (append-only)
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    async fn resolve(&self, model_id: &ModelId) -> Result<ModelCommitment, RegistryError>;

    async fn register(&self, commitment: ModelCommitment) -> Result<(), RegistryError>;
}

/// 시작 시 registry에 넣을 모델 목록 (JSON 파일)
///
/// ```json
/// [{
///   "model_id": "credit-mlp-v1",
///   "content_hash": "0x…",
///   "verification_key": { "scheme": "groth16-bn254", "key": "0x…" },
///   "policy": null
/// }]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSeed {
    pub model_id: ModelId,
    pub content_hash: Bytes32,
    pub verification_key: VerificationKey,
    /// 없으면 설정의 기본 policy 사용
    #[serde(default)]
    pub policy: Option<PolicyParams>,
}

pub fn load_seed_file(path: impl AsRef<Path>) -> anyhow::Result<Vec<ModelSeed>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read model seed file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("invalid model seed file {}", path.display()))
}

/// Seed 목록 등록
///
/// 같은 model_id + 같은 content hash로 이미 등록된 경우는 건너뜀 (재시작 시)
/// 같은 model_id에 다른 hash는 에러 (commitment 불변)
/// `verifiers`가 검증할 수 없는 scheme의 seed는 아무것도 등록하기 전에 거부
pub async fn seed_registry(
    registry: &dyn ModelRegistry,
    seeds: Vec<ModelSeed>,
    default_policy: &PolicyParams,
    verifiers: &VerifierSet,
) -> Result<usize, RegistryError> {
    if let Some(seed) = seeds
        .iter()
        .find(|seed| !verifiers.supports(seed.verification_key.scheme))
    {
        return Err(RegistryError::UnsupportedScheme(
            seed.model_id.clone(),
            seed.verification_key.scheme,
        ));
    }

    let mut registered = 0;

    for seed in seeds {
        let policy = seed.policy.unwrap_or_else(|| default_policy.clone());
        let commitment =
            ModelCommitment::new(seed.model_id, seed.content_hash, seed.verification_key, policy);

        match registry.register(commitment.clone()).await {
            Ok(()) => {
                tracing::info!(model_id = %commitment.model_id, content_hash = %commitment.content_hash, "Model registered");
                registered += 1;
            }
            Err(RegistryError::AlreadyRegistered(id)) => {
                let existing = registry.resolve(&id).await?;
                if existing.content_hash != commitment.content_hash {
                    return Err(RegistryError::AlreadyRegistered(id));
                }
                tracing::debug!(model_id = %id, "Model already registered, skipping");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(registered)
}
