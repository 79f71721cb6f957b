//! Proof Verifier
//!
//! # Interview Q&A
//!
//! Q: 왜 verifier를 trait으로 추상화했는가?
//! A: 증명 시스템은 외부 협력자
//!    - 파이프라인은 "proof + public signals + key → bool" 계약에만 의존
//!    - 증명 시스템 교체 시 policy/ledger 코드 변경 없음
//!    - 각 scheme은 `ProofScheme` 태그로 구분 (상속 대신 태그 기반 dispatch)
//!
//! Q: "잘못된 인코딩"과 "잘못된 증명"을 왜 구분하는가?
//! A: 재시도 가능 여부가 다름
//!    - MalformedProof: 인코딩/형태 오류 → 고쳐서 다시 제출 가능
//!    - Ok(false): 암호학적 검증 실패 → 동일 입력으로는 절대 통과 불가
//!
//! # Schemes
//!
//! | Scheme | Key | Proof |
//! |--------|-----|-------|
//! | `groth16-bn254` | arkworks compressed `VerifyingKey<Bn254>` | compressed `Proof<Bn254>` |
//! | `digest-attestation` | 임의 바이트 (attestor secret 아님, 공개 키 식별자) | 32바이트 keccak256 |
//!
//! `digest-attestation`은 key가 공개되어 누구나 proof를 만들 수 있음
//! → 개발/테스트 전용, 프로덕션 `VerifierSet`에는 등록하지 않음

mod digest;
mod groth16;

pub use digest::{attest, DigestAttestationVerifier, ATTESTATION_DOMAIN};
pub use groth16::Groth16Verifier;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{hex_bytes, FieldElement};

/// 한 번에 받을 수 있는 public signal 최대 개수
pub const MAX_PUBLIC_SIGNALS: usize = 64;

/// 증명 시스템 태그
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProofScheme {
    #[serde(rename = "groth16-bn254")]
    Groth16Bn254,
    #[serde(rename = "digest-attestation")]
    DigestAttestation,
}

impl ProofScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProofScheme::Groth16Bn254 => "groth16-bn254",
            ProofScheme::DigestAttestation => "digest-attestation",
        }
    }
}

impl fmt::Display for ProofScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProofScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "groth16-bn254" => Ok(ProofScheme::Groth16Bn254),
            "digest-attestation" => Ok(ProofScheme::DigestAttestation),
            other => Err(format!("unknown proof scheme: {}", other)),
        }
    }
}

/// Scheme 태그가 붙은 verification key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationKey {
    pub scheme: ProofScheme,
    #[serde(with = "hex_bytes")]
    pub key: Vec<u8>,
}

impl VerificationKey {
    pub fn new(scheme: ProofScheme, key: Vec<u8>) -> Self {
        Self { scheme, key }
    }
}

/// Verifier 에러
///
/// 암호학적 검증 실패는 에러가 아니라 `Ok(false)`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("Malformed proof: {0}")]
    Malformed(String),
}

/// 증명 검증 인터페이스
///
/// 순수 함수: 부수효과 없음, 동일 입력 → 동일 결과
pub trait ProofVerifier: Send + Sync {
    fn scheme(&self) -> ProofScheme;

    fn verify(
        &self,
        proof: &[u8],
        public_signals: &[FieldElement],
        key: &VerificationKey,
    ) -> Result<bool, VerifyError>;
}

/// 모든 scheme 공통 구조 검사
///
/// - signal 개수: 1 ..= MAX_PUBLIC_SIGNALS
/// - 각 signal: BN254 scalar field 범위 안
pub(crate) fn check_structure(
    expected: ProofScheme,
    public_signals: &[FieldElement],
    key: &VerificationKey,
) -> Result<(), VerifyError> {
    if key.scheme != expected {
        return Err(VerifyError::Malformed(format!(
            "verification key is for {}, verifier is {}",
            key.scheme, expected
        )));
    }
    if public_signals.is_empty() || public_signals.len() > MAX_PUBLIC_SIGNALS {
        return Err(VerifyError::Malformed(format!(
            "public signal count {} outside 1..={}",
            public_signals.len(),
            MAX_PUBLIC_SIGNALS
        )));
    }
    if let Some(idx) = public_signals.iter().position(|s| !s.is_canonical()) {
        return Err(VerifyError::Malformed(format!(
            "public signal {} is not a field element",
            idx
        )));
    }
    Ok(())
}

/// Scheme별 verifier 모음
///
/// key의 scheme 태그로 구현체를 선택
pub struct VerifierSet {
    verifiers: HashMap<ProofScheme, Box<dyn ProofVerifier>>,
}

impl VerifierSet {
    pub fn empty() -> Self {
        Self {
            verifiers: HashMap::new(),
        }
    }

    /// 프로덕션: 암호학적으로 건전한 scheme만
    pub fn production() -> Self {
        Self::empty().with(Box::new(Groth16Verifier))
    }

    /// 개발/테스트: digest attestation 추가
    pub fn development() -> Self {
        Self::production().with(Box::new(DigestAttestationVerifier))
    }

    pub fn with(mut self, verifier: Box<dyn ProofVerifier>) -> Self {
        self.verifiers.insert(verifier.scheme(), verifier);
        self
    }

    pub fn supports(&self, scheme: ProofScheme) -> bool {
        self.verifiers.contains_key(&scheme)
    }

    pub fn verify(
        &self,
        proof: &[u8],
        public_signals: &[FieldElement],
        key: &VerificationKey,
    ) -> Result<bool, VerifyError> {
        let verifier = self.verifiers.get(&key.scheme).ok_or_else(|| {
            VerifyError::Malformed(format!("no verifier for scheme {}", key.scheme))
        })?;
        verifier.verify(proof, public_signals, key)
    }
}
