//! Digest attestation scheme
//!
//! 실제 prover 없이 개발/테스트 환경에서 쓰는 결정적(deterministic) 증명
//!
//! proof = keccak256("zkredit.attest.v1" ‖ len(key) as u64 BE ‖ key ‖ signal_0 ‖ … ‖ signal_n)
//!
//! 영지식성은 없음 - 파이프라인 전체를 실제 증명 시스템 없이 돌리기 위한 용도

use sha3::{Digest, Keccak256};

use super::{check_structure, ProofScheme, ProofVerifier, VerificationKey, VerifyError};
use crate::types::FieldElement;

pub const ATTESTATION_DOMAIN: &[u8] = b"zkredit.attest.v1";

/// Attestation 생성 (prover 역할)
pub fn attest(key: &[u8], public_signals: &[FieldElement]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(ATTESTATION_DOMAIN);
    hasher.update((key.len() as u64).to_be_bytes());
    hasher.update(key);
    for signal in public_signals {
        hasher.update(signal.to_be_bytes());
    }
    hasher.finalize().into()
}

pub struct DigestAttestationVerifier;

impl ProofVerifier for DigestAttestationVerifier {
    fn scheme(&self) -> ProofScheme {
        ProofScheme::DigestAttestation
    }

    fn verify(
        &self,
        proof: &[u8],
        public_signals: &[FieldElement],
        key: &VerificationKey,
    ) -> Result<bool, VerifyError> {
        check_structure(self.scheme(), public_signals, key)?;

        if key.key.is_empty() {
            return Err(VerifyError::Malformed("empty attestation key".to_string()));
        }
        if proof.len() != 32 {
            return Err(VerifyError::Malformed(format!(
                "attestation must be 32 bytes, got {}",
                proof.len()
            )));
        }

        Ok(proof == attest(&key.key, public_signals).as_slice())
    }
}
