//! Groth16 (BN254) verifier - arkworks
//!
//! # Interview Q&A
//!
//! Q: 왜 BN254인가?
//! A: EVM 호환성
//!    - EVM에는 BN254 pairing 프리컴파일만 있음
//!    - 같은 verification key로 온체인 verifier와 동일한 결과
//!
//! Q: public signal 개수는 어떻게 검증하는가?
//! A: `vk.gamma_abc_g1.len() - 1` = 회로의 public input 개수
//!    - 개수가 다르면 pairing 계산 전에 MalformedProof
//!
//! # Encoding
//!
//! - key: `VerifyingKey<Bn254>::serialize_compressed`
//! - proof: `Proof<Bn254>::serialize_compressed` (128 bytes)
//! - 뒤에 남는 바이트가 있으면 malformed

use ark_bn254::{Bn254, Fr};
use ark_ff::PrimeField;
use ark_groth16::{Groth16, Proof, VerifyingKey};
use ark_serialize::CanonicalDeserialize;
use ark_snark::SNARK;

use super::{check_structure, ProofScheme, ProofVerifier, VerificationKey, VerifyError};
use crate::types::FieldElement;

pub struct Groth16Verifier;

impl Groth16Verifier {
    pub fn decode_key(bytes: &[u8]) -> Result<VerifyingKey<Bn254>, VerifyError> {
        decode_exact(bytes, "verification key")
    }

    pub fn decode_proof(bytes: &[u8]) -> Result<Proof<Bn254>, VerifyError> {
        decode_exact(bytes, "proof")
    }
}

fn decode_exact<T: CanonicalDeserialize>(bytes: &[u8], what: &str) -> Result<T, VerifyError> {
    let mut reader = bytes;
    let value = T::deserialize_compressed(&mut reader)
        .map_err(|e| VerifyError::Malformed(format!("cannot decode {}: {}", what, e)))?;
    if !reader.is_empty() {
        return Err(VerifyError::Malformed(format!(
            "{} has {} trailing bytes",
            what,
            reader.len()
        )));
    }
    Ok(value)
}

impl ProofVerifier for Groth16Verifier {
    fn scheme(&self) -> ProofScheme {
        ProofScheme::Groth16Bn254
    }

    fn verify(
        &self,
        proof: &[u8],
        public_signals: &[FieldElement],
        key: &VerificationKey,
    ) -> Result<bool, VerifyError> {
        check_structure(self.scheme(), public_signals, key)?;

        let vk = Self::decode_key(&key.key)?;
        let expected = vk.gamma_abc_g1.len().saturating_sub(1);
        if public_signals.len() != expected {
            return Err(VerifyError::Malformed(format!(
                "key expects {} public signals, got {}",
                expected,
                public_signals.len()
            )));
        }

        let proof = Self::decode_proof(proof)?;

        // check_structure에서 field 범위 확인 완료 → mod reduction 발생하지 않음
        let inputs: Vec<Fr> = public_signals
            .iter()
            .map(|s| Fr::from_be_bytes_mod_order(&s.to_be_bytes()))
            .collect();

        Groth16::<Bn254>::verify(&vk, &inputs, &proof)
            .map_err(|e| VerifyError::Malformed(format!("verification aborted: {}", e)))
    }
}
