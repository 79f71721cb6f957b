//! Claim Extractor
//!
//! Public signal 배열 → 타입이 있는 `PublicClaims`
//!
//! # Schema v1
//!
//! ```text
//! index | field               | domain
//! ------+---------------------+-------------------------------
//!   0   | income              | 0 ..= 10^12 · 10^18 (18 decimals)
//!   1   | debt                | 0 ..= 10^12 · 10^18
//!   2   | debt_to_income_bps  | 0 ..= 10000
//!   3   | credit_tier         | 0 ..= 100
//!   4   | model_hash_hi       | < 2^128 (hash 앞 16바이트)
//!   5   | model_hash_lo       | < 2^128 (hash 뒤 16바이트)
//! ```
//!
//! # Interview Q&A
//!
//! Q: 회로가 이미 제약하는 값을 왜 다시 검사하는가?
//! A: Defense in depth
//!    - 회로가 public signal을 충분히 제약하지 않을 가능성
//!    - DTI가 income/debt와 일치하지 않으면 policy 평가 전에 거절
//!
//! Q: model hash를 왜 두 limb로 나누는가?
//! A: SHA-256 digest는 BN254 field(~2^254)보다 클 수 있음
//!    - 128비트 두 개로 나누면 항상 field 안에 들어감

use ethers::types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Bytes32, FieldElement};

pub const SCHEMA_V1: u16 = 1;
pub const SCHEMA_V1_LEN: usize = 6;

pub const MAX_BPS: u64 = 10_000;
pub const MAX_CREDIT_TIER: u8 = 100;

/// income/debt 상한 (10^12 단위 = 10^30 wei-like), 상한 자체도 거부
///
/// 하위 연산(debt * 10000 등)에서 U256 오버플로우 불가능하도록 제한
pub fn amount_ceiling() -> U256 {
    U256::exp10(30)
}

/// Proof에서 추출된 공개 claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicClaims {
    /// 월 소득 (18 decimals)
    pub income: U256,
    /// 총 부채 (18 decimals)
    pub debt: U256,
    pub debt_to_income_bps: u16,
    pub credit_tier: u8,
    pub model_hash: Bytes32,
}

impl PublicClaims {
    /// Schema v1 순서로 public signal 재구성 (prover 측 helper)
    pub fn to_signals(&self) -> Vec<FieldElement> {
        let (hi, lo) = split_hash(&self.model_hash);
        vec![
            FieldElement::from_u256(self.income),
            FieldElement::from_u256(self.debt),
            FieldElement::from_u64(self.debt_to_income_bps as u64),
            FieldElement::from_u64(self.credit_tier as u64),
            hi,
            lo,
        ]
    }

}

/// floor(debt * 10000 / income), income == 0 이면 부채 유무로 0 또는 10000
pub fn implied_dti_bps(income: U256, debt: U256) -> u64 {
    if income.is_zero() {
        return if debt.is_zero() { 0 } else { MAX_BPS };
    }
    let ratio = debt * U256::from(MAX_BPS) / income;
    if ratio > U256::from(MAX_BPS) {
        MAX_BPS
    } else {
        ratio.low_u64()
    }
}

fn split_hash(hash: &Bytes32) -> (FieldElement, FieldElement) {
    let mut hi = [0u8; 32];
    let mut lo = [0u8; 32];
    hi[16..].copy_from_slice(&hash.0[..16]);
    lo[16..].copy_from_slice(&hash.0[16..]);
    (FieldElement(hi), FieldElement(lo))
}

/// Claim 추출 에러
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("Schema mismatch: {reason}")]
    SchemaMismatch { reason: String },

    #[error("{field} out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },
}

impl ExtractionError {
    fn out_of_range(field: &'static str, reason: impl Into<String>) -> Self {
        ExtractionError::OutOfRange {
            field,
            reason: reason.into(),
        }
    }
}

/// Claim Extractor
///
/// 순수 디코딩만 수행 (policy 판단 없음)
#[derive(Debug, Clone)]
pub struct ClaimExtractor {
    /// 선언된 DTI와 income/debt로 계산한 DTI의 허용 오차 (bps)
    dti_tolerance_bps: u64,
}

impl Default for ClaimExtractor {
    fn default() -> Self {
        Self::new(1)
    }
}

impl ClaimExtractor {
    pub fn new(dti_tolerance_bps: u64) -> Self {
        Self { dti_tolerance_bps }
    }

    pub fn supports(schema_version: u16) -> bool {
        schema_version == SCHEMA_V1
    }

    pub fn extract(
        &self,
        schema_version: u16,
        signals: &[FieldElement],
    ) -> Result<PublicClaims, ExtractionError> {
        if !Self::supports(schema_version) {
            return Err(ExtractionError::SchemaMismatch {
                reason: format!("unsupported schema version {}", schema_version),
            });
        }
        if signals.len() != SCHEMA_V1_LEN {
            return Err(ExtractionError::SchemaMismatch {
                reason: format!(
                    "schema v{} expects {} signals, got {}",
                    schema_version,
                    SCHEMA_V1_LEN,
                    signals.len()
                ),
            });
        }

        let income = decode_amount("income", &signals[0])?;
        let debt = decode_amount("debt", &signals[1])?;
        let debt_to_income_bps =
            decode_bounded("debt_to_income_bps", &signals[2], MAX_BPS)? as u16;
        let credit_tier =
            decode_bounded("credit_tier", &signals[3], MAX_CREDIT_TIER as u64)? as u8;
        let model_hash = decode_hash(&signals[4], &signals[5])?;

        let implied = implied_dti_bps(income, debt);
        if implied.abs_diff(debt_to_income_bps as u64) > self.dti_tolerance_bps {
            return Err(ExtractionError::out_of_range(
                "debt_to_income_bps",
                format!(
                    "declared {} bps but income/debt imply {} bps (tolerance {})",
                    debt_to_income_bps, implied, self.dti_tolerance_bps
                ),
            ));
        }

        Ok(PublicClaims {
            income,
            debt,
            debt_to_income_bps,
            credit_tier,
            model_hash,
        })
    }
}

fn decode_amount(field: &'static str, signal: &FieldElement) -> Result<U256, ExtractionError> {
    let value = signal.to_u256();
    if value >= amount_ceiling() {
        return Err(ExtractionError::out_of_range(
            field,
            "must be below the sanity ceiling of 10^12 units",
        ));
    }
    Ok(value)
}

fn decode_bounded(
    field: &'static str,
    signal: &FieldElement,
    max: u64,
) -> Result<u64, ExtractionError> {
    let value = signal.to_u256();
    if value > U256::from(max) {
        return Err(ExtractionError::out_of_range(
            field,
            format!("{} > {}", value, max),
        ));
    }
    Ok(value.low_u64())
}

fn decode_hash(hi: &FieldElement, lo: &FieldElement) -> Result<Bytes32, ExtractionError> {
    if hi.0[..16].iter().any(|b| *b != 0) || lo.0[..16].iter().any(|b| *b != 0) {
        return Err(ExtractionError::out_of_range(
            "model_hash",
            "hash limbs must be below 2^128",
        ));
    }
    let mut hash = [0u8; 32];
    hash[..16].copy_from_slice(&hi.0[16..]);
    hash[16..].copy_from_slice(&lo.0[16..]);
    Ok(Bytes32(hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::wad;

    fn alice() -> PublicClaims {
        PublicClaims {
            income: wad(8000),
            debt: wad(2000),
            debt_to_income_bps: 2500,
            credit_tier: 85,
            model_hash: Bytes32([0xa1; 32]),
        }
    }

    #[test]
    fn test_extract_roundtrip_schema_v1() {
        let claims = alice();
        let extracted = ClaimExtractor::default()
            .extract(SCHEMA_V1, &claims.to_signals())
            .unwrap();
        assert_eq!(extracted, claims);
    }

    #[test]
    fn test_hash_limbs_preserve_order() {
        let mut bytes = [0u8; 32];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        let claims = PublicClaims {
            model_hash: Bytes32(bytes),
            ..alice()
        };
        let signals = claims.to_signals();
        assert_eq!(signals[4].0[16], 0);
        assert_eq!(signals[5].0[16], 16);

        let extracted = ClaimExtractor::default().extract(SCHEMA_V1, &signals).unwrap();
        assert_eq!(extracted.model_hash, Bytes32(bytes));
    }

    #[test]
    fn test_unknown_schema_version() {
        let err = ClaimExtractor::default()
            .extract(2, &alice().to_signals())
            .unwrap_err();
        assert!(matches!(err, ExtractionError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_wrong_signal_count() {
        let mut signals = alice().to_signals();
        signals.pop();
        let err = ClaimExtractor::default().extract(SCHEMA_V1, &signals).unwrap_err();
        assert!(err.to_string().contains("expects 6"));
    }

    #[test]
    fn test_dti_above_10000_out_of_range() {
        let mut signals = alice().to_signals();
        signals[2] = FieldElement::from_u64(10_001);
        let err = ClaimExtractor::default().extract(SCHEMA_V1, &signals).unwrap_err();
        assert_eq!(
            err,
            ExtractionError::OutOfRange {
                field: "debt_to_income_bps",
                reason: "10001 > 10000".to_string(),
            }
        );
    }

    #[test]
    fn test_tier_above_100_out_of_range() {
        let mut signals = alice().to_signals();
        signals[3] = FieldElement::from_u64(101);
        let err = ClaimExtractor::default().extract(SCHEMA_V1, &signals).unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::OutOfRange { field: "credit_tier", .. }
        ));
    }

    #[test]
    fn test_income_above_ceiling() {
        let mut signals = alice().to_signals();
        signals[0] = FieldElement::from_u256(amount_ceiling() + U256::one());
        let err = ClaimExtractor::default().extract(SCHEMA_V1, &signals).unwrap_err();
        assert!(matches!(err, ExtractionError::OutOfRange { field: "income", .. }));
    }

    #[test]
    fn test_amount_at_ceiling_is_rejected() {
        let mut signals = alice().to_signals();
        signals[1] = FieldElement::from_u256(amount_ceiling());
        let err = ClaimExtractor::default().extract(SCHEMA_V1, &signals).unwrap_err();
        assert!(matches!(err, ExtractionError::OutOfRange { field: "debt", .. }));

        signals[1] = FieldElement::from_u256(amount_ceiling() - U256::one());
        let err = ClaimExtractor::default().extract(SCHEMA_V1, &signals).unwrap_err();
        // 상한 바로 아래는 통과, 이후 DTI 일관성 검사에서 실패
        assert!(matches!(
            err,
            ExtractionError::OutOfRange { field: "debt_to_income_bps", .. }
        ));
    }

    #[test]
    fn test_hash_limb_overflow() {
        let mut signals = alice().to_signals();
        signals[4] = FieldElement::from_u256(U256::one() << 128);
        let err = ClaimExtractor::default().extract(SCHEMA_V1, &signals).unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::OutOfRange { field: "model_hash", .. }
        ));
    }

    #[test]
    fn test_inconsistent_dti_rejected() {
        // income/debt → 2500 bps 인데 1000 bps로 선언
        let claims = PublicClaims {
            debt_to_income_bps: 1000,
            ..alice()
        };
        let err = ClaimExtractor::default()
            .extract(SCHEMA_V1, &claims.to_signals())
            .unwrap_err();
        assert!(err.to_string().contains("imply 2500"));
    }

    #[test]
    fn test_dti_within_tolerance() {
        let claims = PublicClaims {
            debt_to_income_bps: 2501,
            ..alice()
        };
        assert!(ClaimExtractor::new(1)
            .extract(SCHEMA_V1, &claims.to_signals())
            .is_ok());
        assert!(ClaimExtractor::new(0)
            .extract(SCHEMA_V1, &claims.to_signals())
            .is_err());
    }

    #[test]
    fn test_implied_dti_zero_income() {
        assert_eq!(implied_dti_bps(U256::zero(), U256::zero()), 0);
        assert_eq!(implied_dti_bps(U256::zero(), wad(1)), MAX_BPS);
        // 부채가 소득보다 커도 10000으로 포화
        assert_eq!(implied_dti_bps(wad(1), wad(5)), MAX_BPS);
    }

    #[test]
    fn test_reference_applicants_are_consistent() {
        assert_eq!(implied_dti_bps(wad(8000), wad(2000)), 2500);
        assert_eq!(implied_dti_bps(wad(4000), wad(3500)), 8750);
        assert_eq!(implied_dti_bps(wad(6000), wad(1500)), 2500);
    }
}
