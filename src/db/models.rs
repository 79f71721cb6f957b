//! Database Models
//!
//! 테이블 row ↔ 도메인 타입 변환
//!
//! - 32바이트 값(commitment, hash)은 BYTEA
//! - U256 금액은 10진 TEXT (NUMERIC 확장 없이 정확한 값 보존)
//! - policy는 JSON TEXT (모델과 함께 불변)

use chrono::{DateTime, Utc};
use ethers::types::U256;
use sqlx::FromRow;
use uuid::Uuid;

use crate::services::claims::PublicClaims;
use crate::services::ledger::LoanDecision;
use crate::services::policy::{Outcome, RejectionReason};
use crate::services::registry::ModelCommitment;
use crate::services::replay::ReplayRecord;
use crate::services::verifier::VerificationKey;
use crate::types::{Bytes32, ModelId};

/// model_commitments
#[derive(Debug, Clone, FromRow)]
pub struct ModelRow {
    pub model_id: String,
    pub content_hash: Vec<u8>,
    pub vk_scheme: String,
    pub vk_bytes: Vec<u8>,
    pub policy: String,
    pub registered_at: DateTime<Utc>,
}

impl ModelRow {
    pub fn from_commitment(c: &ModelCommitment) -> Result<Self, String> {
        Ok(Self {
            model_id: c.model_id.to_string(),
            content_hash: c.content_hash.as_bytes().to_vec(),
            vk_scheme: c.verification_key.scheme.to_string(),
            vk_bytes: c.verification_key.key.clone(),
            policy: serde_json::to_string(&c.policy).map_err(|e| e.to_string())?,
            registered_at: c.registered_at,
        })
    }
}

impl TryFrom<ModelRow> for ModelCommitment {
    type Error = String;

    fn try_from(row: ModelRow) -> Result<Self, Self::Error> {
        Ok(Self {
            model_id: ModelId::new(&row.model_id)?,
            content_hash: Bytes32::from_slice(&row.content_hash)?,
            verification_key: VerificationKey::new(row.vk_scheme.parse()?, row.vk_bytes),
            policy: serde_json::from_str(&row.policy).map_err(|e| format!("policy: {}", e))?,
            registered_at: row.registered_at,
        })
    }
}

/// replay_records
#[derive(Debug, Clone, FromRow)]
pub struct ReplayRow {
    pub commitment: Vec<u8>,
    pub consumed_at: DateTime<Utc>,
}

impl TryFrom<ReplayRow> for ReplayRecord {
    type Error = String;

    fn try_from(row: ReplayRow) -> Result<Self, Self::Error> {
        Ok(Self {
            commitment: Bytes32::from_slice(&row.commitment)?,
            consumed_at: row.consumed_at,
        })
    }
}

/// loan_decisions
#[derive(Debug, Clone, FromRow)]
pub struct DecisionRow {
    pub commitment: Vec<u8>,
    pub decision_id: Uuid,
    pub model_id: String,
    pub policy_version: i64,
    pub outcome_code: i16,
    pub collateral_ratio_bps: Option<i32>,
    pub income: String,
    pub debt: String,
    pub dti_bps: i32,
    pub credit_tier: i16,
    pub model_hash: Vec<u8>,
    pub claims_hash: Vec<u8>,
    pub decided_at: DateTime<Utc>,
}

impl From<&LoanDecision> for DecisionRow {
    fn from(d: &LoanDecision) -> Self {
        Self {
            commitment: d.commitment.as_bytes().to_vec(),
            decision_id: d.decision_id,
            model_id: d.model_id.to_string(),
            policy_version: d.policy_version as i64,
            outcome_code: d.outcome.code() as i16,
            collateral_ratio_bps: d.outcome.collateral_ratio_bps().map(i32::from),
            income: d.claims.income.to_string(),
            debt: d.claims.debt.to_string(),
            dti_bps: d.claims.debt_to_income_bps as i32,
            credit_tier: d.claims.credit_tier as i16,
            model_hash: d.claims.model_hash.as_bytes().to_vec(),
            claims_hash: d.claims_hash.as_bytes().to_vec(),
            decided_at: d.decided_at,
        }
    }
}

fn outcome_from_columns(code: i16, ratio: Option<i32>) -> Result<Outcome, String> {
    let reason = match code {
        1 => {
            let ratio = ratio.ok_or("approved decision without collateral ratio")?;
            let collateral_ratio_bps =
                u16::try_from(ratio).map_err(|_| format!("collateral ratio {} out of range", ratio))?;
            return Ok(Outcome::Approved { collateral_ratio_bps });
        }
        2 => RejectionReason::DtiExceeded,
        3 => RejectionReason::IncomeTooLow,
        4 => RejectionReason::CreditTierTooLow,
        other => return Err(format!("unknown outcome code {}", other)),
    };
    Ok(Outcome::Rejected { reason })
}

impl TryFrom<DecisionRow> for LoanDecision {
    type Error = String;

    fn try_from(row: DecisionRow) -> Result<Self, Self::Error> {
        let claims = PublicClaims {
            income: U256::from_dec_str(&row.income).map_err(|e| format!("income: {}", e))?,
            debt: U256::from_dec_str(&row.debt).map_err(|e| format!("debt: {}", e))?,
            debt_to_income_bps: u16::try_from(row.dti_bps).map_err(|e| format!("dti_bps: {}", e))?,
            credit_tier: u8::try_from(row.credit_tier)
                .map_err(|e| format!("credit_tier: {}", e))?,
            model_hash: Bytes32::from_slice(&row.model_hash)?,
        };

        Ok(Self {
            decision_id: row.decision_id,
            commitment: Bytes32::from_slice(&row.commitment)?,
            model_id: ModelId::new(&row.model_id)?,
            policy_version: u32::try_from(row.policy_version)
                .map_err(|e| format!("policy_version: {}", e))?,
            outcome: outcome_from_columns(row.outcome_code, row.collateral_ratio_bps)?,
            claims,
            claims_hash: Bytes32::from_slice(&row.claims_hash)?,
            decided_at: row.decided_at,
        })
    }
}
