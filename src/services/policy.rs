//! Underwriting Policy
//!
//! 검증된 claim → 승인(담보 비율) / 거절(사유)
//!
//! # Interview Q&A
//!
//! Q: 규칙 순서를 왜 상수로 고정했는가?
//! A: 감사 가능성(auditability)
//!    - 규제기관/상대방이 public claim만으로 결정을 재계산할 수 있어야 함
//!    - 여러 거절 조건이 동시에 해당되면 `RULE_ORDER`에서 먼저 나온 규칙이 사유가 됨
//!    - 코드 순서가 아닌 이름 있는 상수 → 유지보수 중 순서가 조용히 바뀌지 않음
//!
//! Q: 임계값은 회로가 강제하는가, policy가 강제하는가?
//! A: Policy 레이어에서 다시 검사
//!    - 회로가 public signal을 약하게 제약해도 결정은 여기서 확정
//!
//! # Rules
//!
//! ```text
//! 1. dti > max_dti_bps            → Rejected(dti_exceeds_limit)
//! 2. income < min_income          → Rejected(income_below_minimum)
//! 3. credit_tier < min_tier       → Rejected(credit_tier_below_minimum)
//! 4. credit_tier >= high_tier     → Approved(prime_ratio_bps)      120%
//!    otherwise                    → Approved(standard_ratio_bps)   150%
//! ```

use std::fmt;

use ethers::types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::claims::{PublicClaims, MAX_BPS, MAX_CREDIT_TIER};
use crate::types::wad;

/// Policy 상수 (모델 commitment와 함께 버전 관리)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyParams {
    pub version: u32,
    pub max_dti_bps: u16,
    /// 최소 소득 (18 decimals)
    pub min_income: U256,
    pub min_tier: u8,
    pub high_tier_threshold: u8,
    pub prime_ratio_bps: u16,
    pub standard_ratio_bps: u16,
}

impl Default for PolicyParams {
    fn default() -> Self {
        Self {
            version: 1,
            max_dti_bps: 3000,
            min_income: wad(3000),
            min_tier: 50,
            high_tier_threshold: 80,
            prime_ratio_bps: 12_000,
            standard_ratio_bps: 15_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid policy: {0}")]
pub struct PolicyConfigError(pub String);

impl PolicyParams {
    /// 설정값 검증
    ///
    /// - 담보 비율은 100% 이상 (과담보 대출)
    /// - min_tier <= high_tier_threshold <= 100
    /// - max_dti_bps <= 10000
    pub fn validate(&self) -> Result<(), PolicyConfigError> {
        if self.max_dti_bps as u64 > MAX_BPS {
            return Err(PolicyConfigError(format!(
                "max_dti_bps {} exceeds {}",
                self.max_dti_bps, MAX_BPS
            )));
        }
        if self.min_tier > self.high_tier_threshold {
            return Err(PolicyConfigError(format!(
                "min_tier {} above high_tier_threshold {}",
                self.min_tier, self.high_tier_threshold
            )));
        }
        if self.high_tier_threshold > MAX_CREDIT_TIER {
            return Err(PolicyConfigError(format!(
                "high_tier_threshold {} above {}",
                self.high_tier_threshold, MAX_CREDIT_TIER
            )));
        }
        if (self.prime_ratio_bps as u64) < MAX_BPS || (self.standard_ratio_bps as u64) < MAX_BPS
        {
            return Err(PolicyConfigError(
                "collateral ratios must be at least 10000 bps".to_string(),
            ));
        }
        if self.prime_ratio_bps > self.standard_ratio_bps {
            return Err(PolicyConfigError(
                "prime ratio must not exceed standard ratio".to_string(),
            ));
        }
        Ok(())
    }
}

/// 거절 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectionReason {
    #[serde(rename = "dti_exceeds_limit")]
    DtiExceeded,
    #[serde(rename = "income_below_minimum")]
    IncomeTooLow,
    #[serde(rename = "credit_tier_below_minimum")]
    CreditTierTooLow,
}

impl RejectionReason {
    /// 사람이 읽는 사유 코드
    pub fn code(&self) -> &'static str {
        match self {
            RejectionReason::DtiExceeded => "dti_exceeds_limit",
            RejectionReason::IncomeTooLow => "income_below_minimum",
            RejectionReason::CreditTierTooLow => "credit_tier_below_minimum",
        }
    }

    /// 온체인 revert reason
    pub fn revert_reason(&self) -> &'static str {
        match self {
            RejectionReason::DtiExceeded => "DtiExceeded",
            RejectionReason::IncomeTooLow => "IncomeTooLow",
            RejectionReason::CreditTierTooLow => "CreditTierTooLow",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// 결정 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Approved { collateral_ratio_bps: u16 },
    Rejected { reason: RejectionReason },
}

impl Outcome {
    pub fn is_approved(&self) -> bool {
        matches!(self, Outcome::Approved { .. })
    }

    /// 체인 기록용 outcome code
    ///
    /// 1 = approved, 2 = dti, 3 = income, 4 = tier
    pub fn code(&self) -> u8 {
        match self {
            Outcome::Approved { .. } => 1,
            Outcome::Rejected { reason: RejectionReason::DtiExceeded } => 2,
            Outcome::Rejected { reason: RejectionReason::IncomeTooLow } => 3,
            Outcome::Rejected { reason: RejectionReason::CreditTierTooLow } => 4,
        }
    }

    /// 거절이면 컨트랙트 revert reason
    pub fn revert_reason(&self) -> Option<&'static str> {
        match self {
            Outcome::Approved { .. } => None,
            Outcome::Rejected { reason } => Some(reason.revert_reason()),
        }
    }

    pub fn collateral_ratio_bps(&self) -> Option<u16> {
        match self {
            Outcome::Approved { collateral_ratio_bps } => Some(*collateral_ratio_bps),
            Outcome::Rejected { .. } => None,
        }
    }
}

/// 거절 규칙
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    DtiCeiling,
    MinimumIncome,
    MinimumTier,
}

/// 규칙 평가 순서 (먼저 실패한 규칙이 거절 사유)
pub const RULE_ORDER: [Rule; 3] = [Rule::DtiCeiling, Rule::MinimumIncome, Rule::MinimumTier];

impl Rule {
    fn check(&self, params: &PolicyParams, claims: &PublicClaims) -> Option<RejectionReason> {
        match self {
            Rule::DtiCeiling => (claims.debt_to_income_bps > params.max_dti_bps)
                .then_some(RejectionReason::DtiExceeded),
            Rule::MinimumIncome => {
                (claims.income < params.min_income).then_some(RejectionReason::IncomeTooLow)
            }
            Rule::MinimumTier => {
                (claims.credit_tier < params.min_tier).then_some(RejectionReason::CreditTierTooLow)
            }
        }
    }
}

/// Underwriting Policy
///
/// 순수 함수: 숨겨진 상태 없음, 유효한 claim 전체에 대해 결과가 정의됨
#[derive(Debug, Clone)]
pub struct UnderwritingPolicy {
    params: PolicyParams,
}

impl UnderwritingPolicy {
    pub fn new(params: PolicyParams) -> Result<Self, PolicyConfigError> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &PolicyParams {
        &self.params
    }

    pub fn version(&self) -> u32 {
        self.params.version
    }

    pub fn decide(&self, claims: &PublicClaims) -> Outcome {
        if let Some(reason) = RULE_ORDER
            .iter()
            .find_map(|rule| rule.check(&self.params, claims))
        {
            return Outcome::Rejected { reason };
        }

        let collateral_ratio_bps = if claims.credit_tier >= self.params.high_tier_threshold {
            self.params.prime_ratio_bps
        } else {
            self.params.standard_ratio_bps
        };
        Outcome::Approved {
            collateral_ratio_bps,
        }
    }
}

impl Default for UnderwritingPolicy {
    fn default() -> Self {
        Self {
            params: PolicyParams::default(),
        }
    }
}
