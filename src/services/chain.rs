//! On-chain Decision Mapping
//!
//! 결정 → `LoanLedger` 컨트랙트 호출 데이터 / 이벤트 형태
//!
//! ```solidity
//! function recordDecision(bytes32 commitment, uint8 outcome, uint16 collateralRatioBps, bytes32 claimsHash);
//! event LoanDecided(bytes32 indexed commitment, uint8 outcome, uint16 collateralRatioBps, bytes32 claimsHash);
//! ```
//!
//! outcome 코드: 1 = approved, 2 = dti, 3 = income, 4 = tier
//!
//! # Interview Q&A
//!
//! Q: 왜 트랜잭션을 직접 보내지 않고 요청만 만드는가?
//! A: 서명 키 분리
//!    - 서버는 calldata만 생성, 서명/전송은 relayer 또는 사용자 지갑
//!    - 같은 결정에 대해 항상 같은 calldata (claims hash로 대조 가능)

use ethers::abi::{encode, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::{id, keccak256};
use serde::{Deserialize, Serialize};

use super::claims::PublicClaims;
use super::ledger::LoanDecision;
use crate::types::Bytes32;

pub const RECORD_DECISION_SIGNATURE: &str = "recordDecision(bytes32,uint8,uint16,bytes32)";
pub const LOAN_DECIDED_EVENT: &str = "LoanDecided(bytes32,uint8,uint16,bytes32)";

/// recordDecision 가스 한도 (storage write 2 slot + event)
const RECORD_GAS_LIMIT: u64 = 120_000;

/// keccak256(abi.encode(income, debt, dti, tier, modelHash))
pub fn claims_hash(claims: &PublicClaims) -> Bytes32 {
    let encoded = encode(&[
        Token::Uint(claims.income),
        Token::Uint(claims.debt),
        Token::Uint(U256::from(claims.debt_to_income_bps)),
        Token::Uint(U256::from(claims.credit_tier)),
        Token::FixedBytes(claims.model_hash.as_bytes().to_vec()),
    ]);
    Bytes32(keccak256(encoded))
}

/// 체인에 기록될 결정 필드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainRecord {
    pub commitment: Bytes32,
    pub outcome: u8,
    /// 거절이면 0
    pub collateral_ratio_bps: u16,
    pub claims_hash: Bytes32,
}

impl From<&LoanDecision> for ChainRecord {
    fn from(decision: &LoanDecision) -> Self {
        Self {
            commitment: decision.commitment,
            outcome: decision.outcome.code(),
            collateral_ratio_bps: decision.outcome.collateral_ratio_bps().unwrap_or(0),
            claims_hash: decision.claims_hash,
        }
    }
}

impl ChainRecord {
    /// selector ‖ abi.encode(args)
    pub fn calldata(&self) -> Vec<u8> {
        let mut data = id(RECORD_DECISION_SIGNATURE).to_vec();
        data.extend(encode(&[
            Token::FixedBytes(self.commitment.as_bytes().to_vec()),
            Token::Uint(U256::from(self.outcome)),
            Token::Uint(U256::from(self.collateral_ratio_bps)),
            Token::FixedBytes(self.claims_hash.as_bytes().to_vec()),
        ]));
        data
    }

    /// 컨트랙트가 내보낼 `LoanDecided` 로그 (indexer 검증용)
    pub fn event_log(&self) -> DecisionLog {
        DecisionLog {
            topics: vec![
                H256::from(keccak256(LOAN_DECIDED_EVENT)),
                H256::from(*self.commitment.as_bytes()),
            ],
            data: encode(&[
                Token::Uint(U256::from(self.outcome)),
                Token::Uint(U256::from(self.collateral_ratio_bps)),
                Token::FixedBytes(self.claims_hash.as_bytes().to_vec()),
            ]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionLog {
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
}

/// 체인 설정
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub chain_id: u64,
    /// 없으면 트랜잭션 요청을 만들지 않음
    pub ledger_contract: Option<Address>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 31337, // Anvil default
            ledger_contract: None,
        }
    }
}

/// 트랜잭션 요청 (서명 전)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub to: Address,
    pub data: String,
    pub value: Option<String>,
    pub gas_limit: Option<u64>,
    pub chain_id: u64,
}

pub struct ChainPublisher {
    config: ChainConfig,
}

impl ChainPublisher {
    pub fn new(config: ChainConfig) -> Self {
        Self { config }
    }

    pub fn build_record_tx(&self, decision: &LoanDecision) -> Option<TransactionRequest> {
        let to = self.config.ledger_contract?;
        let record = ChainRecord::from(decision);

        Some(TransactionRequest {
            to,
            data: format!("0x{}", hex::encode(record.calldata())),
            value: None,
            gas_limit: Some(RECORD_GAS_LIMIT),
            chain_id: self.config.chain_id,
        })
    }
}
