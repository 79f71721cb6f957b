//! Services Module
//!
//! 심사 로직을 담당하는 서비스 레이어
//!
//! # Services
//! - `verifier`: proof 검증 (Groth16 BN254 / digest attestation)
//! - `claims`: public signal → `PublicClaims`
//! - `registry`: 모델 commitment 조회/등록
//! - `replay`: commitment 1회 사용 보장
//! - `policy`: 결정 규칙
//! - `ledger`: 결정 기록 + 원자적 settle
//! - `pipeline`: 단계별 상태 머신
//! - `chain`: 결정 → 컨트랙트 호출 데이터

pub mod chain;
pub mod claims;
pub mod ledger;
pub mod metrics;
pub mod pipeline;
pub mod policy;
pub mod registry;
pub mod replay;
pub mod verifier;

pub use chain::{ChainConfig, ChainPublisher, TransactionRequest};
pub use claims::{ClaimExtractor, PublicClaims};
pub use ledger::{DecisionStore, LoanDecision, LoanLedger, Receipt, Settlement, StoreError};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use pipeline::{Aborted, ErrorKind, Pipeline, PipelineError, Stage, Submission};
pub use policy::{Outcome, PolicyParams, RejectionReason, UnderwritingPolicy};
pub use registry::{ModelCommitment, ModelRegistry, RegistryError};
pub use replay::{ConsumeOutcome, ReplayGuard};
pub use verifier::{ProofScheme, VerificationKey, VerifierSet};
