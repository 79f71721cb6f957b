//! End-to-end underwriting scenarios
//!
//! 메모리 저장소 + digest attestation verifier로 전체 파이프라인 실행

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use ethers::types::Address;
use serde_json::Value;
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};
use tower::ServiceExt;

use crate::db::MemoryStore;
use crate::routes::create_router;
use crate::services::claims::ClaimExtractor;
use crate::services::ledger::SettleRequest;
use crate::services::registry::content_hash_of;
use crate::services::replay::ReplayRecord;
use crate::services::verifier::attest;
use crate::services::{
    Aborted, ConsumeOutcome, DecisionStore, ErrorKind, LoanDecision, LoanLedger,
    ModelCommitment, ModelRegistry, Outcome, Pipeline, PipelineError, PipelineMetrics,
    PolicyParams, ProofScheme, PublicClaims, Receipt, RejectionReason, ReplayGuard, Settlement,
    Stage, StoreError, Submission, VerificationKey, VerifierSet,
};
use crate::types::{wad, Bytes32, FieldElement, ModelId};
use crate::{AppState, Config};

const ATTESTOR_KEY: &[u8] = b"zkredit/credit-mlp-v1/attestor";

fn model_id() -> ModelId {
    ModelId::new("credit-mlp-v1").unwrap()
}

fn model_hash() -> Bytes32 {
    content_hash_of(b"credit-mlp-v1.onnx")
}

fn claims(income: u64, debt: u64, dti: u16, tier: u8) -> PublicClaims {
    PublicClaims {
        income: wad(income),
        debt: wad(debt),
        debt_to_income_bps: dti,
        credit_tier: tier,
        model_hash: model_hash(),
    }
}

fn alice() -> PublicClaims {
    claims(8000, 2000, 2500, 85)
}

fn bob() -> PublicClaims {
    claims(4000, 3500, 8750, 70)
}

fn charlie() -> PublicClaims {
    claims(6000, 1500, 2500, 65)
}

/// 주어진 signal에 대한 유효한 attestation 제출
fn submit_signals(signals: Vec<FieldElement>, submitter: u8) -> Submission {
    Submission {
        model_id: model_id(),
        schema_version: 1,
        proof: attest(ATTESTOR_KEY, &signals).to_vec(),
        public_signals: signals,
        submitter: Address::repeat_byte(submitter),
    }
}

fn submission(claims: &PublicClaims, submitter: u8) -> Submission {
    submit_signals(claims.to_signals(), submitter)
}

fn digest_model() -> ModelCommitment {
    ModelCommitment::new(
        model_id(),
        model_hash(),
        VerificationKey::new(ProofScheme::DigestAttestation, ATTESTOR_KEY.to_vec()),
        PolicyParams::default(),
    )
}

struct Harness {
    store: Arc<MemoryStore>,
    pipeline: Arc<Pipeline>,
}

async fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    store.register(digest_model()).await.unwrap();

    let pipeline = Pipeline::new(
        store.clone(),
        store.clone(),
        VerifierSet::development(),
        ClaimExtractor::default(),
        Arc::new(PipelineMetrics::new()),
    );

    Harness {
        store,
        pipeline: Arc::new(pipeline),
    }
}

async fn expect_abort(h: &Harness, submission: Submission) -> Aborted {
    assert_err!(h.pipeline.submit(submission).await)
}

// ============ Scenarios ============

#[tokio::test]
async fn alice_is_approved_at_prime_ratio() {
    let h = harness().await;
    let decision = assert_ok!(h.pipeline.submit(submission(&alice(), 0xa1)).await);

    assert_eq!(
        decision.outcome,
        Outcome::Approved { collateral_ratio_bps: 12000 }
    );
    assert_eq!(decision.model_id, model_id());
    assert_eq!(decision.policy_version, 1);
    assert_eq!(h.store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn bob_is_rejected_and_cannot_resubmit() {
    let h = harness().await;
    let bob_submission = submission(&bob(), 0xb0);

    let decision = assert_ok!(h.pipeline.submit(bob_submission.clone()).await);
    assert_eq!(
        decision.outcome,
        Outcome::Rejected { reason: RejectionReason::DtiExceeded }
    );
    assert_eq!(Receipt::from(&decision).revert_reason, Some("DtiExceeded"));

    // 거절도 commitment 소비 → 같은 proof 재제출 불가
    let aborted = expect_abort(&h, bob_submission).await;
    assert_eq!(aborted.stage, Stage::ReplayClaimed);
    assert_eq!(aborted.error.kind(), ErrorKind::AlreadyUsed);
    assert!(!aborted.error.retryable());

    let stored = h.store.get(&decision.commitment).await.unwrap().unwrap();
    assert_eq!(stored, decision);
    assert_eq!(h.store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn charlie_is_approved_at_standard_ratio() {
    let h = harness().await;
    let decision = assert_ok!(h.pipeline.submit(submission(&charlie(), 0xc0)).await);

    assert_eq!(
        decision.outcome,
        Outcome::Approved { collateral_ratio_bps: 15000 }
    );
}

#[tokio::test]
async fn replayed_commitment_leaves_ledger_unchanged() {
    let h = harness().await;
    let first = assert_ok!(h.pipeline.submit(submission(&alice(), 0xa1)).await);

    let aborted = expect_abort(&h, submission(&alice(), 0xa1)).await;
    assert_eq!(aborted.stage, Stage::ReplayClaimed);
    assert_eq!(aborted.error, PipelineError::AlreadyUsed(first.commitment));

    assert_eq!(h.store.count().await.unwrap(), 1);
    let stored = h.store.get(&first.commitment).await.unwrap().unwrap();
    assert_eq!(stored.decision_id, first.decision_id);
}

#[tokio::test]
async fn same_proof_from_another_submitter_is_already_used() {
    let h = harness().await;
    let first = assert_ok!(h.pipeline.submit(submission(&alice(), 0xa1)).await);

    // submitter는 요청 본문 값일 뿐 → 바꿔도 같은 proof
    let mut replay = submission(&alice(), 0xa1);
    replay.submitter = Address::repeat_byte(0xee);
    assert_eq!(replay.commitment(), first.commitment);

    let aborted = expect_abort(&h, replay).await;
    assert_eq!(aborted.stage, Stage::ReplayClaimed);
    assert_eq!(aborted.error, PipelineError::AlreadyUsed(first.commitment));
    assert_eq!(h.store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn model_mismatch_aborts_before_replay_guard() {
    let h = harness().await;
    let mut swapped = alice();
    swapped.model_hash = content_hash_of(b"weaker-model.onnx");
    let sub = submission(&swapped, 0xa1);
    let commitment = sub.commitment();

    let aborted = expect_abort(&h, sub).await;
    assert_eq!(aborted.stage, Stage::ModelBound);
    assert!(matches!(
        aborted.error,
        PipelineError::ModelMismatch { expected, actual }
            if expected == model_hash() && actual == swapped.model_hash
    ));

    assert_eq!(h.store.count().await.unwrap(), 0);
    assert!(h.store.replay_record(&commitment).await.unwrap().is_none());
}

#[tokio::test]
async fn malformed_proof_burns_nothing_and_is_retryable() {
    let h = harness().await;
    let mut sub = submission(&alice(), 0xa1);
    sub.proof.truncate(31);
    let commitment = sub.commitment();

    let aborted = expect_abort(&h, sub).await;
    assert_eq!(aborted.stage, Stage::ProofChecked);
    assert_eq!(aborted.error.kind(), ErrorKind::MalformedProof);
    assert!(aborted.error.retryable());
    assert!(h.store.replay_record(&commitment).await.unwrap().is_none());
}

#[tokio::test]
async fn tampered_signals_fail_verification() {
    let h = harness().await;
    let mut sub = submission(&alice(), 0xa1);
    // tier 85 → 95 (attestation은 원래 signal 기준)
    sub.public_signals[3] = FieldElement::from_u64(95);

    let aborted = expect_abort(&h, sub).await;
    assert_eq!(aborted.stage, Stage::ProofChecked);
    assert_eq!(aborted.error, PipelineError::ProofInvalid);
    assert_eq!(h.store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn unknown_model_is_rejected() {
    let h = harness().await;
    let mut sub = submission(&alice(), 0xa1);
    sub.model_id = ModelId::new("credit-mlp-v9").unwrap();

    let aborted = expect_abort(&h, sub).await;
    assert_eq!(aborted.error.kind(), ErrorKind::ModelNotFound);
}

#[tokio::test]
async fn unsupported_schema_version() {
    let h = harness().await;
    let mut sub = submission(&alice(), 0xa1);
    sub.schema_version = 2;

    let aborted = expect_abort(&h, sub).await;
    assert_eq!(aborted.stage, Stage::ClaimsExtracted);
    assert_eq!(aborted.error.kind(), ErrorKind::SchemaMismatch);
}

#[tokio::test]
async fn out_of_range_tier_is_rejected_before_policy() {
    let h = harness().await;
    let aborted = expect_abort(&h, submission(&claims(8000, 2000, 2500, 101), 0xa1)).await;

    assert_eq!(aborted.stage, Stage::ClaimsExtracted);
    assert!(matches!(
        aborted.error,
        PipelineError::OutOfRange { field: "credit_tier", .. }
    ));
}

#[tokio::test]
async fn inconsistent_dti_is_rejected() {
    let h = harness().await;
    // 실제 2000/8000 = 2500 bps인데 2000으로 신고
    let aborted = expect_abort(&h, submission(&claims(8000, 2000, 2000, 85), 0xa1)).await;

    assert!(matches!(
        aborted.error,
        PipelineError::OutOfRange { field: "debt_to_income_bps", .. }
    ));
    assert_eq!(h.store.count().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_settle_exactly_once() {
    let h = harness().await;
    let sub = submission(&alice(), 0xa1);

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let pipeline = Arc::clone(&h.pipeline);
            let sub = sub.clone();
            tokio::spawn(async move { pipeline.submit(sub).await })
        })
        .collect();

    let mut recorded = 0;
    let mut already_used = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => recorded += 1,
            Err(aborted) => {
                assert_eq!(aborted.error.kind(), ErrorKind::AlreadyUsed);
                already_used += 1;
            }
        }
    }

    assert_eq!(recorded, 1);
    assert_eq!(already_used, 31);
    assert_eq!(h.store.count().await.unwrap(), 1);
}

/// settle 진입을 알리고, 해제될 때까지 기다리는 저장소
#[derive(Default)]
struct GatedStore {
    inner: MemoryStore,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl ReplayGuard for GatedStore {
    async fn try_consume(&self, commitment: &Bytes32) -> Result<ConsumeOutcome, StoreError> {
        self.inner.try_consume(commitment).await
    }

    async fn replay_record(&self, commitment: &Bytes32) -> Result<Option<ReplayRecord>, StoreError> {
        self.inner.replay_record(commitment).await
    }
}

#[async_trait]
impl LoanLedger for GatedStore {
    async fn record(&self, decision: LoanDecision) -> Result<Receipt, StoreError> {
        self.inner.record(decision).await
    }

    async fn get(&self, commitment: &Bytes32) -> Result<Option<LoanDecision>, StoreError> {
        self.inner.get(commitment).await
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.inner.count().await
    }
}

#[async_trait]
impl DecisionStore for GatedStore {
    async fn settle(&self, request: SettleRequest) -> Result<Settlement, StoreError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.settle(request).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.inner.health_check().await
    }
}

#[tokio::test]
async fn dropped_request_still_records_decision() {
    let registry = Arc::new(MemoryStore::new());
    registry.register(digest_model()).await.unwrap();
    let store = Arc::new(GatedStore::default());
    let pipeline = Pipeline::new(
        registry,
        store.clone(),
        VerifierSet::development(),
        ClaimExtractor::default(),
        Arc::new(PipelineMetrics::new()),
    );

    let sub = submission(&alice(), 0xa1);
    let commitment = sub.commitment();

    {
        let request = pipeline.submit(sub);
        tokio::pin!(request);
        tokio::select! {
            _ = &mut request => panic!("settle returned while gated"),
            _ = store.entered.notified() => {}
        }
        // settle 도중 호출자 future drop (클라이언트 연결 끊김)
    }
    assert!(store.get(&commitment).await.unwrap().is_none());

    store.release.notify_one();
    let recorded = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(decision) = store.get(&commitment).await.unwrap() {
                return decision;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("detached settle never finished");

    assert!(recorded.outcome.is_approved());
    assert!(store.replay_record(&commitment).await.unwrap().is_some());
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn metrics_follow_stage_transitions() {
    let h = harness().await;
    h.pipeline.submit(submission(&alice(), 0x01)).await.unwrap();
    h.pipeline.submit(submission(&bob(), 0x02)).await.unwrap();
    let _ = h.pipeline.submit(submission(&bob(), 0x02)).await;

    let snap = h.pipeline.metrics().snapshot();
    assert_eq!(snap.stages["submitted"], 3);
    assert_eq!(snap.stages["model_bound"], 3);
    assert_eq!(snap.stages["recorded"], 2);
    assert_eq!(snap.aborts["already_used"], 1);
    assert_eq!(snap.approved, 1);
    assert_eq!(snap.rejected, 1);
}

// ============ HTTP ============

async fn app() -> (axum::Router, Harness) {
    let h = harness().await;
    let config = Config::from_lookup(|_| None).unwrap();
    let state = AppState::new(config, h.store.clone(), h.store.clone());
    (create_router(state), h)
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn http_submit_then_lookup() {
    let (app, _h) = app().await;
    let sub = submission(&alice(), 0xa1);
    let commitment = sub.commitment();
    let payload = serde_json::to_value(&sub).unwrap();

    let (status, body) = send(&app, post_json("/loan/submit", &payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["receipt"]["outcome"]["status"], "approved");
    assert_eq!(body["receipt"]["outcome"]["collateral_ratio_bps"], 12000);
    assert_eq!(body["receipt"]["commitment"], commitment.to_string());
    assert!(body["receipt"]["revert_reason"].is_null());
    // 컨트랙트 주소 미설정 → 트랜잭션 없음
    assert!(body.get("transaction").is_none());

    let (status, body) = send(&app, get(&format!("/loan/{}", commitment))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["decision"]["claims"]["credit_tier"], 85);
    assert!(body["revert_reason"].is_null());

    // 거절 → 200 + revert reason
    let rejected = submission(&bob(), 0xb0);
    let rejected_commitment = rejected.commitment();
    let (status, body) = send(
        &app,
        post_json("/loan/submit", &serde_json::to_value(&rejected).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["receipt"]["outcome"]["reason"], "dti_exceeds_limit");
    assert_eq!(body["receipt"]["revert_reason"], "DtiExceeded");

    let (_, body) = send(&app, get(&format!("/loan/{}", rejected_commitment))).await;
    assert_eq!(body["revert_reason"], "DtiExceeded");

    // 재제출 → 409
    let (status, body) = send(&app, post_json("/loan/submit", &payload)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "AlreadyUsed");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn http_rejects_bad_input() {
    let (app, _h) = app().await;

    let (status, body) = send(&app, post_json("/loan/submit", &serde_json::json!({"proof": 1}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    let (status, _) = send(&app, get("/loan/0x1234")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get(&format!("/loan/{}", Bytes32([7; 32])))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn production_refuses_digest_attestation() {
    let h = harness().await;
    let config = Config::from_lookup(|key| {
        (key == "ENVIRONMENT").then(|| "production".to_string())
    })
    .unwrap();
    let app = create_router(AppState::new(config, h.store.clone(), h.store.clone()));

    // 공개된 key로 최고 소득/등급 claim 위조
    let (_, model) = send(&app, get("/model/credit-mlp-v1")).await;
    let key = model["verification_key"]["key"].as_str().unwrap();
    let key = hex::decode(key.trim_start_matches("0x")).unwrap();
    let signals = claims(1_000_000, 0, 0, 100).to_signals();
    let forged = Submission {
        model_id: model_id(),
        schema_version: 1,
        proof: attest(&key, &signals).to_vec(),
        public_signals: signals,
        submitter: Address::repeat_byte(0xee),
    };

    let (status, body) = send(
        &app,
        post_json("/loan/submit", &serde_json::to_value(&forged).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "MalformedProof");
    assert_eq!(h.store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn http_model_lookup() {
    let (app, _h) = app().await;

    let (status, body) = send(&app, get("/model/credit-mlp-v1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content_hash"], model_hash().to_string());
    assert_eq!(body["verification_key"]["scheme"], "digest-attestation");

    let (status, _) = send(&app, get("/model/unknown")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn http_health_reports_storage_and_metrics() {
    let (app, _h) = app().await;

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["storage"]["connected"], true);

    let (status, body) = send(&app, get("/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["approved"], 0);
}
