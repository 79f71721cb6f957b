//! Database Module
//!
//! # Interview Q&A
//!
//! Q: 왜 PostgreSQL을 선택했는가?
//! A: replay 보호에 필요한 성질
//!
//!    1. ACID 트랜잭션: replay 소비 + 결정 기록을 한 번에 커밋
//!    2. Unique constraint: commitment PK → 여러 인스턴스에서도 1회 사용 보장
//!    3. FK: 결정은 항상 소비된 commitment를 가리킴
//!    4. 감사: append-only 테이블, 시간별 인덱스
//!
//! Q: 동시에 같은 commitment가 들어오면?
//! A: `INSERT … ON CONFLICT DO NOTHING` + `rows_affected`
//!    - SELECT 후 INSERT (check-then-act) 금지
//!    - 먼저 insert한 트랜잭션만 1 row, 나머지는 0 row → AlreadyUsed
//!    - 경쟁 트랜잭션은 PK lock에서 대기 후 0 row
//!
//! Q: 커넥션 풀은 어떻게 관리하는가?
//! A: SQLx의 PgPool 사용
//!    - 최소/최대 커넥션 수 설정
//!    - 커넥션 재사용 (오버헤드 감소)
//!    - 타임아웃 처리

mod models;
mod repository;

pub use models::*;
pub use repository::MemoryStore;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgConnection, PgPool};

use crate::services::ledger::{
    DecisionStore, LoanDecision, LoanLedger, Receipt, SettleRequest, Settlement, StoreError,
};
use crate::services::registry::{ModelCommitment, ModelRegistry, RegistryError};
use crate::services::replay::{ConsumeOutcome, ReplayGuard, ReplayRecord};
use crate::types::{Bytes32, ModelId};

/// PostgreSQL 저장소 (registry + replay guard + ledger)
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 데이터베이스 연결
    ///
    /// # Connection Pool Settings
    ///
    /// - max_connections: 10 (트래픽에 따라 조정)
    /// - min_connections: 1 (idle 시 최소 유지)
    /// - acquire_timeout: 3초 (커넥션 획득 대기)
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(3))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// 마이그레이션 실행
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn storage_error(err: sqlx::Error) -> StoreError {
    tracing::error!(error = %err, "Database error");
    StoreError::from(err)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// replay_records insert-if-absent → 삽입되면 true
async fn insert_replay(conn: &mut PgConnection, commitment: &Bytes32) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO replay_records (commitment, consumed_at)
        VALUES ($1, NOW())
        ON CONFLICT (commitment) DO NOTHING
        "#,
    )
    .bind(commitment.as_bytes().as_slice())
    .execute(conn)
    .await
    .map_err(storage_error)?;

    Ok(result.rows_affected() == 1)
}

async fn insert_decision(
    conn: &mut PgConnection,
    decision: &LoanDecision,
) -> Result<Receipt, StoreError> {
    let row = DecisionRow::from(decision);

    sqlx::query(
        r#"
        INSERT INTO loan_decisions (
            commitment, decision_id, model_id, policy_version, outcome_code,
            collateral_ratio_bps, income, debt, dti_bps, credit_tier,
            model_hash, claims_hash, decided_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(&row.commitment)
    .bind(row.decision_id)
    .bind(&row.model_id)
    .bind(row.policy_version)
    .bind(row.outcome_code)
    .bind(row.collateral_ratio_bps)
    .bind(&row.income)
    .bind(&row.debt)
    .bind(row.dti_bps)
    .bind(row.credit_tier)
    .bind(&row.model_hash)
    .bind(&row.claims_hash)
    .bind(row.decided_at)
    .execute(conn)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            tracing::error!(commitment = %decision.commitment, "Duplicate decision record");
            StoreError::DuplicateCommitment(decision.commitment)
        } else {
            storage_error(e)
        }
    })?;

    Ok(Receipt::from(decision))
}

#[async_trait]
impl ModelRegistry for Database {
    async fn resolve(&self, model_id: &ModelId) -> Result<ModelCommitment, RegistryError> {
        let row = sqlx::query_as::<_, ModelRow>(
            r#"
            SELECT model_id, content_hash, vk_scheme, vk_bytes, policy, registered_at
            FROM model_commitments
            WHERE model_id = $1
            "#,
        )
        .bind(model_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RegistryError::Storage(e.to_string()))?
        .ok_or_else(|| RegistryError::NotFound(model_id.clone()))?;

        ModelCommitment::try_from(row).map_err(RegistryError::Storage)
    }

    async fn register(&self, commitment: ModelCommitment) -> Result<(), RegistryError> {
        commitment
            .policy
            .validate()
            .map_err(|e| RegistryError::InvalidPolicy(e.to_string()))?;
        let row = ModelRow::from_commitment(&commitment).map_err(RegistryError::Storage)?;

        let result = sqlx::query(
            r#"
            INSERT INTO model_commitments (
                model_id, content_hash, vk_scheme, vk_bytes, policy, registered_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (model_id) DO NOTHING
            "#,
        )
        .bind(&row.model_id)
        .bind(&row.content_hash)
        .bind(&row.vk_scheme)
        .bind(&row.vk_bytes)
        .bind(&row.policy)
        .bind(row.registered_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RegistryError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::AlreadyRegistered(commitment.model_id));
        }
        Ok(())
    }
}

#[async_trait]
impl ReplayGuard for Database {
    async fn try_consume(&self, commitment: &Bytes32) -> Result<ConsumeOutcome, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(storage_error)?;
        if insert_replay(&mut conn, commitment).await? {
            Ok(ConsumeOutcome::Consumed)
        } else {
            Ok(ConsumeOutcome::AlreadyUsed)
        }
    }

    async fn replay_record(&self, commitment: &Bytes32) -> Result<Option<ReplayRecord>, StoreError> {
        let row = sqlx::query_as::<_, ReplayRow>(
            "SELECT commitment, consumed_at FROM replay_records WHERE commitment = $1",
        )
        .bind(commitment.as_bytes().as_slice())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.map(ReplayRecord::try_from)
            .transpose()
            .map_err(StoreError::Storage)
    }
}

#[async_trait]
impl LoanLedger for Database {
    async fn record(&self, decision: LoanDecision) -> Result<Receipt, StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        // FK: 결정은 소비된 commitment를 가리킴
        insert_replay(&mut tx, &decision.commitment).await?;
        let receipt = insert_decision(&mut tx, &decision).await?;
        tx.commit().await.map_err(storage_error)?;
        Ok(receipt)
    }

    async fn get(&self, commitment: &Bytes32) -> Result<Option<LoanDecision>, StoreError> {
        let row = sqlx::query_as::<_, DecisionRow>(
            r#"
            SELECT
                commitment, decision_id, model_id, policy_version, outcome_code,
                collateral_ratio_bps, income, debt, dti_bps, credit_tier,
                model_hash, claims_hash, decided_at
            FROM loan_decisions
            WHERE commitment = $1
            "#,
        )
        .bind(commitment.as_bytes().as_slice())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.map(LoanDecision::try_from)
            .transpose()
            .map_err(StoreError::Storage)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM loan_decisions")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(count.0 as u64)
    }
}

#[async_trait]
impl DecisionStore for Database {
    /// 하나의 트랜잭션: replay 소비 → 결정 → 기록
    ///
    /// 어느 단계에서 실패해도 rollback (drop 시 자동)
    async fn settle(&self, request: SettleRequest) -> Result<Settlement, StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        if !insert_replay(&mut tx, &request.commitment).await? {
            tx.rollback().await.map_err(storage_error)?;
            return Ok(Settlement::AlreadyUsed);
        }

        let decision = LoanDecision::decide(
            request.commitment,
            request.model_id,
            request.claims,
            &request.policy,
        );
        insert_decision(&mut tx, &decision).await?;

        tx.commit().await.map_err(storage_error)?;
        Ok(Settlement::Recorded(decision))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }
}
