//! ZKredit Underwriting Library
//!
//! # Overview
//!
//! 검증된 신용 claim(ZK proof의 public signal)을 받아
//! 담보부 대출 결정(승인 + 담보 비율 / 거절 사유)을 기록하는 심사 코어
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Routes (axum)                         │
//! │   /loan/submit   /loan/:commitment   /model/:id   /health │
//! └────────────────────────────┬─────────────────────────────┘
//!                              │ Submission
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Pipeline                            │
//! │  verify → extract → bind → settle(replay + decide + record)│
//! └──────┬──────────────┬──────────────────┬─────────────────┘
//!        │              │                  │
//!        ▼              ▼                  ▼
//!   VerifierSet   ModelRegistry      DecisionStore
//!  (Groth16/digest)  (memory | PostgreSQL)
//! ```
//!
//! ## Modules
//!
//! - `config`: 환경 설정 관리
//! - `error`: API 에러 타입 및 HTTP 매핑
//! - `routes`: HTTP 엔드포인트 핸들러
//! - `services`: 검증, claim 추출, policy, 파이프라인
//! - `db`: PostgreSQL / 메모리 저장소
//! - `types`: 공통 타입 정의
//!
//! ## Usage
//!
//! ```rust,ignore
//! use zkredit_underwriting::{AppState, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let state = AppState::from_config(config).await?;
//!     let app = zkredit_underwriting::routes::create_router(state);
//!     // ... 서버 시작
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod services;
pub mod types;

#[cfg(test)]
mod tests;

// Re-exports for convenience
pub use config::Config;
pub use db::{Database, MemoryStore};
pub use error::ApiError;

use config::StorageBackend;
use services::claims::ClaimExtractor;
use services::registry::{load_seed_file, seed_registry};
use services::{
    ChainPublisher, DecisionStore, ModelRegistry, Pipeline, PipelineMetrics, VerifierSet,
};

/// 프로덕션에서는 digest attestation(공개 key로 위조 가능)을 받지 않음
fn verifiers_for(config: &Config) -> VerifierSet {
    if config.is_production() {
        VerifierSet::production()
    } else {
        VerifierSet::development()
    }
}

/// 애플리케이션 전역 상태
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub registry: Arc<dyn ModelRegistry>,
    pub store: Arc<dyn DecisionStore>,
    pub publisher: Arc<ChainPublisher>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        config: Config,
        registry: Arc<dyn ModelRegistry>,
        store: Arc<dyn DecisionStore>,
    ) -> Self {
        let pipeline = Pipeline::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            verifiers_for(&config),
            ClaimExtractor::new(config.dti_tolerance_bps),
            Arc::new(PipelineMetrics::new()),
        );

        Self {
            pipeline: Arc::new(pipeline),
            registry,
            store,
            publisher: Arc::new(ChainPublisher::new(config.chain.clone())),
            config: Arc::new(config),
        }
    }

    /// 저장소 연결 + 모델 seed 등록
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let (registry, store): (Arc<dyn ModelRegistry>, Arc<dyn DecisionStore>) =
            match &config.storage {
                StorageBackend::Memory => {
                    tracing::warn!("Using in-memory storage, decisions are lost on restart");
                    let memory = Arc::new(MemoryStore::new());
                    let registry: Arc<dyn ModelRegistry> = memory.clone();
                    let store: Arc<dyn DecisionStore> = memory;
                    (registry, store)
                }
                StorageBackend::Postgres { database_url } => {
                    let db = Database::connect(database_url).await?;
                    tracing::info!("🗄️  Database connected");
                    db.run_migrations().await?;
                    tracing::info!("📦 Migrations completed");
                    let db = Arc::new(db);
                    let registry: Arc<dyn ModelRegistry> = db.clone();
                    let store: Arc<dyn DecisionStore> = db;
                    (registry, store)
                }
            };

        if let Some(path) = &config.model_seed_path {
            let seeds = load_seed_file(path)?;
            let registered = seed_registry(
                registry.as_ref(),
                seeds,
                &config.default_policy,
                &verifiers_for(&config),
            )
            .await?;
            tracing::info!(registered, path = %path, "📚 Model registry seeded");
        }

        Ok(Self::new(config, registry, store))
    }
}
