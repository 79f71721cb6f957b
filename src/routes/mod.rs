//! API Routes Module
//!
//! 모든 HTTP 엔드포인트 정의
//!
//! # Routes
//! - `/health` - 헬스 체크 + 카운터
//! - `/metrics` - 파이프라인 카운터
//! - `/loan/*` - 심사 제출 / 결정 조회
//! - `/model/*` - 모델 commitment 조회

pub mod health;
pub mod loan;
pub mod model;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

/// 라우터 생성
///
/// # Route Structure
///
/// ```text
/// GET  /health              - 서버/저장소 상태
/// GET  /metrics             - 단계별/에러별 카운터
///
/// POST /loan/submit         - proof 제출 → 결정
/// GET  /loan/:commitment    - 기록된 결정 조회
///
/// GET  /model/:model_id     - 등록된 모델 조회
/// ```
pub fn create_router(state: AppState) -> Router {
    // CORS 설정
    // 프로덕션: ALLOWED_ORIGINS만 허용 / 개발: localhost 허용
    let cors = if state.config.is_production() {
        let origins: Vec<HeaderValue> = state
            .config
            .allowed_origins
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE])
    } else {
        CorsLayer::new()
            .allow_origin([
                HeaderValue::from_static("http://localhost:5173"), // Vite dev server
                HeaderValue::from_static("http://localhost:3000"),
                HeaderValue::from_static("http://127.0.0.1:5173"),
            ])
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))

        // Loan
        .route("/loan/submit", post(loan::submit_loan))
        .route("/loan/:commitment", get(loan::get_decision))

        // Model registry
        .route("/model/:model_id", get(model::get_model))

        // 미들웨어
        .layer(TraceLayer::new_for_http())
        .layer(cors)

        // 상태 주입
        .with_state(state)
}
