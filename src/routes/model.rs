//! Model Registry Endpoint

use axum::{
    extract::{Path, State},
    Json,
};

use crate::{error::ApiError, services::ModelCommitment, types::ModelId, AppState};

/// GET /model/:model_id
///
/// 등록된 content hash, verification key, policy 조회 (prover 측 확인용)
pub async fn get_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> Result<Json<ModelCommitment>, ApiError> {
    let model_id = ModelId::new(&model_id).map_err(ApiError::BadRequest)?;
    let commitment = state.registry.resolve(&model_id).await?;
    Ok(Json(commitment))
}
