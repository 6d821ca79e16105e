use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;

use crate::models::{ManifestRow, RankedCandidate, VerifiedCandidate};
use crate::server::api::ApiResponse;
use crate::server::state::AppState;
use crate::tables::read_optional_table;

fn load_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, AppError> {
    match read_optional_table(path) {
        Ok(Some(rows)) => Ok(rows),
        Ok(None) => Err(AppError::NotFound(format!(
            "Table not found: {}",
            path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
        ))),
        Err(e) => {
            tracing::error!("Failed to read {}: {:#}", path.display(), e);
            Err(AppError::InternalError(format!("{:#}", e)))
        }
    }
}

pub async fn get_candidates(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<RankedCandidate>>>, AppError> {
    let rows = load_table(&state.layout.ranked_path())?;
    Ok(Json(ApiResponse::success(rows)))
}

pub async fn get_verified(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<VerifiedCandidate>>>, AppError> {
    let rows = load_table(&state.layout.verified_path())?;
    Ok(Json(ApiResponse::success(rows)))
}

pub async fn get_manifest(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<ManifestRow>>>, AppError> {
    let rows = load_table(&state.layout.manifest_path())?;
    Ok(Json(ApiResponse::success(rows)))
}

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}
