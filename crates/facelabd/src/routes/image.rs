use axum::extract::{Multipart, State};
use axum::Json;
use facelab_core::image_hash;
use serde::Serialize;

use super::read_images;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CompareResponse {
    pub file_name1: Option<String>,
    pub file_name2: Option<String>,
    /// Percentage of matching average-hash bits, two decimals.
    pub similarity: f64,
    pub message: &'static str,
}

/// POST /api/image/compare-similarity: average-hash comparison of `file1` and `file2`.
pub async fn compare_similarity(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<CompareResponse>, ApiError> {
    let mut files = read_images(multipart, &["file1", "file2"], state.config.max_upload_bytes).await?;
    let first = files.take("file1")?;
    let second = files.take("file2")?;

    let (a, b) = (first.bytes, second.bytes);
    let comparison = tokio::task::spawn_blocking(move || image_hash::compare_images(&a, &b))
        .await
        .map_err(|e| ApiError::Internal(format!("hash task failed: {e}")))??;

    Ok(Json(CompareResponse {
        file_name1: first.file_name,
        file_name2: second.file_name,
        similarity: comparison.similarity,
        message: comparison.message,
    }))
}
