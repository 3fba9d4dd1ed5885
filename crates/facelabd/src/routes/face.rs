//! Photo-based face endpoints.

use axum::extract::{Multipart, State};
use axum::Json;
use facelab_compreface::PairVerification;
use facelab_core::{DetectedFace, VerifyError};

use super::auth::VerifyResponse;
use super::read_images;
use crate::error::ApiError;
use crate::state::{AppState, AuthUser};

/// POST /api/face/verify-image: embed field `file` and compare it with the caller's reference.
pub async fn verify_image(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    multipart: Multipart,
) -> Result<Json<VerifyResponse>, ApiError> {
    let mut files = read_images(multipart, &["file"], state.config.max_upload_bytes).await?;
    let image = files.take("file")?;
    let result = state.verifier.verify_image(identity, &image).await?;
    Ok(Json(result.into()))
}

/// POST /api/face/recognize: embedding and attributes of the first face in field `file`.
pub async fn recognize(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DetectedFace>, ApiError> {
    let mut files = read_images(multipart, &["file"], state.config.max_upload_bytes).await?;
    let image = files.take("file")?;
    let face = state
        .verifier
        .detect(&image)
        .await?
        .into_iter()
        .next()
        .ok_or(VerifyError::NoFaceDetected)?;
    Ok(Json(face))
}

/// POST /api/face/verify-pair: compare `source_image` against `target_image` via CompreFace.
pub async fn verify_pair(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<PairVerification>, ApiError> {
    let mut files = read_images(
        multipart,
        &["source_image", "target_image"],
        state.config.max_upload_bytes,
    )
    .await?;
    let source = files.take("source_image")?;
    let target = files.take("target_image")?;

    let timeout = state.config.provider_timeout();
    let outcome = tokio::time::timeout(
        timeout,
        state
            .compreface
            .verify_pair(&source, &target, state.verifier.threshold()),
    )
    .await
    .map_err(|_| facelab_core::ProviderError::Timeout(timeout))??;

    outcome
        .map(Json)
        .ok_or(ApiError::Verify(VerifyError::NoFaceDetected))
}
