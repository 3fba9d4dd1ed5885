use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use facelab_core::image_hash::ImageHashError;
use facelab_core::{ProviderError, StoreError, VerifyError};
use serde_json::json;
use thiserror::Error;

/// Errors returned by HTTP handlers.
///
/// Every verification failure kind keeps its own status code, so a failed
/// verification is never confused with a completed comparison that did
/// not match.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("embedding provider unavailable: {0}")]
    Provider(#[from] ProviderError),
    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    InvalidImage(#[from] ImageHashError),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0}")]
    BadRequest(String),
    #[error("upload exceeds the {0} byte limit")]
    PayloadTooLarge(usize),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Verify(err) => match err {
                VerifyError::NoFaceDetected => (StatusCode::UNPROCESSABLE_ENTITY, "no_face_detected"),
                VerifyError::NotEnrolled(_) => (StatusCode::CONFLICT, "not_enrolled"),
                VerifyError::DimensionMismatch { .. } => (StatusCode::BAD_REQUEST, "dimension_mismatch"),
                VerifyError::InvalidEmbedding(_) => (StatusCode::BAD_REQUEST, "invalid_embedding"),
                VerifyError::ProviderUnavailable(p) => provider_status(p),
                VerifyError::StoreFailure(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_failure"),
            },
            ApiError::Provider(p) => provider_status(p),
            ApiError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_failure"),
            ApiError::InvalidImage(_) => (StatusCode::BAD_REQUEST, "invalid_image"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

fn provider_status(err: &ProviderError) -> (StatusCode, &'static str) {
    match err {
        ProviderError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "provider_unavailable"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "provider_unavailable"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(kind, error = %message, "request failed");
        } else {
            tracing::debug!(kind, error = %message, "request rejected");
        }

        (status, Json(json!({ "error": kind, "message": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facelab_core::IdentityId;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(ApiError, StatusCode, &str)> = vec![
            (VerifyError::NoFaceDetected.into(), StatusCode::UNPROCESSABLE_ENTITY, "no_face_detected"),
            (VerifyError::NotEnrolled(IdentityId(1)).into(), StatusCode::CONFLICT, "not_enrolled"),
            (
                VerifyError::DimensionMismatch { reference: 128, candidate: 512 }.into(),
                StatusCode::BAD_REQUEST,
                "dimension_mismatch",
            ),
            (
                VerifyError::ProviderUnavailable(ProviderError::Timeout(Duration::from_secs(1))).into(),
                StatusCode::GATEWAY_TIMEOUT,
                "provider_unavailable",
            ),
            (
                ProviderError::Transport("refused".into()).into(),
                StatusCode::SERVICE_UNAVAILABLE,
                "provider_unavailable",
            ),
            (
                VerifyError::StoreFailure(StoreError::Backend("locked".into())).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_failure",
            ),
            (ApiError::Unauthorized("no token"), StatusCode::UNAUTHORIZED, "unauthorized"),
        ];

        for (err, status, kind) in cases {
            assert_eq!(err.status_and_kind(), (status, kind), "{err}");
        }
    }

    #[test]
    fn test_dimension_mismatch_message_has_both_lengths() {
        let err: ApiError = VerifyError::DimensionMismatch { reference: 128, candidate: 512 }.into();
        let msg = err.to_string();
        assert!(msg.contains("128") && msg.contains("512"));
    }
}
