//! HTTP routes for the facelab service.

mod auth;
mod face;
mod image;

use std::collections::HashMap;

use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use facelab_core::ImageUpload;
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::state::AppState;

/// Headroom for multipart framing and text fields on top of the file limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let body_limit = body_limit(state.config.max_upload_bytes);
    let cors = cors_layer(&state.config.cors_origins);
    let avatars = ServeDir::new(&state.config.avatar_dir);

    let api = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/me", get(auth::me))
        .route("/auth/upload-avatar", post(auth::upload_avatar))
        .route("/auth/update-avatar", post(auth::update_avatar))
        .route("/auth/verify-face-vector", post(auth::verify_face_vector))
        .route("/face/verify-image", post(face::verify_image))
        .route("/face/recognize", post(face::recognize))
        .route("/face/verify-pair", post(face::verify_pair))
        .route("/image/compare-similarity", post(image::compare_similarity))
        .route("/status", get(status));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .nest_service(facelab_store::avatars::AVATAR_URL_PREFIX, avatars)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Request body limit for a given per-file limit. Two-file endpoints need
/// room for both uploads in one body.
fn body_limit(max_upload_bytes: usize) -> usize {
    max_upload_bytes.saturating_mul(2).saturating_add(MULTIPART_OVERHEAD)
}

fn multipart_error(err: MultipartError, max_upload_bytes: usize, context: &str) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(body_limit(max_upload_bytes))
    } else {
        ApiError::BadRequest(format!("{context}: {err}"))
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    version: &'static str,
    provider: String,
    match_threshold: f64,
    provider_timeout_secs: u64,
    max_upload_bytes: usize,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        provider: state.verifier.provider().describe(),
        match_threshold: state.verifier.threshold(),
        provider_timeout_secs: state.config.provider_timeout_secs,
        max_upload_bytes: state.config.max_upload_bytes,
    })
}

/// File fields collected from a multipart body, keyed by field name.
pub(crate) struct Uploads(HashMap<String, ImageUpload>);

impl Uploads {
    /// Remove a required field.
    pub(crate) fn take(&mut self, name: &str) -> Result<ImageUpload, ApiError> {
        self.0
            .remove(name)
            .ok_or_else(|| ApiError::BadRequest(format!("missing file field `{name}`")))
    }
}

/// Read the named file fields from a multipart body.
///
/// Fields not listed in `wanted` are drained and ignored. Each file must be
/// non-empty and at most `max_bytes` long.
pub(crate) async fn read_images(
    mut multipart: Multipart,
    wanted: &[&str],
    max_bytes: usize,
) -> Result<Uploads, ApiError> {
    let mut files = HashMap::new();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_bytes, "malformed multipart body"))?
    {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        if !wanted.contains(&name.as_str()) {
            continue;
        }

        let file_name = field.file_name().map(str::to_owned);
        let content_type = field.content_type().map(str::to_owned);

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| multipart_error(e, max_bytes, &format!("failed to read field `{name}`")))?
        {
            if bytes.len() + chunk.len() > max_bytes {
                return Err(ApiError::PayloadTooLarge(max_bytes));
            }
            bytes.extend_from_slice(&chunk);
        }
        if bytes.is_empty() {
            return Err(ApiError::BadRequest(format!("file field `{name}` is empty")));
        }

        let mut upload = ImageUpload::new(bytes);
        if let Some(file_name) = file_name {
            upload = upload.with_file_name(file_name);
        }
        if let Some(content_type) = content_type {
            upload = upload.with_content_type(content_type);
        }
        files.insert(name, upload);
    }

    Ok(Uploads(files))
}
