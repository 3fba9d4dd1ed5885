//! Login, avatar enrollment and vector verification.

use axum::extract::{Multipart, State};
use axum::Json;
use facelab_core::{Embedding, EnrollOutcome, VerificationResult};
use facelab_store::User;
use serde::{Deserialize, Serialize};

use super::read_images;
use crate::error::ApiError;
use crate::state::{AppState, AuthUser};

const MAX_USERNAME_LEN: usize = 64;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub id: i64,
    pub username: String,
    pub has_avatar: bool,
    pub avatar_url: Option<String>,
    pub token: String,
    pub expires_at: String,
}

/// POST /api/auth/login: create-or-get the user and issue a session token.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let username = req.username.trim();
    if username.is_empty() {
        return Err(ApiError::BadRequest("username must not be empty".into()));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(ApiError::BadRequest(format!(
            "username must be at most {MAX_USERNAME_LEN} characters"
        )));
    }

    let user = state.store.find_or_create_user(username).await?;
    let session = state
        .store
        .create_session(user.id, state.config.session_ttl())
        .await?;

    tracing::info!(user = %user.id, username = %user.username, "login");

    Ok(Json(LoginResponse {
        id: user.id.0,
        has_avatar: user.has_reference(),
        username: user.username,
        avatar_url: user.avatar_url,
        token: session.token,
        expires_at: session.expires_at.to_rfc3339(),
    }))
}

/// GET /api/auth/me: profile of the calling user.
pub async fn me(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Result<Json<User>, ApiError> {
    let user = state
        .store
        .user(identity)
        .await?
        .ok_or(ApiError::Unauthorized("session refers to an unknown user"))?;
    Ok(Json(user))
}

#[derive(Debug, Serialize)]
pub struct AvatarResponse {
    pub message: &'static str,
    pub avatar_url: String,
    pub reference_set: bool,
    pub dimension: usize,
    pub replaced: bool,
}

impl From<EnrollOutcome> for AvatarResponse {
    fn from(outcome: EnrollOutcome) -> Self {
        Self {
            message: if outcome.replaced {
                "Avatar updated"
            } else {
                "Avatar enrolled"
            },
            avatar_url: outcome.artifact.0,
            reference_set: outcome.reference_set,
            dimension: outcome.dimension,
            replaced: outcome.replaced,
        }
    }
}

/// POST /api/auth/upload-avatar: enroll the caller's face from field `file`.
pub async fn upload_avatar(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    multipart: Multipart,
) -> Result<Json<AvatarResponse>, ApiError> {
    let mut files = read_images(multipart, &["file"], state.config.max_upload_bytes).await?;
    let image = files.take("file")?;
    let outcome = state.verifier.enroll(identity, &image).await?;
    Ok(Json(outcome.into()))
}

/// POST /api/auth/update-avatar: replace the caller's reference from field `file`.
pub async fn update_avatar(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    multipart: Multipart,
) -> Result<Json<AvatarResponse>, ApiError> {
    let mut files = read_images(multipart, &["file"], state.config.max_upload_bytes).await?;
    let image = files.take("file")?;
    let outcome = state.verifier.update_reference(identity, &image).await?;
    Ok(Json(outcome.into()))
}

#[derive(Debug, Deserialize)]
pub struct VerifyVectorRequest {
    pub vector: Vec<f64>,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub similarity_score: f64,
    pub is_match: bool,
    pub match_threshold: f64,
    pub message: &'static str,
}

impl From<VerificationResult> for VerifyResponse {
    fn from(result: VerificationResult) -> Self {
        Self {
            similarity_score: result.similarity_score,
            is_match: result.is_match,
            match_threshold: result.match_threshold,
            message: if result.is_match {
                "Face verified"
            } else {
                "Face does not match"
            },
        }
    }
}

/// POST /api/auth/verify-face-vector: compare a client-computed embedding.
pub async fn verify_face_vector(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(req): Json<VerifyVectorRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let candidate = Embedding::new(req.vector);
    let result = state.verifier.verify(identity, &candidate).await?;
    Ok(Json(result.into()))
}
