use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use facelab_compreface::CompreFaceClient;
use facelab_core::{IdentityId, Verifier};
use facelab_store::SqliteStore;

use crate::config::Config;
use crate::error::ApiError;

/// Shared handler state. Clones are cheap.
#[derive(Clone)]
pub struct AppState {
    pub verifier: Verifier,
    pub store: SqliteStore,
    /// Used directly for photo-to-photo verification.
    pub compreface: Arc<CompreFaceClient>,
    pub config: Arc<Config>,
}

/// Identity of the caller, resolved from an `Authorization: Bearer` session token.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub IdentityId);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized("missing bearer token"))?;

        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::Unauthorized("malformed authorization header"))?;

        let identity = state
            .store
            .resolve_session(token)
            .await?
            .ok_or(ApiError::Unauthorized("invalid or expired session token"))?;

        Ok(AuthUser(identity))
    }
}
