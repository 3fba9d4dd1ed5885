//! Embedding provider capability.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::types::{DetectedFace, ImageUpload};

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed provider response: {0}")]
    Decode(String),
    #[error("provider did not answer within {0:?}")]
    Timeout(Duration),
    #[error("provider is not configured: {0}")]
    NotConfigured(String),
}

/// Turns an image into zero or more detected faces with embeddings.
///
/// An image without faces is a normal outcome and must be reported as an
/// empty list, not an error.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn detect(&self, image: &ImageUpload) -> Result<Vec<DetectedFace>, ProviderError>;

    /// Human-readable description for status output.
    fn describe(&self) -> String {
        "embedding provider".to_string()
    }
}
