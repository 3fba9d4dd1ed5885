//! Persistence contracts consumed by the verifier.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{ArtifactKey, IdentityId, ImageUpload, Reference};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unknown identity: {0}")]
    UnknownIdentity(IdentityId),
    #[error("corrupt stored data: {0}")]
    Corrupt(String),
    #[error("refusing to store invalid reference: {0}")]
    InvalidReference(String),
    #[error("invalid artifact key: {0}")]
    InvalidArtifact(String),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Holds at most one reference embedding per identity.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    /// Current reference, or `None` for an identity that never enrolled.
    async fn get_reference(&self, identity: IdentityId) -> Result<Option<Reference>, StoreError>;

    /// Atomically replace (or create) the reference and return the one it replaced.
    ///
    /// Readers must observe either the previous reference or the new one
    /// in full.
    async fn set_reference(
        &self,
        identity: IdentityId,
        reference: &Reference,
    ) -> Result<Option<Reference>, StoreError>;
}

/// Durable storage for the photos references are computed from.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store the image and return its key. Must not leave partial files behind.
    async fn put(&self, identity: IdentityId, image: &ImageUpload) -> Result<ArtifactKey, StoreError>;

    /// Delete a stored artifact. Deleting a missing artifact succeeds.
    async fn release(&self, key: &ArtifactKey) -> Result<(), StoreError>;
}
