//! Verification orchestrator.
//!
//! Owns the order of every check on the enroll, update and verify paths:
//! provider call (bounded by a timeout), face presence, reference lookup,
//! dimension compatibility, similarity and threshold.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::provider::{EmbeddingProvider, ProviderError};
use crate::similarity::{self, DEFAULT_MATCH_THRESHOLD};
use crate::store::{ArtifactStore, ReferenceStore, StoreError};
use crate::types::{
    DetectedFace, Embedding, EnrollOutcome, IdentityId, ImageUpload, Reference, VerificationResult,
};

const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("no face detected in the submitted image")]
    NoFaceDetected,
    #[error("identity {0} has no enrolled reference face")]
    NotEnrolled(IdentityId),
    #[error("embedding dimension mismatch: reference has {reference}, candidate has {candidate}")]
    DimensionMismatch { reference: usize, candidate: usize },
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),
    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(#[from] ProviderError),
    #[error("reference store failure: {0}")]
    StoreFailure(#[from] StoreError),
}

/// Coordinates the embedding provider, the reference store and artifact storage.
///
/// Cheap to clone; holds no mutable state of its own.
#[derive(Clone)]
pub struct Verifier {
    provider: Arc<dyn EmbeddingProvider>,
    references: Arc<dyn ReferenceStore>,
    artifacts: Arc<dyn ArtifactStore>,
    threshold: f64,
    provider_timeout: Duration,
}

impl Verifier {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        references: Arc<dyn ReferenceStore>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            provider,
            references,
            artifacts,
            threshold: DEFAULT_MATCH_THRESHOLD,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn provider_timeout(&self) -> Duration {
        self.provider_timeout
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Run the embedding provider on an image, bounded by the provider timeout.
    pub async fn detect(&self, image: &ImageUpload) -> Result<Vec<DetectedFace>, VerifyError> {
        match tokio::time::timeout(self.provider_timeout, self.provider.detect(image)).await {
            Ok(Ok(faces)) => {
                tracing::debug!(faces = faces.len(), bytes = image.len(), "provider answered");
                Ok(faces)
            }
            Ok(Err(err)) => Err(VerifyError::ProviderUnavailable(err)),
            Err(_) => Err(VerifyError::ProviderUnavailable(ProviderError::Timeout(
                self.provider_timeout,
            ))),
        }
    }

    /// Create the identity's reference from a photo.
    ///
    /// An identity that is already enrolled gets its reference replaced,
    /// exactly as with [`update_reference`](Self::update_reference).
    pub async fn enroll(
        &self,
        identity: IdentityId,
        image: &ImageUpload,
    ) -> Result<EnrollOutcome, VerifyError> {
        self.replace_reference(identity, image, "enroll").await
    }

    /// Replace the identity's reference with one computed from a new photo.
    ///
    /// The photo tied to the previous reference is deleted only after the
    /// new reference has been persisted.
    pub async fn update_reference(
        &self,
        identity: IdentityId,
        image: &ImageUpload,
    ) -> Result<EnrollOutcome, VerifyError> {
        self.replace_reference(identity, image, "update").await
    }

    /// Compare a candidate embedding against the identity's stored reference.
    pub async fn verify(
        &self,
        identity: IdentityId,
        candidate: &Embedding,
    ) -> Result<VerificationResult, VerifyError> {
        let reference = self.load_reference(identity).await?;
        self.compare(identity, &reference.embedding, candidate)
    }

    /// Embed a photo and compare it against the identity's stored reference.
    pub async fn verify_image(
        &self,
        identity: IdentityId,
        image: &ImageUpload,
    ) -> Result<VerificationResult, VerifyError> {
        let reference = self.load_reference(identity).await?;
        let faces = self.detect(image).await?;
        let candidate = first_embedding(faces)?;
        self.compare(identity, &reference.embedding, &candidate)
    }

    async fn load_reference(&self, identity: IdentityId) -> Result<Reference, VerifyError> {
        self.references
            .get_reference(identity)
            .await?
            .ok_or(VerifyError::NotEnrolled(identity))
    }

    fn compare(
        &self,
        identity: IdentityId,
        reference: &Embedding,
        candidate: &Embedding,
    ) -> Result<VerificationResult, VerifyError> {
        if candidate.is_empty() {
            return Err(VerifyError::InvalidEmbedding("candidate vector is empty".into()));
        }
        if !candidate.is_finite() {
            return Err(VerifyError::InvalidEmbedding(
                "candidate vector contains non-finite values".into(),
            ));
        }
        if candidate.dimension() != reference.dimension() {
            return Err(VerifyError::DimensionMismatch {
                reference: reference.dimension(),
                candidate: candidate.dimension(),
            });
        }

        let similarity_score = reference.similarity(candidate)
            .map_err(|e| VerifyError::InvalidEmbedding(e.to_string()))?;
        let is_match = similarity::decide(similarity_score, self.threshold);

        tracing::info!(
            identity = %identity,
            dim = candidate.dimension(),
            similarity = similarity_score,
            threshold = self.threshold,
            is_match,
            "verify: compared against reference"
        );

        Ok(VerificationResult {
            similarity_score,
            is_match,
            match_threshold: self.threshold,
        })
    }

    async fn replace_reference(
        &self,
        identity: IdentityId,
        image: &ImageUpload,
        op: &'static str,
    ) -> Result<EnrollOutcome, VerifyError> {
        // Nothing has been written before this point, so dropping the
        // caller's future while the provider runs leaves no state behind.
        let faces = self.detect(image).await?;
        let face_count = faces.len();
        let embedding = match first_embedding(faces) {
            Ok(embedding) => embedding,
            Err(err) => {
                tracing::info!(identity = %identity, op, "no usable face; reference unchanged");
                return Err(err);
            }
        };
        tracing::debug!(identity = %identity, op, faces = face_count, dim = embedding.dimension(), "face embedded");

        // Artifact write, reference swap and old-artifact release run
        // detached so that cancellation cannot stop the sequence halfway.
        let this = self.clone();
        let image = image.clone();
        tokio::spawn(async move { this.persist(identity, embedding, image, op).await })
            .await
            .map_err(|e| {
                VerifyError::StoreFailure(StoreError::Backend(format!("persist task failed: {e}")))
            })?
    }

    async fn persist(
        self,
        identity: IdentityId,
        embedding: Embedding,
        image: ImageUpload,
        op: &'static str,
    ) -> Result<EnrollOutcome, VerifyError> {
        let dimension = embedding.dimension();
        let artifact = self.artifacts.put(identity, &image).await?;

        let reference = Reference {
            embedding,
            artifact: Some(artifact.clone()),
        };
        let previous = match self.references.set_reference(identity, &reference).await {
            Ok(previous) => previous,
            Err(err) => {
                if let Err(cleanup) = self.artifacts.release(&artifact).await {
                    tracing::warn!(
                        identity = %identity,
                        artifact = %artifact,
                        error = %cleanup,
                        "failed to release artifact of unsaved reference"
                    );
                }
                return Err(err.into());
            }
        };

        if let Some(prev) = &previous {
            if prev.embedding.dimension() != dimension {
                tracing::warn!(
                    identity = %identity,
                    old_dim = prev.embedding.dimension(),
                    new_dim = dimension,
                    "reference dimensionality changed on re-enrollment"
                );
            }
            if let Some(old) = prev.artifact.as_ref().filter(|old| **old != artifact) {
                if let Err(err) = self.artifacts.release(old).await {
                    tracing::warn!(identity = %identity, artifact = %old, error = %err, "failed to release previous artifact");
                }
            }
        }

        tracing::info!(
            identity = %identity,
            op,
            dim = dimension,
            artifact = %artifact,
            replaced = previous.is_some(),
            "reference stored"
        );

        Ok(EnrollOutcome {
            reference_set: true,
            artifact,
            dimension,
            replaced: previous.is_some(),
        })
    }
}

/// Embedding of the first detected face. No face, or an empty vector, is
/// `NoFaceDetected`; non-finite values are a bad provider response.
fn first_embedding(faces: Vec<DetectedFace>) -> Result<Embedding, VerifyError> {
    let face = faces.into_iter().next().ok_or(VerifyError::NoFaceDetected)?;
    if face.embedding.is_empty() {
        return Err(VerifyError::NoFaceDetected);
    }
    if !face.embedding.is_finite() {
        return Err(VerifyError::ProviderUnavailable(ProviderError::Decode(
            "embedding contains non-finite values".into(),
        )));
    }
    Ok(face.embedding)
}
