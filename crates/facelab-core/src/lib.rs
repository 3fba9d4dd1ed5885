//! facelab-core: Face reference enrollment and verification.
//!
//! Face detection and embedding run in an external recognition service
//! reached through [`EmbeddingProvider`]. This crate owns the reference
//! vector lifecycle, the cosine similarity decision and the average-hash
//! image comparison.

pub mod image_hash;
pub mod provider;
pub mod similarity;
pub mod store;
pub mod types;
pub mod verifier;

pub use provider::{EmbeddingProvider, ProviderError};
pub use similarity::{cosine_similarity, decide, SimilarityError, DEFAULT_MATCH_THRESHOLD};
pub use store::{ArtifactStore, ReferenceStore, StoreError};
pub use types::{
    ArtifactKey, DetectedFace, Embedding, EnrollOutcome, FaceBox, IdentityId, ImageUpload,
    Reference, VerificationResult,
};
pub use verifier::{Verifier, VerifyError};
