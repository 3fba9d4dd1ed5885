use serde::{Deserialize, Serialize};
use std::fmt;

use crate::similarity::{self, SimilarityError};

/// Opaque identifier of an enrolled (or enrollable) user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub i64);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Face embedding vector (typically 128- or 512-dimensional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f64>,
}

impl Embedding {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Number of dimensions.
    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Cosine similarity in [-1, 1]. Fails on a dimension mismatch.
    pub fn similarity(&self, other: &Embedding) -> Result<f64, SimilarityError> {
        similarity::cosine_similarity(&self.values, &other.values)
    }
}

impl From<Vec<f64>> for Embedding {
    fn from(values: Vec<f64>) -> Self {
        Self { values }
    }
}

/// Bounding box reported by the recognition service, in source pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub probability: f64,
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
}

/// Estimated age bracket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgeRange {
    pub probability: f64,
    pub low: u32,
    pub high: u32,
}

/// Estimated gender ("male" / "female").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gender {
    pub probability: f64,
    pub value: String,
}

/// One face found by the embedding provider.
///
/// Only `embedding` matters for verification; the other attributes are
/// passed through to callers that want to display them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub embedding: Embedding,
    #[serde(rename = "box", skip_serializing_if = "Option::is_none")]
    pub face_box: Option<FaceBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<AgeRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
}

impl DetectedFace {
    pub fn from_embedding(embedding: Embedding) -> Self {
        Self {
            embedding,
            face_box: None,
            age: None,
            gender: None,
        }
    }
}

/// An uploaded image, held in memory.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
}

impl ImageUpload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            file_name: None,
            content_type: None,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Lowercase file extension for storing this image.
    ///
    /// Taken from the file name when it has a short alphanumeric one,
    /// otherwise guessed from the content type (`png`, else `jpg`).
    pub fn extension(&self) -> String {
        let from_name = self
            .file_name
            .as_deref()
            .and_then(|name| std::path::Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty() && ext.len() <= 5)
            .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()));

        match from_name {
            Some(ext) => ext.to_ascii_lowercase(),
            None => match self.content_type.as_deref() {
                Some(ct) if ct.contains("png") => "png".to_string(),
                _ => "jpg".to_string(),
            },
        }
    }

    /// File name to present to the recognition service.
    pub fn upload_name(&self) -> String {
        format!("upload_image.{}", self.extension())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Key of a stored artifact (the public path of an avatar photo).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactKey(pub String);

impl ArtifactKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The single stored reference of an identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub embedding: Embedding,
    /// Photo the embedding was computed from, if one was kept.
    pub artifact: Option<ArtifactKey>,
}

/// Outcome of comparing a candidate against a stored reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VerificationResult {
    /// Cosine similarity in [-1, 1].
    pub similarity_score: f64,
    pub is_match: bool,
    pub match_threshold: f64,
}

/// Outcome of a successful enroll or reference update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollOutcome {
    pub reference_set: bool,
    pub artifact: ArtifactKey,
    pub dimension: usize,
    /// Whether an earlier reference was replaced.
    pub replaced: bool,
}
