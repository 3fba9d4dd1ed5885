//! facelab-compreface: CompreFace as the embedding provider.
//!
//! Embeddings come from the recognition service with the `calculator`
//! plugin; pairwise photo comparison goes to the verification service.

pub mod client;
pub mod models;

pub use client::{CompreFaceClient, CompreFaceConfig, PairVerification};
