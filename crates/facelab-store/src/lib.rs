//! facelab-store: Persistence for Facelab.
//!
//! SQLite holds users, their reference embeddings and login sessions;
//! avatar photos live as plain files in a directory served over HTTP.

pub mod avatars;
pub mod sqlite;

pub use avatars::DiskArtifactStore;
pub use sqlite::{SessionToken, SqliteStore, User};
