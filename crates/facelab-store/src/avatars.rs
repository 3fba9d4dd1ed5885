//! Avatar photos on disk.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use facelab_core::{ArtifactKey, ArtifactStore, IdentityId, ImageUpload, StoreError};

/// URL prefix under which avatar files are served.
pub const AVATAR_URL_PREFIX: &str = "/avatars";

/// Stores each avatar as `{identity}_{uuid}.{ext}` inside one directory.
///
/// Files are written to a temporary file in the same directory and renamed
/// into place, so a failed or interrupted write leaves nothing behind.
#[derive(Debug, Clone)]
pub struct DiskArtifactStore {
    dir: PathBuf,
}

impl DiskArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Filesystem path of an artifact key, rejecting keys that leave the directory.
    pub fn path_for(&self, key: &ArtifactKey) -> Result<PathBuf, StoreError> {
        let name = key
            .as_str()
            .strip_prefix(AVATAR_URL_PREFIX)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| StoreError::InvalidArtifact(key.to_string()))?;

        let plain = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\'])
            && !name.starts_with('.');
        if !plain {
            return Err(StoreError::InvalidArtifact(key.to_string()));
        }
        Ok(self.dir.join(name))
    }
}

#[async_trait]
impl ArtifactStore for DiskArtifactStore {
    async fn put(&self, identity: IdentityId, image: &ImageUpload) -> Result<ArtifactKey, StoreError> {
        let name = format!("{identity}_{}.{}", uuid::Uuid::new_v4().simple(), image.extension());
        let dir = self.dir.clone();
        let bytes = image.bytes.clone();
        let target = dir.join(&name);

        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            std::fs::create_dir_all(&dir)?;
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target).map_err(|e| StoreError::Io(e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Backend(format!("avatar write task failed: {e}")))??;

        let key = ArtifactKey(format!("{AVATAR_URL_PREFIX}/{name}"));
        tracing::debug!(identity = %identity, artifact = %key, bytes = image.len(), "avatar stored");
        Ok(key)
    }

    async fn release(&self, key: &ArtifactKey) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(artifact = %key, "avatar released");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
