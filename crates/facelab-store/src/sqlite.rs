//! SQLite-backed users, reference embeddings and sessions.
//!
//! Embeddings are stored as little-endian `f64` BLOBs next to their
//! dimension. A reference is replaced with one UPDATE inside an IMMEDIATE
//! transaction, so readers never see a half-written vector.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use facelab_core::{ArtifactKey, Embedding, IdentityId, Reference, ReferenceStore, StoreError};
use rand::Rng;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use sha2::{Digest, Sha256};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    avatar_url TEXT,
    face_embedding BLOB,
    embedding_dim INTEGER,
    reference_updated_at TEXT,
    CHECK ((face_embedding IS NULL) = (embedding_dim IS NULL))
);

CREATE TABLE IF NOT EXISTS sessions (
    token_hash TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
"#;

const TOKEN_BYTES: usize = 32;

/// A registered user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: IdentityId,
    pub username: String,
    pub created_at: String,
    pub avatar_url: Option<String>,
    /// Dimension of the stored reference, if enrolled.
    pub embedding_dim: Option<usize>,
}

impl User {
    pub fn has_reference(&self) -> bool {
        self.embedding_dim.is_some()
    }
}

/// Bearer token handed to a client. Only its SHA-256 digest is persisted.
#[derive(Debug, Clone)]
pub struct SessionToken {
    pub token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// SQLite store, safe to share between request handlers.
#[derive(Clone)]
pub struct SqliteStore {
    conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database file and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(map_err)?;
        let store = Self { conn };
        store.init().await?;
        tracing::info!(path = %path.display(), "database opened");
        Ok(store)
    }

    /// Private in-memory database.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(map_err)?;
        let store = Self { conn };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
                conn.execute_batch("PRAGMA foreign_keys = ON;")?;
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await
            .map_err(map_err)
    }

    /// Look up a user by name, registering it on first sight.
    pub async fn find_or_create_user(&self, username: &str) -> Result<User, StoreError> {
        let username = username.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let (user, created) = self
            .conn
            .call(move |conn| {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO users (username, created_at) VALUES (?1, ?2)",
                    params![username, now],
                )?;
                let user = conn.query_row(
                    "SELECT id, username, created_at, avatar_url, embedding_dim
                     FROM users WHERE username = ?1",
                    params![username],
                    decode_user_row,
                )?;
                Ok((user, inserted > 0))
            })
            .await
            .map_err(map_err)?;

        if created {
            tracing::info!(user = %user.id, username = %user.username, "user registered");
        }
        Ok(user)
    }

    pub async fn user(&self, id: IdentityId) -> Result<Option<User>, StoreError> {
        self.conn
            .call(move |conn| {
                let user = conn
                    .query_row(
                        "SELECT id, username, created_at, avatar_url, embedding_dim
                         FROM users WHERE id = ?1",
                        params![id.0],
                        decode_user_row,
                    )
                    .optional()?;
                Ok(user)
            })
            .await
            .map_err(map_err)
    }

    /// Issue a new session token for a user.
    pub async fn create_session(
        &self,
        user: IdentityId,
        ttl: Duration,
    ) -> Result<SessionToken, StoreError> {
        let token = new_token();
        let token_hash = hash_token(&token);
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| chrono::Utc::now().checked_add_signed(ttl))
            .ok_or_else(|| StoreError::Backend(format!("session lifetime {ttl:?} out of range")))?;
        let expires_ts = expires_at.timestamp();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sessions (token_hash, user_id, expires_at) VALUES (?1, ?2, ?3)",
                    params![token_hash, user.0, expires_ts],
                )?;
                Ok(())
            })
            .await
            .map_err(map_err)?;

        tracing::debug!(user = %user, "session issued");
        Ok(SessionToken { token, expires_at })
    }

    /// Owner of an unexpired session token. Expired sessions are purged.
    pub async fn resolve_session(&self, token: &str) -> Result<Option<IdentityId>, StoreError> {
        let token_hash = hash_token(token);
        let now = chrono::Utc::now().timestamp();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", params![now])?;
                let user = conn
                    .query_row(
                        "SELECT user_id FROM sessions WHERE token_hash = ?1 AND expires_at > ?2",
                        params![token_hash, now],
                        |row| row.get::<_, i64>(0),
                    )
                    .optional()?;
                Ok(user.map(IdentityId))
            })
            .await
            .map_err(map_err)
    }
}

#[async_trait]
impl ReferenceStore for SqliteStore {
    async fn get_reference(&self, identity: IdentityId) -> Result<Option<Reference>, StoreError> {
        let found = self
            .conn
            .call(move |conn| read_reference(conn, identity))
            .await
            .map_err(map_err)?;
        Ok(found.flatten())
    }

    async fn set_reference(
        &self,
        identity: IdentityId,
        reference: &Reference,
    ) -> Result<Option<Reference>, StoreError> {
        let values = &reference.embedding.values;
        if values.is_empty() {
            return Err(StoreError::InvalidReference("embedding is empty".into()));
        }
        if !reference.embedding.is_finite() {
            return Err(StoreError::InvalidReference(
                "embedding contains non-finite values".into(),
            ));
        }

        let blob = encode_embedding(values);
        let dim = values.len() as i64;
        let avatar = reference.artifact.as_ref().map(|k| k.0.clone());
        let now = chrono::Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let previous = match read_reference(&tx, identity)? {
                    Some(previous) => previous,
                    None => return Err(other(StoreError::UnknownIdentity(identity))),
                };
                tx.execute(
                    "UPDATE users
                     SET face_embedding = ?1, embedding_dim = ?2, avatar_url = ?3,
                         reference_updated_at = ?4
                     WHERE id = ?5",
                    params![blob, dim, avatar, now, identity.0],
                )?;
                tx.commit()?;
                Ok(previous)
            })
            .await
            .map_err(map_err)
    }
}

/// `None` when the user does not exist, `Some(None)` when it has no reference.
fn read_reference(
    conn: &rusqlite::Connection,
    identity: IdentityId,
) -> tokio_rusqlite::Result<Option<Option<Reference>>> {
    let row = conn
        .query_row(
            "SELECT face_embedding, embedding_dim, avatar_url FROM users WHERE id = ?1",
            params![identity.0],
            |row| {
                Ok((
                    row.get::<_, Option<Vec<u8>>>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            },
        )
        .optional()?;

    let Some((blob, dim, avatar)) = row else {
        return Ok(None);
    };
    let (Some(blob), Some(dim)) = (blob, dim) else {
        return Ok(Some(None));
    };

    let values = decode_embedding(&blob, dim).map_err(other)?;
    Ok(Some(Some(Reference {
        embedding: Embedding::new(values),
        artifact: avatar.map(ArtifactKey),
    })))
}

fn decode_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: IdentityId(row.get(0)?),
        username: row.get(1)?,
        created_at: row.get(2)?,
        avatar_url: row.get(3)?,
        embedding_dim: row.get::<_, Option<i64>>(4)?.map(|d| d as usize),
    })
}

fn encode_embedding(values: &[f64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 8);
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_embedding(blob: &[u8], dim: i64) -> Result<Vec<f64>, StoreError> {
    let expected = usize::try_from(dim)
        .ok()
        .and_then(|d| d.checked_mul(8))
        .ok_or_else(|| StoreError::Corrupt(format!("invalid embedding dimension {dim}")))?;
    if blob.len() != expected {
        return Err(StoreError::Corrupt(format!(
            "embedding blob is {} bytes, expected {expected} for dimension {dim}",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            f64::from_le_bytes(raw)
        })
        .collect())
}

fn new_token() -> String {
    let bytes: [u8; TOKEN_BYTES] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

fn other(err: StoreError) -> tokio_rusqlite::Error {
    tokio_rusqlite::Error::Other(Box::new(err))
}

fn map_err(err: tokio_rusqlite::Error) -> StoreError {
    match err {
        tokio_rusqlite::Error::Other(inner) => match inner.downcast::<StoreError>() {
            Ok(store_err) => *store_err,
            Err(inner) => StoreError::Backend(inner.to_string()),
        },
        other => StoreError::Backend(other.to_string()),
    }
}
