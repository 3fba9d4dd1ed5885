use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use facelab_core::DEFAULT_MATCH_THRESHOLD;

/// Service configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 0.0.0.0:8080).
    pub bind_addr: SocketAddr,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory holding avatar photos, served under `/avatars`.
    pub avatar_dir: PathBuf,
    /// Cosine similarity threshold for a positive match.
    pub match_threshold: f64,
    /// Timeout in seconds for one embedding provider call.
    pub provider_timeout_secs: u64,
    /// Base URL of the CompreFace deployment.
    pub compreface_url: String,
    /// API key of the CompreFace recognition service.
    pub recognition_api_key: Option<String>,
    /// API key of the CompreFace verification service.
    pub verification_api_key: Option<String>,
    /// Origins allowed by CORS; `*` allows any.
    pub cors_origins: Vec<String>,
    /// Lifetime of a login session in hours.
    pub session_ttl_hours: u64,
    /// Largest accepted image upload in bytes.
    pub max_upload_bytes: usize,
}

impl Config {
    /// Load configuration from `FACELAB_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("FACELAB_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                var("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| {
                        let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("facelab")
            });

        let db_path = var("FACELAB_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("facelab.db"));
        let avatar_dir = var("FACELAB_AVATAR_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("avatars"));

        let bind_addr = match var("FACELAB_BIND") {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "invalid FACELAB_BIND; using default");
                default_bind_addr()
            }),
            None => default_bind_addr(),
        };

        let cors_origins = var("FACELAB_CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_else(|| vec!["http://localhost:3000".to_string()]);

        Self {
            bind_addr,
            db_path,
            avatar_dir,
            match_threshold: threshold(var("FACELAB_MATCH_THRESHOLD")),
            provider_timeout_secs: parse_or(&var, "FACELAB_PROVIDER_TIMEOUT_SECS", 10).max(1),
            compreface_url: var("FACELAB_COMPREFACE_URL")
                .unwrap_or_else(|| "http://localhost:8000".to_string()),
            recognition_api_key: var("FACELAB_RECOGNITION_API_KEY").filter(|k| !k.is_empty()),
            verification_api_key: var("FACELAB_VERIFICATION_API_KEY").filter(|k| !k.is_empty()),
            cors_origins,
            session_ttl_hours: parse_or(&var, "FACELAB_SESSION_TTL_HOURS", 24 * 7),
            max_upload_bytes: parse_or(&var, "FACELAB_MAX_UPLOAD_BYTES", 10 * 1024 * 1024),
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_hours.saturating_mul(3600))
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Match threshold must be a finite cosine value.
fn threshold(raw: Option<String>) -> f64 {
    let Some(raw) = raw else {
        return DEFAULT_MATCH_THRESHOLD;
    };
    match raw.parse::<f64>() {
        Ok(t) if t.is_finite() && (-1.0..=1.0).contains(&t) => t,
        _ => {
            tracing::warn!(value = %raw, default = DEFAULT_MATCH_THRESHOLD, "invalid FACELAB_MATCH_THRESHOLD; using default");
            DEFAULT_MATCH_THRESHOLD
        }
    }
}

fn parse_or<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("HOME", "/home/u")]);
        assert_eq!(config.bind_addr, default_bind_addr());
        assert_eq!(config.db_path, PathBuf::from("/home/u/.local/share/facelab/facelab.db"));
        assert_eq!(config.avatar_dir, PathBuf::from("/home/u/.local/share/facelab/avatars"));
        assert_eq!(config.match_threshold, 0.8);
        assert_eq!(config.provider_timeout(), Duration::from_secs(10));
        assert_eq!(config.session_ttl(), Duration::from_secs(7 * 24 * 3600));
        assert_eq!(config.cors_origins, vec!["http://localhost:3000"]);
        assert!(config.recognition_api_key.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("FACELAB_DATA_DIR", "/srv/facelab"),
            ("FACELAB_BIND", "127.0.0.1:9000"),
            ("FACELAB_MATCH_THRESHOLD", "0.65"),
            ("FACELAB_PROVIDER_TIMEOUT_SECS", "3"),
            ("FACELAB_RECOGNITION_API_KEY", "rk"),
            ("FACELAB_CORS_ORIGINS", "https://a.example, https://b.example,"),
        ]);
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.db_path, PathBuf::from("/srv/facelab/facelab.db"));
        assert_eq!(config.match_threshold, 0.65);
        assert_eq!(config.provider_timeout_secs, 3);
        assert_eq!(config.recognition_api_key.as_deref(), Some("rk"));
        assert_eq!(config.cors_origins, vec!["https://a.example", "https://b.example"]);
    }

    #[test]
    fn test_invalid_threshold_falls_back() {
        for bad in ["1.5", "-2", "NaN", "abc", "inf"] {
            let config = load(&[("FACELAB_MATCH_THRESHOLD", bad)]);
            assert_eq!(config.match_threshold, DEFAULT_MATCH_THRESHOLD, "{bad}");
        }
    }

    #[test]
    fn test_zero_timeout_is_clamped() {
        let config = load(&[("FACELAB_PROVIDER_TIMEOUT_SECS", "0")]);
        assert_eq!(config.provider_timeout_secs, 1);
    }
}
