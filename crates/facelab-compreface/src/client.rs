//! HTTP client for the CompreFace recognition and verification services.

use std::time::Duration;

use async_trait::async_trait;
use facelab_core::{DetectedFace, EmbeddingProvider, ImageUpload, ProviderError};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::{ErrorBody, RecognitionResponse, VerificationResponse, NO_FACE_FOUND_CODE};

const API_KEY_HEADER: &str = "x-api-key";

/// Connection settings for a CompreFace deployment.
#[derive(Debug, Clone)]
pub struct CompreFaceConfig {
    /// Base URL, e.g. `http://localhost:8000`.
    pub base_url: String,
    /// API key of a recognition service (used to obtain embeddings).
    pub recognition_api_key: Option<String>,
    /// API key of a verification service (used for pair verification).
    pub verification_api_key: Option<String>,
    /// Per-request timeout enforced by the HTTP client.
    pub request_timeout: Duration,
}

impl CompreFaceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            recognition_api_key: None,
            verification_api_key: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of comparing the face in one image with the faces in another.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairVerification {
    /// Similarity of the best matching face, as reported by CompreFace.
    pub similarity: f64,
    pub is_match: bool,
    /// Age bracket of the matched face, formatted `low-high`.
    pub target_age: Option<String>,
    pub target_gender: Option<String>,
}

/// CompreFace client; implements [`EmbeddingProvider`] via the recognition endpoint.
#[derive(Debug, Clone)]
pub struct CompreFaceClient {
    http: reqwest::Client,
    config: CompreFaceConfig,
}

impl CompreFaceClient {
    pub fn new(config: CompreFaceConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(http, config))
    }

    pub fn with_client(http: reqwest::Client, mut config: CompreFaceConfig) -> Self {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Self { http, config }
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Detect faces and compute their embeddings.
    pub async fn recognize(&self, image: &ImageUpload) -> Result<Vec<DetectedFace>, ProviderError> {
        let key = required_key(&self.config.recognition_api_key, "recognition")?;
        let url = format!(
            "{}/api/v1/recognition/recognize?face_plugins=calculator,age,gender",
            self.config.base_url
        );
        let form = Form::new().part("file", image_part(image)?);

        let Some(parsed) = self.post::<RecognitionResponse>(&url, key, form).await? else {
            return Ok(Vec::new());
        };

        let mut faces = Vec::with_capacity(parsed.result.len());
        for face in parsed.result {
            match face.into_detected() {
                Some(detected) => faces.push(detected),
                None => {
                    return Err(ProviderError::Decode(
                        "face returned without embedding; is the calculator plugin enabled?".into(),
                    ))
                }
            }
        }
        Ok(faces)
    }

    /// Compare the face in `source` against faces in `target`.
    ///
    /// Returns `None` when either image has no face or nothing matched.
    pub async fn verify_pair(
        &self,
        source: &ImageUpload,
        target: &ImageUpload,
        threshold: f64,
    ) -> Result<Option<PairVerification>, ProviderError> {
        let key = required_key(&self.config.verification_api_key, "verification")?;
        let url = format!(
            "{}/api/v1/verification/verify?face_plugins=age,gender",
            self.config.base_url
        );
        let form = Form::new()
            .part("source_image", image_part(source)?)
            .part("target_image", image_part(target)?);

        let Some(parsed) = self.post::<VerificationResponse>(&url, key, form).await? else {
            return Ok(None);
        };

        let best = parsed
            .result
            .into_iter()
            .flat_map(|item| item.face_matches)
            .max_by(|a, b| a.similarity.total_cmp(&b.similarity));

        Ok(best.map(|m| PairVerification {
            similarity: m.similarity,
            is_match: m.similarity >= threshold,
            target_age: m.age.map(|a| format!("{}-{}", a.low, a.high)),
            target_gender: m.gender.map(|g| g.value),
        }))
    }

    /// POST a multipart form. `Ok(None)` means CompreFace found no face.
    async fn post<T: DeserializeOwned>(
        &self,
        url: &str,
        api_key: &str,
        form: Form,
    ) -> Result<Option<T>, ProviderError> {
        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        if status.is_success() {
            return serde_json::from_str(&body)
                .map(Some)
                .map_err(|e| ProviderError::Decode(e.to_string()));
        }

        if is_no_face(status, &body) {
            tracing::debug!(url, "compreface: no face found");
            return Ok(None);
        }

        tracing::warn!(url, status = status.as_u16(), body = %body, "compreface request failed");
        Err(ProviderError::Status {
            status: status.as_u16(),
            body,
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.config.request_timeout)
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl EmbeddingProvider for CompreFaceClient {
    async fn detect(&self, image: &ImageUpload) -> Result<Vec<DetectedFace>, ProviderError> {
        self.recognize(image).await
    }

    fn describe(&self) -> String {
        format!("compreface at {}", self.base_url())
    }
}

fn required_key<'a>(key: &'a Option<String>, service: &str) -> Result<&'a str, ProviderError> {
    key.as_deref()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ProviderError::NotConfigured(format!("missing {service} API key")))
}

fn is_no_face(status: StatusCode, body: &str) -> bool {
    status == StatusCode::BAD_REQUEST
        && serde_json::from_str::<ErrorBody>(body)
            .map(|e| e.code == Some(NO_FACE_FOUND_CODE))
            .unwrap_or(false)
}

fn image_part(image: &ImageUpload) -> Result<Part, ProviderError> {
    let ext = image.extension();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    };
    Part::bytes(image.bytes.clone())
        .file_name(image.upload_name())
        .mime_str(mime)
        .map_err(|e| ProviderError::Transport(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::Router;

    const KEY: &str = "test-key";

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn client(base_url: String) -> CompreFaceClient {
        let mut config = CompreFaceConfig::new(base_url);
        config.recognition_api_key = Some(KEY.into());
        config.verification_api_key = Some(KEY.into());
        CompreFaceClient::new(config).unwrap()
    }

    fn photo() -> ImageUpload {
        ImageUpload::new(vec![0xff, 0xd8, 0xff, 0xe0]).with_file_name("me.jpg")
    }

    fn reply(headers: &HeaderMap, status: u16, body: &'static str) -> (StatusCode, String) {
        if headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) != Some(KEY) {
            return (StatusCode::UNAUTHORIZED, r#"{"message":"bad key","code":401}"#.into());
        }
        (StatusCode::from_u16(status).unwrap(), body.to_string())
    }

    #[tokio::test]
    async fn test_recognize_returns_embeddings() {
        let router = Router::new().route(
            "/api/v1/recognition/recognize",
            post(|headers: HeaderMap| async move {
                reply(&headers, 200, r#"{"result":[{"embedding":[0.5,0.5],"box":{"probability":1,"x_min":0,"y_min":0,"x_max":5,"y_max":5}},{"embedding":[1.0,0.0]}]}"#)
            }),
        );
        let client = client(serve(router).await);

        let faces = client.detect(&photo()).await.unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].embedding.values, vec![0.5, 0.5]);
        assert_eq!(faces[0].face_box.as_ref().unwrap().x_max, 5);
    }

    #[tokio::test]
    async fn test_no_face_error_is_empty_list() {
        let router = Router::new().route(
            "/api/v1/recognition/recognize",
            post(|headers: HeaderMap| async move {
                reply(&headers, 400, r#"{"message":"No face is found in the given image","code":28}"#)
            }),
        );
        let client = client(serve(router).await);
        assert!(client.detect(&photo()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_server_error_is_status_error() {
        let router = Router::new().route(
            "/api/v1/recognition/recognize",
            post(|headers: HeaderMap| async move { reply(&headers, 500, "boom") }),
        );
        let client = client(serve(router).await);
        let err = client.detect(&photo()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_missing_embedding_is_decode_error() {
        let router = Router::new().route(
            "/api/v1/recognition/recognize",
            post(|headers: HeaderMap| async move { reply(&headers, 200, r#"{"result":[{"subjects":[]}]}"#) }),
        );
        let client = client(serve(router).await);
        let err = client.detect(&photo()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let client = CompreFaceClient::new(CompreFaceConfig::new("http://127.0.0.1:9")).unwrap();
        let err = client.detect(&photo()).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client(format!("http://{addr}"));
        let err = client.detect(&photo()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)));
    }

    #[tokio::test]
    async fn test_verify_pair_picks_best_match() {
        let router = Router::new().route(
            "/api/v1/verification/verify",
            post(|headers: HeaderMap| async move {
                reply(&headers, 200, r#"{"result":[{"face_matches":[
                    {"similarity":0.41},
                    {"similarity":0.93,"age":{"probability":0.7,"low":25,"high":32},"gender":{"probability":0.9,"value":"male"}}
                ]}]}"#)
            }),
        );
        let client = client(serve(router).await);

        let result = client.verify_pair(&photo(), &photo(), 0.8).await.unwrap().unwrap();
        assert_eq!(result.similarity, 0.93);
        assert!(result.is_match);
        assert_eq!(result.target_age.as_deref(), Some("25-32"));
        assert_eq!(result.target_gender.as_deref(), Some("male"));
    }

    #[tokio::test]
    async fn test_verify_pair_without_matches() {
        let router = Router::new().route(
            "/api/v1/verification/verify",
            post(|headers: HeaderMap| async move { reply(&headers, 200, r#"{"result":[{"face_matches":[]}]}"#) }),
        );
        let client = client(serve(router).await);
        assert!(client.verify_pair(&photo(), &photo(), 0.8).await.unwrap().is_none());
    }

    #[test]
    fn test_base_url_trimmed_and_described() {
        let client = client("http://compreface:8000/".into());
        assert_eq!(client.base_url(), "http://compreface:8000");
        assert_eq!(client.describe(), "compreface at http://compreface:8000");
    }

    #[test]
    fn test_is_no_face_only_for_code_28() {
        assert!(is_no_face(StatusCode::BAD_REQUEST, r#"{"message":"x","code":28}"#));
        assert!(!is_no_face(StatusCode::BAD_REQUEST, r#"{"message":"x","code":21}"#));
        assert!(!is_no_face(StatusCode::INTERNAL_SERVER_ERROR, r#"{"code":28}"#));
        assert!(!is_no_face(StatusCode::BAD_REQUEST, "not json"));
    }
}
