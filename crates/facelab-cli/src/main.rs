use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facelab_core::{cosine_similarity, decide, image_hash, DEFAULT_MATCH_THRESHOLD};
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "facelab", about = "Facelab face verification CLI")]
struct Cli {
    /// Base URL of the facelabd service
    #[arg(long, env = "FACELAB_URL", default_value = "http://localhost:8080", global = true)]
    url: String,

    /// Session token returned by `facelab login`
    #[arg(long, env = "FACELAB_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in (creating the user if needed) and print a session token
    Login { username: String },
    /// Enroll your reference face from a photo
    Enroll { image: PathBuf },
    /// Replace your reference face with a new photo
    Update { image: PathBuf },
    /// Verify a photo against your reference face
    Verify { image: PathBuf },
    /// Verify an embedding (JSON array file) against your reference face
    VerifyVector { vector: PathBuf },
    /// Print the embedding of the first face in a photo
    Recognize { image: PathBuf },
    /// Show the logged-in user
    Me,
    /// Show service status
    Status,
    /// Cosine similarity of two embedding files, computed locally
    Similarity {
        left: PathBuf,
        right: PathBuf,
        #[arg(long, default_value_t = DEFAULT_MATCH_THRESHOLD)]
        threshold: f64,
    },
    /// Average-hash similarity of two images, computed locally
    Compare { first: PathBuf, second: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let api = Api::new(&cli.url, cli.token.clone());

    match cli.command {
        Commands::Login { username } => {
            let body = api.post_json("/api/auth/login", json!({ "username": username })).await?;
            let token = body["token"].as_str().context("login response has no token")?;
            eprintln!(
                "Logged in as {} (id {}); export FACELAB_TOKEN to use the session",
                body["username"], body["id"]
            );
            println!("{token}");
        }
        Commands::Enroll { image } => {
            let body = api.upload("/api/auth/upload-avatar", &[("file", image.as_path())]).await?;
            print_json(&body)?;
        }
        Commands::Update { image } => {
            let body = api.upload("/api/auth/update-avatar", &[("file", image.as_path())]).await?;
            print_json(&body)?;
        }
        Commands::Verify { image } => {
            let body = api.upload("/api/face/verify-image", &[("file", image.as_path())]).await?;
            print_json(&body)?;
        }
        Commands::VerifyVector { vector } => {
            let values = read_vector(&vector)?;
            let body = api
                .post_json("/api/auth/verify-face-vector", json!({ "vector": values }))
                .await?;
            print_json(&body)?;
        }
        Commands::Recognize { image } => {
            let body = api.upload("/api/face/recognize", &[("file", image.as_path())]).await?;
            print_json(&body)?;
        }
        Commands::Me => print_json(&api.get("/api/auth/me").await?)?,
        Commands::Status => print_json(&api.get("/api/status").await?)?,
        Commands::Similarity { left, right, threshold } => {
            let (a, b) = (read_vector(&left)?, read_vector(&right)?);
            let score = cosine_similarity(&a, &b)?;
            println!("similarity: {score:.6}");
            println!("match (>= {threshold}): {}", decide(score, threshold));
        }
        Commands::Compare { first, second } => {
            let a = std::fs::read(&first).with_context(|| format!("reading {}", first.display()))?;
            let b = std::fs::read(&second).with_context(|| format!("reading {}", second.display()))?;
            let result = image_hash::compare_images(&a, &b)?;
            println!("similarity: {:.2}%", result.similarity);
            println!("{}", result.message);
        }
    }

    Ok(())
}

/// Thin client for the facelabd HTTP API.
struct Api {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl Api {
    fn new(base: &str, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self.http.request(method, format!("{}{path}", self.base));
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn get(&self, path: &str) -> Result<Value> {
        send(self.request(reqwest::Method::GET, path)).await
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value> {
        send(self.request(reqwest::Method::POST, path).json(&body)).await
    }

    async fn upload(&self, path: &str, files: &[(&str, &Path)]) -> Result<Value> {
        let mut form = Form::new();
        for (field, file) in files {
            let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload".to_string());
            form = form.part(field.to_string(), Part::bytes(bytes).file_name(name));
        }
        send(self.request(reqwest::Method::POST, path).multipart(form)).await
    }
}

async fn send(req: reqwest::RequestBuilder) -> Result<Value> {
    let res = req.send().await.context("request to facelabd failed")?;
    let status = res.status();
    tracing::debug!(%status, url = %res.url(), "facelabd responded");
    let body: Value = res.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        let message = body["message"].as_str().unwrap_or("no error message");
        bail!("{status}: {message}");
    }
    Ok(body)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Read an embedding from a file holding a JSON array of numbers.
fn read_vector(path: &Path) -> Result<Vec<f64>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let values: Vec<f64> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of numbers", path.display()))?;
    if values.is_empty() {
        bail!("{} holds an empty vector", path.display());
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_read_vector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.json");
        std::fs::write(&path, "[0.5, -1, 2e-1]").unwrap();
        assert_eq!(read_vector(&path).unwrap(), vec![0.5, -1.0, 0.2]);

        std::fs::write(&path, "[]").unwrap();
        assert!(read_vector(&path).is_err());

        std::fs::write(&path, "{\"vector\": [1]}").unwrap();
        assert!(read_vector(&path).is_err());
    }

    #[test]
    fn test_parse_similarity_threshold_default() {
        let cli = Cli::try_parse_from(["facelab", "similarity", "a.json", "b.json"]).unwrap();
        match cli.command {
            Commands::Similarity { threshold, .. } => assert_eq!(threshold, DEFAULT_MATCH_THRESHOLD),
            _ => panic!("expected similarity"),
        }
    }

    #[test]
    fn test_api_base_url_trimmed() {
        let api = Api::new("http://localhost:8080/", None);
        assert_eq!(api.base, "http://localhost:8080");
    }
}
