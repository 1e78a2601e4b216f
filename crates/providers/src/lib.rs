//! Provider abstractions for embeddings, image finding detection and text generation.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod cohere;
pub mod noop;
pub mod openai;
pub mod roboflow;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider not configured: {0}")]
    NotConfigured(String),
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("upstream returned status {status}: {body}")]
    Status {
        status: u16,
        body: String,
        retry_after_secs: Option<u64>,
    },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

/// Embedding flavour. Both modes must come from the same model so their
/// vectors are comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedMode {
    Document,
    Query,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub vectors: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFinding {
    pub label: String,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Detection {
    pub findings: Vec<ImageFinding>,
}

#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String], mode: EmbedMode)
        -> Result<EmbedResponse, ProviderError>;
}

#[async_trait::async_trait]
pub trait ImageFindingDetector: Send + Sync {
    /// `image` is the raw, already decoded image.
    async fn detect(&self, image: &[u8]) -> Result<Detection, ProviderError>;
}

#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    embeddings: HashMap<String, Arc<dyn EmbeddingProvider>>,
    detectors: HashMap<String, Arc<dyn ImageFindingDetector>>,
    generators: HashMap<String, Arc<dyn TextGenerator>>,
    pub preferred_embedding: Option<String>,
    pub preferred_detector: Option<String>,
    pub preferred_generator: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_embedding(mut self, name: &str, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embeddings.insert(name.to_string(), provider);
        self
    }

    pub fn with_detector(mut self, name: &str, provider: Arc<dyn ImageFindingDetector>) -> Self {
        self.detectors.insert(name.to_string(), provider);
        self
    }

    pub fn with_generator(mut self, name: &str, provider: Arc<dyn TextGenerator>) -> Self {
        self.generators.insert(name.to_string(), provider);
        self
    }

    pub fn set_preferred_embedding(mut self, name: &str) -> Self {
        self.preferred_embedding = Some(name.to_string());
        self
    }

    pub fn set_preferred_detector(mut self, name: &str) -> Self {
        self.preferred_detector = Some(name.to_string());
        self
    }

    pub fn set_preferred_generator(mut self, name: &str) -> Self {
        self.preferred_generator = Some(name.to_string());
        self
    }

    pub fn embedding(
        &self,
        name: Option<&str>,
    ) -> Result<Arc<dyn EmbeddingProvider>, ProviderError> {
        let key = resolve(name, &self.preferred_embedding, "embedding")?;
        self.embeddings
            .get(&key)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(key))
    }

    pub fn detector(
        &self,
        name: Option<&str>,
    ) -> Result<Arc<dyn ImageFindingDetector>, ProviderError> {
        let key = resolve(name, &self.preferred_detector, "image detection")?;
        self.detectors
            .get(&key)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(key))
    }

    pub fn generator(&self, name: Option<&str>) -> Result<Arc<dyn TextGenerator>, ProviderError> {
        let key = resolve(name, &self.preferred_generator, "text generation")?;
        self.generators
            .get(&key)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(key))
    }
}

fn resolve(
    name: Option<&str>,
    preferred: &Option<String>,
    what: &str,
) -> Result<String, ProviderError> {
    name.map(str::to_string)
        .or_else(|| preferred.clone())
        .ok_or_else(|| ProviderError::NotConfigured(format!("no {what} provider configured")))
}

/// Transport failure without the request URL, which may carry credentials.
pub(crate) fn request_failed(err: reqwest::Error) -> ProviderError {
    ProviderError::RequestFailed(err.without_url().to_string())
}

pub(crate) fn invalid_body(err: reqwest::Error) -> ProviderError {
    ProviderError::InvalidResponse(err.without_url().to_string())
}

/// Turns a non-2xx response into `ProviderError::Status`, keeping the body and
/// any `Retry-After` hint.
pub(crate) async fn check_status(
    resp: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let retry_after_secs = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok());
    let body = resp.bytes().await.unwrap_or(Bytes::from_static(b""));
    Err(ProviderError::Status {
        status: status.as_u16(),
        body: String::from_utf8_lossy(&body).into_owned(),
        retry_after_secs,
    })
}
