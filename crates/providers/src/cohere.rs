use crate::{
    check_status, invalid_body, request_failed, EmbedMode, EmbedResponse, EmbeddingProvider,
    ProviderError,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.cohere.com";

#[derive(Clone)]
pub struct CohereConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Clone)]
pub struct CohereProvider {
    client: Client,
    cfg: Arc<CohereConfig>,
}

impl CohereProvider {
    pub fn new(cfg: CohereConfig) -> Self {
        Self {
            client: Client::new(),
            cfg: Arc::new(cfg),
        }
    }
}

fn input_type(mode: EmbedMode) -> &'static str {
    match mode {
        EmbedMode::Document => "search_document",
        EmbedMode::Query => "search_query",
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    texts: &'a [String],
    input_type: &'static str,
    embedding_types: [&'static str; 1],
}

#[derive(Deserialize)]
struct EmbedApiResponse {
    embeddings: EmbeddingsByType,
}

#[derive(Deserialize)]
struct EmbeddingsByType {
    #[serde(default)]
    float: Vec<Vec<f32>>,
}

#[async_trait::async_trait]
impl EmbeddingProvider for CohereProvider {
    async fn embed(
        &self,
        texts: &[String],
        mode: EmbedMode,
    ) -> Result<EmbedResponse, ProviderError> {
        debug!(count = texts.len(), ?mode, "requesting embeddings");
        let body = EmbedRequest {
            model: &self.cfg.model,
            texts,
            input_type: input_type(mode),
            embedding_types: ["float"],
        };

        let resp = self
            .client
            .post(format!(
                "{}/v2/embed",
                self.cfg.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(request_failed)?;
        let resp = check_status(resp).await?;

        let parsed: EmbedApiResponse = resp
            .json()
            .await
            .map_err(invalid_body)?;

        if parsed.embeddings.float.len() != texts.len() {
            return Err(ProviderError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.embeddings.float.len()
            )));
        }

        Ok(EmbedResponse {
            vectors: parsed.embeddings.float,
        })
    }
}
