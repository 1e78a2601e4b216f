use crate::{check_status, invalid_body, request_failed, ProviderError, TextGenerator};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;

/// Groq serves the OpenAI chat-completions API under this prefix.
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai";

#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
}

/// Any OpenAI-compatible chat-completions endpoint (OpenAI, Groq, local servers).
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    cfg: Arc<OpenAiConfig>,
}

impl OpenAiProvider {
    pub fn new(cfg: OpenAiConfig) -> Self {
        Self {
            client: Client::new(),
            cfg: Arc::new(cfg),
        }
    }
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessageResp,
}

#[derive(Deserialize)]
struct ChatMessageResp {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

/// First non-blank completion, or `InvalidResponse`.
fn completion_text(parsed: ChatApiResponse) -> Result<String, ProviderError> {
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ProviderError::InvalidResponse("empty completion".into()))
}

#[async_trait::async_trait]
impl TextGenerator for OpenAiProvider {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        #[derive(serde::Serialize)]
        struct ChatMessage<'a> {
            role: &'static str,
            content: &'a str,
        }
        #[derive(serde::Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: Vec<ChatMessage<'a>>,
            temperature: f32,
        }

        let body = ChatRequest {
            model: &self.cfg.chat_model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.0,
        };

        let resp = self
            .client
            .post(format!(
                "{}/v1/chat/completions",
                self.cfg.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(request_failed)?;
        let resp = check_status(resp).await?;

        let parsed: ChatApiResponse = resp.json().await.map_err(invalid_body)?;
        completion_text(parsed)
    }
}
