use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub embeddings: EmbeddingConfig,
    pub imaging: ImagingConfig,
    pub retrieval: RetrievalConfig,
    pub narrative: NarrativeConfig,
    pub rules: RuleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/clinical_cases.db".into(),
            max_connections: storage::DEFAULT_MAX_CONNECTIONS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "cohere".into(),
            model: "embed-english-v3.0".into(),
            dimension: 1024,
            batch_size: 50,
            timeout_secs: 10,
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagingConfig {
    pub provider: String,
    pub timeout_secs: u64,
    pub min_payload_bytes: usize,
    pub normal_confidence: f32,
}

impl Default for ImagingConfig {
    fn default() -> Self {
        Self {
            provider: "roboflow".into(),
            timeout_secs: 30,
            min_payload_bytes: 100,
            normal_confidence: 0.8,
        }
    }
}

impl ImagingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub limit: usize,
    pub store_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: 5,
            store_timeout_secs: 10,
        }
    }
}

impl RetrievalConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeConfig {
    pub enabled: bool,
    pub provider: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "groq".into(),
            model: "llama-3.3-70b-versatile".into(),
            timeout_secs: 30,
        }
    }
}

impl NarrativeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    pub path: Option<String>,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            path: Some("rules".into()),
        }
    }
}

/// Reads `path` (or `config/default` when absent, which may be missing) and
/// overlays `CLINICAL__SECTION__KEY` environment variables.
pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("CLINICAL")
            .separator("__")
            .try_parsing(true),
    );
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}
