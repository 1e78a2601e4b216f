use crate::{
    Detection, EmbedMode, EmbedResponse, EmbeddingProvider, ImageFindingDetector, ProviderError,
    TextGenerator,
};

/// Stand-in registered when no real provider has credentials. Every call
/// reports `NotConfigured` so the owning stage degrades instead of guessing.
#[derive(Debug, Default)]
pub struct NoopProvider;

#[async_trait::async_trait]
impl EmbeddingProvider for NoopProvider {
    async fn embed(
        &self,
        _texts: &[String],
        _mode: EmbedMode,
    ) -> Result<EmbedResponse, ProviderError> {
        Err(ProviderError::NotConfigured("embedding provider".into()))
    }
}

#[async_trait::async_trait]
impl ImageFindingDetector for NoopProvider {
    async fn detect(&self, _image: &[u8]) -> Result<Detection, ProviderError> {
        Err(ProviderError::NotConfigured("image detector".into()))
    }
}

#[async_trait::async_trait]
impl TextGenerator for NoopProvider {
    async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
        Err(ProviderError::NotConfigured("text generator".into()))
    }
}
