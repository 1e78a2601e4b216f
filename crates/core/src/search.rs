use crate::embeddings::{embed, EmbeddingRequest};
use crate::error::{bounded, StageFailure};
use crate::models::SimilarityResult;
use crate::vectorstore::{rank_by_distance, CaseStore};
use providers::{EmbedMode, ProviderRegistry};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_LIMIT: usize = 5;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub enum CaseSearchStatus {
    Completed,
    /// Nothing to search with; not a failure.
    Skipped,
    Failed(StageFailure),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseSearchOutcome {
    pub results: Vec<SimilarityResult>,
    pub status: CaseSearchStatus,
}

impl CaseSearchOutcome {
    pub fn skipped() -> Self {
        Self {
            results: Vec::new(),
            status: CaseSearchStatus::Skipped,
        }
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        match &self.status {
            CaseSearchStatus::Failed(f) => Some(f),
            _ => None,
        }
    }
}

/// Query-mode embedding followed by a nearest-neighbour lookup in the case
/// store. Either step failing degrades to an empty result.
#[derive(Clone)]
pub struct SimilarCaseRetriever {
    registry: ProviderRegistry,
    store: Arc<dyn CaseStore>,
    provider: Option<String>,
    embed_timeout: Duration,
    store_timeout: Duration,
}

impl SimilarCaseRetriever {
    pub fn new(registry: ProviderRegistry, store: Arc<dyn CaseStore>) -> Self {
        Self {
            registry,
            store,
            provider: None,
            embed_timeout: DEFAULT_TIMEOUT,
            store_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_timeouts(mut self, embed: Duration, store: Duration) -> Self {
        self.embed_timeout = embed;
        self.store_timeout = store;
        self
    }

    pub async fn search(&self, text: &str, limit: usize) -> CaseSearchOutcome {
        let text = text.trim();
        if text.is_empty() || limit == 0 {
            return CaseSearchOutcome::skipped();
        }
        match self.try_search(text, limit).await {
            Ok(results) => {
                debug!(found = results.len(), limit, "similar case search complete");
                CaseSearchOutcome {
                    results,
                    status: CaseSearchStatus::Completed,
                }
            }
            Err(failure) => {
                warn!(kind = %failure.kind, error = %failure.message, "similar case search failed");
                CaseSearchOutcome {
                    results: Vec::new(),
                    status: CaseSearchStatus::Failed(failure),
                }
            }
        }
    }

    /// Ranked matches only; failures are logged and yield an empty list.
    pub async fn find_similar(&self, text: &str, limit: usize) -> Vec<SimilarityResult> {
        self.search(text, limit).await.results
    }

    async fn try_search(
        &self,
        text: &str,
        limit: usize,
    ) -> Result<Vec<SimilarityResult>, StageFailure> {
        let req = EmbeddingRequest {
            texts: vec![text.to_string()],
            mode: EmbedMode::Query,
            provider: self.provider.clone(),
        };
        let mut result = embed(req, &self.registry, self.embed_timeout).await?;
        let vector = result.vectors.pop().unwrap_or_default();

        let mut results = bounded(self.store_timeout, self.store.search(&vector, limit)).await?;
        // Ties keep store order; the cap holds whatever the store returned.
        rank_by_distance(&mut results, limit);
        Ok(results)
    }
}
