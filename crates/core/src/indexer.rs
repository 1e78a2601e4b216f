//! Case ingestion: validate, embed in document mode, store.

use crate::embeddings::{case_text, embed, EmbeddingRequest};
use crate::error::{bounded, StageFailure};
use crate::models::NewCase;
use crate::vectorstore::CaseStore;
use providers::{EmbedMode, ProviderRegistry};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_BATCH_SIZE: usize = 50;
const MAX_PATIENT_AGE: i64 = 150;

const SAMPLE_CASES: &str = include_str!("../data/sample_cases.json");

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid case: {0}")]
    Invalid(String),
    #[error("{stage} failed: {failure}")]
    Failed {
        stage: &'static str,
        failure: StageFailure,
    },
}

impl IngestError {
    fn embedding(failure: StageFailure) -> Self {
        IngestError::Failed {
            stage: "embedding",
            failure,
        }
    }

    fn store(failure: StageFailure) -> Self {
        IngestError::Failed {
            stage: "case store",
            failure,
        }
    }
}

pub fn validate(case: &NewCase) -> Result<(), IngestError> {
    let required = [
        ("title", &case.title),
        ("description", &case.description),
        ("symptoms", &case.symptoms),
        ("diagnosis", &case.diagnosis),
        ("treatment", &case.treatment),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(IngestError::Invalid(format!("{field} must not be empty")));
        }
    }
    if !(0..=MAX_PATIENT_AGE).contains(&case.patient_age) {
        return Err(IngestError::Invalid(format!(
            "patient_age {} is outside 0..={MAX_PATIENT_AGE}",
            case.patient_age
        )));
    }
    Ok(())
}

/// The built-in sample corpus used by `clinical seed`.
pub fn sample_cases() -> anyhow::Result<Vec<NewCase>> {
    Ok(serde_json::from_str(SAMPLE_CASES)?)
}

#[derive(Clone)]
pub struct CaseIndexer {
    registry: ProviderRegistry,
    store: Arc<dyn CaseStore>,
    provider: Option<String>,
    batch_size: usize,
    embed_timeout: Duration,
    store_timeout: Duration,
}

impl CaseIndexer {
    pub fn new(registry: ProviderRegistry, store: Arc<dyn CaseStore>) -> Self {
        Self {
            registry,
            store,
            provider: None,
            batch_size: DEFAULT_BATCH_SIZE,
            embed_timeout: crate::search::DEFAULT_TIMEOUT,
            store_timeout: crate::search::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_timeouts(mut self, embed: Duration, store: Duration) -> Self {
        self.embed_timeout = embed;
        self.store_timeout = store;
        self
    }

    pub async fn ingest(&self, case: &NewCase) -> Result<i64, IngestError> {
        let ids = self.ingest_batch(std::slice::from_ref(case)).await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| IngestError::Invalid("nothing was stored".into()))
    }

    /// Every case is validated before anything is embedded, and every batch
    /// is embedded before anything is stored. Storage is all-or-nothing, so
    /// a failure leaves the store as it was. Returns the new ids in input
    /// order.
    pub async fn ingest_batch(&self, cases: &[NewCase]) -> Result<Vec<i64>, IngestError> {
        for case in cases {
            validate(case)?;
        }
        let mut vectors = Vec::with_capacity(cases.len());
        for batch in cases.chunks(self.batch_size) {
            let req = EmbeddingRequest {
                texts: batch.iter().map(case_text).collect(),
                mode: EmbedMode::Document,
                provider: self.provider.clone(),
            };
            let embedded = embed(req, &self.registry, self.embed_timeout)
                .await
                .map_err(IngestError::embedding)?;
            debug!(batch = batch.len(), "embedded case batch");
            vectors.extend(embedded.vectors);
        }

        let ids = bounded(self.store_timeout, self.store.insert_many(cases, &vectors))
            .await
            .map_err(IngestError::store)?;
        info!(count = ids.len(), "cases ingested");
        Ok(ids)
    }
}
