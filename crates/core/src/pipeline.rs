use crate::api::{AnalyzeRequest, AnalyzeResponse};
use crate::classifier::InputClassifier;
use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::imaging::ImageAnalysisAdapter;
use crate::indexer::CaseIndexer;
use crate::models::{AnalysisResult, ClinicalQuery, ImageAnalysisOutcome, QueryClass};
use crate::narrator::Narrator;
use crate::rules::RuleBook;
use crate::search::{CaseSearchOutcome, SimilarCaseRetriever, DEFAULT_LIMIT};
use crate::synthesizer::{DiagnosticSynthesizer, SynthesisInput};
use crate::vectorstore::{CaseStore, SqliteCaseStore};
use anyhow::Context;
use providers::cohere::{CohereConfig, CohereProvider};
use providers::noop::NoopProvider;
use providers::openai::{OpenAiConfig, OpenAiProvider, GROQ_BASE_URL};
use providers::roboflow::{RoboflowConfig, RoboflowDetector};
use providers::ProviderRegistry;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Per-request states, in order. Image analysis is skipped for queries
/// without an image; greetings go straight from `Classified` to
/// `Synthesized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    Classified,
    ImageAnalyzed,
    CaseSearch,
    Synthesized,
    Returned,
}

#[derive(Clone)]
pub struct PipelineOrchestrator {
    classifier: InputClassifier,
    imaging: ImageAnalysisAdapter,
    retriever: SimilarCaseRetriever,
    synthesizer: DiagnosticSynthesizer,
    narrator: Option<Narrator>,
    limit: usize,
}

impl PipelineOrchestrator {
    pub fn new(
        imaging: ImageAnalysisAdapter,
        retriever: SimilarCaseRetriever,
        synthesizer: DiagnosticSynthesizer,
    ) -> Self {
        Self {
            classifier: InputClassifier::new(),
            imaging,
            retriever,
            synthesizer,
            narrator: None,
            limit: DEFAULT_LIMIT,
        }
    }

    pub fn with_narrator(mut self, narrator: Narrator) -> Self {
        self.narrator = Some(narrator);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Wires every stage from configuration around an existing registry and
    /// case store.
    pub fn from_parts(
        config: &AppConfig,
        registry: ProviderRegistry,
        store: Arc<dyn CaseStore>,
    ) -> Self {
        let imaging = ImageAnalysisAdapter::new(registry.clone())
            .with_timeout(config.imaging.timeout())
            .with_min_payload_bytes(config.imaging.min_payload_bytes)
            .with_normal_confidence(config.imaging.normal_confidence);
        let retriever = SimilarCaseRetriever::new(registry.clone(), store).with_timeouts(
            config.embeddings.timeout(),
            config.retrieval.store_timeout(),
        );
        let rules = RuleBook::load(config.rules.path.as_deref().map(Path::new));
        let mut orchestrator = Self::new(imaging, retriever, DiagnosticSynthesizer::new(rules))
            .with_limit(config.retrieval.limit);
        if config.narrative.enabled {
            orchestrator = orchestrator.with_narrator(
                Narrator::new(registry).with_timeout(config.narrative.timeout()),
            );
        }
        orchestrator
    }

    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let registry = build_registry(config);
        let store = build_case_store(config).await?;
        Ok(Self::from_parts(config, registry, store))
    }

    /// Runs one query through every stage. Only an invalid request is an
    /// error; stage failures are folded into the returned result.
    pub async fn run(&self, query: &ClinicalQuery) -> Result<AnalysisResult, PipelineError> {
        enter(PipelineStage::Received);
        let classification = self.classifier.classify(query.text(), query.has_image())?;
        enter(PipelineStage::Classified);
        debug!(?classification, "query classified");

        if classification == QueryClass::Greeting {
            let result = self.synthesizer.synthesize_outcome(SynthesisInput {
                query,
                classification,
                image: None,
                cases: &CaseSearchOutcome::skipped(),
            });
            enter(PipelineStage::Synthesized);
            enter(PipelineStage::Returned);
            return Ok(result);
        }

        let image = match query.image() {
            Some(attachment) => {
                let outcome = self.imaging.analyze(attachment).await;
                enter(PipelineStage::ImageAnalyzed);
                Some(outcome)
            }
            None => None,
        };

        enter(PipelineStage::CaseSearch);
        let cases = match retrieval_text(query, image.as_ref()) {
            Some(text) => self.retriever.search(&text, self.limit).await,
            None => CaseSearchOutcome::skipped(),
        };

        let mut result = self.synthesizer.synthesize_outcome(SynthesisInput {
            query,
            classification,
            image: image.as_ref(),
            cases: &cases,
        });
        enter(PipelineStage::Synthesized);

        if let Some(narrator) = &self.narrator {
            result = match narrator.summarize(query, &result).await {
                Ok(summary) => result.with_summary(&summary),
                Err(failure) => result.with_caveat(failure.caveat("assistant summary")),
            };
        }

        enter(PipelineStage::Returned);
        info!(
            diagnosis = %result.diagnosis,
            confidence = result.confidence,
            caveats = result.caveats.len(),
            "analysis complete"
        );
        Ok(result)
    }

    /// Boundary entry point: never fails, errors become `{kind, message}`.
    pub async fn handle(&self, req: AnalyzeRequest) -> AnalyzeResponse {
        let query = ClinicalQuery::from(req);
        AnalyzeResponse::from(self.run(&query).await)
    }
}

fn enter(stage: PipelineStage) {
    debug!(?stage, "pipeline stage");
}

/// Text used for case search: the query itself, or for image-only queries
/// the labels of whatever the detector found.
pub fn retrieval_text(
    query: &ClinicalQuery,
    image: Option<&ImageAnalysisOutcome>,
) -> Option<String> {
    let text = query.text().trim();
    if !text.is_empty() {
        return Some(text.to_string());
    }
    let labels: Vec<&str> = image
        .map(|o| o.findings.iter().map(|f| f.label.as_str()).collect())
        .unwrap_or_default();
    if labels.is_empty() {
        None
    } else {
        Some(labels.join(", "))
    }
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// The detector needs a key, a model id and a model version; any of them
/// missing leaves imaging unconfigured.
fn roboflow_config(lookup: impl Fn(&str) -> Option<String>) -> Option<RoboflowConfig> {
    Some(RoboflowConfig {
        api_key: lookup("ROBOFLOW_API_KEY")?,
        model_id: lookup("ROBOFLOW_MODEL_ID")?,
        model_version: lookup("ROBOFLOW_MODEL_VERSION")?,
        base_url: lookup("ROBOFLOW_BASE_URL")
            .unwrap_or_else(|| providers::roboflow::DEFAULT_BASE_URL.to_string()),
    })
}

/// Registers every provider whose credentials are present in the
/// environment, plus `noop` for each capability.
pub fn build_registry(config: &AppConfig) -> ProviderRegistry {
    let noop = Arc::new(NoopProvider);
    let mut reg = ProviderRegistry::new()
        .with_embedding("noop", noop.clone())
        .with_detector("noop", noop.clone())
        .with_generator("noop", noop);

    if let Some(key) = env("COHERE_API_KEY") {
        let provider = CohereProvider::new(CohereConfig {
            api_key: key,
            base_url: env("COHERE_BASE_URL")
                .unwrap_or_else(|| providers::cohere::DEFAULT_BASE_URL.to_string()),
            model: config.embeddings.model.clone(),
        });
        reg = reg.with_embedding("cohere", Arc::new(provider));
    }

    if let Some(cfg) = roboflow_config(env) {
        reg = reg.with_detector("roboflow", Arc::new(RoboflowDetector::new(cfg)));
    }

    if let Some(key) = env("GROQ_API_KEY") {
        let provider = OpenAiProvider::new(OpenAiConfig {
            api_key: key,
            base_url: env("GROQ_BASE_URL").unwrap_or_else(|| GROQ_BASE_URL.to_string()),
            chat_model: config.narrative.model.clone(),
        });
        reg = reg.with_generator("groq", Arc::new(provider));
    }

    if let Some(key) = env("OPENAI_API_KEY") {
        let provider = OpenAiProvider::new(OpenAiConfig {
            api_key: key,
            base_url: env("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            chat_model: config.narrative.model.clone(),
        });
        reg = reg.with_generator("openai", Arc::new(provider));
    }

    reg.set_preferred_embedding(&config.embeddings.provider)
        .set_preferred_detector(&config.imaging.provider)
        .set_preferred_generator(&config.narrative.provider)
}

pub async fn build_case_store(config: &AppConfig) -> anyhow::Result<Arc<SqliteCaseStore>> {
    let store = SqliteCaseStore::open(
        &config.database.path,
        config.database.max_connections,
        config.embeddings.dimension,
    )
    .await
    .with_context(|| format!("opening case store at {}", config.database.path))?;
    Ok(Arc::new(store))
}

pub fn build_indexer(
    config: &AppConfig,
    registry: ProviderRegistry,
    store: Arc<dyn CaseStore>,
) -> CaseIndexer {
    CaseIndexer::new(registry, store)
        .with_batch_size(config.embeddings.batch_size)
        .with_timeouts(config.embeddings.timeout(), config.retrieval.store_timeout())
}
