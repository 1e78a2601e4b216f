use async_trait::async_trait;
use clinical_core::api::AnalyzeResponse;
use clinical_core::config::AppConfig;
use clinical_core::indexer::sample_cases;
use clinical_core::pipeline::{self, PipelineOrchestrator};
use clinical_core::vectorstore::CaseStore;
use cli::request::build_request;
use providers::{EmbedMode, EmbedResponse, EmbeddingProvider, ProviderError};
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

const TERMS: [&str; 6] = ["chest", "cough", "burning", "sputum", "breath", "headache"];

/// Deterministic stand-in for the hosted embedding model.
struct TermEmbedder;

#[async_trait]
impl EmbeddingProvider for TermEmbedder {
    async fn embed(
        &self,
        texts: &[String],
        _mode: EmbedMode,
    ) -> Result<EmbedResponse, ProviderError> {
        Ok(EmbedResponse {
            vectors: texts
                .iter()
                .map(|t| {
                    let lowered = t.to_lowercase();
                    TERMS
                        .iter()
                        .map(|term| lowered.matches(term).count() as f32)
                        .collect()
                })
                .collect(),
        })
    }
}

fn test_config(root: &std::path::Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.database.path = root.join("db").join("cases.db").to_string_lossy().into_owned();
    cfg.embeddings.provider = "terms".into();
    cfg.embeddings.dimension = TERMS.len();
    cfg.embeddings.batch_size = 3;
    cfg.rules.path = Some(root.join("rules").to_string_lossy().into_owned());
    cfg.narrative.enabled = true;
    cfg.narrative.provider = "noop".into();
    cfg
}

#[tokio::test]
async fn seeded_store_answers_queries_end_to_end() {
    let temp = tempdir().unwrap();
    let cfg = test_config(temp.path());

    fs::create_dir_all(temp.path().join("rules")).unwrap();
    fs::write(
        temp.path().join("rules").join("migraine.toml"),
        r#"
name = "migraine"
diagnosis = "Possible migraine"
confidence = 0.65
workup = ["Neurological examination"]

[condition]
type = "phrase"
phrase = "throbbing headache"
"#,
    )
    .unwrap();

    let registry = pipeline::build_registry(&cfg).with_embedding("terms", Arc::new(TermEmbedder));
    let store = pipeline::build_case_store(&cfg).await.unwrap();

    let cases = sample_cases().unwrap();
    let indexer = pipeline::build_indexer(&cfg, registry.clone(), store.clone());
    let ids = indexer.ingest_batch(&cases).await.unwrap();
    assert_eq!(ids.len(), cases.len());
    assert_eq!(store.list_all().await.unwrap().len(), cases.len());

    let orchestrator = PipelineOrchestrator::from_parts(&cfg, registry, store.clone());

    let req = build_request(Some("productive cough with sputum".into()), None, None).unwrap();
    let result = match orchestrator.handle(req).await {
        AnalyzeResponse::Ok(result) => result,
        AnalyzeResponse::Error(body) => panic!("unexpected error: {}", body.message),
    };
    assert!(result.diagnosis.starts_with("Possible "));
    assert!(result.diagnosis.ends_with("(based on similar case analysis)"));
    assert!(result.confidence >= 0.6 && result.confidence <= 0.9);
    assert!(result.differentials.len() <= 3);
    assert!(result.narrative.contains("Similar Cases Found"));
    assert_eq!(
        result.caveats,
        vec!["analysis incomplete: assistant summary is not configured"]
    );

    let req = build_request(Some("throbbing headache since morning".into()), None, None).unwrap();
    let result = match orchestrator.handle(req).await {
        AnalyzeResponse::Ok(result) => result,
        AnalyzeResponse::Error(body) => panic!("unexpected error: {}", body.message),
    };
    assert_eq!(result.recommended_workup, vec!["Neurological examination"]);
}

#[tokio::test]
async fn greeting_and_empty_requests_need_no_store_data() {
    let temp = tempdir().unwrap();
    let cfg = test_config(temp.path());
    let registry = pipeline::build_registry(&cfg);
    let store = pipeline::build_case_store(&cfg).await.unwrap();
    let orchestrator = PipelineOrchestrator::from_parts(&cfg, registry, store);

    match orchestrator
        .handle(build_request(Some("Thanks!".into()), None, None).unwrap())
        .await
    {
        AnalyzeResponse::Ok(result) => {
            assert_eq!(result.confidence, 1.0);
            assert!(result.caveats.is_empty());
        }
        AnalyzeResponse::Error(body) => panic!("unexpected error: {}", body.message),
    }

    let json = serde_json::to_value(
        orchestrator
            .handle(build_request(None, None, None).unwrap())
            .await,
    )
    .unwrap();
    assert_eq!(json["kind"], "validation_error");
}

#[tokio::test]
async fn reset_clears_cases_left_by_a_previous_embedding_model() {
    let temp = tempdir().unwrap();
    let cfg = test_config(temp.path());
    let registry = pipeline::build_registry(&cfg).with_embedding("terms", Arc::new(TermEmbedder));
    let store = pipeline::build_case_store(&cfg).await.unwrap();
    let cases = sample_cases().unwrap();
    pipeline::build_indexer(&cfg, registry, store.clone())
        .ingest_batch(&cases)
        .await
        .unwrap();

    let mut resized = cfg.clone();
    resized.embeddings.dimension = TERMS.len() + 2;
    let store = pipeline::build_case_store(&resized).await.unwrap();
    let vector = vec![1.0; resized.embeddings.dimension];
    assert!(store.search(&vector, 5).await.unwrap().is_empty());

    assert_eq!(store.clear().await.unwrap(), cases.len() as u64);
    assert!(store.list_all().await.unwrap().is_empty());
    let id = store.insert(&cases[0], &vector).await.unwrap();
    assert_eq!(id, 1);
    assert_eq!(store.search(&vector, 5).await.unwrap().len(), 1);
}
