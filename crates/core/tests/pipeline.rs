mod common;

use clinical_core::api::{AnalyzeRequest, AnalyzeResponse, ImagePayload};
use clinical_core::imaging::ImageAnalysisAdapter;
use clinical_core::models::{ClinicalQuery, ImageFinding, SimilarityResult};
use clinical_core::narrator::Narrator;
use clinical_core::rules::RuleBook;
use clinical_core::search::SimilarCaseRetriever;
use clinical_core::synthesizer::{DiagnosticSynthesizer, GREETING_DIAGNOSIS};
use clinical_core::vectorstore::CaseStore;
use clinical_core::{ErrorKind, PipelineError, PipelineOrchestrator};
use common::*;
use providers::roboflow::{RoboflowConfig, RoboflowDetector};
use providers::ProviderRegistry;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    embedder: Arc<KeywordEmbedder>,
    detector: Arc<ScriptedDetector>,
    registry: ProviderRegistry,
}

impl Harness {
    fn new(script: DetectorScript) -> Self {
        Self::with_parts(KeywordEmbedder::default(), ScriptedDetector::new(script))
    }

    fn with_parts(embedder: KeywordEmbedder, detector: ScriptedDetector) -> Self {
        let embedder = Arc::new(embedder);
        let detector = Arc::new(detector);
        let registry = ProviderRegistry::new()
            .with_embedding("keywords", embedder.clone())
            .with_detector("scripted", detector.clone())
            .set_preferred_embedding("keywords")
            .set_preferred_detector("scripted");
        Self {
            embedder,
            detector,
            registry,
        }
    }

    fn orchestrator(&self, store: Arc<dyn CaseStore>) -> PipelineOrchestrator {
        PipelineOrchestrator::new(
            ImageAnalysisAdapter::new(self.registry.clone()).with_timeout(Duration::from_millis(50)),
            SimilarCaseRetriever::new(self.registry.clone(), store),
            DiagnosticSynthesizer::new(RuleBook::default()),
        )
    }
}

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-5
}

#[tokio::test]
async fn empty_query_is_a_validation_error_without_external_calls() {
    let h = Harness::new(DetectorScript::Findings(vec![]));
    let store = Arc::new(ScriptedStore::default());
    let pipeline = h.orchestrator(store.clone());

    let err = pipeline.run(&ClinicalQuery::new("   ")).await.unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(h.embedder.calls(), 0);
    assert_eq!(h.detector.calls(), 0);
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn greeting_short_circuits_every_external_call() {
    let h = Harness::new(DetectorScript::Findings(vec![]));
    let store = Arc::new(ScriptedStore::default());
    let pipeline = h.orchestrator(store.clone());

    let result = pipeline.run(&ClinicalQuery::new("hello")).await.unwrap();
    assert_eq!(result.diagnosis, GREETING_DIAGNOSIS);
    assert_eq!(result.confidence, 1.0);
    assert_eq!(h.embedder.calls(), 0);
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn cardiac_rule_applies_against_an_empty_store() {
    let h = Harness::new(DetectorScript::Findings(vec![]));
    let pipeline = h.orchestrator(Arc::new(memory_store().await));

    let result = pipeline
        .run(&ClinicalQuery::new("severe chest pain and shortness of breath"))
        .await
        .unwrap();
    assert_eq!(
        result.diagnosis,
        "Possible acute coronary syndrome or cardiac condition"
    );
    assert!(close(result.confidence, 0.8));
    assert_eq!(result.differentials.len(), 3);
    assert!(result.caveats.is_empty());
    assert_eq!(h.embedder.calls(), 1);
}

#[tokio::test]
async fn detector_timeout_degrades_but_still_answers() {
    let h = Harness::new(DetectorScript::Sleep(Duration::from_secs(5)));
    let pipeline = h.orchestrator(Arc::new(ScriptedStore::default()));

    let adapter =
        ImageAnalysisAdapter::new(h.registry.clone()).with_timeout(Duration::from_millis(50));
    let outcome = adapter.analyze(&image_attachment(256)).await;
    assert!(!outcome.ok);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Timeout));

    let query = ClinicalQuery::with_image("", image_attachment(256));
    let result = pipeline.run(&query).await.unwrap();
    assert!(!result.diagnosis.is_empty());
    assert!(result.narrative.contains("Could not analyze provided medical image"));
    assert_eq!(
        result.caveats,
        vec!["analysis incomplete: imaging timed out"]
    );
    assert_eq!(result.confidence, 0.0);
}

#[tokio::test]
async fn closest_case_drives_the_diagnosis() {
    let h = Harness::new(DetectorScript::Findings(vec![]));
    let store = Arc::new(ScriptedStore {
        results: vec![SimilarityResult {
            case: record(7, "Reflux in a 45-year-old", "GERD"),
            distance: 0.2,
        }],
        ..ScriptedStore::default()
    });
    let pipeline = h.orchestrator(store);

    let result = pipeline
        .run(&ClinicalQuery::new("burning pain behind the sternum after meals"))
        .await
        .unwrap();
    assert!(result.diagnosis.contains("GERD"));
    assert!(close(result.confidence, 0.84));
    assert!(result.narrative.contains("Reflux in a 45-year-old"));
}

#[tokio::test]
async fn image_analysis_runs_before_case_search() {
    let log = event_log();
    let h = Harness::with_parts(
        KeywordEmbedder::logging(log.clone()),
        ScriptedDetector::logging(DetectorScript::Status(401), log.clone()),
    );
    let pipeline = h.orchestrator(Arc::new(ScriptedStore::default()));

    let query = ClinicalQuery::with_image("persistent cough", image_attachment(256));
    let result = pipeline.run(&query).await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["detect", "embed"]);
    assert_eq!(
        result.caveats,
        vec!["analysis incomplete: imaging credentials were rejected"]
    );
    assert!(close(result.confidence, 0.6));
}

#[tokio::test]
async fn findings_feed_case_search_for_image_only_queries() {
    let findings = vec![ImageFinding {
        label: "cough consolidation".into(),
        confidence: 0.91,
        bounding_box: None,
    }];
    let h = Harness::new(DetectorScript::Findings(findings));
    let pipeline = h.orchestrator(Arc::new(ScriptedStore::default()));

    let result = pipeline
        .run(&ClinicalQuery::with_image("", image_attachment(256)))
        .await
        .unwrap();
    assert_eq!(h.embedder.calls(), 1);
    assert!(result.narrative.contains("- cough consolidation (confidence 0.91)"));
    assert!(result.caveats.is_empty());
}

#[tokio::test]
async fn undersized_image_never_reaches_the_detector() {
    let h = Harness::new(DetectorScript::Findings(vec![]));
    let pipeline = h.orchestrator(Arc::new(ScriptedStore::default()));

    let query = ClinicalQuery::with_image("knee swelling", image_attachment(40));
    let result = pipeline.run(&query).await.unwrap();
    assert_eq!(h.detector.calls(), 0);
    assert_eq!(
        result.caveats,
        vec!["analysis incomplete: imaging input could not be read"]
    );
}

#[tokio::test]
async fn rate_limited_case_search_carries_backoff_guidance() {
    let registry = ProviderRegistry::new()
        .with_embedding(
            "limited",
            Arc::new(FailingEmbedder {
                status: 429,
                retry_after_secs: Some(30),
            }),
        )
        .set_preferred_embedding("limited");
    let pipeline = PipelineOrchestrator::new(
        ImageAnalysisAdapter::new(registry.clone()),
        SimilarCaseRetriever::new(registry, Arc::new(ScriptedStore::default())),
        DiagnosticSynthesizer::default(),
    );

    let result = pipeline
        .run(&ClinicalQuery::new("chest pain and fatigue"))
        .await
        .unwrap();
    assert_eq!(
        result.diagnosis,
        "Possible acute coronary syndrome or cardiac condition"
    );
    assert!(close(result.confidence, 0.7));
    assert_eq!(
        result.caveats,
        vec!["analysis incomplete: case search was rate limited (retry after 30s)"]
    );
}

#[tokio::test]
async fn narrator_appends_a_summary_or_a_caveat() {
    let h = Harness::new(DetectorScript::Findings(vec![]));
    let with_summary = h.registry.clone().with_generator(
        "fixed",
        Arc::new(FixedGenerator(Ok("Likely cardiac; obtain ECG now.".into()))),
    );
    let pipeline = h
        .orchestrator(Arc::new(ScriptedStore::default()))
        .with_narrator(Narrator::new(with_summary).with_provider("fixed"));
    let result = pipeline
        .run(&ClinicalQuery::new("chest pain and fatigue"))
        .await
        .unwrap();
    assert!(result.narrative.contains("**Assistant Summary:**"));
    assert!(result.narrative.ends_with("Likely cardiac; obtain ECG now."));
    assert!(close(result.confidence, 0.8));

    let failing = h
        .registry
        .clone()
        .with_generator("down", Arc::new(FixedGenerator(Err(503))));
    let pipeline = h
        .orchestrator(Arc::new(ScriptedStore::default()))
        .with_narrator(Narrator::new(failing).with_provider("down"));
    let result = pipeline
        .run(&ClinicalQuery::new("chest pain and fatigue"))
        .await
        .unwrap();
    assert_eq!(
        result.caveats,
        vec!["analysis incomplete: assistant summary upstream service failed"]
    );
    assert!(close(result.confidence, 0.8));
}

#[tokio::test]
async fn boundary_reports_errors_as_kind_and_message() {
    let h = Harness::new(DetectorScript::Findings(vec![]));
    let pipeline = h.orchestrator(Arc::new(ScriptedStore::default()));

    match pipeline.handle(AnalyzeRequest::default()).await {
        AnalyzeResponse::Error(body) => assert_eq!(body.kind, ErrorKind::Validation),
        other => panic!("expected an error body, got {other:?}"),
    }

    let attachment = image_attachment(256);
    let req = AnalyzeRequest {
        text: "cough".into(),
        image: Some(ImagePayload {
            mime_type: attachment.mime_type,
            base64_payload: String::from_utf8(attachment.payload).unwrap(),
            modality_hint: Some("x-ray".into()),
        }),
    };
    match pipeline.handle(req).await {
        AnalyzeResponse::Ok(result) => assert!(result.narrative.contains("Imaging Results")),
        other => panic!("expected a result, got {other:?}"),
    }
    assert_eq!(h.detector.calls(), 1);
}

#[tokio::test]
async fn concurrent_runs_share_the_pool_and_agree() {
    let h = Harness::new(DetectorScript::Findings(vec![]));
    let store = Arc::new(memory_store().await);
    store
        .insert(
            &new_case("Reflux", "burning after meals", "GERD"),
            &keyword_vector("burning"),
        )
        .await
        .unwrap();
    let pipeline = Arc::new(h.orchestrator(store));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(async move {
            pipeline
                .run(&ClinicalQuery::new("burning after meals"))
                .await
                .unwrap()
        }));
    }
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    assert!(results[0].diagnosis.contains("GERD"));
    assert!(close(results[0].confidence, 0.9));
    assert!(results.iter().all(|r| r == &results[0]));
}

#[tokio::test]
async fn detector_credentials_stay_out_of_failures_and_results() {
    let detector = RoboflowDetector::new(RoboflowConfig {
        api_key: "SECRET-KEY-123".into(),
        base_url: "http://127.0.0.1:1".into(),
        model_id: "brain".into(),
        model_version: "1".into(),
    });
    let registry = ProviderRegistry::new()
        .with_embedding("keywords", Arc::new(KeywordEmbedder::default()))
        .with_detector("roboflow", Arc::new(detector))
        .set_preferred_embedding("keywords")
        .set_preferred_detector("roboflow");
    let adapter = ImageAnalysisAdapter::new(registry.clone()).with_timeout(Duration::from_secs(5));

    let outcome = adapter.analyze(&image_attachment(256)).await;
    assert!(!outcome.ok);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Upstream));
    let message = outcome.error_message.clone().unwrap_or_default();
    assert!(!message.contains("SECRET-KEY-123"), "{message}");

    let pipeline = PipelineOrchestrator::new(
        adapter,
        SimilarCaseRetriever::new(registry, Arc::new(ScriptedStore::default())),
        DiagnosticSynthesizer::default(),
    );
    let result = pipeline
        .run(&ClinicalQuery::with_image("persistent cough", image_attachment(256)))
        .await
        .unwrap();
    assert!(result
        .narrative
        .contains("Could not analyze provided medical image: image detection upstream service failed"));
    let json = serde_json::to_string(&result).unwrap();
    assert!(!json.contains("SECRET-KEY-123"));
    assert!(!json.contains("127.0.0.1"));
}
