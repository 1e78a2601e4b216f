#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine as _;
use clinical_core::models::{CaseRecord, Gender, ImageAttachment, NewCase, SimilarityResult};
use clinical_core::vectorstore::{CaseStore, SqliteCaseStore, StoreError};
use providers::{
    Detection, EmbedMode, EmbedResponse, EmbeddingProvider, ImageFinding, ImageFindingDetector,
    ProviderError, TextGenerator,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const KEYWORDS: [&str; 4] = ["chest", "burning", "cough", "headache"];
pub const DIMENSION: usize = KEYWORDS.len();

pub type EventLog = Arc<Mutex<Vec<&'static str>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// One dimension per keyword, counting occurrences in the lowercased text.
pub fn keyword_vector(text: &str) -> Vec<f32> {
    let lowered = text.to_lowercase();
    KEYWORDS
        .iter()
        .map(|k| lowered.matches(k).count() as f32)
        .collect()
}

#[derive(Default)]
pub struct KeywordEmbedder {
    pub calls: AtomicUsize,
    pub log: Option<EventLog>,
}

impl KeywordEmbedder {
    pub fn logging(log: EventLog) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            log: Some(log),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(
        &self,
        texts: &[String],
        _mode: EmbedMode,
    ) -> Result<EmbedResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().unwrap().push("embed");
        }
        Ok(EmbedResponse {
            vectors: texts.iter().map(|t| keyword_vector(t)).collect(),
        })
    }
}

pub struct FailingEmbedder {
    pub status: u16,
    pub retry_after_secs: Option<u64>,
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(
        &self,
        _texts: &[String],
        _mode: EmbedMode,
    ) -> Result<EmbedResponse, ProviderError> {
        Err(ProviderError::Status {
            status: self.status,
            body: "rejected".into(),
            retry_after_secs: self.retry_after_secs,
        })
    }
}

/// Succeeds for the first `ok_calls` requests, then reports a 429.
pub struct FlakyEmbedder {
    pub ok_calls: usize,
    pub calls: AtomicUsize,
}

impl FlakyEmbedder {
    pub fn new(ok_calls: usize) -> Self {
        Self {
            ok_calls,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    async fn embed(
        &self,
        texts: &[String],
        _mode: EmbedMode,
    ) -> Result<EmbedResponse, ProviderError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) >= self.ok_calls {
            return Err(ProviderError::Status {
                status: 429,
                body: String::new(),
                retry_after_secs: Some(5),
            });
        }
        Ok(EmbedResponse {
            vectors: texts.iter().map(|t| keyword_vector(t)).collect(),
        })
    }
}

pub enum DetectorScript {
    Findings(Vec<ImageFinding>),
    Status(u16),
    Sleep(Duration),
}

pub struct ScriptedDetector {
    pub script: DetectorScript,
    pub calls: AtomicUsize,
    pub log: Option<EventLog>,
}

impl ScriptedDetector {
    pub fn new(script: DetectorScript) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            log: None,
        }
    }

    pub fn logging(script: DetectorScript, log: EventLog) -> Self {
        Self {
            log: Some(log),
            ..Self::new(script)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageFindingDetector for ScriptedDetector {
    async fn detect(&self, _image: &[u8]) -> Result<Detection, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().unwrap().push("detect");
        }
        match &self.script {
            DetectorScript::Findings(findings) => Ok(Detection {
                findings: findings.clone(),
            }),
            DetectorScript::Status(status) => Err(ProviderError::Status {
                status: *status,
                body: String::new(),
                retry_after_secs: None,
            }),
            DetectorScript::Sleep(d) => {
                tokio::time::sleep(*d).await;
                Ok(Detection::default())
            }
        }
    }
}

pub struct FixedGenerator(pub Result<String, u16>);

#[async_trait]
impl TextGenerator for FixedGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
        match &self.0 {
            Ok(text) => Ok(text.clone()),
            Err(status) => Err(ProviderError::Status {
                status: *status,
                body: String::new(),
                retry_after_secs: None,
            }),
        }
    }
}

/// Store that always answers with the same ranked list.
#[derive(Default)]
pub struct ScriptedStore {
    pub results: Vec<SimilarityResult>,
    pub calls: AtomicUsize,
}

impl ScriptedStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaseStore for ScriptedStore {
    async fn insert(&self, _case: &NewCase, _embedding: &[f32]) -> Result<i64, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(1)
    }

    async fn insert_many(
        &self,
        cases: &[NewCase],
        _embeddings: &[Vec<f32>],
    ) -> Result<Vec<i64>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((1..=cases.len() as i64).collect())
    }

    async fn search(
        &self,
        _embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SimilarityResult>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.results.iter().take(limit).cloned().collect())
    }

    async fn list_all(&self) -> Result<Vec<CaseRecord>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.results.iter().map(|r| r.case.clone()).collect())
    }
}

pub async fn memory_store() -> SqliteCaseStore {
    SqliteCaseStore::open("sqlite::memory:", 1, DIMENSION)
        .await
        .unwrap()
}

pub fn new_case(title: &str, symptoms: &str, diagnosis: &str) -> NewCase {
    NewCase {
        title: title.into(),
        description: format!("{title} presentation"),
        symptoms: symptoms.into(),
        diagnosis: diagnosis.into(),
        treatment: format!("{diagnosis} protocol"),
        outcome: "recovered".into(),
        patient_age: 54,
        patient_gender: Gender::Female,
        medical_history: String::new(),
    }
}

pub fn record(id: i64, title: &str, diagnosis: &str) -> CaseRecord {
    CaseRecord {
        id,
        title: title.into(),
        description: String::new(),
        symptoms: String::new(),
        diagnosis: diagnosis.into(),
        treatment: "Proton pump inhibitor".into(),
        outcome: String::new(),
        patient_age: 45,
        patient_gender: Gender::Male,
        medical_history: String::new(),
        embedding: Vec::new(),
        created_at: 0,
    }
}

/// A data URI wrapping `len` arbitrary bytes.
pub fn image_attachment(len: usize) -> ImageAttachment {
    let raw = vec![0x42u8; len];
    let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
    ImageAttachment::new(
        "image/png",
        format!("data:image/png;base64,{encoded}").into_bytes(),
    )
}
