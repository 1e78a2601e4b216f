use crate::error::{ErrorKind, StageFailure};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use providers::{BoundingBox, ImageFinding};

/// Image as received at the request boundary. `payload` still carries its
/// transport encoding (a data URI or bare base64); the image adapter decodes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAttachment {
    pub mime_type: String,
    pub payload: Vec<u8>,
    #[serde(default)]
    pub modality_hint: Option<String>,
}

impl ImageAttachment {
    pub fn new(mime_type: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            mime_type: mime_type.into(),
            payload: payload.into(),
            modality_hint: None,
        }
    }

    pub fn with_modality(mut self, modality: impl Into<String>) -> Self {
        self.modality_hint = Some(modality.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClinicalQuery {
    text: String,
    image: Option<ImageAttachment>,
}

impl ClinicalQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }

    pub fn with_image(text: impl Into<String>, image: ImageAttachment) -> Self {
        Self {
            text: text.into(),
            image: Some(image),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn image(&self) -> Option<&ImageAttachment> {
        self.image.as_ref()
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "other" => Ok(Gender::Other),
            other => Err(format!("unknown gender: {other}")),
        }
    }
}

/// A case as submitted for ingestion, before it has an id or an embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCase {
    pub title: String,
    pub description: String,
    pub symptoms: String,
    pub diagnosis: String,
    pub treatment: String,
    #[serde(default)]
    pub outcome: String,
    pub patient_age: i64,
    pub patient_gender: Gender,
    #[serde(default)]
    pub medical_history: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub symptoms: String,
    pub diagnosis: String,
    pub treatment: String,
    pub outcome: String,
    pub patient_age: i64,
    pub patient_gender: Gender,
    pub medical_history: String,
    #[serde(default, skip_serializing)]
    pub embedding: Vec<f32>,
    /// Unix seconds.
    #[serde(default)]
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub case: CaseRecord,
    /// Cosine distance in `[0, 2]`; 0 is identical direction.
    pub distance: f32,
}

impl SimilarityResult {
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryClass {
    Greeting,
    TextOnly,
    ImageBearing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAnalysisOutcome {
    pub ok: bool,
    pub findings: Vec<ImageFinding>,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ImageAnalysisOutcome {
    pub fn success(findings: Vec<ImageFinding>, confidence: f32) -> Self {
        Self {
            ok: true,
            findings,
            confidence: confidence.clamp(0.0, 1.0),
            error_kind: None,
            error_message: None,
            retry_after_secs: None,
        }
    }

    pub fn failed(failure: StageFailure) -> Self {
        Self {
            ok: false,
            findings: Vec::new(),
            confidence: 0.0,
            error_kind: Some(failure.kind),
            error_message: Some(failure.message),
            retry_after_secs: failure.retry_after_secs,
        }
    }

    pub fn failure(&self) -> Option<StageFailure> {
        let kind = self.error_kind?;
        Some(StageFailure {
            kind,
            message: self.error_message.clone().unwrap_or_default(),
            retry_after_secs: self.retry_after_secs,
        })
    }
}

/// Terminal artifact of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub diagnosis: String,
    pub confidence: f32,
    pub differentials: Vec<String>,
    pub recommended_workup: Vec<String>,
    pub treatment_recommendations: Vec<String>,
    #[serde(default)]
    pub considerations: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub caveats: Vec<String>,
    pub narrative: String,
}

impl AnalysisResult {
    pub fn with_summary(mut self, summary: &str) -> Self {
        self.narrative
            .push_str(&format!("\n\n**Assistant Summary:**\n{}", summary.trim()));
        self
    }

    pub fn with_caveat(mut self, caveat: String) -> Self {
        self.narrative.push_str(&format!("\n\n> {caveat}"));
        self.caveats.push(caveat);
        self
    }
}
