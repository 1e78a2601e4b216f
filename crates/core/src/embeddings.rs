use crate::error::{bounded, ErrorKind, StageFailure};
use crate::models::NewCase;
use providers::{EmbedMode, ProviderRegistry};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct EmbeddingRequest {
    pub texts: Vec<String>,
    pub mode: EmbedMode,
    pub provider: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub vectors: Vec<Vec<f32>>,
}

/// Resolves the provider and runs one bounded embedding call. The provider
/// must hand back exactly one vector per input text.
pub async fn embed(
    req: EmbeddingRequest,
    registry: &ProviderRegistry,
    limit: Duration,
) -> Result<EmbeddingResult, StageFailure> {
    let provider = registry.embedding(req.provider.as_deref())?;
    debug!(count = req.texts.len(), mode = ?req.mode, "embedding texts");
    let resp = bounded(limit, provider.embed(&req.texts, req.mode)).await?;
    if resp.vectors.len() != req.texts.len() {
        return Err(StageFailure::new(
            ErrorKind::Upstream,
            format!(
                "expected {} vectors, provider returned {}",
                req.texts.len(),
                resp.vectors.len()
            ),
        ));
    }
    Ok(EmbeddingResult {
        vectors: resp.vectors,
    })
}

/// Document text embedded for a stored case. Optional demographics are only
/// included when present.
pub fn case_text(case: &NewCase) -> String {
    let mut lines = vec![
        format!("Title: {}", case.title),
        format!("Description: {}", case.description),
        format!("Symptoms: {}", case.symptoms),
        format!("Diagnosis: {}", case.diagnosis),
        format!("Treatment: {}", case.treatment),
    ];
    if case.patient_age > 0 {
        lines.push(format!("Age: {}", case.patient_age));
    }
    lines.push(format!("Gender: {}", case.patient_gender));
    if !case.medical_history.trim().is_empty() {
        lines.push(format!("Medical History: {}", case.medical_history));
    }
    lines.join("\n")
}
