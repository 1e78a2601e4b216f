use crate::error::{bounded, ErrorKind, StageFailure};
use crate::models::{AnalysisResult, ClinicalQuery};
use providers::ProviderRegistry;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Optional text generator asked to summarize an already synthesized result.
/// It only ever adds prose; the structured fields are fixed before it runs.
#[derive(Clone)]
pub struct Narrator {
    registry: ProviderRegistry,
    provider: Option<String>,
    timeout: Duration,
}

impl Narrator {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry,
            provider: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn summarize(
        &self,
        query: &ClinicalQuery,
        result: &AnalysisResult,
    ) -> Result<String, StageFailure> {
        let generator = self.registry.generator(self.provider.as_deref())?;
        let prompt = build_prompt(query, result);
        debug!(prompt_chars = prompt.len(), "requesting assistant summary");
        let text = bounded(self.timeout, generator.generate(&prompt)).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(StageFailure::new(
                ErrorKind::Upstream,
                "text generator returned an empty summary",
            ));
        }
        Ok(text.to_string())
    }
}

pub fn build_prompt(query: &ClinicalQuery, result: &AnalysisResult) -> String {
    let mut prompt = String::from(
        "You are a clinical decision-support assistant. Write a short summary (at most \
         five sentences) of the assessment below for a clinician. Do not change the \
         diagnosis or the confidence, and do not invent findings.\n\n",
    );
    let _ = writeln!(prompt, "Presentation: {}", query.text().trim());
    let _ = writeln!(
        prompt,
        "Assessment: {} (confidence {:.2})",
        result.diagnosis, result.confidence
    );
    if !result.differentials.is_empty() {
        let _ = writeln!(prompt, "Differentials: {}", result.differentials.join("; "));
    }
    if !result.recommended_workup.is_empty() {
        let _ = writeln!(prompt, "Workup: {}", result.recommended_workup.join("; "));
    }
    if !result.caveats.is_empty() {
        let _ = writeln!(prompt, "Limitations: {}", result.caveats.join("; "));
    }
    prompt
}
