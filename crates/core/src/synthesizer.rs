//! Turns the classifier verdict, imaging outcome and ranked similar cases into
//! one [`AnalysisResult`].
//!
//! Synthesis is a fixed sequence of stages over a working draft:
//!
//! ```text
//! Start -> GreetingShortCircuit                                   -> Done
//! Start -> ImagingSummary -> CaseMatchSummary -> KeywordHeuristic -> Assemble -> Done
//! ```
//!
//! It is pure: identical inputs give identical results, and nothing here can
//! fail. External failures arrive as data and leave a caveat plus a
//! confidence penalty.

use crate::models::{
    AnalysisResult, ClinicalQuery, ImageAnalysisOutcome, QueryClass, SimilarityResult,
};
use crate::rules::{RuleBook, SymptomRule};
use crate::search::{CaseSearchOutcome, CaseSearchStatus};
use std::fmt::Write as _;
use tracing::debug;

pub const GREETING_DIAGNOSIS: &str = "Greeting detected";
pub const GREETING_MESSAGE: &str =
    "Hello! I'm your clinical AI assistant. How can I help you with medical analysis today?";
pub const GREETING_RECOMMENDATION: &str =
    "Feel free to ask about medical symptoms, conditions, or upload medical images for analysis";

pub const FALLBACK_DIAGNOSIS: &str = "Clinical evaluation needed";
pub const FALLBACK_CONFIDENCE: f32 = 0.7;
pub const FALLBACK_RECOMMENDATIONS: &[&str] = &[
    "Consult with healthcare professional for proper evaluation",
    "Consider diagnostic workup as recommended",
    "Monitor symptoms and seek immediate care if worsening",
];
pub const SEEK_CARE_RECOMMENDATION: &str = "Seek immediate professional medical consultation";

/// Subtracted once per failed external stage.
pub const STAGE_FAILURE_PENALTY: f32 = 0.1;
pub const MAX_DIFFERENTIALS: usize = 3;

/// Confidence earned by the closest precedent: 0.9 at distance 0, 0.6 at
/// distance 1, never outside `[0.6, 0.9]`.
pub fn blended_confidence(distance: f32) -> f32 {
    (0.6 + (1.0 - distance) * 0.3).clamp(0.6, 0.9)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisStage {
    Start,
    GreetingShortCircuit,
    ImagingSummary,
    CaseMatchSummary,
    KeywordHeuristic,
    Assemble,
    Done,
}

pub struct SynthesisInput<'a> {
    pub query: &'a ClinicalQuery,
    pub classification: QueryClass,
    pub image: Option<&'a ImageAnalysisOutcome>,
    pub cases: &'a CaseSearchOutcome,
}

#[derive(Debug, Default)]
struct Draft {
    narrative: String,
    diagnosis: Option<String>,
    confidence: f32,
    differentials: Vec<String>,
    workup: Vec<String>,
    treatment: Vec<String>,
    considerations: Vec<String>,
    recommendations: Vec<String>,
    caveats: Vec<String>,
    attempted: usize,
    failed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DiagnosticSynthesizer {
    rules: RuleBook,
}

impl DiagnosticSynthesizer {
    pub fn new(rules: RuleBook) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleBook {
        &self.rules
    }

    /// Convenience entry for callers that only hold ranked matches: the case
    /// search is treated as having completed.
    pub fn synthesize(
        &self,
        query: &ClinicalQuery,
        classification: QueryClass,
        image: Option<&ImageAnalysisOutcome>,
        similar: &[SimilarityResult],
    ) -> AnalysisResult {
        let cases = CaseSearchOutcome {
            results: similar.to_vec(),
            status: CaseSearchStatus::Completed,
        };
        self.synthesize_outcome(SynthesisInput {
            query,
            classification,
            image,
            cases: &cases,
        })
    }

    pub fn synthesize_outcome(&self, input: SynthesisInput<'_>) -> AnalysisResult {
        enter(SynthesisStage::Start);
        if input.classification == QueryClass::Greeting {
            enter(SynthesisStage::GreetingShortCircuit);
            enter(SynthesisStage::Done);
            return greeting_result();
        }

        let mut draft = Draft {
            narrative: presentation(input.query),
            ..Draft::default()
        };

        enter(SynthesisStage::ImagingSummary);
        if let Some(outcome) = input.image {
            summarize_imaging(&mut draft, outcome);
        }

        enter(SynthesisStage::CaseMatchSummary);
        summarize_cases(&mut draft, input.cases);

        enter(SynthesisStage::KeywordHeuristic);
        match self.rules.best_match(input.query.text()) {
            Some(rule) => apply_rule(&mut draft, rule),
            None => draft.narrative.push_str(
                "**Assessment:** Based on the presented symptoms and similar case analysis, \
                 a comprehensive clinical evaluation is needed to determine the underlying \
                 cause and appropriate treatment plan.\n\n",
            ),
        }

        enter(SynthesisStage::Assemble);
        let result = assemble(draft);
        enter(SynthesisStage::Done);
        result
    }
}

fn enter(stage: SynthesisStage) {
    debug!(?stage, "synthesis stage");
}

fn greeting_result() -> AnalysisResult {
    AnalysisResult {
        diagnosis: GREETING_DIAGNOSIS.to_string(),
        confidence: 1.0,
        differentials: Vec::new(),
        recommended_workup: Vec::new(),
        treatment_recommendations: Vec::new(),
        considerations: Vec::new(),
        recommendations: vec![GREETING_RECOMMENDATION.to_string()],
        caveats: Vec::new(),
        narrative: GREETING_MESSAGE.to_string(),
    }
}

fn presentation(query: &ClinicalQuery) -> String {
    let text = query.text().trim();
    let shown = if text.is_empty() {
        "(image submitted without description)"
    } else {
        text
    };
    format!("## Clinical Analysis\n\n**Patient Presentation:** {shown}\n\n")
}

fn summarize_imaging(draft: &mut Draft, outcome: &ImageAnalysisOutcome) {
    draft.attempted += 1;
    if let Some(failure) = outcome.failure() {
        draft.failed += 1;
        let _ = write!(
            draft.narrative,
            "**Imaging:** Could not analyze provided medical image: image detection {}.\n\n",
            failure.kind.describe()
        );
        draft.caveats.push(failure.caveat("imaging"));
        return;
    }
    if outcome.findings.is_empty() {
        let _ = write!(
            draft.narrative,
            "**Imaging Results:** No abnormal findings detected (confidence {:.2}).\n\n",
            outcome.confidence
        );
        return;
    }
    draft.narrative.push_str("**Imaging Results:** Detected findings:\n");
    for finding in &outcome.findings {
        let _ = writeln!(
            draft.narrative,
            "- {} (confidence {:.2})",
            finding.label, finding.confidence
        );
    }
    draft.narrative.push('\n');
}

fn summarize_cases(draft: &mut Draft, cases: &CaseSearchOutcome) {
    match &cases.status {
        CaseSearchStatus::Skipped => return,
        CaseSearchStatus::Completed => draft.attempted += 1,
        CaseSearchStatus::Failed(failure) => {
            draft.attempted += 1;
            draft.failed += 1;
            draft.narrative.push_str(
                "**Similar Cases:** Case search was unavailable for this query.\n\n",
            );
            draft.caveats.push(failure.caveat("case search"));
            return;
        }
    }

    let Some(top) = cases.results.first() else {
        return;
    };

    draft.narrative.push_str("**Similar Cases Found:**\n");
    for (index, hit) in cases.results.iter().enumerate() {
        let _ = write!(
            draft.narrative,
            "{}. {} (Similarity: {:.2})\n   - Diagnosis: {}\n   - Treatment: {}\n",
            index + 1,
            hit.case.title,
            hit.similarity(),
            hit.case.diagnosis,
            hit.case.treatment
        );
    }
    draft.narrative.push('\n');

    draft.diagnosis = Some(format!(
        "Possible {} (based on similar case analysis)",
        top.case.diagnosis
    ));
    draft.confidence = blended_confidence(top.distance);
    let _ = write!(
        draft.narrative,
        "**AI-Assisted Analysis:**\nBased on vector similarity search of clinical cases, \
         this presentation most closely matches:\n\"{}\" with {:.1}% similarity.\n\n",
        top.case.title,
        top.similarity() * 100.0
    );

    for hit in cases.results.iter().skip(1) {
        if draft.differentials.len() >= MAX_DIFFERENTIALS {
            break;
        }
        let diagnosis = hit.case.diagnosis.trim();
        let seen = diagnosis.eq_ignore_ascii_case(top.case.diagnosis.trim())
            || draft
                .differentials
                .iter()
                .any(|d| d.eq_ignore_ascii_case(diagnosis));
        if !diagnosis.is_empty() && !seen {
            draft.differentials.push(diagnosis.to_string());
        }
    }
    if !top.case.treatment.trim().is_empty() {
        draft.treatment.push(format!(
            "Treatment used in the closest precedent: {}",
            top.case.treatment.trim()
        ));
    }
}

/// A matching rule only fills gaps: case-based diagnosis and lists stay.
fn apply_rule(draft: &mut Draft, rule: &SymptomRule) {
    debug!(rule = %rule.name, "symptom rule matched");
    if draft.diagnosis.is_none() {
        draft.diagnosis = Some(rule.diagnosis.clone());
        draft.confidence = rule.confidence;
    }
    fill_if_empty(&mut draft.differentials, &rule.differentials);
    fill_if_empty(&mut draft.workup, &rule.workup);
    fill_if_empty(&mut draft.treatment, &rule.treatment);
    draft.considerations.extend(rule.considerations.iter().cloned());
    draft
        .recommendations
        .extend(rule.recommendations.iter().cloned());
}

fn fill_if_empty(target: &mut Vec<String>, template: &[String]) {
    if target.is_empty() {
        target.extend(template.iter().cloned());
    }
}

fn assemble(mut draft: Draft) -> AnalysisResult {
    let total_failure = draft.attempted > 0 && draft.failed == draft.attempted;
    let (diagnosis, confidence) = match draft.diagnosis.take() {
        Some(d) => (
            d,
            draft.confidence - STAGE_FAILURE_PENALTY * draft.failed as f32,
        ),
        None if total_failure => {
            draft.recommendations.push(SEEK_CARE_RECOMMENDATION.to_string());
            (FALLBACK_DIAGNOSIS.to_string(), 0.0)
        }
        None => (
            FALLBACK_DIAGNOSIS.to_string(),
            FALLBACK_CONFIDENCE - STAGE_FAILURE_PENALTY * draft.failed as f32,
        ),
    };
    let confidence = confidence.clamp(0.0, 1.0);
    if draft.recommendations.is_empty() || total_failure {
        draft
            .recommendations
            .extend(FALLBACK_RECOMMENDATIONS.iter().map(|s| s.to_string()));
    }
    draft.differentials.truncate(MAX_DIFFERENTIALS);

    let mut narrative = draft.narrative;
    let _ = write!(
        narrative,
        "**Primary Diagnosis:** {diagnosis} (Confidence: {confidence:.2})\n\n"
    );
    push_list(&mut narrative, "Differential Diagnoses", &draft.differentials, true);
    push_list(&mut narrative, "Recommended Workup", &draft.workup, false);
    push_list(
        &mut narrative,
        "Treatment Recommendations",
        &draft.treatment,
        false,
    );
    push_list(
        &mut narrative,
        "Clinical Considerations",
        &draft.considerations,
        false,
    );
    push_list(
        &mut narrative,
        "Recommendations",
        &draft.recommendations,
        false,
    );
    for caveat in &draft.caveats {
        let _ = writeln!(narrative, "> {caveat}");
    }

    AnalysisResult {
        diagnosis,
        confidence,
        differentials: draft.differentials,
        recommended_workup: draft.workup,
        treatment_recommendations: draft.treatment,
        considerations: draft.considerations,
        recommendations: draft.recommendations,
        caveats: draft.caveats,
        narrative: narrative.trim_end().to_string(),
    }
}

fn push_list(narrative: &mut String, title: &str, items: &[String], numbered: bool) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(narrative, "**{title}:**");
    for (index, item) in items.iter().enumerate() {
        if numbered {
            let _ = writeln!(narrative, "{}. {item}", index + 1);
        } else {
            let _ = writeln!(narrative, "- {item}");
        }
    }
    narrative.push('\n');
}
