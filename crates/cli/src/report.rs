//! Human-readable rendering of results for the terminal.

use chrono::DateTime;
use clinical_core::models::{AnalysisResult, CaseRecord, SimilarityResult};
use std::fmt::Write as _;

pub fn render_result(result: &AnalysisResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Diagnosis:  {}", result.diagnosis);
    let _ = writeln!(out, "Confidence: {:.2}", result.confidence);
    out.push('\n');
    out.push_str(&result.narrative);
    out.push('\n');
    out
}

fn created(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn render_cases(cases: &[CaseRecord]) -> String {
    if cases.is_empty() {
        return "no cases stored\n".to_string();
    }
    let mut out = String::new();
    for case in cases {
        let _ = writeln!(
            out,
            "#{:<4} {}  {} ({} {}, {})",
            case.id,
            created(case.created_at),
            case.title,
            case.patient_age,
            case.patient_gender,
            case.diagnosis
        );
    }
    out
}

pub fn render_matches(matches: &[SimilarityResult]) -> String {
    if matches.is_empty() {
        return "no similar cases\n".to_string();
    }
    let mut out = String::new();
    for (index, hit) in matches.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. {} (similarity {:.2})\n   diagnosis: {}\n   treatment: {}",
            index + 1,
            hit.case.title,
            hit.similarity(),
            hit.case.diagnosis,
            hit.case.treatment
        );
    }
    out
}
