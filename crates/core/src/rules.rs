//! Symptom rule tables.
//!
//! A rule pairs a condition over the lowercased query text with a diagnosis
//! template. Built-in rules always load; extra rules can be dropped into the
//! configured rules directory as `*.toml` files.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Phrase { phrase: String },
    All { all: Vec<Condition> },
    Any { any: Vec<Condition> },
}

fn default_priority() -> i32 {
    100
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SymptomRule {
    pub name: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub condition: Condition,
    pub diagnosis: String,
    pub confidence: f32,
    #[serde(default)]
    pub differentials: Vec<String>,
    #[serde(default)]
    pub workup: Vec<String>,
    #[serde(default)]
    pub treatment: Vec<String>,
    #[serde(default)]
    pub considerations: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// `text` must already be lowercased.
pub fn matches(condition: &Condition, text: &str) -> bool {
    match condition {
        Condition::Phrase { phrase } => text.contains(phrase.to_lowercase().as_str()),
        Condition::All { all } => all.iter().all(|c| matches(c, text)),
        Condition::Any { any } => any.iter().any(|c| matches(c, text)),
    }
}

/// Enabled rules whose condition holds, lowest priority value first.
pub fn evaluate<'a>(rules: &'a [SymptomRule], text: &str) -> Vec<&'a SymptomRule> {
    let lowered = text.to_lowercase();
    let mut matched: Vec<&SymptomRule> = rules
        .iter()
        .filter(|r| r.enabled && matches(&r.condition, &lowered))
        .collect();
    matched.sort_by_key(|r| r.priority);
    matched
}

fn phrase(p: &str) -> Condition {
    Condition::Phrase {
        phrase: p.to_string(),
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn builtin_rules() -> Vec<SymptomRule> {
    vec![SymptomRule {
        name: "cardiac-chest-pain".into(),
        priority: 10,
        enabled: true,
        condition: Condition::All {
            all: vec![
                phrase("chest pain"),
                Condition::Any {
                    any: vec![phrase("shortness of breath"), phrase("fatigue")],
                },
            ],
        },
        diagnosis: "Possible acute coronary syndrome or cardiac condition".into(),
        confidence: 0.8,
        differentials: strings(&[
            "Acute coronary syndrome",
            "Heart failure exacerbation",
            "Pulmonary embolism",
        ]),
        workup: strings(&[
            "12-lead ECG",
            "Cardiac enzymes (troponin)",
            "Chest X-ray",
            "Complete blood count",
            "Basic metabolic panel",
        ]),
        treatment: strings(&[
            "Immediate cardiac evaluation",
            "Consider aspirin if no contraindications",
            "Monitor vital signs",
            "Prepare for possible cardiac catheterization",
        ]),
        considerations: strings(&[
            "History of hypertension and smoking are significant risk factors",
            "Time-sensitive condition requiring urgent evaluation",
            "Consider STEMI protocol if ECG changes present",
        ]),
        recommendations: strings(&[
            "URGENT: Seek immediate emergency medical evaluation",
            "Do not delay - call 911 or go to nearest emergency department",
            "Avoid physical exertion until evaluated",
        ]),
    }]
}

pub fn load_rules_from_dir(dir: &Path) -> anyhow::Result<Vec<SymptomRule>> {
    let mut rules = Vec::new();
    if !dir.exists() {
        return Ok(rules);
    }
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some("toml")
        {
            paths.push(entry.path());
        }
    }
    // read_dir order is platform dependent; keep loading deterministic.
    paths.sort();
    for path in paths {
        let content = fs::read_to_string(&path)?;
        let rule: SymptomRule = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid rule file {}: {e}", path.display()))?;
        debug!(rule = %rule.name, path = %path.display(), "loaded symptom rule");
        rules.push(rule);
    }
    Ok(rules)
}

/// Built-in rules plus whatever the rules directory adds.
#[derive(Debug, Clone)]
pub struct RuleBook {
    rules: Vec<SymptomRule>,
}

impl Default for RuleBook {
    fn default() -> Self {
        Self {
            rules: builtin_rules(),
        }
    }
}

impl RuleBook {
    pub fn new(rules: Vec<SymptomRule>) -> Self {
        Self { rules }
    }

    /// A missing directory is not an error; an unreadable rule file is
    /// skipped with a warning so one bad file cannot disable the built-ins.
    pub fn load(dir: Option<&Path>) -> Self {
        let mut book = Self::default();
        if let Some(dir) = dir {
            match load_rules_from_dir(dir) {
                Ok(extra) => book.rules.extend(extra),
                Err(e) => warn!(error = %e, dir = %dir.display(), "ignoring rules directory"),
            }
        }
        book
    }

    pub fn rules(&self) -> &[SymptomRule] {
        &self.rules
    }

    pub fn best_match(&self, text: &str) -> Option<&SymptomRule> {
        evaluate(&self.rules, text).into_iter().next()
    }
}
