use crate::error::PipelineError;
use crate::models::QueryClass;

/// Whole-message greetings, farewells and thanks. Compared against the
/// normalized text, so entries are lowercase with single spaces.
pub const GREETING_PATTERNS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "good morning",
    "good afternoon",
    "good evening",
    "greeting",
    "greetings",
    "howdy",
    "hiya",
    "whats up",
    "sup",
    "yo",
    "how are you",
    "how do you do",
    "thank",
    "thanks",
    "thank you",
    "ty",
    "bye",
    "goodbye",
    "see you",
    "later",
    "farewell",
];

#[derive(Debug, Clone)]
pub struct InputClassifier {
    patterns: Vec<String>,
}

impl Default for InputClassifier {
    fn default() -> Self {
        Self {
            patterns: GREETING_PATTERNS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl InputClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&self, text: &str, has_image: bool) -> Result<QueryClass, PipelineError> {
        if has_image {
            return Ok(QueryClass::ImageBearing);
        }
        if text.trim().is_empty() {
            return Err(PipelineError::Validation(
                "query text is empty and no image was attached".into(),
            ));
        }
        let normalized = normalize(text);
        if self.is_greeting(&normalized) {
            return Ok(QueryClass::Greeting);
        }
        Ok(QueryClass::TextOnly)
    }

    fn is_greeting(&self, normalized: &str) -> bool {
        self.patterns.iter().any(|p| p == normalized)
    }
}

/// Lowercases, drops apostrophes, collapses internal whitespace and strips
/// trailing or leading punctuation such as "Hello!" or "thanks.".
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase().replace(['\'', '\u{2019}'], "");
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| matches!(c, '!' | '.' | ',' | '?') || c.is_whitespace())
        .to_string()
}
