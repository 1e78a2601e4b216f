use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One row of `clinical_cases`, as stored.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CaseRow {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub symptoms: String,
    pub diagnosis: String,
    pub treatment: String,
    pub outcome: String,
    pub patient_age: i64,
    pub patient_gender: String,
    pub medical_history: String,
    pub embedding_json: String,
    pub embedding_dim: i64,
    pub created_at: i64,
}

impl CaseRow {
    pub fn embedding(&self) -> serde_json::Result<Vec<f32>> {
        serde_json::from_str(&self.embedding_json)
    }
}
