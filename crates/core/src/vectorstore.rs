//! Case store: persisted clinical cases with their embedding, searched by
//! cosine distance.

use crate::error::{ErrorKind, StageFailure};
use crate::models::{CaseRecord, Gender, NewCase, SimilarityResult};
use sqlx::{SqliteConnection, SqlitePool};
use storage::models::CaseRow;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("embedding encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("vector has dimension {actual}, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("invalid stored record {id}: {reason}")]
    InvalidRecord { id: i64, reason: String },
    #[error("{cases} cases but {embeddings} embeddings")]
    BatchMismatch { cases: usize, embeddings: usize },
}

impl From<StoreError> for StageFailure {
    fn from(err: StoreError) -> Self {
        StageFailure::new(ErrorKind::Upstream, err.to_string())
    }
}

#[async_trait::async_trait]
pub trait CaseStore: Send + Sync {
    async fn insert(&self, case: &NewCase, embedding: &[f32]) -> Result<i64, StoreError>;

    /// Stores every case or none of them. Ids come back in input order.
    async fn insert_many(
        &self,
        cases: &[NewCase],
        embeddings: &[Vec<f32>],
    ) -> Result<Vec<i64>, StoreError>;

    /// Nearest cases, ascending by cosine distance, at most `limit`.
    async fn search(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SimilarityResult>, StoreError>;

    /// Every case, newest first.
    async fn list_all(&self) -> Result<Vec<CaseRecord>, StoreError>;
}

/// SQLite-backed store. Each call holds one pooled connection for its own
/// duration only.
#[derive(Clone)]
pub struct SqliteCaseStore {
    pool: SqlitePool,
    dimension: usize,
}

impl SqliteCaseStore {
    pub fn new(pool: SqlitePool, dimension: usize) -> Self {
        Self { pool, dimension }
    }

    /// Connects and applies migrations.
    pub async fn open(
        url: &str,
        max_connections: u32,
        dimension: usize,
    ) -> anyhow::Result<Self> {
        let pool = storage::connect_with_limit(url, max_connections).await?;
        storage::migrate(&pool).await?;
        Ok(Self::new(pool, dimension))
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Removes every stored case, e.g. after switching embedding models.
    pub async fn clear(&self) -> anyhow::Result<u64> {
        storage::reset_cases(&self.pool).await
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<(), StoreError> {
        if embedding.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        Ok(())
    }

    async fn load_rows(&self, order_by: &str) -> Result<Vec<CaseRow>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT id, title, description, symptoms, diagnosis, treatment, outcome, \
             patient_age, patient_gender, medical_history, embedding_json, embedding_dim, \
             created_at FROM clinical_cases ORDER BY {order_by}"
        );
        let rows = sqlx::query_as::<_, CaseRow>(&sql)
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows)
    }
}

async fn insert_row(
    conn: &mut SqliteConnection,
    case: &NewCase,
    embedding: &[f32],
) -> Result<i64, StoreError> {
    let embedding_json = serde_json::to_string(embedding)?;
    let done = sqlx::query(
        r#"
        INSERT INTO clinical_cases
            (title, description, symptoms, diagnosis, treatment, outcome,
             patient_age, patient_gender, medical_history, embedding_json, embedding_dim)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&case.title)
    .bind(&case.description)
    .bind(&case.symptoms)
    .bind(&case.diagnosis)
    .bind(&case.treatment)
    .bind(&case.outcome)
    .bind(case.patient_age)
    .bind(case.patient_gender.as_str())
    .bind(&case.medical_history)
    .bind(embedding_json)
    .bind(embedding.len() as i64)
    .execute(conn)
    .await?;
    let id = done.last_insert_rowid();
    debug!(id, title = %case.title, "case inserted");
    Ok(id)
}

fn to_record(row: CaseRow) -> Result<CaseRecord, StoreError> {
    let id = row.id;
    let patient_gender: Gender = row
        .patient_gender
        .parse()
        .map_err(|reason| StoreError::InvalidRecord { id, reason })?;
    let embedding = row.embedding()?;
    Ok(CaseRecord {
        id: row.id,
        title: row.title,
        description: row.description,
        symptoms: row.symptoms,
        diagnosis: row.diagnosis,
        treatment: row.treatment,
        outcome: row.outcome,
        patient_age: row.patient_age,
        patient_gender,
        medical_history: row.medical_history,
        embedding,
        created_at: row.created_at,
    })
}

#[async_trait::async_trait]
impl CaseStore for SqliteCaseStore {
    async fn insert(&self, case: &NewCase, embedding: &[f32]) -> Result<i64, StoreError> {
        self.check_dimension(embedding)?;
        let mut conn = self.pool.acquire().await?;
        insert_row(&mut conn, case, embedding).await
    }

    async fn insert_many(
        &self,
        cases: &[NewCase],
        embeddings: &[Vec<f32>],
    ) -> Result<Vec<i64>, StoreError> {
        if cases.len() != embeddings.len() {
            return Err(StoreError::BatchMismatch {
                cases: cases.len(),
                embeddings: embeddings.len(),
            });
        }
        for embedding in embeddings {
            self.check_dimension(embedding)?;
        }
        // Dropping the transaction on an early return rolls it back.
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(cases.len());
        for (case, embedding) in cases.iter().zip(embeddings) {
            ids.push(insert_row(&mut tx, case, embedding).await?);
        }
        tx.commit().await?;
        Ok(ids)
    }

    async fn search(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SimilarityResult>, StoreError> {
        self.check_dimension(embedding)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        // Insertion order first, so the stable sort keeps ties in that order.
        let rows = self.load_rows("id ASC").await?;
        let mut scored = Vec::with_capacity(rows.len());
        for row in rows {
            if row.embedding_dim as usize != self.dimension {
                warn!(id = row.id, dim = row.embedding_dim, "skipping case with foreign dimension");
                continue;
            }
            let case = to_record(row)?;
            let distance = cosine_distance(embedding, &case.embedding);
            scored.push(SimilarityResult { case, distance });
        }
        rank_by_distance(&mut scored, limit);
        Ok(scored)
    }

    async fn list_all(&self) -> Result<Vec<CaseRecord>, StoreError> {
        self.load_rows("created_at DESC, id DESC")
            .await?
            .into_iter()
            .map(to_record)
            .collect()
    }
}

/// `1 - cosine_similarity`, kept inside `[0, 2]`. A zero vector has no
/// direction and sits at distance 1 from everything.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 1.0;
    }
    (1.0 - dot / denom).clamp(0.0, 2.0)
}

/// Stable ascending sort by distance, then truncate to `limit`.
pub fn rank_by_distance(results: &mut Vec<SimilarityResult>, limit: usize) {
    results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    results.truncate(limit);
}
