//! Error taxonomy shared by every pipeline stage.
//!
//! Only [`PipelineError`] ever escapes a pipeline run. Everything that goes
//! wrong inside a stage is captured as a [`StageFailure`] value and folded
//! into the result instead.

use providers::ProviderError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[serde(rename = "validation_error")]
    Validation,
    InvalidInput,
    Timeout,
    Unauthorized,
    NotConfigured,
    RateLimited,
    #[serde(rename = "upstream_error")]
    Upstream,
}

impl ErrorKind {
    /// Short phrase used in user-visible caveats.
    pub fn describe(self) -> &'static str {
        match self {
            ErrorKind::Validation => "request was invalid",
            ErrorKind::InvalidInput => "input could not be read",
            ErrorKind::Timeout => "timed out",
            ErrorKind::Unauthorized => "credentials were rejected",
            ErrorKind::NotConfigured => "is not configured",
            ErrorKind::RateLimited => "was rate limited",
            ErrorKind::Upstream => "upstream service failed",
        }
    }

    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ErrorKind::Unauthorized,
            404 => ErrorKind::NotConfigured,
            429 => ErrorKind::RateLimited,
            _ => ErrorKind::Upstream,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotConfigured => "not_configured",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Upstream => "upstream_error",
        };
        f.write_str(s)
    }
}

/// A failed stage, kept as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl StageFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("no response within {}s", limit.as_secs_f32()),
        )
    }

    /// "analysis incomplete: imaging timed out", with backoff guidance for
    /// rate limiting.
    pub fn caveat(&self, stage: &str) -> String {
        let mut note = format!("analysis incomplete: {} {}", stage, self.kind.describe());
        if self.kind == ErrorKind::RateLimited {
            match self.retry_after_secs {
                Some(secs) => note.push_str(&format!(" (retry after {secs}s)")),
                None => note.push_str(" (retry later)"),
            }
        }
        note
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<&ProviderError> for StageFailure {
    fn from(err: &ProviderError) -> Self {
        match err {
            ProviderError::Status {
                status,
                retry_after_secs,
                ..
            } => StageFailure {
                kind: ErrorKind::from_status(*status),
                message: format!("upstream returned status {status}"),
                retry_after_secs: *retry_after_secs,
            },
            ProviderError::NotConfigured(_) | ProviderError::UnknownProvider(_) => {
                StageFailure::new(ErrorKind::NotConfigured, err.to_string())
            }
            ProviderError::RequestFailed(_) | ProviderError::InvalidResponse(_) => {
                StageFailure::new(ErrorKind::Upstream, err.to_string())
            }
        }
    }
}

impl From<ProviderError> for StageFailure {
    fn from(err: ProviderError) -> Self {
        StageFailure::from(&err)
    }
}

/// Runs one external call under a deadline. Elapsed deadlines become
/// `ErrorKind::Timeout`; the abandoned future is dropped with its resources.
pub async fn bounded<T, E, F>(limit: Duration, fut: F) -> Result<T, StageFailure>
where
    F: Future<Output = Result<T, E>>,
    E: Into<StageFailure>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(StageFailure::timeout(limit)),
    }
}

/// Process-level failure of a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation error: {0}")]
    Validation(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation(_) => ErrorKind::Validation,
        }
    }
}
