use crate::error::{bounded, ErrorKind, StageFailure};
use crate::models::{ImageAnalysisOutcome, ImageAttachment};
use base64::Engine as _;
use providers::ProviderRegistry;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MIN_PAYLOAD_BYTES: usize = 100;
/// Confidence reported when the detector answers with no findings at all.
pub const NORMAL_CONFIDENCE: f32 = 0.8;

#[derive(Clone)]
pub struct ImageAnalysisAdapter {
    registry: ProviderRegistry,
    detector: Option<String>,
    timeout: Duration,
    min_payload_bytes: usize,
    normal_confidence: f32,
}

impl ImageAnalysisAdapter {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry,
            detector: None,
            timeout: DEFAULT_TIMEOUT,
            min_payload_bytes: DEFAULT_MIN_PAYLOAD_BYTES,
            normal_confidence: NORMAL_CONFIDENCE,
        }
    }

    pub fn with_detector(mut self, name: impl Into<String>) -> Self {
        self.detector = Some(name.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_min_payload_bytes(mut self, min: usize) -> Self {
        self.min_payload_bytes = min;
        self
    }

    pub fn with_normal_confidence(mut self, confidence: f32) -> Self {
        self.normal_confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Never fails: every problem is reported through the outcome.
    pub async fn analyze(&self, image: &ImageAttachment) -> ImageAnalysisOutcome {
        match self.try_analyze(image).await {
            Ok(outcome) => outcome,
            Err(failure) => {
                warn!(kind = %failure.kind, error = %failure.message, "image analysis failed");
                ImageAnalysisOutcome::failed(failure)
            }
        }
    }

    async fn try_analyze(
        &self,
        image: &ImageAttachment,
    ) -> Result<ImageAnalysisOutcome, StageFailure> {
        if image.payload.is_empty() {
            return Err(StageFailure::new(
                ErrorKind::InvalidInput,
                "image payload is empty",
            ));
        }
        let bytes = decode_payload(&image.payload)?;
        if bytes.len() < self.min_payload_bytes {
            return Err(StageFailure::new(
                ErrorKind::InvalidInput,
                format!(
                    "decoded image is {} bytes, minimum is {}",
                    bytes.len(),
                    self.min_payload_bytes
                ),
            ));
        }

        let detector = self.registry.detector(self.detector.as_deref())?;
        debug!(
            bytes = bytes.len(),
            mime = %image.mime_type,
            modality = image.modality_hint.as_deref().unwrap_or("unspecified"),
            "running image detector"
        );
        let detection = bounded(self.timeout, detector.detect(&bytes)).await?;

        let confidence = detection
            .findings
            .iter()
            .map(|f| f.confidence)
            .fold(None, |acc: Option<f32>, c| Some(acc.map_or(c, |a| a.max(c))))
            .unwrap_or(self.normal_confidence);
        Ok(ImageAnalysisOutcome::success(detection.findings, confidence))
    }
}

/// Strips data-URI framing (`data:image/png;base64,`) when present and
/// decodes the base64 body.
pub fn decode_payload(payload: &[u8]) -> Result<Vec<u8>, StageFailure> {
    let text = std::str::from_utf8(payload).map_err(|_| {
        StageFailure::new(ErrorKind::InvalidInput, "image payload is not base64 text")
    })?;
    let text = text.trim();
    let body = match text.strip_prefix("data:") {
        Some(rest) => {
            let (header, body) = rest.split_once(',').ok_or_else(|| {
                StageFailure::new(ErrorKind::InvalidInput, "data URI has no payload")
            })?;
            if !header.ends_with(";base64") {
                return Err(StageFailure::new(
                    ErrorKind::InvalidInput,
                    "data URI is not base64 encoded",
                ));
            }
            body
        }
        None => text,
    };
    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| StageFailure::new(ErrorKind::InvalidInput, format!("invalid base64: {e}")))
}
