use crate::{
    check_status, invalid_body, request_failed, BoundingBox, Detection, ImageFinding,
    ImageFindingDetector, ProviderError,
};
use base64::Engine as _;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://detect.roboflow.com";

#[derive(Clone)]
pub struct RoboflowConfig {
    pub api_key: String,
    pub base_url: String,
    pub model_id: String,
    pub model_version: String,
}

/// Hosted object-detection endpoint. The image travels base64-encoded in a
/// form-urlencoded body, the API key in the query string.
#[derive(Clone)]
pub struct RoboflowDetector {
    client: Client,
    cfg: RoboflowConfig,
}

impl RoboflowDetector {
    pub fn new(cfg: RoboflowConfig) -> Self {
        Self {
            client: Client::new(),
            cfg,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}/{}",
            self.cfg.base_url.trim_end_matches('/'),
            self.cfg.model_id,
            self.cfg.model_version
        )
    }
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(rename = "class")]
    label: String,
    confidence: f32,
    x: Option<f32>,
    y: Option<f32>,
    width: Option<f32>,
    height: Option<f32>,
}

impl From<Prediction> for ImageFinding {
    fn from(p: Prediction) -> Self {
        let bounding_box = match (p.x, p.y, p.width, p.height) {
            (Some(x), Some(y), Some(width), Some(height)) => Some(BoundingBox {
                x,
                y,
                width,
                height,
            }),
            _ => None,
        };
        ImageFinding {
            label: p.label,
            confidence: p.confidence.clamp(0.0, 1.0),
            bounding_box,
        }
    }
}

#[async_trait::async_trait]
impl ImageFindingDetector for RoboflowDetector {
    async fn detect(&self, image: &[u8]) -> Result<Detection, ProviderError> {
        debug!(bytes = image.len(), model = %self.cfg.model_id, "requesting image findings");
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let resp = self
            .client
            .post(self.endpoint())
            .query(&[("api_key", self.cfg.api_key.as_str())])
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(encoded)
            .send()
            .await
            .map_err(request_failed)?;
        let resp = check_status(resp).await?;

        let parsed: DetectResponse = resp
            .json()
            .await
            .map_err(invalid_body)?;

        debug!(findings = parsed.predictions.len(), "image findings received");
        Ok(Detection {
            findings: parsed.predictions.into_iter().map(Into::into).collect(),
        })
    }
}
