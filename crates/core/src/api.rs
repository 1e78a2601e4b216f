//! Request/response shapes at the pipeline boundary.

use crate::error::{ErrorKind, PipelineError};
use crate::models::{AnalysisResult, ClinicalQuery, ImageAttachment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImagePayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePayload {
    pub mime_type: String,
    /// Bare base64 or a `data:` URI.
    pub base64_payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modality_hint: Option<String>,
}

impl From<AnalyzeRequest> for ClinicalQuery {
    fn from(req: AnalyzeRequest) -> Self {
        match req.image {
            Some(image) => {
                let mut attachment =
                    ImageAttachment::new(image.mime_type, image.base64_payload.into_bytes());
                attachment.modality_hint = image.modality_hint;
                ClinicalQuery::with_image(req.text, attachment)
            }
            None => ClinicalQuery::new(req.text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnalyzeResponse {
    Ok(AnalysisResult),
    Error(ErrorBody),
}

impl From<Result<AnalysisResult, PipelineError>> for AnalyzeResponse {
    fn from(res: Result<AnalysisResult, PipelineError>) -> Self {
        match res {
            Ok(result) => AnalyzeResponse::Ok(result),
            Err(err) => AnalyzeResponse::Error(ErrorBody {
                kind: err.kind(),
                message: err.to_string(),
            }),
        }
    }
}
