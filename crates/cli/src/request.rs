//! Builds boundary requests and case files from local inputs.

use anyhow::{bail, Context, Result};
use base64::Engine as _;
use clinical_core::api::{AnalyzeRequest, ImagePayload};
use clinical_core::models::NewCase;
use std::fs;
use std::path::Path;

/// Encodes an image file as a `data:` URI, sniffing the MIME type from its
/// magic bytes.
pub fn image_payload(path: &Path, modality: Option<String>) -> Result<ImagePayload> {
    let bytes = fs::read(path).with_context(|| format!("reading image {}", path.display()))?;
    let mime_type = match infer::get(&bytes) {
        Some(kind) if kind.matcher_type() == infer::MatcherType::Image => kind.mime_type(),
        Some(kind) => bail!("{} is {}, not an image", path.display(), kind.mime_type()),
        None => bail!("{} is not a recognized image format", path.display()),
    };
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
    Ok(ImagePayload {
        mime_type: mime_type.to_string(),
        base64_payload: format!("data:{mime_type};base64,{encoded}"),
        modality_hint: modality,
    })
}

pub fn build_request(
    text: Option<String>,
    image: Option<&Path>,
    modality: Option<String>,
) -> Result<AnalyzeRequest> {
    let image = image.map(|p| image_payload(p, modality)).transpose()?;
    Ok(AnalyzeRequest {
        text: text.unwrap_or_default(),
        image,
    })
}

/// Reads a request already in the boundary JSON shape.
pub fn load_request(path: &Path) -> Result<AnalyzeRequest> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading request {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing request {}", path.display()))
}

/// Accepts either one case object or an array of them.
pub fn load_cases(path: &Path) -> Result<Vec<NewCase>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading cases {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("parsing cases {}", path.display()))?;
    let cases = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    Ok(cases)
}
