use std::io::Read;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use tiny_http::Request;
use tracing::{error, info, warn};

use sickle_cam::{Error, ErrorKind, Result};

use crate::routes::Reply;
use crate::state::AppState;
use crate::util::multipart::{extract_boundary, extract_file_field};

/// Multipart field carrying the uploaded image.
pub const IMAGE_FIELD: &str = "image";

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub label: String,
    pub confidence: f64,
    pub heatmap_base64: String,
    pub heatmap_file: String,
}

/// `POST /predict`
pub fn handle(request: &mut Request, state: &AppState) -> Reply {
    let content_type = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Content-Type"))
        .map(|h| h.value.as_str().to_owned())
        .unwrap_or_default();
    let declared = request.body_length();

    match read_limited(request.as_reader(), declared, state.max_upload_bytes) {
        Ok(body) => predict(&content_type, &body, state),
        Err(e) => error_reply(&e),
    }
}

/// Reads the whole body unless it is larger than `limit` bytes.
pub fn read_limited<R: Read>(reader: R, declared: Option<usize>, limit: usize) -> Result<Vec<u8>> {
    if let Some(size) = declared.filter(|&size| size > limit) {
        return Err(Error::UploadTooLarge { size, limit });
    }
    let mut body = Vec::new();
    reader.take(limit as u64 + 1).read_to_end(&mut body)?;
    if body.len() > limit {
        return Err(Error::UploadTooLarge { size: body.len(), limit });
    }
    Ok(body)
}

/// Classifies the uploaded image and returns the label, confidence and
/// Grad-CAM overlay.
pub fn predict(content_type: &str, body: &[u8], state: &AppState) -> Reply {
    let image = extract_boundary(content_type)
        .and_then(|boundary| extract_file_field(body, &boundary, IMAGE_FIELD));
    let Some(image) = image else {
        return error_reply(&Error::MissingImage);
    };

    let id = sickle_cam::Storage::new_id();
    let upload = match state.storage.save_upload(&id, &image) {
        Ok(path) => path,
        Err(e) => return error_reply(&e),
    };

    match explain(&id, &image, state) {
        Ok(response) => {
            state.storage.finish_upload(&upload);
            Reply::json(200, &response)
        }
        Err(e) => {
            state.storage.discard_upload(&upload);
            error_reply(&e)
        }
    }
}

fn explain(id: &str, image: &[u8], state: &AppState) -> Result<PredictResponse> {
    let analysis = state.explainer.analyze(image)?;
    let jpeg = analysis.overlay_jpeg()?;
    let heatmap_path = state.storage.save_heatmap(id, &jpeg)?;

    info!(
        id,
        label = %analysis.prediction.label,
        confidence = analysis.prediction.confidence,
        "prediction"
    );
    Ok(PredictResponse {
        label: analysis.prediction.label.clone(),
        confidence: analysis.prediction.rounded_confidence(),
        heatmap_base64: STANDARD.encode(&jpeg),
        heatmap_file: heatmap_path.display().to_string(),
    })
}

fn error_reply(e: &Error) -> Reply {
    let status = match e {
        Error::MissingImage => 400,
        Error::UploadTooLarge { .. } => 413,
        _ => 500,
    };
    match e.kind() {
        ErrorKind::Input => warn!(kind = ?e.kind(), error = %e, "rejected upload"),
        _ => error!(kind = ?e.kind(), error = %e, "prediction failed"),
    }
    Reply::error(status, &e.to_string())
}
