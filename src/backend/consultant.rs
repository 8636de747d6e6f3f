//! Scanned consultant-notes extraction and save

use std::path::Path;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::{error_from_response, http_client, BackendError};

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    extracted_json: serde_json::Value,
}

/// Upload scanned note images and get the extracted JSON back.
pub async fn extract_notes(
    base: &str,
    image_paths: &[impl AsRef<Path>],
) -> Result<serde_json::Value, BackendError> {
    let mut form = Form::new();

    for path in image_paths {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| BackendError::FileRead(e.to_string()))?;

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("scan.png")
            .to_string();

        form = form.part("files", Part::bytes(bytes).file_name(filename));
    }

    log::info!("Extracting notes from {} scanned images", image_paths.len());

    let response = http_client()
        .post(format!("{}/api/consultant/extract_notes", base))
        .multipart(form)
        .send()
        .await
        .map_err(|e| BackendError::Network(e.to_string()))?;

    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }

    let body: ExtractResponse = response
        .json()
        .await
        .map_err(|e| BackendError::Parse(e.to_string()))?;

    Ok(body.extracted_json)
}

/// Persist reviewed extracted notes against a patient id.
pub async fn save_notes(
    base: &str,
    patient_id: &str,
    extracted_json: &serde_json::Value,
) -> Result<(), BackendError> {
    let response = http_client()
        .post(format!("{}/api/consultant/save_notes", base))
        .json(&serde_json::json!({
            "patient_id": patient_id,
            "extracted_json": extracted_json,
        }))
        .send()
        .await
        .map_err(|e| BackendError::Network(e.to_string()))?;

    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }

    log::info!("Consultant notes saved for patient {}", patient_id);
    Ok(())
}
