//! Voice pipeline endpoints: transcribe, structure, save
//!
//! The three calls are strictly sequential in the capture lifecycle. Each
//! is a single attempt; any failure halts the pipeline at that stage.

use std::path::Path;

use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use super::types::StructuredFields;
use super::{error_from_response, http_client, BackendError};

/// Transcription result for one assembled recording.
#[derive(Debug, Clone)]
pub struct Transcription {
    pub transcript: String,
    /// Transcription confidence in [0.0, 1.0]
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    success: bool,
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StructureResponse {
    success: bool,
    #[serde(default)]
    structured: Option<StructuredFields>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SaveResponse {
    success: bool,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub database: String,
}

/// Upload the assembled recording for transcription.
pub async fn transcribe(
    base: &str,
    patient_id: &str,
    wav_path: &Path,
) -> Result<Transcription, BackendError> {
    let file_bytes = tokio::fs::read(wav_path)
        .await
        .map_err(|e| BackendError::FileRead(e.to_string()))?;

    let filename = wav_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("recording.wav")
        .to_string();

    log::info!(
        "Transcribing recording: {} ({} bytes) for patient {}",
        filename,
        file_bytes.len(),
        patient_id
    );

    let file_part = Part::bytes(file_bytes)
        .file_name(filename)
        .mime_str("audio/wav")
        .map_err(|e| BackendError::Parse(e.to_string()))?;

    let form = Form::new()
        .part("audio_data", file_part)
        .text("patient_id", patient_id.to_string());

    let response = http_client()
        .post(format!("{}/api/voice/transcribe", base))
        .multipart(form)
        .send()
        .await
        .map_err(|e| BackendError::Network(e.to_string()))?;

    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }

    let body: TranscribeResponse = response
        .json()
        .await
        .map_err(|e| BackendError::Parse(e.to_string()))?;

    if !body.success {
        return Err(BackendError::Rejected(
            body.error.unwrap_or_else(|| "Transcription failed".into()),
        ));
    }

    log::info!(
        "Transcription complete: {} chars, confidence {:.1}%",
        body.transcript.len(),
        body.confidence * 100.0
    );

    Ok(Transcription {
        transcript: body.transcript.trim().to_string(),
        confidence: body.confidence.clamp(0.0, 1.0),
    })
}

/// Send the transcript through the AI structuring endpoint.
pub async fn structure(
    base: &str,
    patient_id: &str,
    notes: &str,
) -> Result<StructuredFields, BackendError> {
    log::info!(
        "Structuring {} chars of notes for patient {}",
        notes.len(),
        patient_id
    );

    let response = http_client()
        .post(format!("{}/api/voice/process", base))
        .json(&serde_json::json!({
            "patient_id": patient_id,
            "notes": notes.trim(),
        }))
        .send()
        .await
        .map_err(|e| BackendError::Network(e.to_string()))?;

    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }

    let body: StructureResponse = response
        .json()
        .await
        .map_err(|e| BackendError::Parse(e.to_string()))?;

    if !body.success {
        return Err(BackendError::Rejected(
            body.error.unwrap_or_else(|| "Structuring failed".into()),
        ));
    }

    body.structured
        .ok_or_else(|| BackendError::Parse("missing 'structured' in response".into()))
}

/// Persist the reviewed note. Returns the generated record id.
pub async fn save(
    base: &str,
    patient_id: &str,
    raw_notes: &str,
    structured: &StructuredFields,
    confidence: f64,
) -> Result<String, BackendError> {
    let response = http_client()
        .post(format!("{}/api/voice/save", base))
        .json(&serde_json::json!({
            "patient_id": patient_id,
            "raw_notes": raw_notes,
            "structured": structured,
            "confidence": confidence,
        }))
        .send()
        .await
        .map_err(|e| BackendError::Network(e.to_string()))?;

    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }

    let body: SaveResponse = response
        .json()
        .await
        .map_err(|e| BackendError::Parse(e.to_string()))?;

    if !body.success {
        return Err(BackendError::Rejected(
            body.error.unwrap_or_else(|| "Save failed".into()),
        ));
    }

    let id = body.id.unwrap_or_default();
    log::info!("Note saved, record id: {}", id);
    Ok(id)
}

/// Backend liveness probe for the status display.
pub async fn health(base: &str) -> Result<HealthStatus, BackendError> {
    let response = http_client()
        .get(format!("{}/health", base))
        .send()
        .await
        .map_err(|e| BackendError::Network(e.to_string()))?;

    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }

    response
        .json()
        .await
        .map_err(|e| BackendError::Parse(e.to_string()))
}
