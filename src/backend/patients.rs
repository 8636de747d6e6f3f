//! Patient CRUD passthroughs
//!
//! The backend keys patients by name in query params; preserved as-is
//! since the store is an external collaborator.

use serde::{Deserialize, Serialize};

use super::types::{Envelope, Patient};
use super::{error_from_response, http_client, BackendError};

/// Payload for creating or updating a patient.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientInput {
    pub id: String,
    pub name: String,
    pub age: u32,
    pub condition: String,
    pub history: Vec<String>,
    #[serde(rename = "lastVisit")]
    pub last_visit: String,
    pub phone: String,
}

async fn unwrap_envelope<T>(response: reqwest::Response) -> Result<Option<T>, BackendError>
where
    T: serde::de::DeserializeOwned + Default,
{
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }

    let envelope: Envelope<T> = response
        .json()
        .await
        .map_err(|e| BackendError::Parse(e.to_string()))?;

    if !envelope.is_success() {
        return Err(BackendError::Rejected(
            envelope
                .message
                .unwrap_or_else(|| "Backend reported failure".into()),
        ));
    }

    Ok(envelope.data)
}

/// Fetch all patients.
pub async fn list(base: &str) -> Result<Vec<Patient>, BackendError> {
    let response = http_client()
        .get(format!("{}/api/patients/", base))
        .send()
        .await
        .map_err(|e| BackendError::Network(e.to_string()))?;

    Ok(unwrap_envelope(response).await?.unwrap_or_default())
}

/// Create a patient record.
pub async fn add(base: &str, patient: &PatientInput) -> Result<(), BackendError> {
    let response = http_client()
        .post(format!("{}/api/patients/", base))
        .json(patient)
        .send()
        .await
        .map_err(|e| BackendError::Network(e.to_string()))?;

    unwrap_envelope::<serde_json::Value>(response).await?;
    Ok(())
}

/// Update the patient currently known as `name`.
pub async fn update(base: &str, name: &str, patient: &PatientInput) -> Result<(), BackendError> {
    let response = http_client()
        .put(format!("{}/api/patients/", base))
        .query(&[("name", name)])
        .json(patient)
        .send()
        .await
        .map_err(|e| BackendError::Network(e.to_string()))?;

    unwrap_envelope::<serde_json::Value>(response).await?;
    Ok(())
}

/// Delete the patient known as `name`.
pub async fn delete(base: &str, name: &str) -> Result<(), BackendError> {
    let response = http_client()
        .delete(format!("{}/api/patients/", base))
        .query(&[("name", name)])
        .send()
        .await
        .map_err(|e| BackendError::Network(e.to_string()))?;

    unwrap_envelope::<serde_json::Value>(response).await?;
    Ok(())
}

/// Fetch saved notes for a patient. Shape is backend-defined, passed
/// through to the UI untouched.
pub async fn notes(base: &str, name: &str) -> Result<serde_json::Value, BackendError> {
    let response = http_client()
        .get(format!("{}/api/patients/notes", base))
        .query(&[("name", name)])
        .send()
        .await
        .map_err(|e| BackendError::Network(e.to_string()))?;

    Ok(unwrap_envelope(response)
        .await?
        .unwrap_or(serde_json::Value::Null))
}
