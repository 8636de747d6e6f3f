//! HTTP boundary to the clinical-records backend
//!
//! All remote processing (transcription, AI structuring, persistence)
//! lives behind this module. Every call is a single attempt; failures
//! surface as a `BackendError` and the caller decides how to report them.

pub mod consultant;
pub mod patients;
pub mod types;
pub mod voice;

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::Client;

pub use types::{Envelope, FieldEditError, FieldValue, Patient, StructuredFields};

/// Global HTTP client for reuse across requests (avoids TLS handshake overhead)
static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

pub(crate) fn http_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client")
    })
}

/// Errors crossing the backend boundary.
#[derive(Debug)]
pub enum BackendError {
    /// Network/transport fault before an HTTP status was received
    Network(String),
    /// Non-success HTTP status
    Http { status: u16, message: String },
    /// HTTP succeeded but the backend reported failure
    Rejected(String),
    /// Response body did not parse
    Parse(String),
    /// Local file could not be read for upload
    FileRead(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::Network(e) => write!(f, "Cannot reach backend: {}", e),
            BackendError::Http { status, message } => {
                write!(f, "Backend error (HTTP {}): {}", status, message)
            }
            BackendError::Rejected(msg) => write!(f, "{}", msg),
            BackendError::Parse(e) => write!(f, "Unexpected backend response: {}", e),
            BackendError::FileRead(e) => write!(f, "Failed to read file: {}", e),
        }
    }
}

impl std::error::Error for BackendError {}

/// Turn a non-success response into a `BackendError::Http`, preserving the
/// response body as the message where possible.
pub(crate) async fn error_from_response(response: reqwest::Response) -> BackendError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    BackendError::Http { status, message }
}
