mod audio;
pub mod backend;
mod effects;
mod settings;
mod state_machine;

use serde::Serialize;
use std::sync::Arc;
use tauri::{AppHandle, Emitter, Manager};
use tokio::sync::{mpsc, Mutex};

use backend::patients::PatientInput;
use backend::voice::HealthStatus;
use backend::{consultant, patients, voice, Patient, StructuredFields};
use effects::{AudioEffectRunner, EffectRunner};
use settings::AppSettings;
use state_machine::{reduce, Effect, Event, Limits, State};

/// UI state sent to the frontend via Tauri events.
/// Tagged union format: { "status": "idle" } or
/// { "status": "recording", "elapsedSecs": 5 }
#[derive(Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum UiState {
    Idle,
    Arming,
    Recording {
        #[serde(rename = "elapsedSecs")]
        elapsed_secs: u64,
    },
    Stopping,
    Transcribing,
    Structuring,
    Review {
        transcript: String,
        confidence: f64,
        fields: StructuredFields,
        #[serde(
            rename = "statusMessage",
            skip_serializing_if = "Option::is_none"
        )]
        status_message: Option<String>,
    },
    Saving,
    Saved {
        #[serde(rename = "recordId")]
        record_id: String,
    },
    NoSpeech {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Convert internal State to UiState for the frontend
fn state_to_ui(state: &State) -> UiState {
    match state {
        State::Idle => UiState::Idle,
        State::Arming { .. } => UiState::Arming,
        State::Recording { started_at, .. } => UiState::Recording {
            elapsed_secs: started_at.elapsed().as_secs(),
        },
        State::Stopping { .. } => UiState::Stopping,
        State::Transcribing { .. } => UiState::Transcribing,
        State::Structuring { .. } => UiState::Structuring,
        State::Review {
            transcript,
            confidence,
            fields,
            status,
            ..
        } => UiState::Review {
            transcript: transcript.clone(),
            confidence: *confidence,
            fields: fields.clone(),
            status_message: status.clone(),
        },
        State::Saving { .. } => UiState::Saving,
        State::Saved { record_id, .. } => UiState::Saved {
            record_id: record_id.clone(),
        },
        State::NoSpeech { message, .. } => UiState::NoSpeech {
            message: message.clone(),
        },
        State::Error { message } => UiState::Error {
            message: message.clone(),
        },
    }
}

/// Emit a UI state update to the frontend
fn emit_ui_state(app: &AppHandle, state: &State) {
    let ui_state = state_to_ui(state);
    log::debug!("Emitting UI state: {:?}", serde_json::to_string(&ui_state));
    if let Err(e) = app.emit("state-update", &ui_state) {
        log::warn!("Failed to emit state to UI: {:?}", e);
    }
}

/// State loop manager - holds the event sender for dispatching events
pub struct StateLoopHandle {
    tx: mpsc::Sender<Event>,
}

impl StateLoopHandle {
    /// Send an event to the state machine
    pub async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>> {
        self.tx.send(event).await
    }
}

/// Managed settings, shared between commands and the effect runner.
pub struct SettingsHolder(Arc<Mutex<AppSettings>>);

/// Run the main state loop
async fn run_state_loop(
    app: AppHandle,
    mut rx: mpsc::Receiver<Event>,
    tx: mpsc::Sender<Event>,
    effect_runner: Arc<dyn EffectRunner>,
    limits: Limits,
) {
    let mut state = State::default();

    emit_ui_state(&app, &state);
    log::info!("State loop started");

    while let Some(event) = rx.recv().await {
        log::debug!("Received event: {:?}", event);

        // Handle Exit at the edge
        if matches!(event, Event::Exit) {
            log::info!("Exit requested, shutting down state loop");
            break;
        }

        let old_discriminant = std::mem::discriminant(&state);
        let (next, effects) = reduce(&state, event, &limits);
        let new_discriminant = std::mem::discriminant(&next);

        if old_discriminant != new_discriminant {
            log::info!("State transition: {:?} -> {:?}", state, next);
        }

        state = next;

        for eff in effects {
            match eff {
                Effect::EmitUi => emit_ui_state(&app, &state),
                other => effect_runner.spawn(other, tx.clone()),
            }
        }
    }

    log::info!("State loop ended");
}

// ============================================================================
// Recording commands
// ============================================================================

#[tauri::command]
async fn start_recording(
    patient_id: String,
    state: tauri::State<'_, StateLoopHandle>,
) -> Result<(), String> {
    log::info!("Command: start recording for patient {}", patient_id);
    state
        .send(Event::StartRequested { patient_id })
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn stop_recording(state: tauri::State<'_, StateLoopHandle>) -> Result<(), String> {
    log::info!("Command: stop recording");
    state
        .send(Event::StopRequested)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn cancel_recording(state: tauri::State<'_, StateLoopHandle>) -> Result<(), String> {
    log::info!("Command: cancel");
    state.send(Event::Cancel).await.map_err(|e| e.to_string())
}

#[tauri::command]
async fn edit_field(
    field: String,
    value: String,
    state: tauri::State<'_, StateLoopHandle>,
) -> Result<(), String> {
    log::debug!("Command: edit field {}", field);
    state
        .send(Event::FieldEdited { field, value })
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn save_note(state: tauri::State<'_, StateLoopHandle>) -> Result<(), String> {
    log::info!("Command: save note");
    state
        .send(Event::SaveRequested)
        .await
        .map_err(|e| e.to_string())
}

// ============================================================================
// Patient CRUD commands
// ============================================================================

async fn api_base(holder: &tauri::State<'_, SettingsHolder>) -> String {
    holder.0.lock().await.api_base_url.clone()
}

#[tauri::command]
async fn list_patients(
    holder: tauri::State<'_, SettingsHolder>,
) -> Result<Vec<Patient>, String> {
    let base = api_base(&holder).await;
    patients::list(&base).await.map_err(|e| e.to_string())
}

#[tauri::command]
async fn add_patient(
    patient: PatientInput,
    holder: tauri::State<'_, SettingsHolder>,
) -> Result<(), String> {
    log::info!("Command: add patient {}", patient.name);
    let base = api_base(&holder).await;
    patients::add(&base, &patient)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn update_patient(
    name: String,
    patient: PatientInput,
    holder: tauri::State<'_, SettingsHolder>,
) -> Result<(), String> {
    log::info!("Command: update patient {}", name);
    let base = api_base(&holder).await;
    patients::update(&base, &name, &patient)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn delete_patient(
    name: String,
    holder: tauri::State<'_, SettingsHolder>,
) -> Result<(), String> {
    log::info!("Command: delete patient {}", name);
    let base = api_base(&holder).await;
    patients::delete(&base, &name)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn patient_notes(
    name: String,
    holder: tauri::State<'_, SettingsHolder>,
) -> Result<serde_json::Value, String> {
    let base = api_base(&holder).await;
    patients::notes(&base, &name)
        .await
        .map_err(|e| e.to_string())
}

// ============================================================================
// Consultant-notes commands (scanned document extraction)
// ============================================================================

#[tauri::command]
async fn consultant_extract(
    image_paths: Vec<String>,
    holder: tauri::State<'_, SettingsHolder>,
) -> Result<serde_json::Value, String> {
    log::info!("Command: extract {} scanned pages", image_paths.len());
    let base = api_base(&holder).await;
    consultant::extract_notes(&base, &image_paths)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn consultant_save(
    patient_id: String,
    extracted: serde_json::Value,
    holder: tauri::State<'_, SettingsHolder>,
) -> Result<(), String> {
    log::info!("Command: save extracted notes for patient {}", patient_id);
    let base = api_base(&holder).await;
    consultant::save_notes(&base, &patient_id, &extracted)
        .await
        .map_err(|e| e.to_string())
}

// ============================================================================
// Settings commands
// ============================================================================

#[tauri::command]
async fn get_settings(
    holder: tauri::State<'_, SettingsHolder>,
) -> Result<AppSettings, String> {
    Ok(holder.0.lock().await.clone())
}

/// Persist new settings and apply them to the running app. The backend URL
/// takes effect immediately; recording thresholds apply from the next
/// session the state loop is started with, i.e. the next launch.
#[tauri::command]
async fn update_settings(
    new_settings: AppSettings,
    app: AppHandle,
    holder: tauri::State<'_, SettingsHolder>,
) -> Result<(), String> {
    log::info!("Command: update settings");
    settings::save_settings(&app, &new_settings)?;
    *holder.0.lock().await = new_settings;
    Ok(())
}

// ============================================================================
// Status commands
// ============================================================================

/// Audio status for the settings panel
#[derive(Clone, serde::Serialize)]
pub struct AudioStatusResponse {
    available: bool,
    sample_rate: Option<u32>,
    temp_dir: String,
    error: Option<String>,
}

#[tauri::command]
fn get_audio_status() -> AudioStatusResponse {
    match audio::AudioRecorder::new() {
        Ok(rec) => {
            let temp_dir = audio::create_temp_audio_dir()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string());

            AudioStatusResponse {
                available: true,
                sample_rate: Some(rec.sample_rate()),
                temp_dir,
                error: None,
            }
        }
        Err(e) => AudioStatusResponse {
            available: false,
            sample_rate: None,
            temp_dir: "N/A".to_string(),
            error: Some(e.to_string()),
        },
    }
}

#[tauri::command]
async fn check_backend(
    holder: tauri::State<'_, SettingsHolder>,
) -> Result<HealthStatus, String> {
    let base = api_base(&holder).await;
    voice::health(&base).await.map_err(|e| e.to_string())
}

// ============================================================================
// Application entry point
// ============================================================================

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    tauri::Builder::default()
        .setup(|app| {
            // Set up logging in debug mode
            if cfg!(debug_assertions) {
                app.handle().plugin(
                    tauri_plugin_log::Builder::default()
                        .level(log::LevelFilter::Debug)
                        .build(),
                )?;
            }

            let app_settings = settings::load_settings(app.handle());
            let limits = Limits::from(&app_settings);
            let shared_settings = Arc::new(Mutex::new(app_settings));
            app.manage(SettingsHolder(shared_settings.clone()));

            // Create event channel for the state machine
            let (tx, rx) = mpsc::channel::<Event>(32);

            // Store the sender so Tauri commands can dispatch events
            let state_handle = StateLoopHandle { tx: tx.clone() };
            app.manage(state_handle);

            let effect_runner =
                AudioEffectRunner::new(app.handle().clone(), shared_settings);

            // Spawn the state loop
            let app_handle = app.handle().clone();
            let tx_for_loop = tx.clone();
            tauri::async_runtime::spawn(async move {
                run_state_loop(app_handle, rx, tx_for_loop, effect_runner, limits).await;
            });

            log::info!("Myora started");
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            start_recording,
            stop_recording,
            cancel_recording,
            edit_field,
            save_note,
            list_patients,
            add_patient,
            update_patient,
            delete_patient,
            patient_notes,
            consultant_extract,
            consultant_save,
            get_settings,
            update_settings,
            get_audio_status,
            check_backend,
        ])
        .on_window_event(|window, event| {
            // Closing the main window shuts down the state loop so any
            // in-flight session stops cleanly
            if let tauri::WindowEvent::CloseRequested { .. } = event {
                if let Some(state) = window.app_handle().try_state::<StateLoopHandle>() {
                    if let Err(e) = state.tx.try_send(Event::Exit) {
                        log::warn!("Failed to send exit event: {}", e);
                    }
                }
            }
        })
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Instant;
    use uuid::Uuid;

    #[test]
    fn ui_state_serializes_with_status_tag() {
        let json = serde_json::to_value(state_to_ui(&State::Idle)).unwrap();
        assert_eq!(json["status"], "idle");

        let state = State::Recording {
            recording_id: Uuid::new_v4(),
            patient_id: "Jane Doe".into(),
            wav_path: PathBuf::from("/tmp/test.wav"),
            started_at: Instant::now(),
        };
        let json = serde_json::to_value(state_to_ui(&state)).unwrap();
        assert_eq!(json["status"], "recording");
        assert!(json["elapsedSecs"].is_u64());
    }

    #[test]
    fn review_state_carries_fields_and_omits_empty_status() {
        use crate::backend::FieldValue;

        let mut fields = StructuredFields::new();
        fields.insert("diagnosis".into(), FieldValue::Text("flu".into()));

        let state = State::Review {
            recording_id: Uuid::new_v4(),
            patient_id: "Jane Doe".into(),
            wav_path: PathBuf::from("/tmp/test.wav"),
            transcript: "notes".into(),
            confidence: 0.9,
            fields,
            status: None,
        };
        let json = serde_json::to_value(state_to_ui(&state)).unwrap();
        assert_eq!(json["status"], "review");
        assert_eq!(json["fields"]["diagnosis"], "flu");
        assert!(json.get("statusMessage").is_none());
    }

    #[test]
    fn no_speech_state_serializes_message() {
        let state = State::NoSpeech {
            recording_id: Uuid::new_v4(),
            message: "No audio recorded".into(),
        };
        let json = serde_json::to_value(state_to_ui(&state)).unwrap();
        assert_eq!(json["status"], "noSpeech");
        assert_eq!(json["message"], "No audio recorded");
    }
}
