//! Effect runner
//!
//! Executes effects produced by the state machine: microphone capture via
//! CPAL, the transcribe/structure/save backend calls, timers, and cleanup.
//! Every completion is reported back as an event on the provided channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tauri::AppHandle;
use tokio::sync::{mpsc, oneshot, Mutex};
use uuid::Uuid;

use crate::audio::{
    cleanup_old_recordings, create_frame_channel, create_level_channel, run_level_meter,
    AudioRecorder,
};
use crate::backend::voice;
use crate::settings::AppSettings;
use crate::state_machine::{Effect, Event};

/// Trait for running effects asynchronously.
/// Completion events are sent back via the provided channel.
pub trait EffectRunner: Send + Sync + 'static {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>);
}

/// Active recording handle storage. The level-meter stop sender lives here
/// so cancelling a recording also tears down its meter task.
struct ActiveRecording {
    handle: Option<crate::audio::recorder::RecordingHandle>,
    level_stop: Option<oneshot::Sender<()>>,
}

/// Real effect runner with CPAL audio capture and HTTP backend calls.
pub struct AudioEffectRunner {
    app: AppHandle,
    recorder: Arc<Mutex<Option<AudioRecorder>>>,
    active_recordings: Arc<Mutex<HashMap<Uuid, ActiveRecording>>>,
    settings: Arc<Mutex<AppSettings>>,
}

impl AudioEffectRunner {
    /// Returns Ok even if no audio device is available - errors happen at
    /// record time, when they can be surfaced to the user.
    pub fn new(app: AppHandle, settings: Arc<Mutex<AppSettings>>) -> Arc<Self> {
        let recorder = match AudioRecorder::new() {
            Ok(r) => {
                log::info!("AudioRecorder initialized successfully");
                Some(r)
            }
            Err(e) => {
                log::warn!("AudioRecorder init failed (will retry on record): {}", e);
                None
            }
        };

        Arc::new(Self {
            app,
            recorder: Arc::new(Mutex::new(recorder)),
            active_recordings: Arc::new(Mutex::new(HashMap::new())),
            settings,
        })
    }
}

impl EffectRunner for AudioEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::StartAudio { id } => {
                let app = self.app.clone();
                let recorder = self.recorder.clone();
                let active = self.active_recordings.clone();

                tokio::spawn(async move {
                    let (frame_tx, mut frame_rx) = create_frame_channel();
                    let (level_tx, level_rx) = create_level_channel();
                    let (stop_tx, stop_rx) = oneshot::channel();

                    // Drain encoded frames. This end of the pipeline only
                    // counts them; the WAV writer inside the stream callback
                    // is what persists the audio.
                    tokio::spawn(async move {
                        let mut frames = 0u64;
                        let mut bytes = 0u64;
                        while let Some(frame) = frame_rx.recv().await {
                            frames += 1;
                            bytes += frame.len() as u64;
                        }
                        log::debug!(
                            "Frame stream closed for {}: {} frames, {} bytes",
                            id,
                            frames,
                            bytes
                        );
                    });

                    tokio::spawn(run_level_meter(app, level_rx, stop_rx));

                    // Start recording while holding the lock, dropping it
                    // before any await to avoid contention
                    let start_result = {
                        let mut recorder_guard = recorder.lock().await;
                        if recorder_guard.is_none() {
                            match AudioRecorder::new() {
                                Ok(r) => {
                                    *recorder_guard = Some(r);
                                    Ok(())
                                }
                                Err(e) => {
                                    log::error!("Failed to initialize audio recorder: {}", e);
                                    Err(e.to_string())
                                }
                            }
                        } else {
                            Ok(())
                        }
                        .and_then(|_| match recorder_guard.as_ref() {
                            Some(rec) => rec
                                .start(id, frame_tx, level_tx)
                                .map_err(|e| e.to_string()),
                            None => {
                                log::error!("Audio recorder is unavailable after retry");
                                Err("Audio recorder unavailable".to_string())
                            }
                        })
                    };

                    match start_result {
                        Ok((handle, wav_path)) => {
                            log::info!("Audio recording started: {:?}", wav_path);

                            let mut active_guard = active.lock().await;
                            active_guard.insert(
                                id,
                                ActiveRecording {
                                    handle: Some(handle),
                                    level_stop: Some(stop_tx),
                                },
                            );
                            drop(active_guard);

                            let _ = tx.send(Event::AudioStartOk { id, wav_path }).await;
                        }
                        Err(err) => {
                            log::error!("Failed to start audio recording: {}", err);
                            let _ = stop_tx.send(());
                            let _ = tx.send(Event::AudioStartFail { id, err }).await;
                        }
                    }
                });
            }

            Effect::StopAudio { id } => {
                let active = self.active_recordings.clone();

                tokio::spawn(async move {
                    let (handle, level_stop) = {
                        let mut active_guard = active.lock().await;
                        match active_guard.remove(&id) {
                            Some(mut recording) => {
                                (recording.handle.take(), recording.level_stop.take())
                            }
                            None => (None, None),
                        }
                    };

                    if let Some(stop) = level_stop {
                        let _ = stop.send(());
                    }

                    let Some(handle) = handle else {
                        log::warn!("StopAudio: no active handle for id={}", id);
                        let _ = tx.send(Event::EmptyCapture { id }).await;
                        return;
                    };

                    match handle.stop() {
                        Ok(stopped) => {
                            if stopped.sample_count == 0 {
                                log::info!(
                                    "Recording {} produced no samples, skipping transcription",
                                    id
                                );
                                let _ = tx.send(Event::EmptyCapture { id }).await;
                                return;
                            }

                            let file_size = match tokio::fs::metadata(&stopped.wav_path).await {
                                Ok(m) => m.len(),
                                Err(e) => {
                                    log::warn!(
                                        "Failed to stat {:?}: {}",
                                        stopped.wav_path,
                                        e
                                    );
                                    0
                                }
                            };
                            log::info!(
                                "Recording stopped: {}ms, {} bytes",
                                stopped.duration_ms,
                                file_size
                            );

                            let _ = tx
                                .send(Event::AudioStopOk {
                                    id,
                                    wav_path: stopped.wav_path,
                                })
                                .await;
                        }
                        Err(e) => {
                            log::error!("Failed to stop audio recording: {}", e);
                            let _ = tx
                                .send(Event::AudioStopFail {
                                    id,
                                    err: e.to_string(),
                                })
                                .await;
                        }
                    }
                });
            }

            Effect::StartTranscription {
                id,
                patient_id,
                wav_path,
            } => {
                let settings = self.settings.clone();

                tokio::spawn(async move {
                    log::info!("Starting transcription for {:?}", wav_path);
                    let base = settings.lock().await.api_base_url.clone();
                    let start_time = Instant::now();

                    match voice::transcribe(&base, &patient_id, &wav_path).await {
                        Ok(result) => {
                            log::info!(
                                "Transcription successful: {} chars in {:?} (confidence {:.2})",
                                result.transcript.len(),
                                start_time.elapsed(),
                                result.confidence
                            );
                            let _ = tx
                                .send(Event::TranscribeOk {
                                    id,
                                    transcript: result.transcript,
                                    confidence: result.confidence,
                                })
                                .await;
                        }
                        Err(e) => {
                            log::error!("Transcription failed: {}", e);
                            let _ = tx
                                .send(Event::TranscribeFail {
                                    id,
                                    err: e.to_string(),
                                })
                                .await;
                        }
                    }
                });
            }

            Effect::StartStructuring {
                id,
                patient_id,
                transcript,
            } => {
                let settings = self.settings.clone();

                tokio::spawn(async move {
                    let base = settings.lock().await.api_base_url.clone();

                    match voice::structure(&base, &patient_id, &transcript).await {
                        Ok(fields) => {
                            log::info!("Structuring returned {} fields", fields.len());
                            let _ = tx.send(Event::StructureOk { id, fields }).await;
                        }
                        Err(e) => {
                            log::error!("Structuring failed: {}", e);
                            let _ = tx
                                .send(Event::StructureFail {
                                    id,
                                    err: e.to_string(),
                                })
                                .await;
                        }
                    }
                });
            }

            Effect::StartSave {
                id,
                patient_id,
                transcript,
                confidence,
                fields,
            } => {
                let settings = self.settings.clone();

                tokio::spawn(async move {
                    let base = settings.lock().await.api_base_url.clone();

                    match voice::save(&base, &patient_id, &transcript, &fields, confidence).await {
                        Ok(record_id) => {
                            log::info!("Note saved as record {}", record_id);
                            let _ = tx.send(Event::SaveOk { id, record_id }).await;
                        }
                        Err(e) => {
                            log::error!("Save failed: {}", e);
                            let _ = tx
                                .send(Event::SaveFail {
                                    id,
                                    err: e.to_string(),
                                })
                                .await;
                        }
                    }
                });
            }

            Effect::StartRecordingTick { id } => {
                let active = self.active_recordings.clone();
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
                    loop {
                        interval.tick().await;
                        let is_active = {
                            let guard = active.lock().await;
                            guard.contains_key(&id)
                        };
                        if !is_active {
                            log::debug!(
                                "Recording tick stopping - recording {} no longer active",
                                id
                            );
                            break;
                        }
                        if tx.send(Event::RecordingTick { id }).await.is_err() {
                            log::debug!("Recording tick stopping - channel closed");
                            break;
                        }
                    }
                });
            }

            Effect::StartDismissTimeout { id, duration } => {
                tokio::spawn(async move {
                    tokio::time::sleep(duration).await;
                    log::debug!("Dismiss timeout elapsed for id={}", id);
                    let _ = tx.send(Event::DismissTimeout { id }).await;
                });
            }

            Effect::Cleanup { id, wav_path } => {
                let active = self.active_recordings.clone();

                tokio::spawn(async move {
                    // Tear down any meter task still attached to this session
                    let level_stop = {
                        let mut guard = active.lock().await;
                        guard.remove(&id).and_then(|mut r| r.level_stop.take())
                    };
                    if let Some(stop) = level_stop {
                        let _ = stop.send(());
                    }

                    match cleanup_old_recordings() {
                        Ok(count) if count > 0 => {
                            log::info!("Cleaned up {} old recordings", count);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            log::warn!("Failed to cleanup old recordings: {}", e);
                        }
                    }

                    // The file itself is retained until cleanup_old_recordings
                    // rotates it out
                    if let Some(path) = wav_path {
                        log::debug!("Recording file retained: {:?}", path);
                    }
                });
            }

            Effect::EmitUi => {
                // Handled in the main loop, not here
                unreachable!("EmitUi should be handled in run_state_loop");
            }
        }
    }
}

/// Stub effect runner for driving the state machine in tests without a
/// microphone or a backend.
#[cfg(test)]
pub struct StubEffectRunner;

#[cfg(test)]
impl StubEffectRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[cfg(test)]
impl EffectRunner for StubEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        use crate::backend::FieldValue;

        match effect {
            Effect::StartAudio { id } => {
                tokio::spawn(async move {
                    let wav_path = std::path::PathBuf::from(format!("/tmp/myora_{}.wav", id));
                    let _ = tx.send(Event::AudioStartOk { id, wav_path }).await;
                });
            }
            Effect::StopAudio { id } => {
                tokio::spawn(async move {
                    let wav_path = std::path::PathBuf::from(format!("/tmp/myora_{}.wav", id));
                    let _ = tx.send(Event::AudioStopOk { id, wav_path }).await;
                });
            }
            Effect::StartTranscription { id, .. } => {
                tokio::spawn(async move {
                    let _ = tx
                        .send(Event::TranscribeOk {
                            id,
                            transcript: "patient reports mild fever and headache".into(),
                            confidence: 0.95,
                        })
                        .await;
                });
            }
            Effect::StartStructuring { id, .. } => {
                tokio::spawn(async move {
                    let mut fields = crate::backend::StructuredFields::new();
                    fields.insert("diagnosis".into(), FieldValue::Text("viral illness".into()));
                    let _ = tx.send(Event::StructureOk { id, fields }).await;
                });
            }
            Effect::StartSave { id, .. } => {
                tokio::spawn(async move {
                    let _ = tx
                        .send(Event::SaveOk {
                            id,
                            record_id: "stub-record".into(),
                        })
                        .await;
                });
            }
            Effect::StartDismissTimeout { id, duration } => {
                tokio::spawn(async move {
                    tokio::time::sleep(duration).await;
                    let _ = tx.send(Event::DismissTimeout { id }).await;
                });
            }
            Effect::StartRecordingTick { .. } => {}
            Effect::Cleanup { .. } => {}
            Effect::EmitUi => {
                unreachable!("EmitUi should be handled in run_state_loop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::{reduce, Limits, State};
    use std::time::Duration;

    fn limits() -> Limits {
        Limits {
            max_recording_secs: 120,
            min_transcript_chars: 10,
            dismiss_after: Duration::from_millis(10),
        }
    }

    /// Drive the reducer with the stub runner through a full capture
    /// session: start, stop, transcribe, structure, save, dismiss.
    #[tokio::test]
    async fn stub_runner_completes_a_full_session() {
        let runner = StubEffectRunner::new();
        let (tx, mut rx) = mpsc::channel::<Event>(32);
        let limits = limits();

        let mut state = State::Idle;
        let (next, effects) = reduce(
            &state,
            Event::StartRequested {
                patient_id: "Jane Doe".into(),
            },
            &limits,
        );
        state = next;
        for e in effects {
            if !matches!(e, Effect::EmitUi) {
                runner.spawn(e, tx.clone());
            }
        }

        let mut saved = false;
        let mut stop_sent = false;
        for _ in 0..20 {
            let Ok(Some(event)) =
                tokio::time::timeout(Duration::from_secs(1), rx.recv()).await
            else {
                break;
            };
            let (next, effects) = reduce(&state, event, &limits);
            state = next;

            // Stop as soon as recording confirms
            if matches!(state, State::Recording { .. }) && !stop_sent {
                stop_sent = true;
                let (next, extra) = reduce(&state, Event::StopRequested, &limits);
                state = next;
                for e in extra {
                    if !matches!(e, Effect::EmitUi) {
                        runner.spawn(e, tx.clone());
                    }
                }
            }
            // Approve the structured note as soon as review opens
            if matches!(state, State::Review { .. }) {
                let (next, extra) = reduce(&state, Event::SaveRequested, &limits);
                state = next;
                for e in extra {
                    if !matches!(e, Effect::EmitUi) {
                        runner.spawn(e, tx.clone());
                    }
                }
                continue;
            }
            if matches!(state, State::Saved { .. }) {
                saved = true;
            }
            if saved && matches!(state, State::Idle) {
                break;
            }
            for e in effects {
                if !matches!(e, Effect::EmitUi) {
                    runner.spawn(e, tx.clone());
                }
            }
        }

        assert!(saved, "session never reached Saved, ended in {:?}", state);
        assert!(matches!(state, State::Idle));
    }
}
