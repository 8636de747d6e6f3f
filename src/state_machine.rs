//! Recording lifecycle state machine
//!
//! Single-writer pattern: all transitions go through `reduce()`, which
//! returns the next state plus a list of effects to execute. The effect
//! runner reports completions back as events, each tagged with the
//! recording id so stale completions from an abandoned session are dropped.

use std::path::PathBuf;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::backend::StructuredFields;
use crate::settings::AppSettings;

/// Reducer thresholds, derived from settings at loop start.
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_recording_secs: u64,
    pub min_transcript_chars: usize,
    pub dismiss_after: Duration,
}

impl From<&AppSettings> for Limits {
    fn from(settings: &AppSettings) -> Self {
        Self {
            max_recording_secs: settings.max_recording_secs,
            min_transcript_chars: settings.min_transcript_chars,
            dismiss_after: Duration::from_secs(settings.saved_dismiss_secs),
        }
    }
}

/// Authoritative state of the capture workflow.
#[derive(Debug, Clone)]
pub enum State {
    Idle,
    Arming {
        recording_id: Uuid,
        patient_id: String,
    },
    Recording {
        recording_id: Uuid,
        patient_id: String,
        wav_path: PathBuf,
        started_at: Instant,
    },
    Stopping {
        recording_id: Uuid,
        patient_id: String,
    },
    Transcribing {
        recording_id: Uuid,
        patient_id: String,
        wav_path: PathBuf,
    },
    Structuring {
        recording_id: Uuid,
        patient_id: String,
        wav_path: PathBuf,
        transcript: String,
        confidence: f64,
    },
    /// Structured fields ready for the user to review and edit.
    Review {
        recording_id: Uuid,
        patient_id: String,
        wav_path: PathBuf,
        transcript: String,
        confidence: f64,
        fields: StructuredFields,
        /// Set when the last manual edit or save attempt failed.
        status: Option<String>,
    },
    Saving {
        recording_id: Uuid,
        patient_id: String,
        wav_path: PathBuf,
        transcript: String,
        confidence: f64,
        fields: StructuredFields,
    },
    Saved {
        recording_id: Uuid,
        record_id: String,
    },
    /// Nothing worth processing: empty capture or a too-short transcript.
    NoSpeech {
        recording_id: Uuid,
        message: String,
    },
    Error {
        message: String,
    },
}

impl Default for State {
    fn default() -> Self {
        State::Idle
    }
}

/// Events driving state transitions. Sources: UI commands, the audio
/// effect runner, and the backend effect runner.
#[derive(Debug, Clone)]
pub enum Event {
    /// User started a dictation for a patient
    StartRequested { patient_id: String },
    /// User stopped the dictation
    StopRequested,
    /// User abandoned the current session
    Cancel,
    /// Application exit requested
    Exit,
    /// One-second timer while recording (id prevents stale ticks)
    RecordingTick { id: Uuid },
    /// Saved/NoSpeech auto-dismiss timeout
    DismissTimeout { id: Uuid },

    // Audio events
    AudioStartOk { id: Uuid, wav_path: PathBuf },
    AudioStartFail { id: Uuid, err: String },
    AudioStopOk { id: Uuid, wav_path: PathBuf },
    AudioStopFail { id: Uuid, err: String },
    /// Stop completed but no samples were ever captured
    EmptyCapture { id: Uuid },

    // Backend pipeline events
    TranscribeOk {
        id: Uuid,
        transcript: String,
        confidence: f64,
    },
    TranscribeFail { id: Uuid, err: String },
    StructureOk { id: Uuid, fields: StructuredFields },
    StructureFail { id: Uuid, err: String },
    SaveOk { id: Uuid, record_id: String },
    SaveFail { id: Uuid, err: String },

    // Review events
    FieldEdited { field: String, value: String },
    SaveRequested,
}

/// Effects produced by transitions, executed asynchronously by the runner.
#[derive(Debug, Clone)]
pub enum Effect {
    StartAudio { id: Uuid },
    StopAudio { id: Uuid },
    StartTranscription {
        id: Uuid,
        patient_id: String,
        wav_path: PathBuf,
    },
    StartStructuring {
        id: Uuid,
        patient_id: String,
        transcript: String,
    },
    StartSave {
        id: Uuid,
        patient_id: String,
        transcript: String,
        confidence: f64,
        fields: StructuredFields,
    },
    /// Send RecordingTick events every second while recording
    StartRecordingTick { id: Uuid },
    StartDismissTimeout { id: Uuid, duration: Duration },
    Cleanup {
        id: Uuid,
        wav_path: Option<PathBuf>,
    },
    /// Signal to emit UI state to the frontend
    EmitUi,
}

fn start_session(patient_id: String) -> (State, Vec<Effect>) {
    let id = Uuid::new_v4();
    (
        State::Arming {
            recording_id: id,
            patient_id,
        },
        vec![Effect::StartAudio { id }, Effect::EmitUi],
    )
}

/// Reducer function: (state, event) -> (next_state, effects)
///
/// Key rules:
/// - Never mutate state in place
/// - Drop events carrying a stale recording id
/// - Always emit EmitUi after a visible change
pub fn reduce(state: &State, event: Event, limits: &Limits) -> (State, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use State::*;

    let current_id: Option<Uuid> = match state {
        Idle | Error { .. } => None,
        Arming { recording_id, .. }
        | Recording { recording_id, .. }
        | Stopping { recording_id, .. }
        | Transcribing { recording_id, .. }
        | Structuring { recording_id, .. }
        | Review { recording_id, .. }
        | Saving { recording_id, .. }
        | Saved { recording_id, .. }
        | NoSpeech { recording_id, .. } => Some(*recording_id),
    };

    let is_stale = |eid: Uuid| current_id.is_some() && Some(eid) != current_id;

    match (state, event) {
        // -----------------
        // Session start (Idle and every terminal state)
        // -----------------
        (Idle, StartRequested { patient_id }) => start_session(patient_id),
        (Saved { .. }, StartRequested { patient_id }) => start_session(patient_id),
        (NoSpeech { .. }, StartRequested { patient_id }) => start_session(patient_id),
        (Error { .. }, StartRequested { patient_id }) => start_session(patient_id),
        (Idle, Cancel) => (Idle, vec![]),
        (Idle, Exit) => (Idle, vec![]),

        // -----------------
        // Arming
        // -----------------
        (
            Arming {
                recording_id,
                patient_id,
            },
            AudioStartOk { id, wav_path },
        ) if *recording_id == id => (
            Recording {
                recording_id: *recording_id,
                patient_id: patient_id.clone(),
                wav_path,
                started_at: Instant::now(),
            },
            vec![StartRecordingTick { id }, EmitUi],
        ),
        (Arming { recording_id, .. }, AudioStartFail { id, err }) if *recording_id == id => (
            Error { message: err },
            vec![
                Cleanup {
                    id: *recording_id,
                    wav_path: None,
                },
                EmitUi,
            ],
        ),
        (Arming { recording_id, .. }, Cancel) => (
            Idle,
            vec![
                // Stop audio in case it started between cancel and AudioStartOk
                StopAudio { id: *recording_id },
                Cleanup {
                    id: *recording_id,
                    wav_path: None,
                },
                EmitUi,
            ],
        ),

        // -----------------
        // Recording
        // -----------------
        (
            Recording {
                recording_id,
                patient_id,
                ..
            },
            StopRequested,
        ) => (
            Stopping {
                recording_id: *recording_id,
                patient_id: patient_id.clone(),
            },
            vec![StopAudio { id: *recording_id }, EmitUi],
        ),
        // Cancel during recording aborts without transcription
        (
            Recording {
                recording_id,
                wav_path,
                ..
            },
            Cancel,
        ) => (
            Idle,
            vec![
                StopAudio { id: *recording_id },
                Cleanup {
                    id: *recording_id,
                    wav_path: Some(wav_path.clone()),
                },
                EmitUi,
            ],
        ),
        // Tick during recording: refresh elapsed time, auto-stop at cap
        (
            Recording {
                recording_id,
                patient_id,
                started_at,
                ..
            },
            RecordingTick { id },
        ) if *recording_id == id => {
            let elapsed = started_at.elapsed();
            if elapsed >= Duration::from_secs(limits.max_recording_secs) {
                log::warn!(
                    "Recording {} auto-stopped after {:?} (max duration reached)",
                    recording_id,
                    elapsed
                );
                (
                    Stopping {
                        recording_id: *recording_id,
                        patient_id: patient_id.clone(),
                    },
                    vec![StopAudio { id: *recording_id }, EmitUi],
                )
            } else {
                (state.clone(), vec![EmitUi])
            }
        }

        // -----------------
        // Stopping
        // -----------------
        (
            Stopping {
                recording_id,
                patient_id,
            },
            AudioStopOk { id, wav_path },
        ) if *recording_id == id => (
            Transcribing {
                recording_id: *recording_id,
                patient_id: patient_id.clone(),
                wav_path: wav_path.clone(),
            },
            vec![
                StartTranscription {
                    id: *recording_id,
                    patient_id: patient_id.clone(),
                    wav_path,
                },
                EmitUi,
            ],
        ),
        (Stopping { recording_id, .. }, EmptyCapture { id }) if *recording_id == id => (
            NoSpeech {
                recording_id: *recording_id,
                message: "No audio recorded".to_string(),
            },
            vec![
                StartDismissTimeout {
                    id: *recording_id,
                    duration: limits.dismiss_after,
                },
                EmitUi,
            ],
        ),
        (Stopping { recording_id, .. }, AudioStopFail { id, err }) if *recording_id == id => (
            Error { message: err },
            vec![
                Cleanup {
                    id: *recording_id,
                    wav_path: None,
                },
                EmitUi,
            ],
        ),

        // -----------------
        // Transcribing
        // -----------------
        (
            Transcribing {
                recording_id,
                patient_id,
                wav_path,
            },
            TranscribeOk {
                id,
                transcript,
                confidence,
            },
        ) if *recording_id == id => {
            let trimmed = transcript.trim();
            if trimmed.chars().count() < limits.min_transcript_chars {
                (
                    NoSpeech {
                        recording_id: *recording_id,
                        message: "Transcript too short to process".to_string(),
                    },
                    vec![
                        StartDismissTimeout {
                            id: *recording_id,
                            duration: limits.dismiss_after,
                        },
                        Cleanup {
                            id: *recording_id,
                            wav_path: Some(wav_path.clone()),
                        },
                        EmitUi,
                    ],
                )
            } else {
                (
                    Structuring {
                        recording_id: *recording_id,
                        patient_id: patient_id.clone(),
                        wav_path: wav_path.clone(),
                        transcript: trimmed.to_string(),
                        confidence,
                    },
                    vec![
                        StartStructuring {
                            id: *recording_id,
                            patient_id: patient_id.clone(),
                            transcript: trimmed.to_string(),
                        },
                        EmitUi,
                    ],
                )
            }
        }
        (
            Transcribing {
                recording_id,
                wav_path,
                ..
            },
            TranscribeFail { id, err },
        ) if *recording_id == id => (
            Error { message: err },
            vec![
                Cleanup {
                    id: *recording_id,
                    wav_path: Some(wav_path.clone()),
                },
                EmitUi,
            ],
        ),
        (
            Transcribing {
                recording_id,
                wav_path,
                ..
            },
            Cancel,
        ) => (
            Idle,
            vec![
                Cleanup {
                    id: *recording_id,
                    wav_path: Some(wav_path.clone()),
                },
                EmitUi,
            ],
        ),

        // -----------------
        // Structuring
        // -----------------
        (
            Structuring {
                recording_id,
                patient_id,
                wav_path,
                transcript,
                confidence,
            },
            StructureOk { id, fields },
        ) if *recording_id == id => (
            Review {
                recording_id: *recording_id,
                patient_id: patient_id.clone(),
                wav_path: wav_path.clone(),
                transcript: transcript.clone(),
                confidence: *confidence,
                fields,
                status: None,
            },
            vec![EmitUi],
        ),
        (
            Structuring {
                recording_id,
                wav_path,
                ..
            },
            StructureFail { id, err },
        ) if *recording_id == id => (
            Error { message: err },
            vec![
                Cleanup {
                    id: *recording_id,
                    wav_path: Some(wav_path.clone()),
                },
                EmitUi,
            ],
        ),
        (
            Structuring {
                recording_id,
                wav_path,
                ..
            },
            Cancel,
        ) => (
            Idle,
            vec![
                Cleanup {
                    id: *recording_id,
                    wav_path: Some(wav_path.clone()),
                },
                EmitUi,
            ],
        ),

        // -----------------
        // Review
        // -----------------
        (
            Review {
                recording_id,
                patient_id,
                wav_path,
                transcript,
                confidence,
                fields,
                ..
            },
            FieldEdited { field, value },
        ) => {
            let mut next_fields = fields.clone();
            let status = match fields.get(&field) {
                Some(current) => match current.from_edited_text(&field, &value) {
                    Ok(parsed) => {
                        next_fields.insert(field, parsed);
                        None
                    }
                    Err(e) => Some(e.to_string()),
                },
                None => Some(format!("Unknown field '{}'", field)),
            };
            (
                Review {
                    recording_id: *recording_id,
                    patient_id: patient_id.clone(),
                    wav_path: wav_path.clone(),
                    transcript: transcript.clone(),
                    confidence: *confidence,
                    fields: next_fields,
                    status,
                },
                vec![EmitUi],
            )
        }
        (
            Review {
                recording_id,
                patient_id,
                wav_path,
                transcript,
                confidence,
                fields,
                ..
            },
            SaveRequested,
        ) => (
            Saving {
                recording_id: *recording_id,
                patient_id: patient_id.clone(),
                wav_path: wav_path.clone(),
                transcript: transcript.clone(),
                confidence: *confidence,
                fields: fields.clone(),
            },
            vec![
                StartSave {
                    id: *recording_id,
                    patient_id: patient_id.clone(),
                    transcript: transcript.clone(),
                    confidence: *confidence,
                    fields: fields.clone(),
                },
                EmitUi,
            ],
        ),
        // Abandoning the session discards the unsaved note
        (
            Review {
                recording_id,
                wav_path,
                ..
            },
            Cancel,
        ) => (
            Idle,
            vec![
                Cleanup {
                    id: *recording_id,
                    wav_path: Some(wav_path.clone()),
                },
                EmitUi,
            ],
        ),

        // -----------------
        // Saving
        // -----------------
        (
            Saving {
                recording_id,
                wav_path,
                ..
            },
            SaveOk { id, record_id },
        ) if *recording_id == id => (
            Saved {
                recording_id: *recording_id,
                record_id,
            },
            vec![
                StartDismissTimeout {
                    id: *recording_id,
                    duration: limits.dismiss_after,
                },
                Cleanup {
                    id: *recording_id,
                    wav_path: Some(wav_path.clone()),
                },
                EmitUi,
            ],
        ),
        // Save failure keeps the reviewed note so the user can retry
        (
            Saving {
                recording_id,
                patient_id,
                wav_path,
                transcript,
                confidence,
                fields,
            },
            SaveFail { id, err },
        ) if *recording_id == id => (
            Review {
                recording_id: *recording_id,
                patient_id: patient_id.clone(),
                wav_path: wav_path.clone(),
                transcript: transcript.clone(),
                confidence: *confidence,
                fields: fields.clone(),
                status: Some(err),
            },
            vec![EmitUi],
        ),

        // -----------------
        // Saved / NoSpeech auto-dismiss
        // -----------------
        (Saved { recording_id, .. }, DismissTimeout { id }) if *recording_id == id => (
            Idle,
            vec![
                Cleanup {
                    id: *recording_id,
                    wav_path: None,
                },
                EmitUi,
            ],
        ),
        (NoSpeech { recording_id, .. }, DismissTimeout { id }) if *recording_id == id => (
            Idle,
            vec![
                Cleanup {
                    id: *recording_id,
                    wav_path: None,
                },
                EmitUi,
            ],
        ),

        // -----------------
        // Error
        // -----------------
        (Error { .. }, Cancel) => (Idle, vec![EmitUi]),

        // -----------------
        // Stale events (drop silently)
        // -----------------
        // Exception: a start completing after its session was cancelled has
        // a live stream and an open microphone behind it; it must be torn
        // down, not ignored.
        (_, AudioStartOk { id, .. }) if is_stale(id) || current_id.is_none() => {
            log::warn!("Audio started for abandoned session {}, stopping it", id);
            (state.clone(), vec![StopAudio { id }])
        }
        (_, AudioStartFail { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, AudioStopOk { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, AudioStopFail { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, EmptyCapture { id }) if is_stale(id) => (state.clone(), vec![]),
        (_, TranscribeOk { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, TranscribeFail { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, StructureOk { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, StructureFail { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, SaveOk { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, SaveFail { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, DismissTimeout { id }) if is_stale(id) => (state.clone(), vec![]),
        (_, RecordingTick { id }) if is_stale(id) => (state.clone(), vec![]),

        // -----------------
        // Unhandled: no transition
        // -----------------
        _ => (state.clone(), vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FieldValue;

    fn limits() -> Limits {
        Limits {
            max_recording_secs: 120,
            min_transcript_chars: 10,
            dismiss_after: Duration::from_secs(3),
        }
    }

    fn start(patient: &str) -> Event {
        Event::StartRequested {
            patient_id: patient.to_string(),
        }
    }

    fn fields() -> StructuredFields {
        let mut f = StructuredFields::new();
        f.insert("diagnosis".into(), FieldValue::Text("flu".into()));
        f.insert(
            "medications".into(),
            FieldValue::List(vec!["oseltamivir".into()]),
        );
        f
    }

    fn review_state(id: Uuid) -> State {
        State::Review {
            recording_id: id,
            patient_id: "Jane Doe".into(),
            wav_path: PathBuf::from("/tmp/test.wav"),
            transcript: "patient reports fever and aches".into(),
            confidence: 0.93,
            fields: fields(),
            status: None,
        }
    }

    #[test]
    fn idle_start_transitions_to_arming() {
        let (next, effects) = reduce(&State::Idle, start("Jane Doe"), &limits());
        assert!(matches!(next, State::Arming { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StartAudio { .. })));
        assert!(effects.iter().any(|e| matches!(e, Effect::EmitUi)));
    }

    #[test]
    fn arming_audio_ok_transitions_to_recording() {
        let id = Uuid::new_v4();
        let state = State::Arming {
            recording_id: id,
            patient_id: "Jane Doe".into(),
        };
        let (next, effects) = reduce(
            &state,
            Event::AudioStartOk {
                id,
                wav_path: PathBuf::from("/tmp/test.wav"),
            },
            &limits(),
        );
        assert!(matches!(next, State::Recording { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StartRecordingTick { .. })));
    }

    #[test]
    fn stale_event_is_ignored() {
        let id = Uuid::new_v4();
        let stale_id = Uuid::new_v4();
        let state = State::Transcribing {
            recording_id: id,
            patient_id: "Jane Doe".into(),
            wav_path: PathBuf::from("/tmp/test.wav"),
        };
        let (next, effects) = reduce(
            &state,
            Event::TranscribeOk {
                id: stale_id,
                transcript: "left over from an abandoned session".into(),
                confidence: 0.9,
            },
            &limits(),
        );
        assert!(matches!(next, State::Transcribing { .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn late_audio_start_after_cancel_is_stopped() {
        // Cancel lands while the device is still being opened; when the
        // start finally completes the stream must be shut down, not leaked
        let id = Uuid::new_v4();
        let arming = State::Arming {
            recording_id: id,
            patient_id: "Jane Doe".into(),
        };
        let (idle, _) = reduce(&arming, Event::Cancel, &limits());
        assert!(matches!(idle, State::Idle));

        let (next, effects) = reduce(
            &idle,
            Event::AudioStartOk {
                id,
                wav_path: PathBuf::from("/tmp/test.wav"),
            },
            &limits(),
        );
        assert!(matches!(next, State::Idle));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StopAudio { id: eid } if *eid == id)));
    }

    #[test]
    fn stale_audio_start_during_new_session_is_stopped() {
        let old_id = Uuid::new_v4();
        let new_id = Uuid::new_v4();
        let state = State::Arming {
            recording_id: new_id,
            patient_id: "Jane Doe".into(),
        };
        let (next, effects) = reduce(
            &state,
            Event::AudioStartOk {
                id: old_id,
                wav_path: PathBuf::from("/tmp/old.wav"),
            },
            &limits(),
        );
        // The new session is untouched; only the orphaned stream stops
        assert!(
            matches!(next, State::Arming { recording_id, .. } if recording_id == new_id)
        );
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StopAudio { id } if *id == old_id)));
    }

    #[test]
    fn stop_then_audio_ok_starts_transcription() {
        let id = Uuid::new_v4();
        let state = State::Stopping {
            recording_id: id,
            patient_id: "Jane Doe".into(),
        };
        let (next, effects) = reduce(
            &state,
            Event::AudioStopOk {
                id,
                wav_path: PathBuf::from("/tmp/test.wav"),
            },
            &limits(),
        );
        assert!(matches!(next, State::Transcribing { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StartTranscription { .. })));
    }

    #[test]
    fn empty_capture_goes_to_no_speech() {
        let id = Uuid::new_v4();
        let state = State::Stopping {
            recording_id: id,
            patient_id: "Jane Doe".into(),
        };
        let (next, effects) = reduce(&state, Event::EmptyCapture { id }, &limits());
        assert!(matches!(next, State::NoSpeech { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StartDismissTimeout { .. })));
    }

    #[test]
    fn good_transcript_moves_to_structuring() {
        let id = Uuid::new_v4();
        let state = State::Transcribing {
            recording_id: id,
            patient_id: "Jane Doe".into(),
            wav_path: PathBuf::from("/tmp/test.wav"),
        };
        let (next, effects) = reduce(
            &state,
            Event::TranscribeOk {
                id,
                transcript: "  patient reports fever and aches  ".into(),
                confidence: 0.93,
            },
            &limits(),
        );
        match &next {
            State::Structuring {
                transcript,
                confidence,
                ..
            } => {
                assert_eq!(transcript, "patient reports fever and aches");
                assert_eq!(*confidence, 0.93);
            }
            other => panic!("expected Structuring, got {:?}", other),
        }
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StartStructuring { .. })));
    }

    #[test]
    fn short_transcript_is_rejected_without_structuring() {
        let id = Uuid::new_v4();
        let state = State::Transcribing {
            recording_id: id,
            patient_id: "Jane Doe".into(),
            wav_path: PathBuf::from("/tmp/test.wav"),
        };
        let (next, effects) = reduce(
            &state,
            Event::TranscribeOk {
                id,
                transcript: "um".into(),
                confidence: 0.4,
            },
            &limits(),
        );
        assert!(matches!(next, State::NoSpeech { .. }));
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::StartStructuring { .. })));
    }

    #[test]
    fn transcript_minimum_counts_characters_not_bytes() {
        let id = Uuid::new_v4();
        let state = State::Transcribing {
            recording_id: id,
            patient_id: "Jane Doe".into(),
            wav_path: PathBuf::from("/tmp/test.wav"),
        };
        // Four characters, twelve bytes: still below the ten-char minimum
        let (next, _) = reduce(
            &state,
            Event::TranscribeOk {
                id,
                transcript: "发烧两天".into(),
                confidence: 0.9,
            },
            &limits(),
        );
        assert!(matches!(next, State::NoSpeech { .. }));
    }

    #[test]
    fn structure_ok_enters_review() {
        let id = Uuid::new_v4();
        let state = State::Structuring {
            recording_id: id,
            patient_id: "Jane Doe".into(),
            wav_path: PathBuf::from("/tmp/test.wav"),
            transcript: "patient reports fever and aches".into(),
            confidence: 0.93,
        };
        let (next, _) = reduce(
            &state,
            Event::StructureOk {
                id,
                fields: fields(),
            },
            &limits(),
        );
        assert!(matches!(next, State::Review { status: None, .. }));
    }

    #[test]
    fn valid_field_edit_updates_fields() {
        let id = Uuid::new_v4();
        let (next, _) = reduce(
            &review_state(id),
            Event::FieldEdited {
                field: "medications".into(),
                value: "oseltamivir, paracetamol".into(),
            },
            &limits(),
        );
        match next {
            State::Review { fields, status, .. } => {
                assert!(status.is_none());
                assert_eq!(
                    fields["medications"],
                    FieldValue::List(vec!["oseltamivir".into(), "paracetamol".into()])
                );
            }
            other => panic!("expected Review, got {:?}", other),
        }
    }

    #[test]
    fn malformed_field_edit_sets_status_and_keeps_value() {
        let id = Uuid::new_v4();
        let mut state = review_state(id);
        if let State::Review { fields, .. } = &mut state {
            fields.insert("heart_rate".into(), FieldValue::Number(88.0));
        }
        let (next, _) = reduce(
            &state,
            Event::FieldEdited {
                field: "heart_rate".into(),
                value: "eighty-eight".into(),
            },
            &limits(),
        );
        match next {
            State::Review { fields, status, .. } => {
                assert!(status.is_some());
                assert_eq!(fields["heart_rate"], FieldValue::Number(88.0));
            }
            other => panic!("expected Review, got {:?}", other),
        }
    }

    #[test]
    fn save_request_moves_to_saving() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(&review_state(id), Event::SaveRequested, &limits());
        assert!(matches!(next, State::Saving { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StartSave { .. })));
    }

    #[test]
    fn save_ok_clears_session() {
        let id = Uuid::new_v4();
        let state = State::Saving {
            recording_id: id,
            patient_id: "Jane Doe".into(),
            wav_path: PathBuf::from("/tmp/test.wav"),
            transcript: "notes".into(),
            confidence: 0.9,
            fields: fields(),
        };
        let (next, effects) = reduce(
            &state,
            Event::SaveOk {
                id,
                record_id: "rec-42".into(),
            },
            &limits(),
        );
        assert!(matches!(next, State::Saved { .. }));
        assert!(effects.iter().any(|e| matches!(e, Effect::Cleanup { .. })));

        // And the dismiss timeout returns to Idle
        let (after, _) = reduce(&next, Event::DismissTimeout { id }, &limits());
        assert!(matches!(after, State::Idle));
    }

    #[test]
    fn save_fail_returns_to_review_with_status() {
        let id = Uuid::new_v4();
        let state = State::Saving {
            recording_id: id,
            patient_id: "Jane Doe".into(),
            wav_path: PathBuf::from("/tmp/test.wav"),
            transcript: "notes".into(),
            confidence: 0.9,
            fields: fields(),
        };
        let (next, _) = reduce(
            &state,
            Event::SaveFail {
                id,
                err: "Backend error (HTTP 500): boom".into(),
            },
            &limits(),
        );
        match next {
            State::Review { status, fields, .. } => {
                assert!(status.unwrap().contains("500"));
                assert_eq!(fields.len(), 2);
            }
            other => panic!("expected Review, got {:?}", other),
        }
    }

    #[test]
    fn cancel_during_recording_aborts_without_transcription() {
        let id = Uuid::new_v4();
        let state = State::Recording {
            recording_id: id,
            patient_id: "Jane Doe".into(),
            wav_path: PathBuf::from("/tmp/test.wav"),
            started_at: Instant::now(),
        };
        let (next, effects) = reduce(&state, Event::Cancel, &limits());
        assert!(matches!(next, State::Idle));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StopAudio { .. })));
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::StartTranscription { .. })));
    }

    #[test]
    fn cancel_during_arming_stops_audio_and_returns_to_idle() {
        let id = Uuid::new_v4();
        let state = State::Arming {
            recording_id: id,
            patient_id: "Jane Doe".into(),
        };
        let (next, effects) = reduce(&state, Event::Cancel, &limits());
        assert!(matches!(next, State::Idle));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StopAudio { .. })));
    }

    #[test]
    fn transcribe_failure_surfaces_error() {
        let id = Uuid::new_v4();
        let state = State::Transcribing {
            recording_id: id,
            patient_id: "Jane Doe".into(),
            wav_path: PathBuf::from("/tmp/test.wav"),
        };
        let (next, _) = reduce(
            &state,
            Event::TranscribeFail {
                id,
                err: "Cannot reach backend: refused".into(),
            },
            &limits(),
        );
        assert!(matches!(next, State::Error { .. }));
    }

    #[test]
    fn error_start_begins_fresh_session() {
        let state = State::Error {
            message: "boom".into(),
        };
        let (next, effects) = reduce(&state, start("Jane Doe"), &limits());
        assert!(matches!(next, State::Arming { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StartAudio { .. })));
    }

    #[test]
    fn stale_dismiss_timeout_is_ignored() {
        let id = Uuid::new_v4();
        let state = State::Saved {
            recording_id: id,
            record_id: "rec-42".into(),
        };
        let (next, effects) = reduce(
            &state,
            Event::DismissTimeout { id: Uuid::new_v4() },
            &limits(),
        );
        assert!(matches!(next, State::Saved { .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn recording_auto_stops_at_max_duration() {
        let id = Uuid::new_v4();
        let state = State::Recording {
            recording_id: id,
            patient_id: "Jane Doe".into(),
            wav_path: PathBuf::from("/tmp/test.wav"),
            started_at: Instant::now() - Duration::from_secs(121),
        };
        let (next, effects) = reduce(&state, Event::RecordingTick { id }, &limits());
        assert!(matches!(next, State::Stopping { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StopAudio { .. })));
    }
}
