//! Audio capture pipeline for Myora
//!
//! Microphone input fans out to three consumers: the frame encoder (fixed
//! one-second PCM frames over a one-way channel), the WAV writer for the
//! transcription upload, and the live level meter.

pub mod frames;
pub mod level;
mod paths;
pub mod recorder;

pub use frames::{create_frame_channel, FrameReceiver, FrameSender};
pub use level::{create_level_channel, run_level_meter, LevelReceiver, LevelSender};
pub use paths::{cleanup_old_recordings, create_temp_audio_dir, generate_wav_path};
pub use recorder::{AudioError, AudioRecorder, RecordingHandle, StoppedRecording};
