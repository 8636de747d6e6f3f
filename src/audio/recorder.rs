//! Microphone capture using CPAL, WAV assembly using hound
//!
//! The capture callback downmixes the device stream to mono and feeds three
//! independent consumers: the frame encoder (fixed one-second PCM frames),
//! the WAV writer (the assembled recording uploaded for transcription), and
//! the level-meter channel. The frame encoder lives inside the callback
//! closure, so frame emission happens on the audio thread and reaches the
//! rest of the app only through its channel.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use hound::{WavSpec, WavWriter};
use uuid::Uuid;

use super::frames::{encode_sample, FrameEncoder, FrameSender};
use super::level::LevelSender;
use super::paths::generate_wav_path;

type SharedWavWriter = Arc<Mutex<Option<WavWriter<std::io::BufWriter<std::fs::File>>>>>;

/// Errors that can occur during audio capture.
#[derive(Debug, Clone)]
pub enum AudioError {
    NoInputDevice,
    NoSupportedConfig,
    StreamCreationFailed(String),
    FileCreationFailed(String),
    WriteFailed(String),
}

impl std::fmt::Display for AudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioError::NoInputDevice => write!(f, "No microphone found"),
            AudioError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            AudioError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
            AudioError::FileCreationFailed(e) => write!(f, "Failed to create WAV file: {}", e),
            AudioError::WriteFailed(e) => write!(f, "Failed to write audio data: {}", e),
        }
    }
}

impl std::error::Error for AudioError {}

/// A finished recording, ready for the transcription boundary.
#[derive(Debug, Clone)]
pub struct StoppedRecording {
    pub wav_path: PathBuf,
    pub sample_count: u64,
    pub duration_ms: u64,
}

/// Handle to an active recording.
pub struct RecordingHandle {
    _stream: Stream,
    writer: SharedWavWriter,
    is_recording: Arc<AtomicBool>,
    samples_written: Arc<AtomicU64>,
    sample_rate: u32,
    wav_path: PathBuf,
}

impl RecordingHandle {
    /// Stop capture and finalize the WAV file. Safe to call even if the
    /// stream never delivered a sample; the caller decides what an empty
    /// capture means.
    pub fn stop(self) -> Result<StoppedRecording, AudioError> {
        self.is_recording.store(false, Ordering::SeqCst);

        let mut writer_guard = self.writer.lock().unwrap();
        if let Some(writer) = writer_guard.take() {
            writer
                .finalize()
                .map_err(|e| AudioError::WriteFailed(e.to_string()))?;
        }

        let sample_count = self.samples_written.load(Ordering::SeqCst);
        let duration_ms = sample_count * 1000 / self.sample_rate.max(1) as u64;

        log::info!(
            "Recording stopped: {:?} ({} samples, {}ms)",
            self.wav_path,
            sample_count,
            duration_ms
        );

        Ok(StoppedRecording {
            wav_path: self.wav_path,
            sample_count,
            duration_ms,
        })
    }
}

/// Microphone recorder bound to the default input device.
pub struct AudioRecorder {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
}

impl AudioRecorder {
    pub fn new() -> Result<Self, AudioError> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or(AudioError::NoInputDevice)?;

        log::info!("Using audio input device: {:?}", device.name());

        let supported_config = device
            .default_input_config()
            .map_err(|_| AudioError::NoSupportedConfig)?;

        log::info!(
            "Audio config: {} Hz, {} channels, {:?}",
            supported_config.sample_rate().0,
            supported_config.channels(),
            supported_config.sample_format()
        );

        let sample_format = supported_config.sample_format();
        let config: StreamConfig = supported_config.into();

        Ok(Self {
            device,
            config,
            sample_format,
        })
    }

    /// Negotiated capture rate in Hz. One emitted frame is exactly one
    /// second at this rate.
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Start capturing. Frames go out on `frame_tx`, instantaneous level
    /// samples on `level_tx`; the WAV lands under the temp audio dir.
    pub fn start(
        &self,
        recording_id: Uuid,
        frame_tx: FrameSender,
        level_tx: LevelSender,
    ) -> Result<(RecordingHandle, PathBuf), AudioError> {
        let wav_path = generate_wav_path(recording_id)
            .map_err(|e| AudioError::FileCreationFailed(e.to_string()))?;

        let spec = WavSpec {
            channels: 1,
            sample_rate: self.config.sample_rate.0,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = WavWriter::create(&wav_path, spec)
            .map_err(|e| AudioError::FileCreationFailed(e.to_string()))?;

        let writer = Arc::new(Mutex::new(Some(writer)));
        let is_recording = Arc::new(AtomicBool::new(true));
        let samples_written = Arc::new(AtomicU64::new(0));

        let stream = self.build_stream(
            writer.clone(),
            is_recording.clone(),
            samples_written.clone(),
            frame_tx,
            level_tx,
        )?;

        stream.play().map_err(|e| {
            AudioError::StreamCreationFailed(format!("Failed to start stream: {}", e))
        })?;

        log::info!("Recording started: {:?}", wav_path);

        let handle = RecordingHandle {
            _stream: stream,
            writer,
            is_recording,
            samples_written,
            sample_rate: self.config.sample_rate.0,
            wav_path: wav_path.clone(),
        };

        Ok((handle, wav_path))
    }

    fn build_stream(
        &self,
        writer: SharedWavWriter,
        is_recording: Arc<AtomicBool>,
        samples_written: Arc<AtomicU64>,
        frame_tx: FrameSender,
        level_tx: LevelSender,
    ) -> Result<Stream, AudioError> {
        let err_fn = |err| log::error!("Audio stream error: {}", err);

        match self.sample_format {
            SampleFormat::I16 => self.build_stream_typed::<i16>(
                writer,
                is_recording,
                samples_written,
                frame_tx,
                level_tx,
                err_fn,
            ),
            SampleFormat::U16 => self.build_stream_typed::<u16>(
                writer,
                is_recording,
                samples_written,
                frame_tx,
                level_tx,
                err_fn,
            ),
            SampleFormat::F32 => self.build_stream_typed::<f32>(
                writer,
                is_recording,
                samples_written,
                frame_tx,
                level_tx,
                err_fn,
            ),
            _ => Err(AudioError::NoSupportedConfig),
        }
    }

    fn build_stream_typed<T>(
        &self,
        writer: SharedWavWriter,
        is_recording: Arc<AtomicBool>,
        samples_written: Arc<AtomicU64>,
        frame_tx: FrameSender,
        level_tx: LevelSender,
        err_fn: impl FnMut(cpal::StreamError) + Send + 'static,
    ) -> Result<Stream, AudioError>
    where
        T: cpal::SizedSample + cpal::Sample<Float = f32> + Send + 'static,
    {
        let config = self.config.clone();
        let channels = config.channels.max(1) as usize;

        // The encoder is owned by the callback closure: its sample buffer
        // never leaves the audio thread, only finished frames do.
        let mut encoder = FrameEncoder::new(config.sample_rate.0 as usize, frame_tx);
        let mut mono = Vec::<f32>::new();
        let mut pcm = Vec::<i16>::new();

        let stream = self
            .device
            .build_input_stream(
                &config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    if !is_recording.load(Ordering::SeqCst) {
                        return;
                    }

                    // Downmix: first channel of each interleaved frame.
                    mono.clear();
                    pcm.clear();
                    for frame in data.chunks(channels) {
                        let sample = frame[0].to_float_sample();
                        mono.push(sample);
                        pcm.push(encode_sample(sample));
                    }

                    encoder.push_quantum(&mono);

                    // Fire-and-forget; the meter drops stale batches itself.
                    let _ = level_tx.try_send(pcm.clone());

                    let mut guard = writer.lock().unwrap();
                    if let Some(ref mut w) = *guard {
                        for &sample in &pcm {
                            if w.write_sample(sample).is_err() {
                                log::error!("Failed to write sample");
                                return;
                            }
                        }
                        samples_written.fetch_add(pcm.len() as u64, Ordering::SeqCst);
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_error_messages_are_user_facing() {
        assert_eq!(AudioError::NoInputDevice.to_string(), "No microphone found");
        assert!(AudioError::StreamCreationFailed("busy".into())
            .to_string()
            .contains("busy"));
    }

    #[test]
    fn stopped_recording_duration_math() {
        let rec = StoppedRecording {
            wav_path: PathBuf::from("/tmp/x.wav"),
            sample_count: 48_000,
            duration_ms: 48_000 * 1000 / 48_000,
        };
        assert_eq!(rec.duration_ms, 1000);
    }
}
