//! Live microphone level feedback
//!
//! Collects raw samples from the recording callback and emits a smoothed
//! 0-100 level to the frontend at ~30fps, fully decoupled from frame
//! emission. The loop checks its stop signal every iteration so it never
//! computes against a torn-down stream.

use std::collections::VecDeque;
use std::time::Duration;
use tauri::{AppHandle, Emitter, Runtime};
use tokio::sync::mpsc;
use tokio::time::interval;

/// Buffer capacity (~200ms at 48kHz mono)
const BUFFER_CAPACITY: usize = 10_000;

/// EMA smoothing factor (0.4 = 40% new value, 60% previous)
const EMA_ALPHA: f32 = 0.4;

/// Frame interval for 30fps emission
const FRAME_INTERVAL_MS: u64 = 33;

/// Headroom multiplier so normal speech reads well below clipping.
const LEVEL_GAIN: f32 = 3.0;

/// Sender type for level-meter sample batches
pub type LevelSender = mpsc::Sender<Vec<i16>>;

/// Receiver type for level-meter sample batches
pub type LevelReceiver = mpsc::Receiver<Vec<i16>>;

/// Level payload sent to the frontend via Tauri event
#[derive(Clone, serde::Serialize)]
pub struct LevelData {
    /// Instantaneous level, 0-100
    pub level: f32,
}

/// Ring buffer over the most recent samples, used for RMS computation.
pub struct LevelBuffer {
    samples: VecDeque<i16>,
    capacity: usize,
}

impl LevelBuffer {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(BUFFER_CAPACITY),
            capacity: BUFFER_CAPACITY,
        }
    }

    /// Add samples, evicting the oldest when at capacity.
    pub fn push_samples(&mut self, samples: &[i16]) {
        let len = samples.len();

        if len >= self.capacity {
            self.samples.clear();
            self.samples.extend(&samples[len - self.capacity..]);
            return;
        }

        let to_remove = (self.samples.len() + len).saturating_sub(self.capacity);
        if to_remove > 0 {
            self.samples.drain(0..to_remove);
        }

        self.samples.extend(samples);
    }

    /// RMS of the buffered window scaled to 0-100 with display gain.
    pub fn compute_level(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }

        let sum_squares: f64 = self
            .samples
            .iter()
            .map(|&s| {
                let normalized = s as f64 / i16::MAX as f64;
                normalized * normalized
            })
            .sum();

        let rms = (sum_squares / self.samples.len() as f64).sqrt() as f32;
        (rms * LEVEL_GAIN * 100.0).clamp(0.0, 100.0)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.samples.len()
    }
}

impl Default for LevelBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Create the channel carrying sample batches from the recorder callback.
pub fn create_level_channel() -> (LevelSender, LevelReceiver) {
    mpsc::channel(100)
}

/// Run the level emitter until the stop signal fires.
///
/// Drains whatever samples arrived since the last tick, computes the RMS
/// level, smooths it, and emits a `level-update` event. Stopping the
/// recording drops the sender and fires `stop_rx`, so the loop can never
/// outlive the stream it observes.
pub async fn run_level_meter<R: Runtime>(
    app: AppHandle<R>,
    mut rx: LevelReceiver,
    mut stop_rx: tokio::sync::oneshot::Receiver<()>,
) {
    let mut buffer = LevelBuffer::new();
    let mut smoothed = 0.0f32;
    let mut tick = interval(Duration::from_millis(FRAME_INTERVAL_MS));

    log::debug!("Level meter started");

    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                log::debug!("Level meter received stop signal");
                break;
            }
            _ = tick.tick() => {
                while let Ok(samples) = rx.try_recv() {
                    buffer.push_samples(&samples);
                }

                let level = buffer.compute_level();
                smoothed = EMA_ALPHA * level + (1.0 - EMA_ALPHA) * smoothed;

                if let Err(e) = app.emit("level-update", LevelData { level: smoothed }) {
                    log::warn!("Failed to emit level update: {}", e);
                }
            }
        }
    }

    buffer.clear();
    log::debug!("Level meter stopped");
}
