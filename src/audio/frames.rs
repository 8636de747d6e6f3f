//! Real-time PCM frame encoder
//!
//! Turns the arbitrarily-sized float quanta delivered by the capture
//! callback into fixed-size 16-bit little-endian PCM frames, emitted over a
//! bounded channel with no backpressure. The encoder runs inside the cpal
//! callback, so nothing on the quantum path may block or panic.

use tokio::sync::mpsc;

/// Nominal frame length: one second of mono audio at 16 kHz.
/// The recorder overrides this with the negotiated stream rate so a frame
/// is always exactly one second of real time.
pub const DEFAULT_BLOCK_SIZE: usize = 16_000;

/// One emitted frame: exactly `block_size * 2` bytes of 16-bit signed
/// little-endian PCM, mono.
pub type Frame = Vec<u8>;

/// Sender half of the frame channel. Frames are posted fire-and-forget;
/// a slow consumer queues on the receiving side.
pub type FrameSender = mpsc::Sender<Frame>;

/// Receiver half of the frame channel.
pub type FrameReceiver = mpsc::Receiver<Frame>;

/// Channel capacity in frames. One frame is one second of audio, so this
/// only fills if the consumer wedges for over a minute.
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Create the frame channel connecting the encoder to its consumer.
pub fn create_frame_channel() -> (FrameSender, FrameReceiver) {
    mpsc::channel(FRAME_CHANNEL_CAPACITY)
}

/// Convert one normalized float sample to 16-bit signed PCM.
///
/// Clamps to [-1.0, 1.0], then scales negatives by 32768 and non-negatives
/// by 32767, truncating toward zero. The asymmetric scale is the standard
/// signed full-scale mapping; both halves must stay bit-identical to what
/// downstream transcription expects.
#[inline]
pub fn encode_sample(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Accumulates mono float samples and emits full frames.
///
/// Owned by the capture callback; the only state carried across quanta is
/// the partial remainder waiting for enough samples to fill the next frame.
pub struct FrameEncoder {
    pending: Vec<f32>,
    block_size: usize,
    tx: FrameSender,
}

impl FrameEncoder {
    /// `block_size` is the number of samples per frame; pass the negotiated
    /// sample rate for one-second frames.
    pub fn new(block_size: usize, tx: FrameSender) -> Self {
        Self {
            pending: Vec::with_capacity(block_size * 2),
            block_size,
            tx,
        }
    }

    /// Feed one capture quantum. Appends every sample in order, then emits
    /// a frame for each full `block_size` prefix now available. Empty
    /// quanta are ignored. Never blocks; if the channel is full the frame
    /// is dropped with a warning rather than stalling the audio thread.
    pub fn push_quantum(&mut self, quantum: &[f32]) {
        if quantum.is_empty() {
            return;
        }

        self.pending.extend_from_slice(quantum);

        while self.pending.len() >= self.block_size {
            let block: Vec<f32> = self.pending.drain(..self.block_size).collect();
            let frame = encode_block(&block);
            if self.tx.try_send(frame).is_err() {
                log::warn!("Frame channel full or closed, dropping one frame");
            }
        }
    }

    /// Samples currently buffered, waiting for a full frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Encode a full block of samples into a little-endian PCM byte frame.
fn encode_block(block: &[f32]) -> Frame {
    let mut frame = Vec::with_capacity(block.len() * 2);
    for &sample in block {
        frame.extend_from_slice(&encode_sample(sample).to_le_bytes());
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_encoder(block_size: usize) -> (FrameEncoder, FrameReceiver) {
        let (tx, rx) = create_frame_channel();
        (FrameEncoder::new(block_size, tx), rx)
    }

    fn decode(frame: &Frame) -> Vec<i16> {
        frame
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn boundary_sample_values() {
        assert_eq!(encode_sample(0.0), 0);
        assert_eq!(encode_sample(1.0), 32767);
        assert_eq!(encode_sample(-1.0), -32768);
    }

    #[test]
    fn out_of_range_samples_clamp() {
        assert_eq!(encode_sample(2.0), encode_sample(1.0));
        assert_eq!(encode_sample(-2.0), encode_sample(-1.0));
        assert_eq!(encode_sample(f32::INFINITY), 32767);
        assert_eq!(encode_sample(f32::NEG_INFINITY), -32768);
    }

    #[test]
    fn exact_block_yields_one_frame_and_empty_buffer() {
        let (mut enc, mut rx) = test_encoder(DEFAULT_BLOCK_SIZE);
        enc.push_quantum(&vec![0.25; DEFAULT_BLOCK_SIZE]);

        let frame = rx.try_recv().expect("one frame expected");
        assert_eq!(frame.len(), DEFAULT_BLOCK_SIZE * 2);
        assert!(rx.try_recv().is_err());
        assert_eq!(enc.pending_len(), 0);
    }

    #[test]
    fn one_extra_sample_stays_buffered() {
        let (mut enc, mut rx) = test_encoder(DEFAULT_BLOCK_SIZE);
        enc.push_quantum(&vec![0.1; DEFAULT_BLOCK_SIZE + 1]);

        let frame = rx.try_recv().expect("one frame expected");
        assert_eq!(frame.len(), DEFAULT_BLOCK_SIZE * 2);
        assert!(rx.try_recv().is_err());
        assert_eq!(enc.pending_len(), 1);
    }

    #[test]
    fn split_batches_emit_only_when_block_completes() {
        let (mut enc, mut rx) = test_encoder(1000);

        enc.push_quantum(&vec![0.5; 600]);
        assert!(rx.try_recv().is_err());
        assert_eq!(enc.pending_len(), 600);

        enc.push_quantum(&vec![0.5; 400]);
        let frame = rx.try_recv().expect("frame after second batch");
        assert_eq!(frame.len(), 2000);
        assert_eq!(enc.pending_len(), 0);
    }

    #[test]
    fn burst_quantum_emits_multiple_frames() {
        let (mut enc, mut rx) = test_encoder(100);
        enc.push_quantum(&vec![0.0; 250]);

        assert_eq!(rx.try_recv().expect("first frame").len(), 200);
        assert_eq!(rx.try_recv().expect("second frame").len(), 200);
        assert!(rx.try_recv().is_err());
        assert_eq!(enc.pending_len(), 50);
    }

    #[test]
    fn empty_quantum_is_ignored() {
        let (mut enc, mut rx) = test_encoder(100);
        enc.push_quantum(&[]);
        assert!(rx.try_recv().is_err());
        assert_eq!(enc.pending_len(), 0);
    }

    #[test]
    fn constant_half_scale_block() {
        // One second of 0.5 at 16 kHz: every sample truncates to 16383
        // (0.5 * 32767 = 16383.5, truncated toward zero).
        let (mut enc, mut rx) = test_encoder(DEFAULT_BLOCK_SIZE);
        enc.push_quantum(&vec![0.5; DEFAULT_BLOCK_SIZE]);

        let frame = rx.try_recv().expect("one frame expected");
        let samples = decode(&frame);
        assert_eq!(samples.len(), DEFAULT_BLOCK_SIZE);
        assert!(samples.iter().all(|&s| s == 16383));
    }

    #[test]
    fn concatenated_frames_preserve_input_order() {
        // Feed a recognizable ramp through uneven quanta and verify the
        // decoded concatenation equals the quantized input prefix, in
        // order, with only the trailing remainder withheld.
        let block_size = 64;
        let (mut enc, mut rx) = test_encoder(block_size);

        let input: Vec<f32> = (0..200).map(|i| (i as f32 / 200.0) - 0.5).collect();
        for quantum in input.chunks(7) {
            enc.push_quantum(quantum);
        }

        let mut decoded = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            assert_eq!(frame.len(), block_size * 2);
            decoded.extend(decode(&frame));
        }

        let emitted = (input.len() / block_size) * block_size;
        assert_eq!(decoded.len(), emitted);
        assert_eq!(enc.pending_len(), input.len() - emitted);

        let expected: Vec<i16> = input[..emitted].iter().map(|&s| encode_sample(s)).collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn frames_queue_without_consumer_backpressure() {
        // Nothing reads while several frames are emitted; they queue on
        // the receiving side and arrive in order afterwards.
        let (mut enc, mut rx) = test_encoder(10);
        for i in 0..5 {
            enc.push_quantum(&vec![i as f32 * 0.1; 10]);
        }

        for i in 0..5 {
            let frame = rx.try_recv().expect("queued frame");
            let samples = decode(&frame);
            assert!(samples.iter().all(|&s| s == encode_sample(i as f32 * 0.1)));
        }
        assert!(rx.try_recv().is_err());
    }
}
