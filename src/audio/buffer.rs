//! Audio frame types and fixed-size framing
//!
//! The audio subsystem hands us buffers of whatever size the driver picked.
//! The wire wants fixed frames of mono samples, so captured buffers pass
//! through a [`FrameAccumulator`] before encoding.

/// A fixed-size batch of mono capture samples
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFrame {
    /// Mono audio samples (f32)
    pub samples: Vec<f32>,
    /// Frame sequence number
    pub sequence: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sequence: u32) -> Self {
        Self { samples, sequence }
    }
}

/// A decoded unit of playback audio, one per inbound `audio` envelope
#[derive(Clone, Debug, PartialEq)]
pub struct AudioChunk {
    /// Mono samples at `sample_rate`
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration in milliseconds
    pub fn duration_ms(&self) -> f64 {
        self.samples.len() as f64 * 1000.0 / self.sample_rate as f64
    }
}

/// Average interleaved channels down to mono
pub fn downmix(data: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return data.to_vec();
    }
    data.chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Regroups variable-size mono buffers into fixed-size frames
pub struct FrameAccumulator {
    frame_len: usize,
    pending: Vec<f32>,
    sequence: u32,
}

impl FrameAccumulator {
    pub fn new(frame_len: usize) -> Self {
        Self {
            frame_len: frame_len.max(1),
            pending: Vec::with_capacity(frame_len * 2),
            sequence: 0,
        }
    }

    /// Feed mono samples that are already at the wire rate; returns every
    /// frame it completed
    pub fn push_mono(&mut self, data: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(data);

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_len {
            let samples: Vec<f32> = self.pending.drain(..self.frame_len).collect();
            frames.push(AudioFrame::new(samples, self.sequence));
            self.sequence = self.sequence.wrapping_add(1);
        }
        frames
    }

    /// Samples waiting for a full frame
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
