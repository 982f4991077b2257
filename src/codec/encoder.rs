//! 16-bit PCM encoder for outbound microphone audio
//!
//! Converts captured float frames into the little-endian int16 payload the
//! remote service expects, base64-encoded for the `audio` envelope.

use bytes::{BufMut, BytesMut};

use crate::codec::to_base64;
use crate::protocol::Envelope;

/// Scale a float sample in [-1, 1] to int16, clamping loud peaks
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    (sample * i16::MAX as f32)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// PCM encoder with reusable output buffer
pub struct PcmEncoder {
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: BytesMut,
    /// Frame counter for statistics
    frames_encoded: u64,
    /// Total PCM bytes produced
    bytes_produced: u64,
}

impl PcmEncoder {
    /// Create an encoder sized for `frame_len`-sample frames
    pub fn new(frame_len: usize) -> Self {
        Self {
            encode_buffer: BytesMut::with_capacity(frame_len * 2),
            frames_encoded: 0,
            bytes_produced: 0,
        }
    }

    /// Encode mono float samples to little-endian int16 bytes
    pub fn encode_pcm(&mut self, samples: &[f32]) -> &[u8] {
        self.encode_buffer.clear();
        self.encode_buffer.reserve(samples.len() * 2);
        for &sample in samples {
            self.encode_buffer.put_i16_le(sample_to_i16(sample));
        }

        self.frames_encoded += 1;
        self.bytes_produced += self.encode_buffer.len() as u64;

        &self.encode_buffer
    }

    /// Encode a frame straight into an `audio` envelope
    pub fn encode(&mut self, samples: &[f32]) -> Envelope {
        let data = to_base64(self.encode_pcm(samples));
        Envelope::Audio { data }
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaling_and_clamping() {
        assert_eq!(sample_to_i16(0.0), 0);
        assert_eq!(sample_to_i16(1.0), 32767);
        assert_eq!(sample_to_i16(-1.0), -32767);
        assert_eq!(sample_to_i16(0.5), 16384);
        // Loud peaks must not wrap
        assert_eq!(sample_to_i16(1.7), i16::MAX);
        assert_eq!(sample_to_i16(-3.0), i16::MIN);
    }

    #[test]
    fn test_little_endian_layout() {
        let mut encoder = PcmEncoder::new(2);
        let bytes = encoder.encode_pcm(&[1.0, -1.0]).to_vec();
        assert_eq!(bytes, vec![0xff, 0x7f, 0x01, 0x80]);
    }

    #[test]
    fn test_envelope_and_stats() {
        let mut encoder = PcmEncoder::new(512);
        let envelope = encoder.encode(&[0.0; 512]);

        match envelope {
            Envelope::Audio { data } => {
                let bytes = crate::codec::from_base64(&data).unwrap();
                assert_eq!(bytes.len(), 1024);
                assert!(bytes.iter().all(|&b| b == 0));
            }
            other => panic!("unexpected envelope {:?}", other),
        }

        let stats = encoder.stats();
        assert_eq!(stats.frames_encoded, 1);
        assert_eq!(stats.bytes_produced, 1024);
    }
}
