//! 16-bit PCM decoder for inbound synthesized audio

use bytes::Buf;

use crate::codec::from_base64;
use crate::error::CodecError;

/// Scale an int16 sample back to float in [-1, 1]
#[inline]
pub fn sample_to_f32(sample: i16) -> f32 {
    (sample as f32 / i16::MAX as f32).clamp(-1.0, 1.0)
}

/// PCM decoder producing float samples
#[derive(Debug, Default, Clone, Copy)]
pub struct PcmDecoder;

impl PcmDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode raw little-endian int16 bytes
    pub fn decode_pcm(&self, mut bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
        if bytes.len() % 2 != 0 {
            return Err(CodecError::OddPcmLength(bytes.len()));
        }

        let mut samples = Vec::with_capacity(bytes.len() / 2);
        while bytes.has_remaining() {
            samples.push(sample_to_f32(bytes.get_i16_le()));
        }
        Ok(samples)
    }

    /// Decode the base64 `data` field of an `audio` envelope
    pub fn decode(&self, data: &str) -> Result<Vec<f32>, CodecError> {
        let bytes = from_base64(data)?;
        self.decode_pcm(&bytes)
    }
}
