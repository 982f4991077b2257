//! Wire payload codecs
//!
//! JSON envelope framing plus the two media payload formats carried inside
//! it: base64 16-bit PCM for audio and base64 JPEG for camera snapshots.

pub mod decoder;
pub mod encoder;
pub mod envelope;
pub mod jpeg;

pub use decoder::PcmDecoder;
pub use encoder::PcmEncoder;
pub use envelope::{decode, encode};
pub use jpeg::JpegEncoder;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::CodecError;

/// Base64-encode a binary payload for an envelope `data` field
pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode an envelope `data` field back into bytes
pub fn from_base64(data: &str) -> Result<Vec<u8>, CodecError> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| CodecError::InvalidBase64(e.to_string()))
}
