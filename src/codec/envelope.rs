//! JSON envelope framing
//!
//! One call to [`encode`] yields exactly one complete frame. [`decode`] skips
//! envelope kinds it does not know so newer servers can add message types.

use serde_json::Value;

use crate::error::CodecError;
use crate::protocol::Envelope;

/// Serialize an envelope into a single text frame
pub fn encode(envelope: &Envelope) -> Result<String, CodecError> {
    serde_json::to_string(envelope).map_err(|e| CodecError::Serialize(e.to_string()))
}

/// Parse a text frame
///
/// Returns `Ok(None)` for well-formed frames whose `type` is not one of
/// [`Envelope::KNOWN_TYPES`].
pub fn decode(frame: &str) -> Result<Option<Envelope>, CodecError> {
    let value: Value =
        serde_json::from_str(frame).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| CodecError::Malformed("missing string 'type' field".to_string()))?;

    if !Envelope::KNOWN_TYPES.contains(&kind) {
        tracing::debug!("Ignoring envelope with unknown type '{}'", kind);
        return Ok(None);
    }

    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| CodecError::Malformed(e.to_string()))
}

/// Parse a binary frame, which must hold UTF-8 JSON
pub fn decode_bytes(frame: &[u8]) -> Result<Option<Envelope>, CodecError> {
    let text = std::str::from_utf8(frame).map_err(|e| CodecError::Malformed(e.to_string()))?;
    decode(text)
}
