//! # Live Stream Client
//!
//! Real-time voice, text and camera snapshot client for a remote
//! conversational service, spoken to over a single WebSocket.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                         UI collaborators (ui, bin)                        │
//! │        intents ▼                                   ▲ SessionUpdate        │
//! │  ┌────────────────────────────────────────────────────────────────────┐  │
//! │  │                 SessionRunner / Session (session)                   │  │
//! │  │        one event loop, connection generation, state machine         │  │
//! │  └──┬──────────────┬─────────────────┬─────────────────┬───────────────┘  │
//! │     │              │                 │                 │                  │
//! │     ▼              ▼                 ▼                 ▼                  │
//! │ ┌─────────┐  ┌────────────┐  ┌──────────────┐  ┌──────────────────┐      │
//! │ │ Audio   │  │  Video     │  │  Playback    │  │  Transport       │      │
//! │ │ Capture │  │  Capture   │  │  Queue       │  │  (WebSocket)     │      │
//! │ │ cpal in │  │  1s ticker │  │  cpal out    │  │  reader + writer │      │
//! │ └────┬────┘  └─────┬──────┘  └──────▲───────┘  └───────┬──────────┘      │
//! │      │ int16 PCM   │ JPEG           │ int16 PCM        │                 │
//! │      ▼             ▼                │                  ▼                 │
//! │  ┌────────────────────────────────────────────────────────────────┐     │
//! │  │        codec: {"type":"config"|"text"|"audio"|"image", ...}      │     │
//! │  └────────────────────────────────────────────────────────────────┘     │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod ui;
pub mod video;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Outbound microphone sample rate
    pub const DEFAULT_CAPTURE_SAMPLE_RATE: u32 = 16000;

    /// Sample rate of audio returned by the service
    pub const DEFAULT_PLAYBACK_SAMPLE_RATE: u32 = 24000;

    /// Capture frame length in milliseconds (512 samples at 16kHz)
    pub const DEFAULT_FRAME_SIZE_MS: f32 = 32.0;

    /// Playback chunks allowed to wait behind the one playing
    pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 256;

    /// Period between camera snapshots
    pub const DEFAULT_VIDEO_INTERVAL_MS: u64 = 1000;

    /// Snapshots wider than this are scaled down
    pub const DEFAULT_VIDEO_MAX_WIDTH: u32 = 640;

    pub const DEFAULT_JPEG_QUALITY: u8 = 80;

    /// Default control API port
    pub const DEFAULT_HTTP_PORT: u16 = 8080;

    pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8000/ws";
}
