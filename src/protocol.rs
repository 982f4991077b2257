//! Wire envelope and session data types
//!
//! Everything that crosses a boundary lives here: the envelope exchanged with
//! the remote service, and the state the session publishes to UI collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Voice used by the remote service for synthesized speech
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Voice {
    #[default]
    Puck,
    Charon,
    Kore,
    Fenrir,
    Aoede,
    Leda,
    Orus,
    Zephyr,
}

impl Voice {
    pub const ALL: [Voice; 8] = [
        Voice::Puck,
        Voice::Charon,
        Voice::Kore,
        Voice::Fenrir,
        Voice::Aoede,
        Voice::Leda,
        Voice::Orus,
        Voice::Zephyr,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Voice::Puck => "Puck",
            Voice::Charon => "Charon",
            Voice::Kore => "Kore",
            Voice::Fenrir => "Fenrir",
            Voice::Aoede => "Aoede",
            Voice::Leda => "Leda",
            Voice::Orus => "Orus",
            Voice::Zephyr => "Zephyr",
        }
    }
}

impl std::fmt::Display for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Voice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Voice::ALL
            .iter()
            .copied()
            .find(|v| v.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown voice '{}'", s))
    }
}

/// Per-session configuration, sent once as the first outbound envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamConfig {
    pub system_prompt: String,
    pub voice: Voice,
    #[serde(rename = "googleSearch")]
    pub google_search_enabled: bool,
    pub allow_interruptions: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful assistant.".to_string(),
            voice: Voice::default(),
            google_search_enabled: true,
            allow_interruptions: false,
        }
    }
}

/// Partial update applied by config setters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfigUpdate {
    pub system_prompt: Option<String>,
    pub voice: Option<Voice>,
    #[serde(rename = "googleSearch")]
    pub google_search_enabled: Option<bool>,
    pub allow_interruptions: Option<bool>,
}

impl StreamConfig {
    pub fn apply(&mut self, update: StreamConfigUpdate) {
        if let Some(prompt) = update.system_prompt {
            self.system_prompt = prompt;
        }
        if let Some(voice) = update.voice {
            self.voice = voice;
        }
        if let Some(search) = update.google_search_enabled {
            self.google_search_enabled = search;
        }
        if let Some(interrupt) = update.allow_interruptions {
            self.allow_interruptions = interrupt;
        }
    }
}

/// The single message unit exchanged over the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    Config { config: StreamConfig },
    Text { data: String },
    /// Base64 of little-endian 16-bit PCM
    Audio { data: String },
    /// Base64 of JPEG bytes
    Image { data: String },
}

impl Envelope {
    /// Wire tags this client understands
    pub const KNOWN_TYPES: [&'static str; 4] = ["config", "text", "audio", "image"];

    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Config { .. } => "config",
            Envelope::Text { .. } => "text",
            Envelope::Audio { .. } => "audio",
            Envelope::Image { .. } => "image",
        }
    }
}

/// Who produced a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    User,
    Assistant,
}

/// One entry of the conversation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub origin: Origin,
}

impl ChatMessage {
    pub fn new(text: impl Into<String>, origin: Origin) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            timestamp: Utc::now(),
            origin,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(text, Origin::User)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(text, Origin::Assistant)
    }
}

/// Session connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Streaming => write!(f, "streaming"),
            ConnectionState::Error => write!(f, "in error"),
        }
    }
}

/// Session counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub audio_frames_sent: u64,
    pub image_frames_sent: u64,
    pub text_frames_sent: u64,
    /// Capture frames that arrived after their pipeline was disarmed
    pub late_frames_dropped: u64,
    pub decode_errors: u64,
    pub chunks_played: u64,
    /// Chunks discarded because the playback queue was full
    pub chunks_dropped: u64,
    /// PCM bytes produced by the microphone encoder
    pub audio_bytes_encoded: u64,
    /// JPEG bytes produced by the snapshot encoder
    pub image_bytes_encoded: u64,
    /// Snapshot ticks fired by the video ticker
    pub video_ticks: u64,
}

/// Everything a UI needs to render the session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub error_message: Option<String>,
    pub streaming: bool,
    pub camera_active: bool,
    pub config: StreamConfig,
    pub playback_depth: usize,
    pub stats: SessionStats,
}

/// Updates pushed to UI collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum SessionUpdate {
    Message(ChatMessage),
    State(SessionSnapshot),
    ProtocolError(String),
}
