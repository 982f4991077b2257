//! Application configuration
//!
//! Loaded from a TOML file in the platform config directory. Every section
//! defaults independently, so a file only needs the keys it changes.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::{Error, Result};
use crate::protocol::StreamConfig;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub playback: PlaybackConfig,
    pub video: VideoConfig,
    /// Initial stream configuration, editable until streaming starts
    pub stream: StreamConfig,
    pub ui: UiConfig,
}

/// Remote service endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SERVER_URL.to_string(),
        }
    }
}

/// Microphone and speaker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Outbound microphone rate
    pub capture_sample_rate: u32,
    /// Rate of audio returned by the service
    pub playback_sample_rate: u32,
    /// Capture frame length in milliseconds
    pub frame_ms: f32,
    /// Input device name, host default when unset
    pub input_device: Option<String>,
    /// Output device name, host default when unset
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: DEFAULT_CAPTURE_SAMPLE_RATE,
            playback_sample_rate: DEFAULT_PLAYBACK_SAMPLE_RATE,
            frame_ms: DEFAULT_FRAME_SIZE_MS,
            input_device: None,
            output_device: None,
        }
    }
}

impl AudioConfig {
    /// Samples per capture frame
    pub fn frame_len(&self) -> usize {
        (self.capture_sample_rate as f32 * self.frame_ms / 1000.0).round() as usize
    }
}

/// Playback queue policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Chunks allowed to wait behind the one playing; oldest are dropped beyond this
    pub max_queue_depth: usize,
    /// Discard queued audio on stop instead of letting it drain
    pub flush_on_stop: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: DEFAULT_MAX_QUEUE_DEPTH,
            flush_on_stop: false,
        }
    }
}

/// Where camera frames come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VideoSourceConfig {
    TestPattern { width: u32, height: u32 },
    File { path: PathBuf },
}

impl Default for VideoSourceConfig {
    fn default() -> Self {
        VideoSourceConfig::TestPattern {
            width: 640,
            height: 480,
        }
    }
}

/// Snapshot pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub interval_ms: u64,
    pub max_width: u32,
    pub jpeg_quality: u8,
    pub source: VideoSourceConfig,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_VIDEO_INTERVAL_MS,
            max_width: DEFAULT_VIDEO_MAX_WIDTH,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            source: VideoSourceConfig::default(),
        }
    }
}

/// Control API settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

impl AppConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "live-stream-client").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path`, or the default location when `None`
    ///
    /// A missing file yields defaults; an unreadable or invalid one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path)?;
        let config = Self::from_toml_str(&contents)?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values the pipelines cannot run with
    pub fn validate(&self) -> Result<()> {
        if !self.server.url.starts_with("ws://") {
            return Err(Error::Config(format!(
                "server.url must be a ws:// URL, got '{}'",
                self.server.url
            )));
        }
        if self.audio.capture_sample_rate == 0 || self.audio.playback_sample_rate == 0 {
            return Err(Error::Config("audio sample rates must be non-zero".to_string()));
        }
        if self.audio.frame_len() == 0 {
            return Err(Error::Config(format!(
                "audio.frame_ms {} gives an empty frame",
                self.audio.frame_ms
            )));
        }
        if self.playback.max_queue_depth == 0 {
            return Err(Error::Config("playback.max_queue_depth must be at least 1".to_string()));
        }
        if self.video.interval_ms == 0 {
            return Err(Error::Config("video.interval_ms must be non-zero".to_string()));
        }
        if !(1..=100).contains(&self.video.jpeg_quality) {
            return Err(Error::Config(format!(
                "video.jpeg_quality must be 1-100, got {}",
                self.video.jpeg_quality
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Voice;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.audio.frame_len(), 512);
        assert_eq!(config.playback.max_queue_depth, DEFAULT_MAX_QUEUE_DEPTH);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [server]
            url = "ws://10.0.0.5:9000/live"

            [stream]
            voice = "Kore"
            googleSearch = false

            [video.source]
            kind = "file"
            path = "/tmp/frame.jpg"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.url, "ws://10.0.0.5:9000/live");
        assert_eq!(config.stream.voice, Voice::Kore);
        assert!(!config.stream.google_search_enabled);
        assert_eq!(config.stream.system_prompt, StreamConfig::default().system_prompt);
        assert_eq!(config.audio.capture_sample_rate, DEFAULT_CAPTURE_SAMPLE_RATE);
        assert_eq!(
            config.video.source,
            VideoSourceConfig::File {
                path: PathBuf::from("/tmp/frame.jpg")
            }
        );
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(AppConfig::from_toml_str("[server]\nurl = \"http://example.com\"").is_err());
        assert!(AppConfig::from_toml_str("[server]\nurl = \"wss://example.com\"").is_err());
        assert!(AppConfig::from_toml_str("[video]\njpeg_quality = 0").is_err());
        assert!(AppConfig::from_toml_str("[playback]\nmax_queue_depth = 0").is_err());
        assert!(AppConfig::from_toml_str("[audio]\nframe_ms = 0.0").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("live-stream-client-cfg-{}", std::process::id()));
        let path = dir.join("config.toml");

        let mut config = AppConfig::default();
        config.ui.http_port = 9191;
        config.playback.flush_on_stop = true;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded, config);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = AppConfig::load(Some(Path::new("/nonexistent/live-stream-client.toml"))).unwrap();
        assert_eq!(config, AppConfig::default());
    }
}
