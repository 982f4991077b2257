//! Session controller
//!
//! [`Session`] owns the connection lifecycle and every pipeline. It is a
//! plain synchronous state machine: device threads, the ticker and the
//! transport tasks never touch it directly, they post [`SessionEvent`]s to an
//! unbounded channel and the [`SessionRunner`] applies them one at a time.
//!
//! Each connection gets a new generation number. Transport and capture
//! events carry the generation they were created under, and anything from an
//! older generation is discarded on arrival.
//!
//! ```text
//!            start_stream            Opened + devices + config sent
//!   Idle ───────────────▶ Connecting ─────────────────────────────▶ Streaming
//!    ▲ ▲                      │ Failed / device error                  │
//!    │ │ stop_stream          ▼                                        │
//!    │ └──────────────────── Error ◀──────── Failed / send error ──────┤
//!    └──────────────────────────────────── stop_stream / Closed ───────┘
//! ```

mod runner;

pub use runner::{SessionHandle, SessionRunner};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::audio::buffer::{AudioChunk, AudioFrame};
use crate::audio::capture::{AudioCapture, AudioInput, FrameSink};
use crate::audio::playback::{AudioOutput, CompletionSink, PlaybackQueue};
use crate::codec::{self, JpegEncoder, PcmDecoder};
use crate::config::AppConfig;
use crate::error::{CodecError, Result, SessionError, TransportError};
use crate::protocol::{
    ChatMessage, ConnectionState, Envelope, SessionSnapshot, SessionStats, SessionUpdate, StreamConfig,
    StreamConfigUpdate,
};
use crate::transport::{Connector, InboundFrame, Transport, TransportEvent, TransportSink};
use crate::video::capture::{TickSink, VideoCapture};
use crate::video::source::VideoSource;

/// Capacity of the update broadcast; slow subscribers lag rather than block
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// User intents accepted by the session
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    StartStream,
    StopStream,
    SendText(String),
    ToggleCamera,
    UpdateConfig(StreamConfigUpdate),
    Shutdown,
}

/// Everything the session loop reacts to
pub enum SessionEvent {
    Intent {
        intent: Intent,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    AudioFrame {
        generation: u64,
        frame: AudioFrame,
    },
    VideoTick {
        generation: u64,
    },
    PlaybackFinished {
        id: u64,
    },
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Pipeline parameters
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub stream: StreamConfig,
    pub capture_sample_rate: u32,
    pub frame_len: usize,
    pub playback_sample_rate: u32,
    pub max_queue_depth: usize,
    pub flush_on_stop: bool,
    pub video_interval: Duration,
    pub jpeg_quality: u8,
    pub video_max_width: u32,
}

impl From<&AppConfig> for SessionOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            stream: config.stream.clone(),
            capture_sample_rate: config.audio.capture_sample_rate,
            frame_len: config.audio.frame_len(),
            playback_sample_rate: config.audio.playback_sample_rate,
            max_queue_depth: config.playback.max_queue_depth,
            flush_on_stop: config.playback.flush_on_stop,
            video_interval: Duration::from_millis(config.video.interval_ms),
            jpeg_quality: config.video.jpeg_quality,
            video_max_width: config.video.max_width,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Capability providers the session drives
pub struct SessionDevices {
    pub connector: Box<dyn Connector>,
    pub microphone: Box<dyn AudioInput>,
    pub speaker: Box<dyn AudioOutput>,
    pub camera: Box<dyn VideoSource>,
}

/// The streaming state machine
pub struct Session {
    state: ConnectionState,
    error_message: Option<String>,
    config: StreamConfig,
    generation: u64,
    connector: Box<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    audio: AudioCapture,
    video: VideoCapture,
    playback: PlaybackQueue,
    decoder: PcmDecoder,
    camera_enabled: bool,
    flush_on_stop: bool,
    playback_sample_rate: u32,
    stats: SessionStats,
    events: EventSender,
    updates: broadcast::Sender<SessionUpdate>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl Session {
    /// Build a session and the receiving end of its event channel
    pub fn new(options: SessionOptions, devices: SessionDevices) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let (snapshot, _) = watch::channel(SessionSnapshot {
            config: options.stream.clone(),
            ..SessionSnapshot::default()
        });

        let session = Self {
            state: ConnectionState::Idle,
            error_message: None,
            config: options.stream,
            generation: 0,
            connector: devices.connector,
            transport: None,
            audio: AudioCapture::new(devices.microphone, options.capture_sample_rate, options.frame_len),
            video: VideoCapture::new(
                devices.camera,
                JpegEncoder::new(options.jpeg_quality, options.video_max_width),
                options.video_interval,
            ),
            playback: PlaybackQueue::new(devices.speaker, options.max_queue_depth),
            decoder: PcmDecoder::new(),
            camera_enabled: false,
            flush_on_stop: options.flush_on_stop,
            playback_sample_rate: options.playback_sample_rate,
            stats: SessionStats::default(),
            events,
            updates,
            snapshot,
        };
        (session, events_rx)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn camera_enabled(&self) -> bool {
        self.camera_enabled
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn event_sender(&self) -> EventSender {
        self.events.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let playback = self.playback.stats();
        SessionSnapshot {
            state: self.state,
            error_message: self.error_message.clone(),
            streaming: self.state == ConnectionState::Streaming,
            camera_active: self.camera_enabled,
            config: self.config.clone(),
            playback_depth: self.playback.depth(),
            stats: SessionStats {
                chunks_played: playback.played,
                chunks_dropped: playback.dropped,
                audio_bytes_encoded: self.audio.encoder_stats().bytes_produced,
                image_bytes_encoded: self.video.bytes_encoded(),
                video_ticks: self.video.ticks_fired(),
                ..self.stats.clone()
            },
        }
    }

    /// Apply one event; returns `false` once the session has shut down
    pub fn handle(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Intent { intent, reply } => {
                let shutdown = intent == Intent::Shutdown;
                let result = self.apply(intent);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            tracing::warn!("Intent failed: {}", e);
                        }
                    }
                }
                return !shutdown;
            }
            SessionEvent::Transport { generation, event } => self.on_transport_event(generation, event),
            SessionEvent::AudioFrame { generation, frame } => self.on_audio_frame(generation, frame),
            SessionEvent::VideoTick { generation } => self.on_video_tick(generation),
            SessionEvent::PlaybackFinished { id } => {
                if self.playback.on_finished(id) {
                    self.refresh_snapshot();
                }
            }
        }
        true
    }

    fn apply(&mut self, intent: Intent) -> Result<()> {
        match intent {
            Intent::StartStream => self.start_stream(),
            Intent::StopStream => {
                self.stop_stream();
                Ok(())
            }
            Intent::SendText(text) => {
                self.send_text(&text);
                Ok(())
            }
            Intent::ToggleCamera => self.toggle_camera(),
            Intent::UpdateConfig(update) => self.update_config(update),
            Intent::Shutdown => {
                self.shutdown();
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Intents
    // -----------------------------------------------------------------------

    /// Begin connecting; devices are acquired once the transport is open
    pub fn start_stream(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Idle | ConnectionState::Error => {}
            state => {
                return Err(SessionError::InvalidState {
                    operation: "start streaming",
                    state,
                }
                .into())
            }
        }

        self.generation += 1;
        self.error_message = None;
        tracing::info!("Starting stream (connection {})", self.generation);

        self.set_state(ConnectionState::Connecting);
        let sink = self.transport_sink(self.generation);
        self.connector.connect(sink);
        Ok(())
    }

    /// Stop both capture pipelines and close the transport
    ///
    /// No-op while idle. From `Error` it only clears the error.
    pub fn stop_stream(&mut self) {
        match self.state {
            ConnectionState::Idle => {
                tracing::debug!("Stop requested while idle");
            }
            ConnectionState::Error => {
                self.error_message = None;
                self.set_state(ConnectionState::Idle);
            }
            ConnectionState::Connecting | ConnectionState::Streaming => {
                tracing::info!("Stopping stream");
                self.teardown();
                if self.flush_on_stop {
                    self.playback.flush();
                }
                self.set_state(ConnectionState::Idle);
            }
        }
    }

    /// Send a user text turn; ignored unless streaming or if blank
    pub fn send_text(&mut self, text: &str) {
        if self.state != ConnectionState::Streaming {
            tracing::debug!("Ignoring text while {}", self.state);
            return;
        }
        if text.trim().is_empty() {
            return;
        }

        self.publish(SessionUpdate::Message(ChatMessage::user(text)));
        self.send(&Envelope::Text {
            data: text.to_string(),
        });
    }

    /// Flip the camera on or off
    pub fn toggle_camera(&mut self) -> Result<()> {
        if self.camera_enabled {
            self.camera_enabled = false;
            self.video.stop();
            tracing::info!("Camera disabled");
            self.publish_state();
            return Ok(());
        }

        if let Err(e) = self.video.acquire() {
            let message = format!("Camera unavailable: {}", e);
            tracing::warn!("{}", message);
            self.error_message = Some(message);
            if self.state == ConnectionState::Idle {
                self.set_state(ConnectionState::Error);
            } else {
                self.publish_state();
            }
            return Err(e.into());
        }

        self.camera_enabled = true;
        if self.state != ConnectionState::Error {
            self.error_message = None;
        }
        tracing::info!("Camera enabled");
        if self.state == ConnectionState::Streaming {
            let tick = self.tick_sink(self.generation);
            if let Err(e) = self.video.arm(tick) {
                tracing::warn!("Failed to start video snapshots: {}", e);
            }
        }
        self.publish_state();
        Ok(())
    }

    /// Change stream settings; only allowed while not connected
    pub fn update_config(&mut self, update: StreamConfigUpdate) -> Result<()> {
        if matches!(self.state, ConnectionState::Connecting | ConnectionState::Streaming) {
            return Err(SessionError::ConfigLocked.into());
        }
        self.config.apply(update);
        tracing::debug!("Stream config updated: {:?}", self.config);
        self.publish_state();
        Ok(())
    }

    /// Stop everything and release every device
    pub fn shutdown(&mut self) {
        self.stop_stream();
        self.camera_enabled = false;
        self.video.stop();
        self.playback.release();
        tracing::info!("Session shut down");
        self.refresh_snapshot();
    }

    // -----------------------------------------------------------------------
    // Transport events
    // -----------------------------------------------------------------------

    fn on_transport_event(&mut self, generation: u64, event: TransportEvent) {
        if generation != self.generation {
            tracing::debug!("Discarding {:?} from stale connection {}", event, generation);
            if let TransportEvent::Opened(mut transport) = event {
                transport.close();
            }
            return;
        }

        match event {
            TransportEvent::Opened(transport) => self.on_transport_opened(transport),
            TransportEvent::Frame(frame) => self.on_frame(frame),
            TransportEvent::Failed(error) => self.on_transport_failed(error),
            TransportEvent::Closed => {
                tracing::info!("Connection closed by server");
                self.teardown();
                self.set_state(ConnectionState::Idle);
            }
        }
    }

    fn on_transport_opened(&mut self, mut transport: Box<dyn Transport>) {
        if self.state != ConnectionState::Connecting {
            transport.close();
            return;
        }
        self.transport = Some(transport);

        if let Err(e) = self.acquire_devices() {
            self.fail(format!("Failed to start media devices: {}", e));
            return;
        }

        // Nothing may precede the config envelope
        let config = Envelope::Config {
            config: self.config.clone(),
        };
        if !self.send(&config) {
            return;
        }

        self.audio.arm();
        if self.camera_enabled {
            let tick = self.tick_sink(self.generation);
            if let Err(e) = self.video.arm(tick) {
                tracing::warn!("Failed to start video snapshots: {}", e);
            }
        }

        tracing::info!("Streaming with voice {}", self.config.voice);
        self.set_state(ConnectionState::Streaming);
    }

    fn acquire_devices(&mut self) -> Result<()> {
        if !self.playback.is_acquired() {
            let sink = self.completion_sink();
            self.playback.acquire(self.playback_sample_rate, sink)?;
        }
        let frames = self.frame_sink(self.generation);
        self.audio.acquire(frames)?;
        if self.camera_enabled {
            self.video.acquire()?;
        }
        Ok(())
    }

    fn on_transport_failed(&mut self, error: TransportError) {
        let message = match self.state {
            ConnectionState::Connecting => format!("Could not connect: {}", error),
            _ => format!("Connection lost: {}", error),
        };
        self.fail(message);
    }

    fn on_frame(&mut self, frame: InboundFrame) {
        let decoded = match &frame {
            InboundFrame::Text(text) => codec::decode(text),
            InboundFrame::Binary(bytes) => codec::envelope::decode_bytes(bytes),
        };

        match decoded {
            Ok(Some(Envelope::Text { data })) => {
                self.publish(SessionUpdate::Message(ChatMessage::assistant(data)));
            }
            Ok(Some(Envelope::Audio { data })) => match self.decoder.decode(&data) {
                Ok(samples) => {
                    let chunk = AudioChunk::new(samples, self.playback_sample_rate);
                    if self.playback.enqueue(chunk).is_some() {
                        self.refresh_snapshot();
                    }
                }
                Err(e) => self.on_decode_error(e),
            },
            Ok(Some(other)) => {
                tracing::debug!("Ignoring inbound {} envelope", other.kind());
            }
            Ok(None) => {}
            Err(e) => self.on_decode_error(e),
        }
    }

    fn on_decode_error(&mut self, error: CodecError) {
        tracing::warn!("Dropping inbound frame: {}", error);
        self.stats.decode_errors += 1;
        self.publish(SessionUpdate::ProtocolError(error.to_string()));
    }

    // -----------------------------------------------------------------------
    // Capture events
    // -----------------------------------------------------------------------

    fn on_audio_frame(&mut self, generation: u64, frame: AudioFrame) {
        if generation != self.generation || self.state != ConnectionState::Streaming {
            self.stats.late_frames_dropped += 1;
            return;
        }
        match self.audio.process_frame(&frame) {
            Some(envelope) => {
                self.send(&envelope);
            }
            None => self.stats.late_frames_dropped += 1,
        }
    }

    fn on_video_tick(&mut self, generation: u64) {
        if generation != self.generation || self.state != ConnectionState::Streaming {
            return;
        }
        match self.video.on_tick() {
            Ok(Some(envelope)) => {
                self.send(&envelope);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Skipping video snapshot: {}", e),
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Serialize and send; a transport failure moves the session to `Error`
    fn send(&mut self, envelope: &Envelope) -> bool {
        let frame = match codec::encode(envelope) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Failed to encode {} envelope: {}", envelope.kind(), e);
                return false;
            }
        };

        let result = match self.transport.as_mut() {
            Some(transport) => transport.send(frame),
            None => {
                tracing::debug!("No transport, dropping {} envelope", envelope.kind());
                return false;
            }
        };

        match result {
            Ok(()) => {
                match envelope {
                    Envelope::Audio { .. } => self.stats.audio_frames_sent += 1,
                    Envelope::Image { .. } => self.stats.image_frames_sent += 1,
                    Envelope::Text { .. } => self.stats.text_frames_sent += 1,
                    Envelope::Config { .. } => {}
                }
                true
            }
            Err(e) => {
                self.fail(format!("Connection lost: {}", e));
                false
            }
        }
    }

    /// Stop producers, drop the transport and retire the generation
    fn teardown(&mut self) {
        self.audio.stop();
        self.video.stop();
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.generation += 1;
    }

    fn fail(&mut self, message: String) {
        tracing::error!("{}", message);
        self.teardown();
        self.error_message = Some(message);
        self.set_state(ConnectionState::Error);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::debug!("Session {} -> {}", self.state, state);
        }
        self.state = state;
        self.publish_state();
    }

    fn publish_state(&mut self) {
        let snapshot = self.snapshot();
        self.snapshot.send_replace(snapshot.clone());
        self.publish(SessionUpdate::State(snapshot));
    }

    fn refresh_snapshot(&mut self) {
        self.snapshot.send_replace(self.snapshot());
    }

    fn publish(&self, update: SessionUpdate) {
        // No subscribers is fine
        let _ = self.updates.send(update);
    }

    fn transport_sink(&self, generation: u64) -> TransportSink {
        let events = self.events.clone();
        Arc::new(move |event| {
            let _ = events.send(SessionEvent::Transport { generation, event });
        })
    }

    fn frame_sink(&self, generation: u64) -> FrameSink {
        let events = self.events.clone();
        Arc::new(move |frame| {
            let _ = events.send(SessionEvent::AudioFrame { generation, frame });
        })
    }

    fn tick_sink(&self, generation: u64) -> TickSink {
        let events = self.events.clone();
        Arc::new(move || {
            let _ = events.send(SessionEvent::VideoTick { generation });
        })
    }

    fn completion_sink(&self) -> CompletionSink {
        let events = self.events.clone();
        Arc::new(move |id| {
            let _ = events.send(SessionEvent::PlaybackFinished { id });
        })
    }
}
