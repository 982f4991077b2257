//! In-memory capability providers for unit tests
//!
//! Each fake hands out a cloneable probe that shares its state, so a test can
//! drive device callbacks and inspect calls after the fake has been boxed
//! into a pipeline.

use image::{DynamicImage, Rgb, RgbImage};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::audio::buffer::{AudioChunk, AudioFrame};
use crate::audio::capture::{AudioInput, FrameSink};
use crate::audio::playback::{AudioOutput, CompletionSink};
use crate::codec;
use crate::error::{DeviceError, TransportError};
use crate::protocol::Envelope;
use crate::transport::{Connector, InboundFrame, Transport, TransportEvent, TransportSink};
use crate::video::source::VideoSource;

// ---------------------------------------------------------------------------
// Microphone
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MicState {
    sink: Option<FrameSink>,
    failure: Option<DeviceError>,
    acquire_count: usize,
    release_count: usize,
}

/// Microphone that delivers whatever frames the test emits
pub struct ScriptedMicrophone {
    state: Arc<Mutex<MicState>>,
}

#[derive(Clone)]
pub struct MicProbe {
    state: Arc<Mutex<MicState>>,
}

impl ScriptedMicrophone {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MicState::default())),
        }
    }

    /// Every `acquire` fails with `error`
    pub fn failing(error: DeviceError) -> Self {
        let mic = Self::new();
        mic.state.lock().failure = Some(error);
        mic
    }

    pub fn probe(&self) -> MicProbe {
        MicProbe {
            state: self.state.clone(),
        }
    }
}

impl AudioInput for ScriptedMicrophone {
    fn acquire(&mut self, _sample_rate: u32, _frame_len: usize, sink: FrameSink) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if let Some(error) = state.failure.clone() {
            return Err(error);
        }
        state.acquire_count += 1;
        state.sink = Some(sink);
        Ok(())
    }

    fn release(&mut self) {
        let mut state = self.state.lock();
        state.release_count += 1;
        state.sink = None;
    }
}

impl MicProbe {
    /// Deliver a frame as the device callback would; dropped if not acquired
    pub fn emit(&self, frame: AudioFrame) {
        let sink = self.state.lock().sink.clone();
        if let Some(sink) = sink {
            sink(frame);
        }
    }

    pub fn acquire_count(&self) -> usize {
        self.state.lock().acquire_count
    }

    pub fn release_count(&self) -> usize {
        self.state.lock().release_count
    }
}

// ---------------------------------------------------------------------------
// Speaker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeakerEvent {
    Acquire(u32),
    /// Chunk id and sample count
    Play(u64, usize),
    Silence,
    Release,
}

#[derive(Default)]
struct SpeakerState {
    events: Vec<SpeakerEvent>,
    active: Option<u64>,
    max_concurrent: usize,
    on_finished: Option<CompletionSink>,
    failure: Option<DeviceError>,
}

/// Speaker that records calls; chunks finish only when the test says so
pub struct RecordingSpeaker {
    state: Arc<Mutex<SpeakerState>>,
}

#[derive(Clone)]
pub struct SpeakerProbe {
    state: Arc<Mutex<SpeakerState>>,
}

impl RecordingSpeaker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SpeakerState::default())),
        }
    }

    pub fn failing(error: DeviceError) -> Self {
        let speaker = Self::new();
        speaker.state.lock().failure = Some(error);
        speaker
    }

    pub fn probe(&self) -> SpeakerProbe {
        SpeakerProbe {
            state: self.state.clone(),
        }
    }
}

impl AudioOutput for RecordingSpeaker {
    fn acquire(&mut self, sample_rate: u32, on_finished: CompletionSink) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if let Some(error) = state.failure.clone() {
            return Err(error);
        }
        state.events.push(SpeakerEvent::Acquire(sample_rate));
        state.on_finished = Some(on_finished);
        Ok(())
    }

    fn play(&mut self, id: u64, chunk: AudioChunk) {
        let mut state = self.state.lock();
        let concurrent = 1 + usize::from(state.active.is_some());
        state.max_concurrent = state.max_concurrent.max(concurrent);
        state.active = Some(id);
        state.events.push(SpeakerEvent::Play(id, chunk.len()));
    }

    fn silence(&mut self) {
        let mut state = self.state.lock();
        state.active = None;
        state.events.push(SpeakerEvent::Silence);
    }

    fn release(&mut self) {
        let mut state = self.state.lock();
        state.active = None;
        state.on_finished = None;
        state.events.push(SpeakerEvent::Release);
    }
}

impl SpeakerProbe {
    /// Ids passed to `play`, in call order
    pub fn played_ids(&self) -> Vec<u64> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|event| match event {
                SpeakerEvent::Play(id, _) => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Finish the playing chunk and fire the completion sink
    pub fn finish_current(&self) -> Option<u64> {
        let (id, sink) = {
            let mut state = self.state.lock();
            let id = state.active.take()?;
            (id, state.on_finished.clone())
        };
        if let Some(sink) = sink {
            sink(id);
        }
        Some(id)
    }

    pub fn max_concurrent(&self) -> usize {
        self.state.lock().max_concurrent
    }

    pub fn events(&self) -> Vec<SpeakerEvent> {
        self.state.lock().events.clone()
    }
}

// ---------------------------------------------------------------------------
// Camera
// ---------------------------------------------------------------------------

#[derive(Default)]
struct VideoState {
    acquired: bool,
    blank: bool,
    failure: Option<DeviceError>,
    acquire_count: usize,
    grab_count: usize,
    release_count: usize,
}

/// Camera that always shows the same solid frame
pub struct StaticVideoSource {
    width: u32,
    height: u32,
    state: Arc<Mutex<VideoState>>,
}

#[derive(Clone)]
pub struct VideoProbe {
    state: Arc<Mutex<VideoState>>,
}

impl StaticVideoSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            state: Arc::new(Mutex::new(VideoState::default())),
        }
    }

    pub fn failing(error: DeviceError) -> Self {
        let source = Self::new(16, 16);
        source.state.lock().failure = Some(error);
        source
    }

    pub fn probe(&self) -> VideoProbe {
        VideoProbe {
            state: self.state.clone(),
        }
    }
}

impl VideoSource for StaticVideoSource {
    fn acquire(&mut self) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if let Some(error) = state.failure.clone() {
            return Err(error);
        }
        state.acquired = true;
        state.acquire_count += 1;
        Ok(())
    }

    fn grab(&mut self) -> Result<Option<DynamicImage>, DeviceError> {
        let mut state = self.state.lock();
        if !state.acquired {
            return Err(DeviceError::Unavailable("camera not acquired".to_string()));
        }
        state.grab_count += 1;
        if state.blank {
            return Ok(None);
        }
        let frame = RgbImage::from_pixel(self.width, self.height, Rgb([90, 120, 200]));
        Ok(Some(DynamicImage::ImageRgb8(frame)))
    }

    fn release(&mut self) {
        let mut state = self.state.lock();
        state.acquired = false;
        state.release_count += 1;
    }
}

impl VideoProbe {
    /// Make `grab` report that no frame is ready
    pub fn set_blank(&self, blank: bool) {
        self.state.lock().blank = blank;
    }

    /// Make later `acquire` calls fail, or succeed again with `None`
    pub fn set_failure(&self, failure: Option<DeviceError>) {
        self.state.lock().failure = failure;
    }

    pub fn acquire_count(&self) -> usize {
        self.state.lock().acquire_count
    }

    pub fn grab_count(&self) -> usize {
        self.state.lock().grab_count
    }

    pub fn release_count(&self) -> usize {
        self.state.lock().release_count
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LinkState {
    sinks: Vec<TransportSink>,
    sent: Vec<String>,
    close_count: usize,
    fail_sends: bool,
}

/// Connector whose connections open, fail or close when the test says so
pub struct FakeConnector {
    state: Arc<Mutex<LinkState>>,
}

#[derive(Clone)]
pub struct LinkProbe {
    state: Arc<Mutex<LinkState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LinkState::default())),
        }
    }

    pub fn probe(&self) -> LinkProbe {
        LinkProbe {
            state: self.state.clone(),
        }
    }
}

impl Connector for FakeConnector {
    fn connect(&mut self, events: TransportSink) {
        self.state.lock().sinks.push(events);
    }
}

/// Records every outbound frame into the shared link state
struct RecordingTransport {
    state: Arc<Mutex<LinkState>>,
}

impl Transport for RecordingTransport {
    fn send(&mut self, frame: String) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.fail_sends {
            return Err(TransportError::SendFailed("broken pipe".to_string()));
        }
        state.sent.push(frame);
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().close_count += 1;
    }
}

impl LinkProbe {
    fn sink(&self, connection: usize) -> TransportSink {
        let state = self.state.lock();
        match state.sinks.get(connection) {
            Some(sink) => sink.clone(),
            None => panic!("connection {} was never requested", connection),
        }
    }

    fn latest(&self) -> usize {
        self.connect_count().saturating_sub(1)
    }

    /// Open the most recent connection attempt
    pub fn open(&self) {
        self.open_nth(self.latest());
    }

    pub fn open_nth(&self, connection: usize) {
        let transport = RecordingTransport {
            state: self.state.clone(),
        };
        self.sink(connection)(TransportEvent::Opened(Box::new(transport)));
    }

    pub fn fail(&self, error: TransportError) {
        self.sink(self.latest())(TransportEvent::Failed(error));
    }

    pub fn close_remote(&self) {
        self.sink(self.latest())(TransportEvent::Closed);
    }

    /// Deliver an inbound text frame
    pub fn receive(&self, text: &str) {
        self.sink(self.latest())(TransportEvent::Frame(InboundFrame::Text(text.to_string())));
    }

    pub fn receive_envelope(&self, envelope: &Envelope) {
        let frame = codec::encode(envelope).expect("envelope serializes");
        self.receive(&frame);
    }

    pub fn set_send_failure(&self, fail: bool) {
        self.state.lock().fail_sends = fail;
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().sinks.len()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().close_count
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    pub fn sent_envelopes(&self) -> Vec<Envelope> {
        self.sent()
            .iter()
            .map(|frame| codec::decode(frame).expect("valid frame").expect("known type"))
            .collect()
    }

    /// Envelope `type` tags in send order
    pub fn sent_kinds(&self) -> Vec<&'static str> {
        self.sent_envelopes().iter().map(Envelope::kind).collect()
    }
}
