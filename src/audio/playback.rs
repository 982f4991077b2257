//! Sequential playback of inbound audio
//!
//! [`PlaybackQueue`] owns the FIFO and the playing/idle state. At most one
//! chunk is handed to the [`AudioOutput`] at a time; the next one starts only
//! when the output reports the current one finished. Completion arrives as an
//! explicit `on_finished(id)` call from the session's event loop, so the
//! queue never recurses into itself from a device callback.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::AudioChunk;
use crate::audio::device::find_output_device;
use crate::audio::resample::resample;
use crate::error::DeviceError;

/// Called with the chunk id once the output has played it to the end
pub type CompletionSink = Arc<dyn Fn(u64) + Send + Sync>;

/// Speaker capability provider
pub trait AudioOutput: Send {
    /// Open the device for mono audio at `sample_rate`
    fn acquire(&mut self, sample_rate: u32, on_finished: CompletionSink) -> Result<(), DeviceError>;

    /// Start playing `chunk`; must eventually invoke the completion sink with `id`
    fn play(&mut self, id: u64, chunk: AudioChunk);

    /// Cut the current chunk off without reporting completion
    fn silence(&mut self);

    /// Close the device
    fn release(&mut self);
}

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing { id: u64 },
}

/// Playback statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub played: u64,
    /// Pending chunks evicted because the queue was full
    pub dropped: u64,
}

/// Bounded FIFO driving an [`AudioOutput`]
pub struct PlaybackQueue {
    output: Box<dyn AudioOutput>,
    pending: VecDeque<(u64, AudioChunk)>,
    state: PlaybackState,
    next_id: u64,
    max_pending: usize,
    acquired: bool,
    stats: PlaybackStats,
}

impl PlaybackQueue {
    /// `max_pending` bounds chunks waiting behind the one playing
    pub fn new(output: Box<dyn AudioOutput>, max_pending: usize) -> Self {
        Self {
            output,
            pending: VecDeque::new(),
            state: PlaybackState::Idle,
            next_id: 0,
            max_pending: max_pending.max(1),
            acquired: false,
            stats: PlaybackStats::default(),
        }
    }

    /// Open the output device
    pub fn acquire(&mut self, sample_rate: u32, on_finished: CompletionSink) -> Result<(), DeviceError> {
        if self.acquired {
            return Ok(());
        }
        self.output.acquire(sample_rate, on_finished)?;
        self.acquired = true;
        tracing::info!("Audio output acquired at {}Hz", sample_rate);
        Ok(())
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    /// Take ownership of a chunk; plays it now if idle, otherwise queues it
    ///
    /// Returns the id assigned to the chunk, or `None` if it was discarded.
    pub fn enqueue(&mut self, chunk: AudioChunk) -> Option<u64> {
        if chunk.is_empty() {
            return None;
        }
        if !self.acquired {
            tracing::warn!("Dropping audio chunk: output device not open");
            self.stats.dropped += 1;
            return None;
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        match self.state {
            PlaybackState::Idle => self.start(id, chunk),
            PlaybackState::Playing { .. } => {
                if self.pending.len() >= self.max_pending {
                    if let Some((evicted, _)) = self.pending.pop_front() {
                        self.stats.dropped += 1;
                        tracing::warn!(
                            "Playback queue full ({} pending), dropped chunk {}",
                            self.max_pending,
                            evicted
                        );
                    }
                }
                self.pending.push_back((id, chunk));
            }
        }

        Some(id)
    }

    /// Completion signal from the output
    ///
    /// Retires the playing chunk and starts the next one. Returns `false` for
    /// ids that are not currently playing (e.g. after a flush).
    pub fn on_finished(&mut self, id: u64) -> bool {
        if self.state != (PlaybackState::Playing { id }) {
            tracing::debug!("Ignoring completion for chunk {} ({:?})", id, self.state);
            return false;
        }

        self.stats.played += 1;
        self.state = PlaybackState::Idle;

        if let Some((next_id, chunk)) = self.pending.pop_front() {
            self.start(next_id, chunk);
        }
        true
    }

    fn start(&mut self, id: u64, chunk: AudioChunk) {
        tracing::trace!("Playing chunk {} ({:.0}ms)", id, chunk.duration_ms());
        self.state = PlaybackState::Playing { id };
        self.output.play(id, chunk);
    }

    /// Discard everything pending and cut off the current chunk
    pub fn flush(&mut self) {
        let discarded = self.pending.len();
        self.pending.clear();
        if let PlaybackState::Playing { .. } = self.state {
            self.output.silence();
            self.state = PlaybackState::Idle;
        }
        if discarded > 0 {
            tracing::debug!("Flushed {} pending chunks", discarded);
        }
    }

    /// Flush and close the output device
    pub fn release(&mut self) {
        self.flush();
        if self.acquired {
            self.output.release();
            self.acquired = false;
            tracing::info!("Audio output released");
        }
    }

    /// Chunks held by the queue, including the one playing
    pub fn depth(&self) -> usize {
        self.pending.len() + usize::from(self.is_playing())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state, PlaybackState::Playing { .. })
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn stats(&self) -> &PlaybackStats {
        &self.stats
    }
}

impl Drop for PlaybackQueue {
    fn drop(&mut self) {
        self.release();
    }
}

/// Chunk currently feeding the output callback
struct NowPlaying {
    id: u64,
    samples: Vec<f32>,
    position: usize,
}

/// cpal-backed speaker
pub struct CpalSpeaker {
    device_name: Option<String>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    slot: Arc<Mutex<Option<NowPlaying>>>,
    /// Rate the device actually runs at
    device_rate: u32,
}

impl CpalSpeaker {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            slot: Arc::new(Mutex::new(None)),
            device_rate: 0,
        }
    }
}

/// Fill an interleaved output buffer from the playing chunk
///
/// Returns the chunk id when this call played its last sample.
fn render(slot: &mut Option<NowPlaying>, data: &mut [f32], channels: usize) -> Option<u64> {
    let mut finished = None;
    for frame in data.chunks_mut(channels.max(1)) {
        let sample = match slot.as_mut() {
            Some(playing) if playing.position < playing.samples.len() => {
                let s = playing.samples[playing.position];
                playing.position += 1;
                s
            }
            _ => 0.0,
        };
        frame.fill(sample);

        if let Some(playing) = slot.as_ref() {
            if playing.position >= playing.samples.len() {
                finished = Some(playing.id);
                *slot = None;
            }
        }
    }
    finished
}

impl AudioOutput for CpalSpeaker {
    fn acquire(&mut self, sample_rate: u32, on_finished: CompletionSink) -> Result<(), DeviceError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = find_output_device(self.device_name.as_deref())?;
        let (config, exact_rate) = device.stream_config_for(sample_rate)?;
        let device_name = device.name.clone();
        self.device_rate = config.sample_rate.0;

        if !exact_rate {
            tracing::warn!(
                "{} cannot play at {}Hz, resampling to {}Hz",
                device_name,
                sample_rate,
                self.device_rate
            );
        }

        let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);
        let running = self.running.clone();
        let slot = self.slot.clone();
        let channels = config.channels as usize;

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("speaker-playback".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();

                let stream = cpal_device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let finished = render(&mut slot.lock(), data, channels);
                        if let Some(id) = finished {
                            on_finished(id);
                        }
                    },
                    move |err| {
                        tracing::error!("Output stream error: {}", err);
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(DeviceError::StreamError(e.to_string())));
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(DeviceError::StreamError(e.to_string())));
                    running.store(false, Ordering::SeqCst);
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| DeviceError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);

        let ready = ready_rx
            .recv_timeout(Duration::from_secs(5))
            .unwrap_or_else(|_| Err(DeviceError::Unavailable(format!("{} did not start", device_name))));

        if let Err(e) = ready {
            self.release();
            return Err(e);
        }
        Ok(())
    }

    fn play(&mut self, id: u64, chunk: AudioChunk) {
        let samples = if chunk.sample_rate == self.device_rate {
            chunk.samples
        } else {
            resample(&chunk.samples, chunk.sample_rate, self.device_rate)
        };

        *self.slot.lock() = Some(NowPlaying {
            id,
            samples,
            position: 0,
        });
    }

    fn silence(&mut self) {
        *self.slot.lock() = None;
    }

    fn release(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        *self.slot.lock() = None;
    }
}

impl Drop for CpalSpeaker {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSpeaker, SpeakerEvent};
    use proptest::prelude::*;

    fn chunk(marker: f32) -> AudioChunk {
        AudioChunk::new(vec![marker; 240], 24000)
    }

    fn queue(max_pending: usize) -> (PlaybackQueue, crate::testing::SpeakerProbe) {
        let speaker = RecordingSpeaker::new();
        let probe = speaker.probe();
        let mut queue = PlaybackQueue::new(Box::new(speaker), max_pending);
        queue.acquire(24000, Arc::new(|_| {})).unwrap();
        (queue, probe)
    }

    #[test]
    fn test_back_to_back_chunks_wait_for_completion() {
        let (mut queue, probe) = queue(16);

        let first = queue.enqueue(chunk(0.1)).unwrap();
        let second = queue.enqueue(chunk(0.2)).unwrap();

        assert_eq!(probe.played_ids(), vec![first]);
        assert_eq!(queue.pending_len(), 1);
        assert_eq!(queue.depth(), 2);

        assert_eq!(probe.finish_current(), Some(first));
        assert!(queue.on_finished(first));
        assert_eq!(probe.played_ids(), vec![first, second]);
        assert_eq!(queue.pending_len(), 0);

        assert_eq!(probe.finish_current(), Some(second));
        assert!(queue.on_finished(second));
        assert_eq!(probe.max_concurrent(), 1);
        assert_eq!(queue.state(), PlaybackState::Idle);
        assert_eq!(queue.stats().played, 2);
    }

    #[test]
    fn test_stale_completion_ignored() {
        let (mut queue, probe) = queue(16);
        let first = queue.enqueue(chunk(0.1)).unwrap();
        queue.enqueue(chunk(0.2)).unwrap();

        assert!(!queue.on_finished(first + 1));
        assert_eq!(probe.played_ids(), vec![first]);
        assert!(queue.is_playing());
    }

    #[test]
    fn test_overflow_drops_oldest_pending() {
        let (mut queue, probe) = queue(2);

        let playing = queue.enqueue(chunk(0.0)).unwrap();
        let a = queue.enqueue(chunk(0.1)).unwrap();
        let b = queue.enqueue(chunk(0.2)).unwrap();
        let c = queue.enqueue(chunk(0.3)).unwrap();

        assert_eq!(queue.pending_len(), 2);
        assert_eq!(queue.stats().dropped, 1);

        queue.on_finished(playing);
        queue.on_finished(b);
        queue.on_finished(c);
        assert_eq!(probe.played_ids(), vec![playing, b, c]);
        assert!(!probe.played_ids().contains(&a));
    }

    #[test]
    fn test_flush_silences_current() {
        let (mut queue, probe) = queue(16);
        let first = queue.enqueue(chunk(0.1)).unwrap();
        queue.enqueue(chunk(0.2)).unwrap();

        queue.flush();
        assert_eq!(queue.depth(), 0);
        assert_eq!(probe.events().last(), Some(&SpeakerEvent::Silence));

        // Completion for the cut-off chunk does nothing
        assert!(!queue.on_finished(first));
        assert_eq!(probe.played_ids(), vec![first]);
    }

    #[test]
    fn test_empty_and_unacquired_chunks_are_not_played() {
        let speaker = RecordingSpeaker::new();
        let probe = speaker.probe();
        let mut queue = PlaybackQueue::new(Box::new(speaker), 4);

        assert_eq!(queue.enqueue(chunk(0.5)), None);
        assert_eq!(queue.stats().dropped, 1);

        queue.acquire(24000, Arc::new(|_| {})).unwrap();
        assert_eq!(queue.enqueue(AudioChunk::new(Vec::new(), 24000)), None);
        assert!(probe.played_ids().is_empty());
    }

    #[test]
    fn test_render_reports_completion_once() {
        let mut slot = Some(NowPlaying {
            id: 9,
            samples: vec![0.25, 0.5, 0.75],
            position: 0,
        });

        let mut out = [1.0f32; 4];
        assert_eq!(render(&mut slot, &mut out, 2), None);
        assert_eq!(out, [0.25, 0.25, 0.5, 0.5]);

        let mut out = [1.0f32; 4];
        assert_eq!(render(&mut slot, &mut out, 2), Some(9));
        assert_eq!(out, [0.75, 0.75, 0.0, 0.0]);

        let mut out = [1.0f32; 2];
        assert_eq!(render(&mut slot, &mut out, 2), None);
        assert_eq!(out, [0.0, 0.0]);
    }

    proptest! {
        #[test]
        fn prop_plays_in_arrival_order_without_overlap(
            script in prop::collection::vec(any::<bool>(), 1..64)
        ) {
            // true = a chunk arrives, false = the output finishes what it is playing
            let (mut queue, probe) = queue(1024);
            let mut arrived = Vec::new();

            for arrive in script {
                if arrive {
                    arrived.push(queue.enqueue(chunk(0.1)).unwrap());
                } else if let Some(id) = probe.finish_current() {
                    prop_assert!(queue.on_finished(id));
                }
                prop_assert!(probe.max_concurrent() <= 1);
            }
            while let Some(id) = probe.finish_current() {
                prop_assert!(queue.on_finished(id));
            }

            prop_assert_eq!(probe.played_ids(), arrived);
            prop_assert!(probe.max_concurrent() <= 1);
        }
    }
}
