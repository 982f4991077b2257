//! Microphone capture pipeline
//!
//! [`AudioCapture`] turns fixed-size microphone frames into `audio` envelopes.
//! The device itself sits behind [`AudioInput`]; [`CpalMicrophone`] is the
//! real implementation and runs its cpal stream on a dedicated thread.
//!
//! Teardown is guarded by an `armed` flag. It is checked both in the device
//! callback and again when the session handles a queued frame, so a frame
//! that raced [`AudioCapture::stop`] is never sent.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{downmix, AudioFrame, FrameAccumulator};
use crate::audio::device::find_input_device;
use crate::audio::resample::LinearResampler;
use crate::codec::encoder::{EncoderStats, PcmEncoder};
use crate::error::DeviceError;
use crate::protocol::Envelope;

/// Receives fixed-size mono frames from an [`AudioInput`]
pub type FrameSink = Arc<dyn Fn(AudioFrame) + Send + Sync>;

/// Microphone capability provider
pub trait AudioInput: Send {
    /// Open the device and start delivering `frame_len`-sample mono frames
    /// at `sample_rate` to `sink`
    fn acquire(&mut self, sample_rate: u32, frame_len: usize, sink: FrameSink) -> Result<(), DeviceError>;

    /// Stop delivery and close the device
    fn release(&mut self);
}

/// Capture pipeline from microphone frames to `audio` envelopes
pub struct AudioCapture {
    input: Box<dyn AudioInput>,
    encoder: PcmEncoder,
    armed: Arc<AtomicBool>,
    acquired: bool,
    sample_rate: u32,
    frame_len: usize,
}

impl AudioCapture {
    pub fn new(input: Box<dyn AudioInput>, sample_rate: u32, frame_len: usize) -> Self {
        Self {
            input,
            encoder: PcmEncoder::new(frame_len),
            armed: Arc::new(AtomicBool::new(false)),
            acquired: false,
            sample_rate,
            frame_len,
        }
    }

    /// Open the microphone without emitting anything yet
    ///
    /// Frames reach `sink` only after [`arm`](Self::arm).
    pub fn acquire(&mut self, sink: FrameSink) -> Result<(), DeviceError> {
        if self.acquired {
            return Ok(());
        }

        self.armed.store(false, Ordering::SeqCst);
        let armed = self.armed.clone();
        let gated: FrameSink = Arc::new(move |frame| {
            if armed.load(Ordering::Acquire) {
                sink(frame);
            }
        });

        self.input.acquire(self.sample_rate, self.frame_len, gated)?;
        self.acquired = true;
        tracing::info!(
            "Microphone acquired: {}Hz, {} samples/frame",
            self.sample_rate,
            self.frame_len
        );
        Ok(())
    }

    /// Start letting frames through
    pub fn arm(&mut self) {
        if self.acquired {
            self.armed.store(true, Ordering::Release);
        }
    }

    /// Disarm synchronously, then release the microphone
    pub fn stop(&mut self) {
        self.armed.store(false, Ordering::SeqCst);
        if self.acquired {
            self.input.release();
            self.acquired = false;
            tracing::info!("Microphone released");
        }
    }

    /// Encode one frame, or `None` if the pipeline has been disarmed
    pub fn process_frame(&mut self, frame: &AudioFrame) -> Option<Envelope> {
        if !self.is_armed() {
            return None;
        }
        Some(self.encoder.encode(&frame.samples))
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    pub fn encoder_stats(&self) -> EncoderStats {
        self.encoder.stats()
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// cpal-backed microphone
pub struct CpalMicrophone {
    /// Device name, `None` for the host default
    device_name: Option<String>,

    /// Whether the stream thread should keep running
    running: Arc<AtomicBool>,

    /// Stream thread handle
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalMicrophone {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }
}

impl AudioInput for CpalMicrophone {
    fn acquire(&mut self, sample_rate: u32, frame_len: usize, sink: FrameSink) -> Result<(), DeviceError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = find_input_device(self.device_name.as_deref())?;
        let (config, exact_rate) = device.stream_config_for(sample_rate)?;
        let device_name = device.name.clone();

        if !exact_rate {
            tracing::warn!(
                "{} cannot capture at {}Hz, resampling from {}Hz",
                device_name,
                sample_rate,
                config.sample_rate.0
            );
        }

        let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);
        let running = self.running.clone();
        let channels = config.channels;
        let mut resampler = LinearResampler::new(config.sample_rate.0, sample_rate);
        let mut accumulator = FrameAccumulator::new(frame_len);

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("microphone-capture".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();

                let stream = cpal_device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let mono = downmix(data, channels);
                        let mono = resampler.process(&mono);
                        for frame in accumulator.push_mono(&mono) {
                            sink(frame);
                        }
                    },
                    move |err| {
                        tracing::error!("Input stream error: {}", err);
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

                // Keep thread alive while running
                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                // Stream is dropped here, stopping capture
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

        tracing::debug!("Capture stream running on {}", device_name);
        Ok(())
    }

    fn release(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::from_base64;
    use crate::testing::ScriptedMicrophone;

    #[test]
    fn test_frames_gated_until_armed() {
        let mic = ScriptedMicrophone::new();
        let probe = mic.probe();
        let mut capture = AudioCapture::new(Box::new(mic), 16000, 4);

        let delivered = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink_log = delivered.clone();
        capture
            .acquire(Arc::new(move |frame: AudioFrame| sink_log.lock().push(frame.sequence)))
            .unwrap();

        probe.emit(AudioFrame::new(vec![0.0; 4], 0));
        assert!(delivered.lock().is_empty());

        capture.arm();
        probe.emit(AudioFrame::new(vec![0.0; 4], 1));
        assert_eq!(*delivered.lock(), vec![1]);

        capture.stop();
        probe.emit(AudioFrame::new(vec![0.0; 4], 2));
        assert_eq!(*delivered.lock(), vec![1]);
        assert_eq!(probe.release_count(), 1);
    }

    #[test]
    fn test_process_frame_encodes_pcm() {
        let mut capture = AudioCapture::new(Box::new(ScriptedMicrophone::new()), 16000, 2);
        capture.acquire(Arc::new(|_| {})).unwrap();
        capture.arm();

        let envelope = capture
            .process_frame(&AudioFrame::new(vec![1.0, -2.0], 0))
            .unwrap();
        match envelope {
            Envelope::Audio { data } => {
                assert_eq!(from_base64(&data).unwrap(), vec![0xff, 0x7f, 0x00, 0x80]);
            }
            other => panic!("unexpected envelope {:?}", other),
        }
    }

    #[test]
    fn test_late_frame_after_stop_is_dropped() {
        let mut capture = AudioCapture::new(Box::new(ScriptedMicrophone::new()), 16000, 2);
        capture.acquire(Arc::new(|_| {})).unwrap();
        capture.arm();
        capture.stop();

        assert!(capture.process_frame(&AudioFrame::new(vec![0.5, 0.5], 7)).is_none());
        assert_eq!(capture.encoder_stats().frames_encoded, 0);
    }

    #[test]
    fn test_acquire_failure_leaves_pipeline_idle() {
        let mic = ScriptedMicrophone::failing(DeviceError::Unavailable("permission denied".into()));
        let mut capture = AudioCapture::new(Box::new(mic), 16000, 2);

        let err = capture.acquire(Arc::new(|_| {})).unwrap_err();
        assert_eq!(err, DeviceError::Unavailable("permission denied".into()));
        assert!(!capture.is_acquired());

        capture.arm();
        assert!(!capture.is_armed());
    }
}
