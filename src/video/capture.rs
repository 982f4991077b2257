//! Periodic camera snapshot pipeline
//!
//! While armed, a ticker thread fires once per interval. Each tick is handled
//! on the session loop: grab the live frame, JPEG-encode it and emit an
//! `image` envelope. Ticks are independent; nothing is buffered between them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::codec::JpegEncoder;
use crate::error::{DeviceError, Error};
use crate::protocol::Envelope;
use crate::video::source::VideoSource;

/// Invoked by the ticker thread once per interval
pub type TickSink = Arc<dyn Fn() + Send + Sync>;

/// Background thread firing a tick sink on a fixed period
struct Ticker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    fn spawn(interval: Duration, tick: TickSink, ticks: Arc<AtomicU64>) -> Result<Self, DeviceError> {
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();

        let handle = thread::Builder::new()
            .name("video-ticker".to_string())
            .spawn(move || {
                let mut next = Instant::now() + interval;
                while running_for_loop.load(Ordering::Relaxed) {
                    if Instant::now() >= next {
                        next += interval;
                        ticks.fetch_add(1, Ordering::Relaxed);
                        tick();
                    }
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| DeviceError::StreamError(e.to_string()))?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Snapshot pipeline from a [`VideoSource`] to `image` envelopes
pub struct VideoCapture {
    source: Box<dyn VideoSource>,
    encoder: JpegEncoder,
    interval: Duration,
    acquired: bool,
    armed: Arc<AtomicBool>,
    ticker: Option<Ticker>,
    ticks_fired: Arc<AtomicU64>,
}

impl VideoCapture {
    pub fn new(source: Box<dyn VideoSource>, encoder: JpegEncoder, interval: Duration) -> Self {
        Self {
            source,
            encoder,
            interval,
            acquired: false,
            armed: Arc::new(AtomicBool::new(false)),
            ticker: None,
            ticks_fired: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Open the camera
    pub fn acquire(&mut self) -> Result<(), DeviceError> {
        if self.acquired {
            return Ok(());
        }
        self.source.acquire()?;
        self.acquired = true;
        tracing::info!("Camera acquired");
        Ok(())
    }

    /// Start the ticker; no-op unless the camera is open
    pub fn arm(&mut self, tick: TickSink) -> Result<(), DeviceError> {
        if !self.acquired || self.is_armed() {
            return Ok(());
        }

        let armed = self.armed.clone();
        let gated: TickSink = Arc::new(move || {
            if armed.load(Ordering::Acquire) {
                tick();
            }
        });

        self.armed.store(true, Ordering::Release);
        match Ticker::spawn(self.interval, gated, self.ticks_fired.clone()) {
            Ok(ticker) => self.ticker = Some(ticker),
            Err(e) => {
                self.armed.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }
        tracing::debug!("Video snapshots every {:?}", self.interval);
        Ok(())
    }

    /// Stop emitting snapshots but keep the camera open
    pub fn disarm(&mut self) {
        self.armed.store(false, Ordering::SeqCst);
        if let Some(mut ticker) = self.ticker.take() {
            ticker.stop();
        }
    }

    /// Disarm and close the camera
    pub fn stop(&mut self) {
        self.disarm();
        if self.acquired {
            self.source.release();
            self.acquired = false;
            tracing::info!("Camera released");
        }
    }

    /// Handle one tick
    ///
    /// `Ok(None)` when disarmed or when the source has no frame yet.
    pub fn on_tick(&mut self) -> Result<Option<Envelope>, Error> {
        if !self.is_armed() {
            return Ok(None);
        }

        let frame = match self.source.grab()? {
            Some(frame) => frame,
            None => return Ok(None),
        };

        let envelope = self.encoder.encode(&frame)?;
        Ok(Some(envelope))
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    pub fn ticks_fired(&self) -> u64 {
        self.ticks_fired.load(Ordering::Relaxed)
    }

    pub fn bytes_encoded(&self) -> u64 {
        self.encoder.bytes_produced()
    }
}

impl Drop for VideoCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
