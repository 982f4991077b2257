//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod playback;
pub mod resample;

pub use buffer::{AudioChunk, AudioFrame, FrameAccumulator};
pub use capture::{AudioCapture, AudioInput, CpalMicrophone, FrameSink};
pub use device::{find_input_device, find_output_device, list_devices, AudioDevice, AudioDeviceInfo};
pub use playback::{AudioOutput, CompletionSink, CpalSpeaker, PlaybackQueue, PlaybackState};
pub use resample::LinearResampler;
