//! Audio device enumeration and stream configuration

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// Device description for UI collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// Wrapper around cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
    pub is_input: bool,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device, is_input: bool) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
            is_input,
        }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    /// Choose a stream config as close to `target_rate` mono f32 as the device allows
    ///
    /// Returns the config and whether it runs at `target_rate`. When it does
    /// not, the caller resamples.
    pub fn stream_config_for(&self, target_rate: u32) -> Result<(cpal::StreamConfig, bool), DeviceError> {
        let (ranges, default) = if self.is_input {
            let ranges: Vec<_> = self
                .inner
                .supported_input_configs()
                .map(|iter| iter.collect())
                .map_err(|e| DeviceError::Unavailable(e.to_string()))?;
            let default = self
                .inner
                .default_input_config()
                .map_err(|e| DeviceError::Unavailable(e.to_string()))?;
            (ranges, default)
        } else {
            let ranges: Vec<_> = self
                .inner
                .supported_output_configs()
                .map(|iter| iter.collect())
                .map_err(|e| DeviceError::Unavailable(e.to_string()))?;
            let default = self
                .inner
                .default_output_config()
                .map_err(|e| DeviceError::Unavailable(e.to_string()))?;
            (ranges, default)
        };

        let target = cpal::SampleRate(target_rate);
        let exact = ranges
            .into_iter()
            .filter(|r| r.sample_format() == cpal::SampleFormat::F32)
            .filter(|r| r.min_sample_rate() <= target && target <= r.max_sample_rate())
            .min_by_key(|r| r.channels());

        match exact {
            Some(range) => Ok((range.with_sample_rate(target).config(), true)),
            None => {
                if default.sample_format() != cpal::SampleFormat::F32 {
                    return Err(DeviceError::UnsupportedFormat(format!(
                        "{} has no f32 stream (default is {:?})",
                        self.name,
                        default.sample_format()
                    )));
                }
                let config = default.config();
                let exact = config.sample_rate == target;
                Ok((config, exact))
            }
        }
    }
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<AudioDeviceInfo> = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = get_device_capabilities(&device, true);
                devices.push(AudioDeviceInfo {
                    is_default: default_input_name.as_ref() == Some(&name),
                    name,
                    is_input: true,
                    is_output: false,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let is_default = default_output_name.as_ref() == Some(&name);

                // Duplex devices show up once
                if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                    existing.is_output = true;
                    existing.is_default |= is_default;
                    continue;
                }

                let (sample_rates, channels) = get_device_capabilities(&device, false);
                devices.push(AudioDeviceInfo {
                    name,
                    is_input: false,
                    is_output: true,
                    is_default,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    devices
}

/// Get device capabilities
fn get_device_capabilities(device: &cpal::Device, is_input: bool) -> (Vec<u32>, Vec<u16>) {
    let configs: Vec<cpal::SupportedStreamConfigRange> = if is_input {
        device
            .supported_input_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default()
    } else {
        device
            .supported_output_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default()
    };

    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();
    for config in configs {
        for rate_val in [16000u32, 24000, 44100, 48000, 96000] {
            let rate = cpal::SampleRate(rate_val);
            if rate >= config.min_sample_rate()
                && rate <= config.max_sample_rate()
                && !sample_rates.contains(&rate_val)
            {
                sample_rates.push(rate_val);
            }
        }

        let ch = config.channels();
        if !channels.contains(&ch) {
            channels.push(ch);
        }
    }

    sample_rates.sort();
    channels.sort();
    (sample_rates, channels)
}

/// Find an input device by name, or the host default when `name` is `None`
pub fn find_input_device(name: Option<&str>) -> Result<AudioDevice, DeviceError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .map(|d| AudioDevice::from_cpal(d, true))
            .ok_or_else(|| DeviceError::NotFound("No default input device".to_string())),
        Some(name) => {
            let devices = host
                .input_devices()
                .map_err(|e| DeviceError::Unavailable(e.to_string()))?;
            find_named(devices, name, true)
        }
    }
}

/// Find an output device by name, or the host default when `name` is `None`
pub fn find_output_device(name: Option<&str>) -> Result<AudioDevice, DeviceError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .map(|d| AudioDevice::from_cpal(d, false))
            .ok_or_else(|| DeviceError::NotFound("No default output device".to_string())),
        Some(name) => {
            let devices = host
                .output_devices()
                .map_err(|e| DeviceError::Unavailable(e.to_string()))?;
            find_named(devices, name, false)
        }
    }
}

fn find_named(
    devices: impl Iterator<Item = cpal::Device>,
    name: &str,
    is_input: bool,
) -> Result<AudioDevice, DeviceError> {
    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(AudioDevice::from_cpal(device, is_input));
        }
    }
    Err(DeviceError::NotFound(name.to_string()))
}
