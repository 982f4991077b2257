//! JPEG snapshot encoder
//!
//! Draws a camera frame onto an off-screen RGB raster (downscaled to the
//! configured width) and compresses it for the `image` envelope.

use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};

use crate::codec::to_base64;
use crate::error::CodecError;
use crate::protocol::Envelope;

pub struct JpegEncoder {
    quality: u8,
    max_width: u32,
    bytes_produced: u64,
}

impl JpegEncoder {
    pub fn new(quality: u8, max_width: u32) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            max_width: max_width.max(1),
            bytes_produced: 0,
        }
    }

    /// Render `frame` into the raster that gets compressed
    pub fn rasterize(&self, frame: &DynamicImage) -> RgbImage {
        let rgb = frame.to_rgb8();
        let (width, height) = rgb.dimensions();
        if width <= self.max_width {
            return rgb;
        }

        let scaled_height = ((height as u64 * self.max_width as u64) / width as u64).max(1) as u32;
        imageops::resize(&rgb, self.max_width, scaled_height, FilterType::Triangle)
    }

    /// Compress a frame to JPEG bytes
    pub fn encode_jpeg(&mut self, frame: &DynamicImage) -> Result<Vec<u8>, CodecError> {
        let raster = self.rasterize(frame);

        let mut out = Vec::new();
        ImageJpegEncoder::new_with_quality(&mut out, self.quality)
            .encode_image(&raster)
            .map_err(|e| CodecError::ImageEncoding(e.to_string()))?;

        self.bytes_produced += out.len() as u64;
        Ok(out)
    }

    /// Compress a frame straight into an `image` envelope
    pub fn encode(&mut self, frame: &DynamicImage) -> Result<Envelope, CodecError> {
        let jpeg = self.encode_jpeg(frame)?;
        Ok(Envelope::Image {
            data: to_base64(&jpeg),
        })
    }

    /// Total JPEG bytes produced so far
    pub fn bytes_produced(&self) -> u64 {
        self.bytes_produced
    }
}
