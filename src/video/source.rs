//! Camera capability providers

use image::{DynamicImage, Rgb, RgbImage};
use std::path::PathBuf;

use crate::error::DeviceError;

/// Live video source sampled by the snapshot pipeline
pub trait VideoSource: Send {
    /// Open the camera
    fn acquire(&mut self) -> Result<(), DeviceError>;

    /// Current live frame, or `None` if no frame is available yet
    fn grab(&mut self) -> Result<Option<DynamicImage>, DeviceError>;

    /// Close the camera
    fn release(&mut self);
}

/// Synthetic moving gradient, for running without a camera
pub struct TestPatternSource {
    width: u32,
    height: u32,
    frame: u32,
    active: bool,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            frame: 0,
            active: false,
        }
    }
}

impl VideoSource for TestPatternSource {
    fn acquire(&mut self) -> Result<(), DeviceError> {
        self.active = true;
        self.frame = 0;
        Ok(())
    }

    fn grab(&mut self) -> Result<Option<DynamicImage>, DeviceError> {
        if !self.active {
            return Err(DeviceError::Unavailable("test pattern not started".to_string()));
        }

        let offset = self.frame.wrapping_mul(8);
        self.frame = self.frame.wrapping_add(1);

        let image = RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([
                (x.wrapping_add(offset) % 256) as u8,
                (y.wrapping_add(offset) % 256) as u8,
                (offset % 256) as u8,
            ])
        });
        Ok(Some(DynamicImage::ImageRgb8(image)))
    }

    fn release(&mut self) {
        self.active = false;
    }
}

/// Re-reads an image file on every grab
///
/// Pairs with any external tool that keeps overwriting a snapshot file.
pub struct ImageFileSource {
    path: PathBuf,
    active: bool,
}

impl ImageFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            active: false,
        }
    }
}

impl VideoSource for ImageFileSource {
    fn acquire(&mut self) -> Result<(), DeviceError> {
        if !self.path.is_file() {
            return Err(DeviceError::NotFound(self.path.display().to_string()));
        }
        self.active = true;
        Ok(())
    }

    fn grab(&mut self) -> Result<Option<DynamicImage>, DeviceError> {
        if !self.active {
            return Err(DeviceError::Unavailable(self.path.display().to_string()));
        }

        match image::open(&self.path) {
            Ok(image) => Ok(Some(image)),
            Err(image::ImageError::IoError(e)) => {
                Err(DeviceError::Unavailable(format!("{}: {}", self.path.display(), e)))
            }
            Err(e) => {
                // Usually caught mid-write; try again next tick
                tracing::debug!("Skipping unreadable frame {}: {}", self.path.display(), e);
                Ok(None)
            }
        }
    }

    fn release(&mut self) {
        self.active = false;
    }
}
