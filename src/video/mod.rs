//! Camera snapshot subsystem

pub mod capture;
pub mod source;

pub use capture::{TickSink, VideoCapture};
pub use source::{ImageFileSource, TestPatternSource, VideoSource};
