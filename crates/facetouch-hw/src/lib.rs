//! facetouch-hw: Webcam access for the touch monitor.
//!
//! Provides V4L2 capture with grayscale conversion behind the
//! `CaptureSource` trait.

pub mod camera;
pub mod capture;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use capture::{first_frame, CaptureSource};
pub use frame::Frame;
