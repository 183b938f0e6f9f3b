//! Frame source abstraction.

use crate::camera::CameraError;
use crate::frame::Frame;

/// Something that yields the current camera frame on demand.
///
/// The engine thread owns exactly one source and calls `capture` for every
/// training sample and every inference tick.
pub trait CaptureSource {
    fn capture(&mut self) -> Result<Frame, CameraError>;

    /// Human-readable source name for logs and status.
    fn describe(&self) -> String {
        "capture source".to_string()
    }
}

/// Discard `warmup_frames` frames, then return the first frame the source delivers.
///
/// Warmup capture errors are ignored. A dark first frame is accepted and
/// only logged; brightness is not a readiness condition.
pub fn first_frame<S: CaptureSource + ?Sized>(
    source: &mut S,
    warmup_frames: usize,
) -> Result<Frame, CameraError> {
    if warmup_frames > 0 {
        tracing::info!(count = warmup_frames, "discarding warmup frames");
        for _ in 0..warmup_frames {
            let _ = source.capture();
        }
    }

    let first = source.capture()?;
    if first.is_dark {
        tracing::warn!(
            source = %source.describe(),
            brightness = first.avg_brightness(),
            "first frame is dark; check lighting or lens cover"
        );
    }
    Ok(first)
}
