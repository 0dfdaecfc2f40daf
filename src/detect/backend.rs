use anyhow::Result;

use crate::detect::result::DetectedObject;

/// Detector backend trait.
///
/// Wraps the external person-detection model as an opaque function from
/// RGB pixels to detected objects. Implementations must restrict their
/// output to the person class; other classes are dropped by the caller.
///
/// `detect` takes `&mut self` because model runtimes keep scratch
/// buffers between calls. Callers serialize access through the
/// registry's per-backend mutex, which also bounds the number of
/// simultaneous model invocations to one.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run person detection on one RGB frame.
    ///
    /// `pixels` is tightly packed RGB8, `width * height * 3` bytes.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<DetectedObject>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
