use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, DetectedObject, PERSON_CLASS_ID};

/// Stub backend for testing and bring-up without a model.
///
/// Reports a single full-frame person when the mean pixel intensity of
/// the frame crosses a threshold. Dark frames read as empty, bright
/// frames read as occupied, so scripted test frames can toggle presence
/// deterministically.
pub struct StubBackend {
    luma_threshold: u8,
}

impl StubBackend {
    pub fn new(luma_threshold: u8) -> Self {
        Self { luma_threshold }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new(128)
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<DetectedObject>> {
        if pixels.is_empty() {
            return Ok(vec![]);
        }

        let sum: u64 = pixels.iter().map(|&b| b as u64).sum();
        let mean = (sum / pixels.len() as u64) as u8;

        if mean >= self.luma_threshold {
            Ok(vec![DetectedObject {
                class_id: PERSON_CLASS_ID,
                confidence: 0.85,
                bbox: BoundingBox {
                    x1: 0.0,
                    y1: 0.0,
                    x2: width as f32,
                    y2: height as f32,
                },
            }])
        } else {
            Ok(vec![])
        }
    }
}
