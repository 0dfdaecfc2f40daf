use serde::{Deserialize, Serialize};

/// COCO class id for "person". The only class this daemon acts on.
pub const PERSON_CLASS_ID: u32 = 0;

/// One detected object, produced fresh per frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectedObject {
    pub class_id: u32,
    /// Confidence in [0, 1].
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Axis-aligned box in pixel coordinates of the source frame.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }
}

impl DetectedObject {
    pub fn is_person(&self) -> bool {
        self.class_id == PERSON_CLASS_ID
    }
}
