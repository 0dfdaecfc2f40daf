//! Detection overlays for display and audit.

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

use crate::detect::DetectedObject;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: f32 = 16.0;

/// Draws bounding boxes and confidence labels on frame copies.
///
/// Labels need a TTF font; when none is configured only the boxes are
/// drawn.
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    pub fn new() -> Self {
        Self { font: None }
    }

    pub fn with_font_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("read label font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|_| anyhow::anyhow!("invalid font file {}", path.display()))?;
        Ok(Self { font: Some(font) })
    }

    /// Pure function of (image, detections): returns an annotated copy,
    /// never touching the input.
    pub fn annotate(&self, image: &RgbImage, objects: &[DetectedObject]) -> RgbImage {
        let mut out = image.clone();
        for obj in objects {
            self.draw_object(&mut out, obj);
        }
        out
    }

    fn draw_object(&self, image: &mut RgbImage, obj: &DetectedObject) {
        let (w, h) = image.dimensions();
        let x = (obj.bbox.x1.max(0.0) as i32).min(w.saturating_sub(1) as i32);
        let y = (obj.bbox.y1.max(0.0) as i32).min(h.saturating_sub(1) as i32);
        let bw = (obj.bbox.width() as u32).clamp(1, w);
        let bh = (obj.bbox.height() as u32).clamp(1, h);

        for offset in 0..BOX_THICKNESS {
            let rect = Rect::at(x - offset, y - offset)
                .of_size(bw + (offset * 2) as u32, bh + (offset * 2) as u32);
            draw_hollow_rect_mut(image, rect, BOX_COLOR);
        }

        if let Some(font) = &self.font {
            let label = format!("person {:.2}", obj.confidence);
            let text_y = (y - LABEL_SCALE as i32 - 2).max(0);
            draw_text_mut(
                image,
                BOX_COLOR,
                x,
                text_y,
                PxScale::from(LABEL_SCALE),
                font,
                &label,
            );
        }
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new()
    }
}
