//! Overlay drawing for the preview: face boxes with "label (NN%)" captions.

use crate::types::{BoundingBox, DetectionResult};
use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_THICKNESS: u32 = 2;
const CAPTION_GAP: i32 = 10;

/// A box in full-frame coordinates plus its caption.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub bbox: BoundingBox,
    pub caption: String,
}

/// Build overlays for cached results found on a frame downscaled by `scale`.
pub fn overlays(results: &[DetectionResult], scale: f32) -> Vec<Overlay> {
    results
        .iter()
        .map(|r| Overlay {
            bbox: r.bbox.rescale(scale),
            caption: format!("{} ({:.0}%)", r.label, r.confidence),
        })
        .collect()
}

/// Draws overlays onto frames. Captions need a font; without one only the
/// boxes are drawn.
pub struct Renderer {
    font: Option<FontVec>,
    text_scale: PxScale,
}

impl Renderer {
    pub fn new(font: Option<FontVec>) -> Self {
        Self {
            font,
            text_scale: PxScale::from(24.0),
        }
    }

    pub fn draw(&self, frame: &mut RgbImage, overlays: &[Overlay]) {
        for overlay in overlays {
            let b = &overlay.bbox;
            for inset in 0..BOX_THICKNESS {
                let w = b.width().saturating_sub(2 * inset);
                let h = b.height().saturating_sub(2 * inset);
                if w == 0 || h == 0 {
                    break;
                }
                let rect = Rect::at((b.left + inset) as i32, (b.top + inset) as i32).of_size(w, h);
                draw_hollow_rect_mut(frame, rect, BOX_COLOR);
            }

            if let Some(font) = &self.font {
                let y = b.top as i32 - CAPTION_GAP - self.text_scale.y as i32;
                draw_text_mut(
                    frame,
                    TEXT_COLOR,
                    b.left as i32,
                    y.max(0),
                    self.text_scale,
                    font,
                    &overlay.caption,
                );
            }
        }
    }
}
