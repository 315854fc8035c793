//! Image loading and resizing helpers shared by enrollment and the live loop.

use image::imageops::{self, FilterType};
use image::RgbImage;
use std::path::Path;

/// Load an image file as 8-bit RGB.
pub fn load_rgb(path: &Path) -> Result<RgbImage, image::ImageError> {
    Ok(image::open(path)?.to_rgb8())
}

/// Shrink `image` so its longest side is at most `max_dim`, keeping the
/// aspect ratio. Images already within bounds are returned unchanged.
pub fn downscale(image: RgbImage, max_dim: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let longest = w.max(h);
    if longest <= max_dim || max_dim == 0 {
        return image;
    }
    let ratio = max_dim as f64 / longest as f64;
    let nw = ((w as f64 * ratio).round() as u32).clamp(1, max_dim);
    let nh = ((h as f64 * ratio).round() as u32).clamp(1, max_dim);
    imageops::resize(&image, nw, nh, FilterType::Triangle)
}

/// Resize by a uniform factor (e.g. 0.25 for quarter resolution).
pub fn scale(image: &RgbImage, factor: f32) -> RgbImage {
    let (w, h) = image.dimensions();
    let nw = ((w as f32 * factor).round() as u32).max(1);
    let nh = ((h as f32 * factor).round() as u32).max(1);
    if (nw, nh) == (w, h) {
        return image.clone();
    }
    imageops::resize(image, nw, nh, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downscale_limits_longest_side() {
        let out = downscale(RgbImage::new(3200, 1200), 1600);
        assert_eq!(out.dimensions(), (1600, 600));

        let out = downscale(RgbImage::new(900, 2000), 1600);
        assert_eq!(out.dimensions(), (720, 1600));
    }

    #[test]
    fn test_downscale_never_upscales() {
        let out = downscale(RgbImage::new(640, 480), 1600);
        assert_eq!(out.dimensions(), (640, 480));
    }

    #[test]
    fn test_scale_by_factor() {
        assert_eq!(scale(&RgbImage::new(640, 480), 0.25).dimensions(), (160, 120));
        assert_eq!(scale(&RgbImage::new(3, 3), 0.1).dimensions(), (1, 1));
        assert_eq!(scale(&RgbImage::new(64, 48), 1.0).dimensions(), (64, 48));
    }

    #[test]
    fn test_load_rgb_reads_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        RgbImage::from_pixel(4, 2, image::Rgb([9, 8, 7])).save(&path).unwrap();
        let loaded = load_rgb(&path).unwrap();
        assert_eq!(loaded.get_pixel(3, 1).0, [9, 8, 7]);

        let junk = dir.path().join("junk.jpg");
        std::fs::write(&junk, b"not an image").unwrap();
        assert!(load_rgb(&junk).is_err());
    }
}
