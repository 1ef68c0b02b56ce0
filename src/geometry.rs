//! Letterbox geometry.
//!
//! Three coordinate spaces meet in the frame pipeline:
//! - source pixels (the camera frame as delivered),
//! - model-input pixels (the fixed-size letterboxed image),
//! - model-normalized units (model-input pixels divided by the input size).
//!
//! `compute_letterbox` maps source pixels into model-input pixels and
//! `rescale_to_source` maps a normalized detection back. The two are exact
//! algebraic inverses for a given `(src, input)` size pair.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::detect::{BoundingBox, Detection};

/// Border color used for letterbox padding.
pub const PAD_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

/// Forward letterbox mapping for one `(src, dst)` size pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    /// `min(dst_w / src_w, dst_h / src_h)`.
    pub scale: f64,
    pub resized_width: u32,
    pub resized_height: u32,
    pub pad_left: u32,
    pub pad_top: u32,
}

impl Letterbox {
    /// Padding as `(left, top)`.
    pub fn pad(&self) -> (u32, u32) {
        (self.pad_left, self.pad_top)
    }
}

/// A letterboxed image together with the mapping that produced it.
///
/// `image` always has exactly the requested model-input dimensions.
pub struct LetterboxResult {
    pub image: RgbImage,
    pub letterbox: Letterbox,
}

/// Compute scale and padding for fitting `src` into `dst` without distortion.
///
/// Resized dimensions are `round(src * scale)`; the padding remainder (if odd)
/// goes to the right/bottom side.
pub fn compute_letterbox(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Result<Letterbox> {
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return Err(anyhow!(
            "letterbox dimensions must be non-zero (src {}x{}, dst {}x{})",
            src_w,
            src_h,
            dst_w,
            dst_h
        ));
    }

    let scale = (dst_w as f64 / src_w as f64).min(dst_h as f64 / src_h as f64);
    let resized_width = ((src_w as f64 * scale).round() as u32).clamp(1, dst_w);
    let resized_height = ((src_h as f64 * scale).round() as u32).clamp(1, dst_h);

    Ok(Letterbox {
        scale,
        resized_width,
        resized_height,
        pad_left: (dst_w - resized_width) / 2,
        pad_top: (dst_h - resized_height) / 2,
    })
}

/// Resize `src` into a `dst_w`x`dst_h` canvas, padding with [`PAD_COLOR`].
pub fn letterbox_image(src: &RgbImage, dst_w: u32, dst_h: u32) -> Result<LetterboxResult> {
    let letterbox = compute_letterbox(src.width(), src.height(), dst_w, dst_h)?;

    let mut canvas = RgbImage::from_pixel(dst_w, dst_h, PAD_COLOR);
    if (letterbox.resized_width, letterbox.resized_height) == src.dimensions() {
        imageops::replace(
            &mut canvas,
            src,
            letterbox.pad_left as i64,
            letterbox.pad_top as i64,
        );
    } else {
        let resized = imageops::resize(
            src,
            letterbox.resized_width,
            letterbox.resized_height,
            FilterType::Triangle,
        );
        imageops::replace(
            &mut canvas,
            &resized,
            letterbox.pad_left as i64,
            letterbox.pad_top as i64,
        );
    }

    Ok(LetterboxResult {
        image: canvas,
        letterbox,
    })
}

fn input_scale(src_w: u32, src_h: u32, in_w: u32, in_h: u32) -> f64 {
    (in_w as f64 / src_w as f64).min(in_h as f64 / src_h as f64)
}

/// Map a model-normalized detection back into source-image pixels.
///
/// Center/size are multiplied by the input size, the padding is removed, the
/// result is divided by the letterbox scale and converted to corner form.
/// Negative extents are taken by magnitude so corners stay ordered.
/// All sizes must be non-zero.
pub fn rescale_to_source(
    detection: &Detection,
    src_w: u32,
    src_h: u32,
    pad: (u32, u32),
    in_w: u32,
    in_h: u32,
) -> BoundingBox {
    let scale = input_scale(src_w, src_h, in_w, in_h);
    let (pad_left, pad_top) = (pad.0 as f64, pad.1 as f64);

    let cx = (detection.center_x as f64 * in_w as f64 - pad_left) / scale;
    let cy = (detection.center_y as f64 * in_h as f64 - pad_top) / scale;
    let w = (detection.width as f64 * in_w as f64 / scale).abs();
    let h = (detection.height as f64 * in_h as f64 / scale).abs();

    BoundingBox {
        x1: (cx - w / 2.0) as f32,
        y1: (cy - h / 2.0) as f32,
        x2: (cx + w / 2.0) as f32,
        y2: (cy + h / 2.0) as f32,
        confidence: detection.confidence,
        class_id: 0,
    }
}

/// Forward counterpart of [`rescale_to_source`]: project a source-pixel box
/// into model-normalized center form.
pub fn project_to_input(
    bbox: &BoundingBox,
    src_w: u32,
    src_h: u32,
    pad: (u32, u32),
    in_w: u32,
    in_h: u32,
) -> Detection {
    let scale = input_scale(src_w, src_h, in_w, in_h);
    let (pad_left, pad_top) = (pad.0 as f64, pad.1 as f64);

    let cx = (bbox.x1 as f64 + bbox.x2 as f64) / 2.0;
    let cy = (bbox.y1 as f64 + bbox.y2 as f64) / 2.0;
    let w = bbox.x2 as f64 - bbox.x1 as f64;
    let h = bbox.y2 as f64 - bbox.y1 as f64;

    Detection {
        center_x: ((cx * scale + pad_left) / in_w as f64) as f32,
        center_y: ((cy * scale + pad_top) / in_h as f64) as f32,
        width: (w * scale / in_w as f64) as f32,
        height: (h * scale / in_h as f64) as f32,
        confidence: bbox.confidence,
    }
}

/// Intersection-over-union of two corner-form boxes.
///
/// Returns 0 for disjoint boxes or a degenerate union; never negative.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let ix1 = a.x1.max(b.x1);
    let iy1 = a.y1.max(b.y1);
    let ix2 = a.x2.min(b.x2);
    let iy2 = a.y2.min(b.y2);
    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let union = a.area() + b.area() - inter;
    if union > 0.0 && inter > 0.0 {
        (inter / union).max(0.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32) -> BoundingBox {
        BoundingBox {
            x1,
            y1,
            x2,
            y2,
            confidence: 1.0,
            class_id: 0,
        }
    }

    #[test]
    fn letterbox_wide_source_pads_top_and_bottom() -> Result<()> {
        let lb = compute_letterbox(1280, 720, 416, 416)?;
        assert!((lb.scale - 0.325).abs() < 1e-9);
        assert_eq!(lb.resized_width, 416);
        assert_eq!(lb.resized_height, 234);
        assert_eq!(lb.pad_left, 0);
        assert_eq!(lb.pad_top, 91);
        Ok(())
    }

    #[test]
    fn letterbox_odd_padding_goes_to_trailing_side() -> Result<()> {
        // 100x101 into 64x64: scale = 64/101, resized width = round(63.37) = 63.
        let lb = compute_letterbox(100, 101, 64, 64)?;
        assert_eq!(lb.resized_height, 64);
        assert_eq!(lb.resized_width, 63);
        assert_eq!(lb.pad_left, 0);
        assert_eq!(lb.pad_top, 0);

        let lb = compute_letterbox(10, 3, 20, 20)?;
        assert_eq!(lb.resized_width, 20);
        assert_eq!(lb.resized_height, 6);
        assert_eq!(lb.pad_top, 7);
        assert_eq!(20 - lb.resized_height - lb.pad_top, 7);

        let lb = compute_letterbox(10, 3, 20, 21)?;
        assert_eq!(lb.pad_top, 7);
        assert_eq!(21 - lb.resized_height - lb.pad_top, 8);
        Ok(())
    }

    #[test]
    fn letterbox_padding_fills_target_within_one_pixel() -> Result<()> {
        for &(sw, sh) in &[(1, 1), (3, 7), (640, 480), (1920, 1080), (719, 1281)] {
            for &(dw, dh) in &[(1, 1), (32, 17), (416, 416), (640, 384)] {
                let lb = compute_letterbox(sw, sh, dw, dh)?;
                let width_fill = lb.pad_left * 2 + lb.resized_width;
                let height_fill = lb.pad_top * 2 + lb.resized_height;
                assert!(width_fill.abs_diff(dw) <= 1, "{sw}x{sh} -> {dw}x{dh}");
                assert!(height_fill.abs_diff(dh) <= 1, "{sw}x{sh} -> {dw}x{dh}");
            }
        }
        Ok(())
    }

    #[test]
    fn letterbox_rejects_zero_dimensions() {
        assert!(compute_letterbox(0, 10, 10, 10).is_err());
        assert!(compute_letterbox(10, 10, 10, 0).is_err());
    }

    #[test]
    fn letterbox_image_has_model_dimensions_and_black_border() -> Result<()> {
        let src = RgbImage::from_pixel(200, 100, Rgb([255, 255, 255]));
        let out = letterbox_image(&src, 64, 64)?;
        assert_eq!(out.image.dimensions(), (64, 64));
        assert_eq!(out.letterbox.pad_top, 16);
        assert_eq!(out.image.get_pixel(32, 0), &PAD_COLOR);
        assert_eq!(out.image.get_pixel(32, 63), &PAD_COLOR);
        assert_eq!(out.image.get_pixel(32, 32), &Rgb([255, 255, 255]));
        Ok(())
    }

    #[test]
    fn rescale_identity_letterbox() {
        let det = Detection {
            center_x: 0.5,
            center_y: 0.5,
            width: 0.2,
            height: 0.2,
            confidence: 0.9,
        };
        let b = rescale_to_source(&det, 1000, 1000, (0, 0), 1000, 1000);
        assert!((b.x1 - 400.0).abs() < 1e-3);
        assert!((b.y1 - 400.0).abs() < 1e-3);
        assert!((b.x2 - 600.0).abs() < 1e-3);
        assert!((b.y2 - 600.0).abs() < 1e-3);
        assert_eq!(b.confidence, 0.9);
        assert_eq!(b.class_id, 0);
    }

    #[test]
    fn rescale_orders_corners_for_negative_extents() {
        let det = Detection {
            center_x: 0.5,
            center_y: 0.5,
            width: -0.2,
            height: 0.2,
            confidence: 0.9,
        };
        let b = rescale_to_source(&det, 1000, 1000, (0, 0), 1000, 1000);
        assert!(b.x1 <= b.x2);
        assert!((b.x1 - 400.0).abs() < 1e-3);
        assert!((b.x2 - 600.0).abs() < 1e-3);
    }

    #[test]
    fn rescale_is_inverse_of_projection() -> Result<()> {
        let sizes = [(1280, 720), (720, 1280), (333, 777), (416, 416), (64, 2000)];
        let inputs = [(416, 416), (640, 384), (320, 320)];
        for &(sw, sh) in &sizes {
            for &(iw, ih) in &inputs {
                let lb = compute_letterbox(sw, sh, iw, ih)?;
                let original = bbox(
                    sw as f32 * 0.1,
                    sh as f32 * 0.3,
                    sw as f32 * 0.45,
                    sh as f32 * 0.9,
                );
                let det = project_to_input(&original, sw, sh, lb.pad(), iw, ih);
                let back = rescale_to_source(&det, sw, sh, lb.pad(), iw, ih);
                let tol = 1e-2;
                assert!((back.x1 - original.x1).abs() < tol, "{sw}x{sh} {iw}x{ih}");
                assert!((back.y1 - original.y1).abs() < tol, "{sw}x{sh} {iw}x{ih}");
                assert!((back.x2 - original.x2).abs() < tol, "{sw}x{sh} {iw}x{ih}");
                assert!((back.y2 - original.y2).abs() < tol, "{sw}x{sh} {iw}x{ih}");
            }
        }
        Ok(())
    }

    #[test]
    fn iou_basics() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);

        let b = bbox(5.0, 0.0, 15.0, 10.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);

        let far = bbox(20.0, 20.0, 30.0, 30.0);
        assert_eq!(iou(&a, &far), 0.0);

        let touching = bbox(10.0, 0.0, 20.0, 10.0);
        assert_eq!(iou(&a, &touching), 0.0);

        let point = bbox(1.0, 1.0, 1.0, 1.0);
        assert_eq!(iou(&point, &point), 0.0);
    }
}
