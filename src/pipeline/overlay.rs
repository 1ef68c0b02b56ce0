//! Box and label rendering onto annotated frames.

use image::{Rgb, RgbImage};

use crate::detect::BoundingBox;

/// Label text color.
pub const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
/// Glyph magnification for label text.
const TEXT_SCALE: u32 = 3;
const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;
const GLYPH_ADVANCE: u32 = GLYPH_W + 1;

/// `"<label> (93.4%)"`
pub fn format_label(label: &str, confidence: f32) -> String {
    format!("{} ({:.1}%)", label, confidence * 100.0)
}

/// Draw `bbox` (source-pixel corners) with its confidence label.
pub fn draw_detection(
    img: &mut RgbImage,
    bbox: &BoundingBox,
    label: &str,
    color: Rgb<u8>,
    thickness: u32,
) {
    draw_rect(img, bbox, color, thickness);

    let text = format_label(label, bbox.confidence);
    let baseline = (bbox.y1 - 5.0).max(10.0);
    let top = baseline - (GLYPH_H * TEXT_SCALE) as f32;
    draw_text(
        img,
        &text,
        bbox.x1.max(0.0) as u32,
        top.max(0.0) as u32,
        LABEL_COLOR,
    );
}

/// Draw a rectangle border `thickness` pixels wide, growing inward.
///
/// Corners are rounded to the nearest pixel and clipped to the image; a box
/// entirely outside the image draws nothing.
pub fn draw_rect(img: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: u32) {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let max_x = w as i64 - 1;
    let max_y = h as i64 - 1;
    let x0 = bbox.x1.round() as i64;
    let y0 = bbox.y1.round() as i64;
    let x1 = bbox.x2.round() as i64;
    let y1 = bbox.y2.round() as i64;
    if x1 < 0 || y1 < 0 || x0 > max_x || y0 > max_y || x0 > x1 || y0 > y1 {
        return;
    }

    for t in 0..thickness as i64 {
        let (xx0, yy0, xx1, yy1) = (x0 + t, y0 + t, x1 - t, y1 - t);
        if xx0 > xx1 || yy0 > yy1 {
            break;
        }
        for x in xx0.max(0)..=xx1.min(max_x) {
            if (0..=max_y).contains(&yy0) {
                img.put_pixel(x as u32, yy0 as u32, color);
            }
            if (0..=max_y).contains(&yy1) {
                img.put_pixel(x as u32, yy1 as u32, color);
            }
        }
        for y in yy0.max(0)..=yy1.min(max_y) {
            if (0..=max_x).contains(&xx0) {
                img.put_pixel(xx0 as u32, y as u32, color);
            }
            if (0..=max_x).contains(&xx1) {
                img.put_pixel(xx1 as u32, y as u32, color);
            }
        }
    }
}

/// Draw `text` with the built-in 5x7 font, top-left corner at `(x, y)`.
///
/// Lowercase letters render as uppercase; unknown characters advance blank.
pub fn draw_text(img: &mut RgbImage, text: &str, x: u32, y: u32, color: Rgb<u8>) {
    let (w, h) = img.dimensions();
    let mut cursor = x;
    for ch in text.chars() {
        if cursor >= w {
            break;
        }
        if let Some(rows) = glyph(ch.to_ascii_uppercase()) {
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..GLYPH_W {
                    if bits & (1 << (GLYPH_W - 1 - col)) == 0 {
                        continue;
                    }
                    let px = cursor + col * TEXT_SCALE;
                    let py = y + row as u32 * TEXT_SCALE;
                    for dy in 0..TEXT_SCALE {
                        for dx in 0..TEXT_SCALE {
                            if px + dx < w && py + dy < h {
                                img.put_pixel(px + dx, py + dy, color);
                            }
                        }
                    }
                }
            }
        }
        cursor = cursor.saturating_add(GLYPH_ADVANCE * TEXT_SCALE);
    }
}

fn glyph(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '%' => [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgb<u8> = Rgb([255, 0, 0]);
    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32) -> BoundingBox {
        BoundingBox {
            x1,
            y1,
            x2,
            y2,
            confidence: 0.934,
            class_id: 0,
        }
    }

    #[test]
    fn label_has_one_decimal_percent() {
        assert_eq!(format_label("Detected Cube", 0.934), "Detected Cube (93.4%)");
    }

    #[test]
    fn rect_border_has_requested_thickness() {
        let mut img = RgbImage::new(40, 40);
        draw_rect(&mut img, &bbox(5.0, 5.0, 20.0, 20.0), RED, 2);
        for &(x, y) in &[(5, 5), (20, 5), (5, 20), (20, 20), (6, 6), (12, 6)] {
            assert_eq!(img.get_pixel(x, y), &RED, "({x}, {y})");
        }
        assert_eq!(img.get_pixel(7, 7), &BLACK);
        assert_eq!(img.get_pixel(12, 12), &BLACK);
        assert_eq!(img.get_pixel(4, 4), &BLACK);
    }

    #[test]
    fn rect_is_clipped_to_image() {
        let mut img = RgbImage::new(10, 10);
        draw_rect(&mut img, &bbox(-5.0, -5.0, 30.0, 4.0), RED, 1);
        assert_eq!(img.get_pixel(0, 4), &RED);
        assert_eq!(img.get_pixel(9, 4), &RED);
        assert_eq!(img.get_pixel(5, 5), &BLACK);

        let mut untouched = RgbImage::new(10, 10);
        draw_rect(&mut untouched, &bbox(50.0, 50.0, 60.0, 60.0), RED, 3);
        assert!(untouched.pixels().all(|p| *p == BLACK));
    }

    #[test]
    fn detection_draws_label_above_box() {
        let mut img = RgbImage::new(400, 200);
        draw_detection(&mut img, &bbox(20.0, 100.0, 200.0, 180.0), "Cube", RED, 4);
        // Label band sits between y = 74 and y = 95.
        let label_pixels = (74..95)
            .flat_map(|y| (20..380).map(move |x| (x, y)))
            .filter(|&(x, y)| img.get_pixel(x, y) == &LABEL_COLOR)
            .count();
        assert!(label_pixels > 0);
        assert_eq!(img.get_pixel(20, 100), &RED);
    }
}
