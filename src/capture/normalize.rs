#![cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]

use anyhow::{anyhow, Context, Result};
use image::{imageops, RgbImage};

use super::{Rect, Size};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Nv12,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Result<Self> {
        match fourcc {
            b"RGB3" => Ok(Self::Rgb24),
            b"NV12" => Ok(Self::Nv12),
            other => Err(anyhow!(
                "unsupported pixel format {}",
                String::from_utf8_lossy(other)
            )),
        }
    }
}

/// Convert a raw device buffer into an RGB image.
pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<RgbImage> {
    let rgb = match format {
        PixelFormat::Rgb24 => {
            let expected = width
                .checked_mul(height)
                .and_then(|v| v.checked_mul(3))
                .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))? as usize;
            // Drivers may hand back a buffer padded past the image.
            if pixels.len() < expected {
                return Err(anyhow!(
                    "RGB frame length mismatch: expected {}, got {}",
                    expected,
                    pixels.len()
                ));
            }
            pixels[..expected].to_vec()
        }
        PixelFormat::Nv12 => nv12_to_rgb(pixels, width, height)?,
    };
    RgbImage::from_raw(width, height, rgb).context("frame buffer does not fit dimensions")
}

fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = w
        .checked_mul(h)
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    let expected = y_plane
        .checked_add(y_plane / 2)
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    if pixels.len() < expected {
        return Err(anyhow!(
            "NV12 frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;

            let offset = (j * w + i) * 3;
            rgb[offset] = clamp_to_u8(y + 1.402 * v);
            rgb[offset + 1] = clamp_to_u8(y - 0.344_136 * u - 0.714_136 * v);
            rgb[offset + 2] = clamp_to_u8(y + 1.772 * u);
        }
    }

    Ok(rgb)
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Software zoom: cut `crop` (in `active` coordinates) out of a full-sensor
/// frame and scale it to `out`.
pub(crate) fn crop_and_scale(frame: &RgbImage, crop: Rect, active: Rect, out: Size) -> RgbImage {
    let (fw, fh) = frame.dimensions();
    let sx = fw as f64 / active.width.max(1) as f64;
    let sy = fh as f64 / active.height.max(1) as f64;
    let left = ((crop.left.saturating_sub(active.left)) as f64 * sx) as u32;
    let top = ((crop.top.saturating_sub(active.top)) as f64 * sy) as u32;
    let left = left.min(fw.saturating_sub(1));
    let top = top.min(fh.saturating_sub(1));
    let width = ((crop.width as f64 * sx) as u32).clamp(1, fw - left);
    let height = ((crop.height as f64 * sy) as u32).clamp(1, fh - top);

    let view = imageops::crop_imm(frame, left, top, width, height).to_image();
    if view.dimensions() == (out.width, out.height) {
        return view;
    }
    imageops::resize(&view, out.width, out.height, imageops::FilterType::Triangle)
}
