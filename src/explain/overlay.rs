//! Heatmap resizing, jet colorization and alpha blending onto the input.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, Rgb, RgbImage};

use crate::error::{Error, Result};
use crate::explain::gradcam::Heatmap;

/// Weight of the original pixels in the blended overlay.
pub const ORIGINAL_WEIGHT: f64 = 0.6;
/// Weight of the colorized heatmap in the blended overlay.
pub const HEATMAP_WEIGHT: f64 = 0.4;
/// JPEG quality used for stored and transported overlays.
pub const JPEG_QUALITY: u8 = 95;

/// Bilinear resize with half-pixel centers. Output values are clamped to
/// [0, 1] so later 8-bit scaling can never wrap.
pub fn resize_heatmap(heatmap: &Heatmap, width: usize, height: usize) -> Heatmap {
    if heatmap.width == 0 || heatmap.height == 0 {
        return Heatmap { height, width, values: vec![0.0; width * height] };
    }
    let scale_x = heatmap.width as f64 / width.max(1) as f64;
    let scale_y = heatmap.height as f64 / height.max(1) as f64;
    let mut values = Vec::with_capacity(width * height);

    for y in 0..height {
        let (y0, y1, fy) = source_coord(y, scale_y, heatmap.height);
        for x in 0..width {
            let (x0, x1, fx) = source_coord(x, scale_x, heatmap.width);
            let top = heatmap.get(y0, x0) * (1.0 - fx) + heatmap.get(y0, x1) * fx;
            let bottom = heatmap.get(y1, x0) * (1.0 - fx) + heatmap.get(y1, x1) * fx;
            values.push((top * (1.0 - fy) + bottom * fy).clamp(0.0, 1.0));
        }
    }
    Heatmap { height, width, values }
}

/// Neighbouring source indices and the interpolation fraction for output
/// index `dst`.
fn source_coord(dst: usize, scale: f64, extent: usize) -> (usize, usize, f64) {
    let src = ((dst as f64 + 0.5) * scale - 0.5).max(0.0);
    let i0 = (src.floor() as usize).min(extent - 1);
    let i1 = (i0 + 1).min(extent - 1);
    (i0, i1, src - i0 as f64)
}

/// Jet color map: dark blue at 0 through cyan, yellow, to dark red at 255.
pub fn jet(value: u8) -> Rgb<u8> {
    let t = value as f64 / 255.0;
    let channel = |center: f64| -> u8 {
        let v = (1.5 - (4.0 * t - center).abs()).clamp(0.0, 1.0);
        (v * 255.0).round() as u8
    };
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

/// Scales a [0, 1] heatmap to 0–255 (truncating) and colorizes it.
pub fn colorize(heatmap: &Heatmap) -> RgbImage {
    RgbImage::from_fn(heatmap.width as u32, heatmap.height as u32, |x, y| {
        let v = heatmap.get(y as usize, x as usize).clamp(0.0, 1.0);
        jet((v * 255.0) as u8)
    })
}

/// `ORIGINAL_WEIGHT * original + HEATMAP_WEIGHT * colored`, rounded and
/// saturated per channel.
pub fn blend(original: &RgbImage, colored: &RgbImage) -> Result<RgbImage> {
    if original.dimensions() != colored.dimensions() {
        let (ow, oh) = original.dimensions();
        let (cw, ch) = colored.dimensions();
        return Err(Error::shape(
            "overlay blend",
            &[oh as usize, ow as usize],
            &[ch as usize, cw as usize],
        ));
    }
    let mut out = original.clone();
    for (dst, src) in out.pixels_mut().zip(colored.pixels()) {
        for (d, &s) in dst.0.iter_mut().zip(src.0.iter()) {
            let v = ORIGINAL_WEIGHT * *d as f64 + HEATMAP_WEIGHT * s as f64;
            *d = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    Ok(out)
}

/// Resizes `heatmap` to `original`, colorizes it and blends the two.
pub fn render_overlay(heatmap: &Heatmap, original: &RgbImage) -> Result<RgbImage> {
    let (width, height) = original.dimensions();
    let resized = resize_heatmap(heatmap, width as usize, height as usize);
    blend(original, &colorize(&resized))
}

/// Encodes an RGB image as JPEG bytes.
pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
        encoder
            .encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
            .map_err(Error::Encode)?;
    }
    Ok(buf.into_inner())
}
