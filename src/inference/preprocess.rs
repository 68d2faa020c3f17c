//! Image preprocessing for classifier input.
//!
//! Decodes image bytes (PNG/JPEG/BMP/GIF), applies the EXIF orientation,
//! converts to RGB channel order, resizes to the model's square input and
//! normalizes to [0, 1].

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};

use crate::error::{Error, Result};
use crate::math::tensor::Tensor;

/// A decoded image at model resolution, together with the tensor fed to
/// the network. Both come from the same resize so the overlay lines up with
/// what the classifier saw.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub resized: RgbImage,
    /// Shape `[1, size, size, 3]`, values in [0, 1].
    pub tensor: Tensor,
}

/// Decodes `bytes` and rotates/flips the result upright according to its
/// EXIF orientation tag.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    let image = image::load_from_memory(bytes).map_err(Error::Decode)?;
    Ok(apply_orientation(image, read_exif_orientation(bytes)))
}

/// EXIF orientation tag (0x0112); 1 when the image carries none.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let Ok(exif) = exif::Reader::new().read_from_container(&mut cursor) else {
        return 1;
    };
    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .unwrap_or(1)
}

/// 1 normal, 2 mirrored, 3 rotated 180, 4 flipped vertically,
/// 5 mirrored + 90 CW, 6 90 CW, 7 mirrored + 270 CW, 8 270 CW.
pub fn apply_orientation(image: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Converts to RGB, resizes to `size × size` with bilinear filtering and
/// builds the batch-of-one input tensor.
pub fn prepare(image: &DynamicImage, size: u32) -> PreparedImage {
    let rgb = image.to_rgb8();
    let resized = image::imageops::resize(&rgb, size, size, FilterType::Triangle);
    let data: Vec<f64> = resized
        .pixels()
        .flat_map(|p| p.0.iter().map(|&c| c as f64 / 255.0))
        .collect();
    let tensor = Tensor {
        shape: vec![1, size as usize, size as usize, 3],
        data,
    };
    PreparedImage { resized, tensor }
}

pub fn prepare_bytes(bytes: &[u8], size: u32) -> Result<PreparedImage> {
    Ok(prepare(&decode_image(bytes)?, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, Rgb};
    use std::io::Cursor;

    fn png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageOutputFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_prepare_shape_and_scale() {
        let prepared = prepare_bytes(&png(40, 30, [255, 0, 51]), 8).unwrap();
        assert_eq!(prepared.tensor.shape, vec![1, 8, 8, 3]);
        assert_eq!(prepared.resized.dimensions(), (8, 8));
        // Channel order is R, G, B.
        assert!((prepared.tensor.data[0] - 1.0).abs() < 1e-12);
        assert_eq!(prepared.tensor.data[1], 0.0);
        assert!((prepared.tensor.data[2] - 0.2).abs() < 1e-12);
        assert!(prepared.tensor.data.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    /// JPEG with an APP1 segment holding a single big-endian Orientation entry.
    fn jpeg_with_orientation(width: u32, height: u32, orientation: u16) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, _| {
            if x < width / 2 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) }
        }));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageOutputFormat::Jpeg(95)).unwrap();
        let jpeg = buf.into_inner();

        let mut tiff = b"MM\x00\x2a\x00\x00\x00\x08".to_vec();
        tiff.extend_from_slice(&1u16.to_be_bytes());
        tiff.extend_from_slice(&0x0112u16.to_be_bytes());
        tiff.extend_from_slice(&3u16.to_be_bytes());
        tiff.extend_from_slice(&1u32.to_be_bytes());
        tiff.extend_from_slice(&orientation.to_be_bytes());
        tiff.extend_from_slice(&[0, 0]);
        tiff.extend_from_slice(&0u32.to_be_bytes());

        let mut app1 = b"Exif\x00\x00".to_vec();
        app1.extend_from_slice(&tiff);
        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&[0xff, 0xe1]);
        out.extend_from_slice(&((app1.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(&app1);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn test_exif_orientation_is_applied() {
        let bytes = jpeg_with_orientation(16, 8, 6);
        assert_eq!(read_exif_orientation(&bytes), 6);
        let image = decode_image(&bytes).unwrap();
        assert_eq!((image.width(), image.height()), (8, 16));
        // The left (red) half ends up on top after a 90 degree clockwise turn.
        let rgb = image.to_rgb8();
        assert!(rgb.get_pixel(4, 2)[0] > 200);
        assert!(rgb.get_pixel(4, 13)[2] > 200);
    }

    #[test]
    fn test_missing_exif_keeps_orientation() {
        let bytes = png(6, 3, [10, 20, 30]);
        assert_eq!(read_exif_orientation(&bytes), 1);
        let image = decode_image(&bytes).unwrap();
        assert_eq!((image.width(), image.height()), (6, 3));
    }

    #[test]
    fn test_apply_orientation_variants() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(2, 1, |x, _| Rgb([x as u8, 0, 0])));
        assert_eq!(apply_orientation(img.clone(), 1).to_rgb8().get_pixel(0, 0)[0], 0);
        assert_eq!(apply_orientation(img.clone(), 2).to_rgb8().get_pixel(0, 0)[0], 1);
        let turned = apply_orientation(img, 8);
        assert_eq!((turned.width(), turned.height()), (1, 2));
        // 270 degrees clockwise puts the right-hand pixel on top.
        assert_eq!(turned.to_rgb8().get_pixel(0, 0)[0], 1);
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        let err = prepare_bytes(b"definitely not an image", 8).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert!(err.to_string().contains("Could not read uploaded image"));
    }
}
