use image::codecs::jpeg::JpegEncoder;
use image::GenericImageView;
use std::io::Cursor;

/// Longest edge of a selfie sent upstream.
const MAX_DIMENSION: u32 = 1024;

/// JPEG quality for re-encoded selfies.
const JPEG_QUALITY: u8 = 85;

/// Downscale and re-encode an uploaded selfie as JPEG before it goes to
/// storage and the fusion upstream. Rejects anything the `image` crate
/// cannot decode.
pub fn compress_selfie(data: &[u8]) -> Result<Vec<u8>, ImagingError> {
    image::guess_format(data).map_err(|_| ImagingError::UnsupportedFormat)?;
    let decoded = image::load_from_memory(data).map_err(ImagingError::Decode)?;

    let (width, height) = decoded.dimensions();
    let resized = if width > MAX_DIMENSION || height > MAX_DIMENSION {
        decoded.thumbnail(MAX_DIMENSION, MAX_DIMENSION)
    } else {
        decoded
    };

    let mut out = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    resized
        .to_rgb8()
        .write_with_encoder(encoder)
        .map_err(ImagingError::Encode)?;
    Ok(out.into_inner())
}

#[derive(Debug, thiserror::Error)]
pub enum ImagingError {
    #[error("unsupported image format")]
    UnsupportedFormat,

    #[error("image could not be decoded: {0}")]
    Decode(image::ImageError),

    #[error("image could not be encoded: {0}")]
    Encode(image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn large_images_are_downscaled() {
        let compressed = compress_selfie(&png_bytes(2048, 1536)).unwrap();
        let reloaded = image::load_from_memory(&compressed).unwrap();
        let (w, h) = reloaded.dimensions();
        assert!(w <= MAX_DIMENSION && h <= MAX_DIMENSION);
        assert_eq!(
            image::guess_format(&compressed).unwrap(),
            image::ImageFormat::Jpeg
        );
    }

    #[test]
    fn small_images_keep_their_dimensions() {
        let compressed = compress_selfie(&png_bytes(320, 240)).unwrap();
        let reloaded = image::load_from_memory(&compressed).unwrap();
        assert_eq!(reloaded.dimensions(), (320, 240));
    }

    #[test]
    fn garbage_input_is_rejected() {
        assert!(matches!(
            compress_selfie(b"definitely not an image"),
            Err(ImagingError::UnsupportedFormat)
        ));
    }
}
