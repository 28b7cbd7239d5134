//! Decode-time downsampling.
//!
//! Every entry point reads the header first to learn the native size, picks
//! an integer sampling factor for the requested bounding box, then decodes
//! and reduces the image by that factor.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Seek};
use std::path::Path;

use image::ImageReader;
use thiserror::Error;
use tracing::trace;

use crate::domain::entities::DecodedImage;

/// Errors produced while decoding an image.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The source could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The bytes are not a supported image.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Computes the sampling factor for a native size and a target box.
///
/// A zero target dimension disables sampling. Otherwise the factor is the
/// smaller of the two integer ratios, never below 1.
#[must_use]
pub fn calculate_sample_size(
    native_width: u32,
    native_height: u32,
    target_width: u32,
    target_height: u32,
) -> u32 {
    if target_width == 0 || target_height == 0 {
        return 1;
    }

    if native_width <= target_width && native_height <= target_height {
        return 1;
    }

    (native_width / target_width)
        .min(native_height / target_height)
        .max(1)
}

/// Decodes a named resource on disk.
///
/// # Errors
/// Returns error if the file cannot be opened or is not an image.
pub fn decode_resource(
    path: &Path,
    target_width: u32,
    target_height: u32,
) -> Result<DecodedImage, DecodeError> {
    let file = File::open(path)?;
    decode_file(file, target_width, target_height)
}

/// Decodes from an open file handle.
///
/// # Errors
/// Returns error if the file cannot be read or is not an image.
pub fn decode_file(
    file: File,
    target_width: u32,
    target_height: u32,
) -> Result<DecodedImage, DecodeError> {
    decode_sampled(BufReader::new(file), target_width, target_height)
}

/// Decodes from an in-memory buffer.
///
/// # Errors
/// Returns error if the bytes are not an image.
pub fn decode_bytes(
    bytes: &[u8],
    target_width: u32,
    target_height: u32,
) -> Result<DecodedImage, DecodeError> {
    decode_sampled(Cursor::new(bytes), target_width, target_height)
}

fn decode_sampled<R: BufRead + Seek>(
    mut reader: R,
    target_width: u32,
    target_height: u32,
) -> Result<DecodedImage, DecodeError> {
    let (width, height) = ImageReader::new(&mut reader)
        .with_guessed_format()?
        .into_dimensions()?;

    let sample_size = calculate_sample_size(width, height, target_width, target_height);
    trace!(width, height, sample_size, "Computed sampling factor");

    reader.rewind()?;
    let pixels = ImageReader::new(&mut reader)
        .with_guessed_format()?
        .decode()?;

    Ok(DecodedImage::new(
        subsample(pixels, sample_size),
        width,
        height,
        sample_size,
    ))
}

/// Largest power of two not above `sample_size`, as decoders apply it.
const fn effective_reduction(sample_size: u32) -> u32 {
    if sample_size <= 1 {
        1
    } else {
        1 << (u32::BITS - 1 - sample_size.leading_zeros())
    }
}

fn subsample(pixels: image::DynamicImage, sample_size: u32) -> image::DynamicImage {
    let reduction = effective_reduction(sample_size);
    if reduction == 1 {
        return pixels;
    }

    let width = pixels.width().div_ceil(reduction);
    let height = pixels.height().div_ceil(reduction);
    pixels.thumbnail_exact(width, height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::mocks::png_bytes;
    use test_case::test_case;

    #[test_case(800, 600, 100, 100, 6 ; "scenario_800x600")]
    #[test_case(800, 600, 0, 100, 1 ; "zero_width_target")]
    #[test_case(800, 600, 100, 0, 1 ; "zero_height_target")]
    #[test_case(100, 80, 200, 200, 1 ; "smaller_than_target")]
    #[test_case(200, 200, 200, 200, 1 ; "equal_to_target")]
    #[test_case(1000, 100, 300, 300, 1 ; "one_ratio_below_one")]
    #[test_case(1024, 768, 256, 256, 3 ; "takes_smaller_ratio")]
    #[test_case(4000, 3000, 1000, 1000, 3 ; "floors_ratio")]
    fn test_calculate_sample_size(w: u32, h: u32, tw: u32, th: u32, expected: u32) {
        assert_eq!(calculate_sample_size(w, h, tw, th), expected);
    }

    #[test_case(1, 1)]
    #[test_case(2, 2)]
    #[test_case(3, 2)]
    #[test_case(6, 4)]
    #[test_case(8, 8)]
    #[test_case(15, 8)]
    fn test_effective_reduction(sample: u32, expected: u32) {
        assert_eq!(effective_reduction(sample), expected);
    }

    #[test]
    fn test_decode_bytes_downsamples() {
        let bytes = png_bytes(800, 600);
        let img = decode_bytes(&bytes, 100, 100).unwrap();

        assert_eq!(img.sample_size(), 6);
        assert_eq!((img.native_width(), img.native_height()), (800, 600));
        assert_eq!((img.width(), img.height()), (200, 150));
    }

    #[test]
    fn test_decode_bytes_native_size() {
        let bytes = png_bytes(64, 48);
        let img = decode_bytes(&bytes, 0, 0).unwrap();

        assert_eq!(img.sample_size(), 1);
        assert_eq!((img.width(), img.height()), (64, 48));
    }

    #[test]
    fn test_decode_resource() -> Result<(), Box<dyn std::error::Error>> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("source.png");
        std::fs::write(&path, png_bytes(300, 300))?;

        let img = decode_resource(&path, 100, 100)?;
        assert_eq!(img.sample_size(), 3);
        assert_eq!((img.width(), img.height()), (150, 150));
        Ok(())
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result = decode_bytes(b"definitely not an image", 10, 10);
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_truncated_fails() {
        let bytes = png_bytes(64, 64);
        let result = decode_bytes(&bytes[..bytes.len() / 2], 0, 0);
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_missing_resource_fails() {
        let result = decode_resource(Path::new("/nonexistent/image.png"), 0, 0);
        assert!(matches!(result, Err(DecodeError::Io(_))));
    }
}
