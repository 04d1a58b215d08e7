//! Codec adapter: opens a source image, reports its native mode, writes a JPEG.
//!
//! The pipeline talks to the codec only through [`ImageCodec`], so tests can
//! substitute a codec that records calls or fails on demand.

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, ImageError};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Error type for codec operations
#[derive(Debug, Error)]
pub enum CodecError {
    /// The file could not be opened or written
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The file is not an image the codec can identify or decode
    #[error("Unreadable image: {0}")]
    Format(String),

    /// The JPEG encoder rejected the pixel data
    #[error("JPEG encoding failed: {0}")]
    Encode(String),
}

impl From<ImageError> for CodecError {
    fn from(e: ImageError) -> Self {
        match e {
            ImageError::IoError(io) => CodecError::Io(io),
            ImageError::Encoding(e) => CodecError::Encode(e.to_string()),
            other => CodecError::Format(other.to_string()),
        }
    }
}

/// Native pixel layout of a decoded source image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelMode {
    /// 8-bit grayscale.
    Luma,
    /// 8-bit RGB.
    Rgb,
    /// 8-bit RGB with alpha.
    Rgba,
    /// Indexed color.
    Palette,
    /// Any other layout, by name.
    Other(String),
}

impl std::fmt::Display for PixelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelMode::Luma => write!(f, "L"),
            PixelMode::Rgb => write!(f, "RGB"),
            PixelMode::Rgba => write!(f, "RGBA"),
            PixelMode::Palette => write!(f, "P"),
            PixelMode::Other(name) => write!(f, "{}", name),
        }
    }
}

/// Pixel layout of a written JPEG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JpegMode {
    Luma,
    Rgb,
}

/// Opens images and writes JPEGs.
pub trait ImageCodec: Send + Sync + 'static {
    /// A decoded image.
    type Image: Send;

    fn open(&self, path: &Path) -> Result<Self::Image, CodecError>;

    fn native_mode(&self, image: &Self::Image) -> PixelMode;

    /// Writes `image` as a JPEG in `mode` to `dest`, flushed to disk.
    fn write_jpeg(
        &self,
        image: &Self::Image,
        mode: JpegMode,
        quality: u8,
        dest: &Path,
    ) -> Result<(), CodecError>;
}

/// [`ImageCodec`] backed by the `image` crate.
///
/// PNG palettes are expanded on decode, so indexed sources report `Rgb` or
/// `Rgba`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegCodec;

impl ImageCodec for JpegCodec {
    type Image = DynamicImage;

    fn open(&self, path: &Path) -> Result<DynamicImage, CodecError> {
        let image = image::io::Reader::open(path)?
            .with_guessed_format()?
            .decode()?;
        Ok(image)
    }

    fn native_mode(&self, image: &DynamicImage) -> PixelMode {
        match image.color() {
            ColorType::L8 => PixelMode::Luma,
            ColorType::Rgb8 => PixelMode::Rgb,
            ColorType::Rgba8 => PixelMode::Rgba,
            other => PixelMode::Other(format!("{:?}", other)),
        }
    }

    fn write_jpeg(
        &self,
        image: &DynamicImage,
        mode: JpegMode,
        quality: u8,
        dest: &Path,
    ) -> Result<(), CodecError> {
        let mut writer = BufWriter::new(File::create(dest)?);
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100));
            match mode {
                JpegMode::Luma => {
                    let buffer = image.to_luma8();
                    encoder.encode(buffer.as_raw(), buffer.width(), buffer.height(), ColorType::L8)?;
                }
                JpegMode::Rgb => {
                    let buffer = image.to_rgb8();
                    encoder.encode(buffer.as_raw(), buffer.width(), buffer.height(), ColorType::Rgb8)?;
                }
            }
        }
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgba, RgbaImage};
    use tempfile::TempDir;

    #[test]
    fn test_native_mode_of_common_layouts() {
        let codec = JpegCodec;
        assert_eq!(
            codec.native_mode(&DynamicImage::ImageLuma8(GrayImage::new(2, 2))),
            PixelMode::Luma
        );
        assert_eq!(
            codec.native_mode(&DynamicImage::new_rgb8(2, 2)),
            PixelMode::Rgb
        );
        assert_eq!(
            codec.native_mode(&DynamicImage::ImageRgba8(RgbaImage::new(2, 2))),
            PixelMode::Rgba
        );
        assert!(matches!(
            codec.native_mode(&DynamicImage::new_luma16(2, 2)),
            PixelMode::Other(_)
        ));
    }

    #[test]
    fn test_open_missing_file_is_io_not_found() {
        let temp_dir = TempDir::new().unwrap();
        match JpegCodec.open(&temp_dir.path().join("gone.png")) {
            Err(CodecError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_open_garbage_is_format_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("noise.png");
        std::fs::write(&path, b"definitely not an image").unwrap();

        assert!(matches!(JpegCodec.open(&path), Err(CodecError::Format(_))));
    }

    #[test]
    fn test_write_grayscale_and_rgb() {
        let temp_dir = TempDir::new().unwrap();
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 8, Luma([120])));
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([10, 200, 30, 128])));

        let gray_out = temp_dir.path().join("gray.jpg");
        JpegCodec.write_jpeg(&gray, JpegMode::Luma, 85, &gray_out).unwrap();
        let decoded = image::open(&gray_out).unwrap();
        assert_eq!(decoded.color(), ColorType::L8);
        assert_eq!((decoded.width(), decoded.height()), (8, 8));

        let rgb_out = temp_dir.path().join("rgb.jpg");
        JpegCodec.write_jpeg(&rgba, JpegMode::Rgb, 85, &rgb_out).unwrap();
        assert_eq!(image::open(&rgb_out).unwrap().color(), ColorType::Rgb8);
    }

    #[test]
    fn test_quality_zero_is_clamped() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("q0.jpg");
        JpegCodec
            .write_jpeg(&DynamicImage::new_rgb8(4, 4), JpegMode::Rgb, 0, &out)
            .unwrap();
        assert!(out.metadata().unwrap().len() > 0);
    }
}
