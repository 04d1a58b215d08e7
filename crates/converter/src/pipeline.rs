//! Conversion pipeline: one PNG in, one JPEG published.
//!
//! open -> compute destination -> clear leftovers -> pick mode -> write temp
//! -> rename. Every failure is returned as a classified [`ConvertError`]; the
//! caller logs it and moves on to the next file.

use crate::codec::{CodecError, ImageCodec, JpegMode, PixelMode};
use crate::color_mode::ColorMode;
use crate::layout::OutputLayout;
use crate::publish::{discard, prepare_destination, publish, PublishError};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Why a single file could not be converted.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The source vanished between scan and open.
    #[error("Source file missing: {path}")]
    InputMissing { path: PathBuf, source: io::Error },

    /// The source or destination is not accessible.
    #[error("Permission denied for {path}: {source}")]
    PermissionDenied { path: PathBuf, source: io::Error },

    /// The codec could not identify or decode the source.
    #[error("Cannot read image {path}: {reason}")]
    MalformedImage { path: PathBuf, reason: String },

    /// Any other I/O failure.
    #[error("IO error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    /// The JPEG encoder failed.
    #[error("Failed to encode {path}: {reason}")]
    Encode { path: PathBuf, reason: String },

    /// The source is not under the watched base folder.
    #[error("{path} is outside the watched base folder")]
    OutsideBaseFolder { path: PathBuf },

    /// The conversion did not finish within the configured bound.
    #[error("Conversion of {path} timed out after {secs}s")]
    Timeout { path: PathBuf, secs: u64 },

    /// The blocking worker running the conversion panicked or was cancelled.
    #[error("Conversion worker for {path} failed: {reason}")]
    Worker { path: PathBuf, reason: String },
}

impl ConvertError {
    /// Classify an I/O error by kind.
    pub fn from_io(path: &Path, source: io::Error) -> Self {
        let path = path.to_path_buf();
        match source.kind() {
            io::ErrorKind::NotFound => ConvertError::InputMissing { path, source },
            io::ErrorKind::PermissionDenied => ConvertError::PermissionDenied { path, source },
            _ => ConvertError::Io { path, source },
        }
    }

    fn from_codec(path: &Path, error: CodecError) -> Self {
        match error {
            CodecError::Io(source) => Self::from_io(path, source),
            CodecError::Format(reason) => ConvertError::MalformedImage {
                path: path.to_path_buf(),
                reason,
            },
            CodecError::Encode(reason) => ConvertError::Encode {
                path: path.to_path_buf(),
                reason,
            },
        }
    }

    fn from_publish(error: PublishError) -> Self {
        let path = match &error {
            PublishError::CreateDir { path, .. }
            | PublishError::RemoveStale { path, .. }
            | PublishError::Rename { path, .. } => path.clone(),
        };
        let kind = error.io_error().kind();
        let source = io::Error::new(kind, error.to_string());
        match kind {
            io::ErrorKind::PermissionDenied => ConvertError::PermissionDenied { path, source },
            _ => ConvertError::Io { path, source },
        }
    }
}

/// A completed conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionOutcome {
    pub source: PathBuf,
    pub artifact: PathBuf,
    pub native_mode: PixelMode,
    pub written_mode: JpegMode,
}

/// Converts files from one watched base folder into its output tree.
pub struct ConversionPipeline<C: ImageCodec> {
    codec: Arc<C>,
    layout: OutputLayout,
    watch_root: PathBuf,
    quality: u8,
}

impl<C: ImageCodec> Clone for ConversionPipeline<C> {
    fn clone(&self) -> Self {
        Self {
            codec: Arc::clone(&self.codec),
            layout: self.layout.clone(),
            watch_root: self.watch_root.clone(),
            quality: self.quality,
        }
    }
}

impl<C: ImageCodec> ConversionPipeline<C> {
    pub fn new(codec: C, layout: OutputLayout, watch_root: impl Into<PathBuf>, quality: u8) -> Self {
        Self {
            codec: Arc::new(codec),
            layout,
            watch_root: watch_root.into(),
            quality,
        }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn watch_root(&self) -> &Path {
        &self.watch_root
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Destination of the JPEG for `input`.
    pub fn artifact_path(&self, input: &Path) -> Result<PathBuf, ConvertError> {
        self.layout
            .artifact_path(&self.watch_root, input)
            .ok_or_else(|| ConvertError::OutsideBaseFolder {
                path: input.to_path_buf(),
            })
    }

    /// Native mode of `input`, used to sample the batch color mode.
    pub fn native_mode_of(&self, input: &Path) -> Result<PixelMode, ConvertError> {
        let image = self
            .codec
            .open(input)
            .map_err(|e| ConvertError::from_codec(input, e))?;
        Ok(self.codec.native_mode(&image))
    }

    /// Convert `input` and publish the JPEG.
    ///
    /// The final path only ever appears through the rename of a fully
    /// written temp file. Nothing is recorded in any ledger here.
    pub fn convert(&self, input: &Path, color_mode: ColorMode) -> Result<ConversionOutcome, ConvertError> {
        let artifact = self.artifact_path(input)?;

        let image = self
            .codec
            .open(input)
            .map_err(|e| ConvertError::from_codec(input, e))?;

        let temp = prepare_destination(&artifact).map_err(ConvertError::from_publish)?;

        let native_mode = self.codec.native_mode(&image);
        let decision = color_mode.target_mode(&native_mode);
        if decision.coerced_unknown {
            warn!(
                path = %input.display(),
                mode = %native_mode,
                "Unknown color mode, converting to RGB"
            );
        }

        if let Err(e) = self
            .codec
            .write_jpeg(&image, decision.mode, self.quality, &temp)
        {
            discard(&temp);
            return Err(match e {
                CodecError::Io(source) => ConvertError::from_io(&temp, source),
                other => ConvertError::from_codec(input, other),
            });
        }

        publish(&temp, &artifact).map_err(ConvertError::from_publish)?;

        Ok(ConversionOutcome {
            source: input.to_path_buf(),
            artifact,
            native_mode,
            written_mode: decision.mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JpegCodec;
    use crate::layout::temp_path;
    use image::{ColorType, DynamicImage, GrayImage, Luma, Rgba, RgbaImage};
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        watch: PathBuf,
        out: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let watch = dir.path().join("B");
        let out = dir.path().join("out");
        fs::create_dir_all(&watch).unwrap();
        Fixture {
            _dir: dir,
            watch,
            out,
        }
    }

    fn save_png(path: &Path, image: DynamicImage) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        image.save(path).unwrap();
    }

    fn gray_png() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(16, 16, Luma([90])))
    }

    fn rgba_png() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([200, 40, 10, 100])))
    }

    fn jpeg_pipeline(f: &Fixture) -> ConversionPipeline<JpegCodec> {
        ConversionPipeline::new(JpegCodec, OutputLayout::new(&f.out, "b"), &f.watch, 85)
    }

    #[test]
    fn test_convert_grayscale_unset_stays_grayscale() {
        let f = fixture();
        let input = f.watch.join("OK/202503/LEFT/img1.png");
        save_png(&input, gray_png());

        let outcome = jpeg_pipeline(&f).convert(&input, ColorMode::Unset).unwrap();

        assert_eq!(outcome.artifact, f.out.join("mccb/b/OK/202503/LEFT/img1.jpg"));
        assert_eq!(outcome.native_mode, PixelMode::Luma);
        assert_eq!(outcome.written_mode, JpegMode::Luma);
        assert_eq!(image::open(&outcome.artifact).unwrap().color(), ColorType::L8);
        assert!(!temp_path(&outcome.artifact).exists());
    }

    #[test]
    fn test_convert_alpha_unset_becomes_rgb() {
        let f = fixture();
        let input = f.watch.join("NG/202503/TOP/img2.png");
        save_png(&input, rgba_png());

        let outcome = jpeg_pipeline(&f).convert(&input, ColorMode::Unset).unwrap();

        assert_eq!(outcome.written_mode, JpegMode::Rgb);
        assert_eq!(image::open(&outcome.artifact).unwrap().color(), ColorType::Rgb8);
    }

    #[test]
    fn test_forced_modes_override_native() {
        let f = fixture();
        let gray = f.watch.join("OK/202503/LEFT/gray.png");
        let color = f.watch.join("OK/202503/LEFT/color.png");
        save_png(&gray, gray_png());
        save_png(&color, rgba_png());
        let pipeline = jpeg_pipeline(&f);

        let out = pipeline.convert(&color, ColorMode::Grayscale).unwrap();
        assert_eq!(image::open(&out.artifact).unwrap().color(), ColorType::L8);

        let out = pipeline.convert(&gray, ColorMode::Color).unwrap();
        assert_eq!(image::open(&out.artifact).unwrap().color(), ColorType::Rgb8);
    }

    #[test]
    fn test_convert_overwrites_previous_output_and_leftover_temp() {
        let f = fixture();
        let input = f.watch.join("OK/202503/LEFT/img1.png");
        save_png(&input, gray_png());
        let pipeline = jpeg_pipeline(&f);
        let artifact = pipeline.artifact_path(&input).unwrap();
        fs::create_dir_all(artifact.parent().unwrap()).unwrap();
        fs::write(&artifact, b"stale").unwrap();
        fs::write(temp_path(&artifact), b"partial").unwrap();

        pipeline.convert(&input, ColorMode::Unset).unwrap();

        assert_ne!(fs::read(&artifact).unwrap(), b"stale");
        assert!(!temp_path(&artifact).exists());
    }

    #[test]
    fn test_missing_input_is_classified() {
        let f = fixture();
        let input = f.watch.join("OK/202503/LEFT/gone.png");

        let err = jpeg_pipeline(&f).convert(&input, ColorMode::Unset).unwrap_err();
        assert!(matches!(err, ConvertError::InputMissing { .. }), "{:?}", err);
    }

    #[test]
    fn test_malformed_input_is_classified_and_leaves_no_output() {
        let f = fixture();
        let input = f.watch.join("OK/202503/LEFT/bad.png");
        fs::create_dir_all(input.parent().unwrap()).unwrap();
        fs::write(&input, b"not a png at all").unwrap();
        let pipeline = jpeg_pipeline(&f);

        let err = pipeline.convert(&input, ColorMode::Unset).unwrap_err();

        assert!(matches!(err, ConvertError::MalformedImage { .. }), "{:?}", err);
        assert!(!pipeline.artifact_path(&input).unwrap().exists());
    }

    #[test]
    fn test_input_outside_watch_root() {
        let f = fixture();
        let err = jpeg_pipeline(&f)
            .convert(Path::new("/elsewhere/x.png"), ColorMode::Unset)
            .unwrap_err();
        assert!(matches!(err, ConvertError::OutsideBaseFolder { .. }));
    }

    #[test]
    fn test_native_mode_of() {
        let f = fixture();
        let input = f.watch.join("OK/202503/LEFT/img1.png");
        save_png(&input, gray_png());
        assert_eq!(jpeg_pipeline(&f).native_mode_of(&input).unwrap(), PixelMode::Luma);
    }

    /// Records where it was asked to write and whether the final name existed
    /// at that moment; optionally fails after writing partial bytes.
    #[derive(Default)]
    struct RecordingCodec {
        fail_write: bool,
        writes: Mutex<Vec<(PathBuf, bool)>>,
    }

    impl ImageCodec for RecordingCodec {
        type Image = PixelMode;

        fn open(&self, path: &Path) -> Result<PixelMode, CodecError> {
            fs::metadata(path)?;
            Ok(PixelMode::Other("CMYK".to_string()))
        }

        fn native_mode(&self, image: &PixelMode) -> PixelMode {
            image.clone()
        }

        fn write_jpeg(
            &self,
            _image: &PixelMode,
            _mode: JpegMode,
            _quality: u8,
            dest: &Path,
        ) -> Result<(), CodecError> {
            let final_path = dest.with_extension("");
            self.writes
                .lock()
                .unwrap()
                .push((dest.to_path_buf(), final_path.exists()));
            fs::write(dest, b"partial")?;
            if self.fail_write {
                return Err(CodecError::Encode("boom".to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_writes_go_through_temp_then_rename() {
        let f = fixture();
        let input = f.watch.join("OK/202503/LEFT/img1.png");
        fs::create_dir_all(input.parent().unwrap()).unwrap();
        fs::write(&input, b"png").unwrap();
        let pipeline = ConversionPipeline::new(
            RecordingCodec::default(),
            OutputLayout::new(&f.out, "b"),
            &f.watch,
            85,
        );

        let outcome = pipeline.convert(&input, ColorMode::Unset).unwrap();

        let writes = pipeline.codec.writes.lock().unwrap().clone();
        assert_eq!(writes, vec![(temp_path(&outcome.artifact), false)]);
        assert_eq!(fs::read(&outcome.artifact).unwrap(), b"partial");
        // Unknown native mode is coerced.
        assert_eq!(outcome.written_mode, JpegMode::Rgb);
    }

    #[test]
    fn test_failed_write_publishes_nothing() {
        let f = fixture();
        let input = f.watch.join("OK/202503/LEFT/img1.png");
        fs::create_dir_all(input.parent().unwrap()).unwrap();
        fs::write(&input, b"png").unwrap();
        let pipeline = ConversionPipeline::new(
            RecordingCodec {
                fail_write: true,
                ..Default::default()
            },
            OutputLayout::new(&f.out, "b"),
            &f.watch,
            85,
        );

        let err = pipeline.convert(&input, ColorMode::Unset).unwrap_err();

        assert!(matches!(err, ConvertError::Encode { .. }));
        let artifact = pipeline.artifact_path(&input).unwrap();
        assert!(!artifact.exists());
        assert!(!temp_path(&artifact).exists());
    }
}
