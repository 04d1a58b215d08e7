//! Batch color mode.
//!
//! A run either forces every JPEG to grayscale, forces every JPEG to color,
//! or leaves the decision to each file's native mode. The `sample` setting
//! fixes the choice once per run from the first candidate's native mode.

use crate::codec::{JpegMode, PixelMode};
use png2jpg_watch_config::ColorModeSetting;

/// Effective color mode for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
    Grayscale,
    Color,
    /// Per-file native mode.
    #[default]
    Unset,
}

/// How a source in `native` mode is written under `self`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeDecision {
    pub mode: JpegMode,
    /// The native mode was not one of the known layouts and was coerced to RGB.
    pub coerced_unknown: bool,
}

impl ColorMode {
    pub fn target_mode(&self, native: &PixelMode) -> ModeDecision {
        let mode = match self {
            ColorMode::Grayscale => JpegMode::Luma,
            ColorMode::Color => JpegMode::Rgb,
            ColorMode::Unset => match native {
                PixelMode::Luma => JpegMode::Luma,
                PixelMode::Rgb | PixelMode::Rgba | PixelMode::Palette => JpegMode::Rgb,
                PixelMode::Other(_) => {
                    return ModeDecision {
                        mode: JpegMode::Rgb,
                        coerced_unknown: true,
                    }
                }
            },
        };
        ModeDecision {
            mode,
            coerced_unknown: false,
        }
    }
}

/// Resolves the configured setting into a [`ColorMode`] for the run.
#[derive(Debug, Clone)]
pub struct ColorModeResolver {
    setting: ColorModeSetting,
    resolved: Option<ColorMode>,
}

impl ColorModeResolver {
    pub fn new(setting: ColorModeSetting) -> Self {
        let resolved = match setting {
            ColorModeSetting::Unset => Some(ColorMode::Unset),
            ColorModeSetting::Grayscale => Some(ColorMode::Grayscale),
            ColorModeSetting::Color => Some(ColorMode::Color),
            ColorModeSetting::Sample => None,
        };
        Self { setting, resolved }
    }

    pub fn setting(&self) -> ColorModeSetting {
        self.setting
    }

    /// True until a `sample` setting has seen its representative file.
    pub fn needs_sample(&self) -> bool {
        self.resolved.is_none()
    }

    /// Fix a sampled mode from a representative file's native mode.
    ///
    /// Grayscale samples select `Grayscale`, everything else `Color`. Has no
    /// effect once the mode is resolved.
    pub fn observe_sample(&mut self, native: &PixelMode) -> ColorMode {
        if let Some(mode) = self.resolved {
            return mode;
        }
        let mode = match native {
            PixelMode::Luma => ColorMode::Grayscale,
            _ => ColorMode::Color,
        };
        self.resolved = Some(mode);
        mode
    }

    /// Mode to apply now. An unresolved sample behaves as `Color`.
    pub fn current(&self) -> ColorMode {
        self.resolved.unwrap_or(ColorMode::Color)
    }
}
