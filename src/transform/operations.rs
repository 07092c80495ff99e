//! The five built-in operations, all backed by the `image` crate.
//!
//! | Kind | Crate / function |
//! |---|---|
//! | resize (upscale) | `DynamicImage::resize_exact` with `Lanczos3`, per-axis scale |
//! | resize (downscale) | `DynamicImage::resize_to_fill` (fill, then centre crop) |
//! | grayscale | `DynamicImage::grayscale` |
//! | trim | border scan against white, then `crop_imm` |
//! | blur | `DynamicImage::blur` (Gaussian) |
//! | rotate | `rotate90` / `rotate180` / `rotate270` |
//!
//! Every `transform` decodes, checks the cancellation token, mutates, checks
//! again, and encodes back to the source format.

use super::calculations::{Bounds, ResizePlan, content_bounds, plan_resize};
use super::codec::{self, DecodedImage};
use super::operation::{Operation, TransformError};
use super::params::{
    BlurConfig, ConfigError, MAX_OUTPUT_PIXELS, ResizeConfig, RotateConfig, Rotation, TrimConfig,
};
use crate::cancel::CancellationToken;
use crate::types::ConfigMap;
use image::DynamicImage;
use image::imageops::FilterType;
use tracing::debug;

fn decode_checked(
    image: &[u8],
    cancel: &CancellationToken,
) -> Result<DecodedImage, TransformError> {
    cancel.check()?;
    let decoded = codec::decode(image)?;
    cancel.check()?;
    Ok(decoded)
}

fn encode_checked(
    image: &DynamicImage,
    format: image::ImageFormat,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, TransformError> {
    cancel.check()?;
    codec::encode(image, format)
}

/// Fit into a `width` x `height` box.
#[derive(Debug, Default, Clone, Copy)]
pub struct Resize;

impl Operation for Resize {
    fn name(&self) -> &'static str {
        "resize"
    }

    fn validate_config(&self, config: &ConfigMap) -> Result<(), ConfigError> {
        ResizeConfig::from_map(config).map(|_| ())
    }

    fn transform(
        &self,
        image: &[u8],
        config: &ConfigMap,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, TransformError> {
        let cfg = ResizeConfig::from_map(config)
            .map_err(|e| TransformError::config(self.name(), e))?;
        debug!(width = cfg.width, height = cfg.height, "applying resize");

        let DecodedImage { image, format } = decode_checked(image, cancel)?;
        let plan = plan_resize((image.width(), image.height()), (cfg.width, cfg.height));
        let (out_w, out_h) = plan.output_dimensions();
        let pixels = out_w as u64 * out_h as u64;
        if pixels > MAX_OUTPUT_PIXELS {
            return Err(TransformError::ProcessingFailed {
                operation: "resize",
                message: format!(
                    "{out_w}x{out_h} output is {pixels} pixels, limit is {MAX_OUTPUT_PIXELS}"
                ),
            });
        }

        let resized = match plan {
            ResizePlan::Upscale {
                scale_x,
                scale_y,
                width,
                height,
            } => {
                debug!(
                    original_width = image.width(),
                    original_height = image.height(),
                    scale_x,
                    scale_y,
                    "upscaling with Lanczos3"
                );
                image.resize_exact(width, height, FilterType::Lanczos3)
            }
            ResizePlan::Thumbnail { width, height } => {
                image.resize_to_fill(width, height, FilterType::Lanczos3)
            }
        };
        drop(image);

        encode_checked(&resized, format, cancel)
    }
}

/// Convert to single-channel luminance (alpha kept when present).
#[derive(Debug, Default, Clone, Copy)]
pub struct Grayscale;

impl Operation for Grayscale {
    fn name(&self) -> &'static str {
        "grayscale"
    }

    fn validate_config(&self, _config: &ConfigMap) -> Result<(), ConfigError> {
        Ok(())
    }

    fn transform(
        &self,
        image: &[u8],
        _config: &ConfigMap,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, TransformError> {
        debug!("applying grayscale");
        let DecodedImage { image, format } = decode_checked(image, cancel)?;
        let gray = image.grayscale();
        encode_checked(&gray, format, cancel)
    }
}

/// Remove near-white borders.
#[derive(Debug, Default, Clone, Copy)]
pub struct Trim;

/// Reference background the border is measured against.
const TRIM_BACKGROUND: [f64; 3] = [255.0, 255.0, 255.0];

impl Trim {
    /// Pixel bounds of everything that differs from white by more than
    /// `threshold` on any channel. Transparent pixels are flattened onto white
    /// first, so a transparent border trims like a white one.
    fn find_trim(image: &DynamicImage, threshold: f64) -> Option<Bounds> {
        let rgba = image.to_rgba8();
        content_bounds(rgba.width(), rgba.height(), |x, y| {
            let [r, g, b, a] = rgba.get_pixel(x, y).0;
            let alpha = a as f64 / 255.0;
            [r, g, b]
                .iter()
                .zip(TRIM_BACKGROUND)
                .all(|(&c, bg)| {
                    let flattened = c as f64 * alpha + bg * (1.0 - alpha);
                    (flattened - bg).abs() <= threshold
                })
        })
    }
}

impl Operation for Trim {
    fn name(&self) -> &'static str {
        "trim"
    }

    fn validate_config(&self, config: &ConfigMap) -> Result<(), ConfigError> {
        TrimConfig::from_map(config).map(|_| ())
    }

    fn transform(
        &self,
        image: &[u8],
        config: &ConfigMap,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, TransformError> {
        let cfg = TrimConfig::from_map(config)
            .map_err(|e| TransformError::config(self.name(), e))?;
        debug!(threshold = cfg.threshold, "applying trim");

        let DecodedImage { image, format } = decode_checked(image, cancel)?;
        let trimmed = match Self::find_trim(&image, cfg.threshold) {
            Some(bounds) => image.crop_imm(bounds.left, bounds.top, bounds.width, bounds.height),
            None => {
                return Err(TransformError::ProcessingFailed {
                    operation: "trim",
                    message: "image is entirely background".into(),
                });
            }
        };

        encode_checked(&trimmed, format, cancel)
    }
}

/// Gaussian blur.
#[derive(Debug, Default, Clone, Copy)]
pub struct Blur;

impl Operation for Blur {
    fn name(&self) -> &'static str {
        "blur"
    }

    fn validate_config(&self, config: &ConfigMap) -> Result<(), ConfigError> {
        BlurConfig::from_map(config).map(|_| ())
    }

    fn transform(
        &self,
        image: &[u8],
        config: &ConfigMap,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, TransformError> {
        let cfg = BlurConfig::from_map(config)
            .map_err(|e| TransformError::config(self.name(), e))?;
        debug!(sigma = cfg.sigma, "applying blur");

        let DecodedImage { image, format } = decode_checked(image, cancel)?;
        let blurred = image.blur(cfg.sigma);
        encode_checked(&blurred, format, cancel)
    }
}

/// Right-angle rotation, clockwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct Rotate;

impl Operation for Rotate {
    fn name(&self) -> &'static str {
        "rotate"
    }

    fn validate_config(&self, config: &ConfigMap) -> Result<(), ConfigError> {
        RotateConfig::from_map(config).map(|_| ())
    }

    fn transform(
        &self,
        image: &[u8],
        config: &ConfigMap,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, TransformError> {
        let cfg = RotateConfig::from_map(config)
            .map_err(|e| TransformError::config(self.name(), e))?;
        debug!(angle = cfg.angle.degrees(), "applying rotate");

        let DecodedImage { image, format } = decode_checked(image, cancel)?;
        let rotated = match cfg.angle {
            Rotation::Deg90 => image.rotate90(),
            Rotation::Deg180 => image.rotate180(),
            Rotation::Deg270 => image.rotate270(),
        };
        encode_checked(&rotated, format, cancel)
    }
}
