//! Byte-level decode/encode shared by every operation.
//!
//! Each step is a full round trip: sniff the format from the bytes, decode to
//! a [`DynamicImage`], mutate, and encode back to the same format. Pixel
//! layouts the target encoder cannot write (alpha in JPEG, 16-bit in WebP,
//! float anywhere) are converted first.

use super::operation::TransformError;
use image::{ColorType, DynamicImage, ImageFormat};
use std::borrow::Cow;
use std::io::Cursor;

/// A decoded image plus the format it came in, so it can be written back.
pub struct DecodedImage {
    pub image: DynamicImage,
    pub format: ImageFormat,
}

/// Sniff the container format from magic bytes.
pub fn detect_format(bytes: &[u8]) -> Result<ImageFormat, TransformError> {
    let format = image::guess_format(bytes).map_err(|_| TransformError::UnsupportedFormat)?;
    if !format.reading_enabled() || !format.writing_enabled() {
        return Err(TransformError::UnsupportedFormat);
    }
    Ok(format)
}

pub fn decode(bytes: &[u8]) -> Result<DecodedImage, TransformError> {
    let format = detect_format(bytes)?;
    let image =
        image::load_from_memory_with_format(bytes, format).map_err(TransformError::Decode)?;
    Ok(DecodedImage { image, format })
}

pub fn encode(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, TransformError> {
    if !format.writing_enabled() {
        return Err(TransformError::UnsupportedFormat);
    }
    let prepared = prepare_for(image, format);
    let mut buffer = Cursor::new(Vec::new());
    prepared
        .write_to(&mut buffer, format)
        .map_err(TransformError::Encode)?;
    Ok(buffer.into_inner())
}

fn is_luma(color: ColorType) -> bool {
    matches!(
        color,
        ColorType::L8 | ColorType::La8 | ColorType::L16 | ColorType::La16
    )
}

fn is_eight_bit(color: ColorType) -> bool {
    matches!(
        color,
        ColorType::L8 | ColorType::La8 | ColorType::Rgb8 | ColorType::Rgba8
    )
}

/// Convert to a pixel layout the encoder for `format` accepts.
fn prepare_for(image: &DynamicImage, format: ImageFormat) -> Cow<'_, DynamicImage> {
    let color = image.color();
    match format {
        ImageFormat::Jpeg if color.has_alpha() || !is_eight_bit(color) => {
            if is_luma(color) {
                Cow::Owned(DynamicImage::ImageLuma8(image.to_luma8()))
            } else {
                Cow::Owned(DynamicImage::ImageRgb8(image.to_rgb8()))
            }
        }
        ImageFormat::WebP if !is_eight_bit(color) => {
            if color.has_alpha() {
                Cow::Owned(DynamicImage::ImageRgba8(image.to_rgba8()))
            } else {
                Cow::Owned(DynamicImage::ImageRgb8(image.to_rgb8()))
            }
        }
        ImageFormat::Gif if !matches!(color, ColorType::Rgb8 | ColorType::Rgba8) => {
            Cow::Owned(DynamicImage::ImageRgba8(image.to_rgba8()))
        }
        ImageFormat::Tiff if matches!(color, ColorType::La8 | ColorType::La16) => {
            Cow::Owned(DynamicImage::ImageRgba16(image.to_rgba16()))
        }
        _ if matches!(color, ColorType::Rgb32F | ColorType::Rgba32F) => {
            Cow::Owned(DynamicImage::ImageRgba16(image.to_rgba16()))
        }
        _ => Cow::Borrowed(image),
    }
}

/// MIME type for a detected format.
pub fn mime_type(format: ImageFormat) -> &'static str {
    format.to_mime_type()
}

/// Preferred file extension (with leading dot) for a detected format.
pub fn extension(format: ImageFormat) -> String {
    format
        .extensions_str()
        .first()
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

/// Extension for a MIME type this build can read and write.
pub fn extension_for_mime(mime_type: &str) -> Option<String> {
    let format = ImageFormat::from_mime_type(mime_type.trim().to_ascii_lowercase())?;
    (format.reading_enabled() && format.writing_enabled()).then(|| extension(format))
}
