//! Thumbnail generation.
//!
//! [`ImageProcessor`] turns one source image into one derivative per
//! configured [`ThumbnailSize`]. The built-in [`LocalImageProcessor`] decodes
//! and re-encodes in process; swap the trait object out to offload to an
//! external service.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};

use crate::error::{Result, UploadError};

/// How the source is mapped onto the target dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailFit {
    /// Fill the target, cropping overflow.
    Cover,
    /// Fit entirely within the target, preserving aspect ratio.
    Contain,
    /// Stretch to the exact target dimensions.
    Fill,
    /// Alias for contain.
    Inside,
    /// Alias for cover.
    Outside,
}

/// One requested derivative output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailSize {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fit: ThumbnailFit,
}

impl ThumbnailSize {
    pub fn new(name: impl Into<String>, width: u32, height: u32, fit: ThumbnailFit) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            fit,
        }
    }
}

/// Reject empty, duplicate (case-insensitive) or zero-dimension sizes before
/// any image work starts.
pub fn validate_thumbnail_sizes(sizes: &[ThumbnailSize]) -> Result<()> {
    if sizes.is_empty() {
        return Err(UploadError::validation(
            "sizes",
            "at least one thumbnail size is required",
        ));
    }

    let mut seen = std::collections::HashSet::new();
    for size in sizes {
        let name = size.name.trim();
        if name.is_empty() {
            return Err(UploadError::validation("name", "name cannot be empty"));
        }
        if !seen.insert(name.to_lowercase()) {
            return Err(UploadError::validation(
                "name",
                format!("duplicate thumbnail name: {name}"),
            ));
        }
        if size.width == 0 {
            return Err(UploadError::validation(
                "width",
                "width must be greater than zero",
            ));
        }
        if size.height == 0 {
            return Err(UploadError::validation(
                "height",
                "height must be greater than zero",
            ));
        }
    }
    Ok(())
}

/// Produces `(bytes, content_type)` for one derivative.
pub trait ImageProcessor: Send + Sync {
    fn generate(
        &self,
        source: &[u8],
        size: &ThumbnailSize,
        content_type: &str,
    ) -> Result<(Vec<u8>, String)>;
}

/// In-process resizer backed by the `image` crate.
#[derive(Debug, Default)]
pub struct LocalImageProcessor;

impl LocalImageProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl ImageProcessor for LocalImageProcessor {
    fn generate(
        &self,
        source: &[u8],
        size: &ThumbnailSize,
        content_type: &str,
    ) -> Result<(Vec<u8>, String)> {
        if source.is_empty() {
            return Err(UploadError::validation("source", "image source is empty"));
        }

        let reader = ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(|err| UploadError::backend("guess image format", err))?;
        let format = reader.format();
        let img = reader
            .decode()
            .map_err(|err| UploadError::backend("decode image", err))?;

        let resized = match size.fit {
            ThumbnailFit::Cover | ThumbnailFit::Outside => {
                img.resize_to_fill(size.width, size.height, FilterType::Triangle)
            }
            ThumbnailFit::Fill => img.resize_exact(size.width, size.height, FilterType::Triangle),
            ThumbnailFit::Contain | ThumbnailFit::Inside => {
                img.resize(size.width, size.height, FilterType::Triangle)
            }
        };

        // Re-encode in the source's format, falling back to PNG for anything
        // the encoder side does not cover.
        let (out_format, out_mime) = match format {
            Some(ImageFormat::Jpeg) => (ImageFormat::Jpeg, "image/jpeg"),
            Some(ImageFormat::Gif) => (ImageFormat::Gif, "image/gif"),
            Some(ImageFormat::WebP) => (ImageFormat::WebP, "image/webp"),
            _ => (ImageFormat::Png, "image/png"),
        };

        // JPEG has no alpha channel.
        let resized = if out_format == ImageFormat::Jpeg {
            DynamicImage::ImageRgb8(resized.to_rgb8())
        } else {
            resized
        };

        let mut out = Vec::new();
        resized
            .write_to(&mut Cursor::new(&mut out), out_format)
            .map_err(|err| UploadError::backend("encode thumbnail", err))?;

        let mime = if content_type.is_empty() {
            out_mime.to_string()
        } else {
            content_type.to_string()
        };
        Ok((out, mime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn test_png(width: u32, height: u32) -> Vec<u8> {
        let mut img = RgbaImage::new(width, height);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255]);
        }
        let mut out = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn decoded_dimensions(bytes: &[u8]) -> (u32, u32) {
        let img = image::load_from_memory(bytes).unwrap();
        (img.width(), img.height())
    }

    #[test]
    fn test_cover_produces_exact_dimensions() {
        let processor = LocalImageProcessor::new();
        let source = test_png(200, 100);
        let size = ThumbnailSize::new("thumb", 64, 64, ThumbnailFit::Cover);
        let (bytes, mime) = processor.generate(&source, &size, "image/png").unwrap();
        assert_eq!(decoded_dimensions(&bytes), (64, 64));
        assert_eq!(mime, "image/png");
    }

    #[test]
    fn test_fill_stretches_to_exact_dimensions() {
        let processor = LocalImageProcessor::new();
        let source = test_png(100, 100);
        let size = ThumbnailSize::new("banner", 120, 30, ThumbnailFit::Fill);
        let (bytes, _) = processor.generate(&source, &size, "").unwrap();
        assert_eq!(decoded_dimensions(&bytes), (120, 30));
    }

    #[test]
    fn test_contain_preserves_aspect_ratio_within_bounds() {
        let processor = LocalImageProcessor::new();
        let source = test_png(200, 100);
        let size = ThumbnailSize::new("small", 64, 64, ThumbnailFit::Contain);
        let (bytes, _) = processor.generate(&source, &size, "").unwrap();
        let (w, h) = decoded_dimensions(&bytes);
        assert!(w <= 64 && h <= 64);
        assert_eq!(w, 64);
        assert_eq!(h, 32);
    }

    #[test]
    fn test_empty_source_is_rejected() {
        let processor = LocalImageProcessor::new();
        let size = ThumbnailSize::new("thumb", 10, 10, ThumbnailFit::Cover);
        assert!(processor.generate(&[], &size, "").is_err());
    }

    #[test]
    fn test_garbage_source_fails_decoding() {
        let processor = LocalImageProcessor::new();
        let size = ThumbnailSize::new("thumb", 10, 10, ThumbnailFit::Cover);
        assert!(processor.generate(b"not an image", &size, "").is_err());
    }

    #[test]
    fn test_mime_falls_back_to_source_format() {
        let processor = LocalImageProcessor::new();
        let source = test_png(32, 32);
        let size = ThumbnailSize::new("thumb", 8, 8, ThumbnailFit::Cover);
        let (_, mime) = processor.generate(&source, &size, "").unwrap();
        assert_eq!(mime, "image/png");
    }

    #[test]
    fn test_validate_thumbnail_sizes() {
        assert!(validate_thumbnail_sizes(&[]).is_err());

        let ok = vec![
            ThumbnailSize::new("small", 64, 64, ThumbnailFit::Cover),
            ThumbnailSize::new("large", 512, 512, ThumbnailFit::Contain),
        ];
        validate_thumbnail_sizes(&ok).unwrap();

        let duplicate = vec![
            ThumbnailSize::new("Small", 64, 64, ThumbnailFit::Cover),
            ThumbnailSize::new("small", 32, 32, ThumbnailFit::Cover),
        ];
        assert!(validate_thumbnail_sizes(&duplicate).is_err());

        let zero = vec![ThumbnailSize::new("bad", 0, 64, ThumbnailFit::Cover)];
        assert!(validate_thumbnail_sizes(&zero).is_err());

        let unnamed = vec![ThumbnailSize::new("  ", 64, 64, ThumbnailFit::Cover)];
        assert!(validate_thumbnail_sizes(&unnamed).is_err());
    }

    #[test]
    fn test_fit_serde_round_trip() {
        let size: ThumbnailSize =
            serde_yaml::from_str("{name: thumb, width: 64, height: 64, fit: cover}").unwrap();
        assert_eq!(size.fit, ThumbnailFit::Cover);
        assert!(serde_yaml::to_string(&size).unwrap().contains("cover"));
    }
}
