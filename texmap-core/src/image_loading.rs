//! Image loading, colour-mode enforcement and saving.
//!
//! Loads PNG, JPG, BMP, TGA, TIFF, GIF and EXR files into [`DynamicImage`]s
//! and writes them back with the extension deciding the encoder.

use crate::{Error, Result};
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File extensions accepted as texture inputs (lowercase, no dot)
pub const SUPPORTED_EXTENSIONS: &[&str] =
    &["png", "jpg", "jpeg", "bmp", "tga", "tif", "tiff", "gif", "exr"];

/// Channel layout a map is stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorMode {
    /// Single 8-bit luminance channel
    L,
    Rgb,
    Rgba,
}

impl ColorMode {
    /// Mode of a decoded image. Luma+alpha is widened to RGBA.
    pub fn of(image: &DynamicImage) -> Result<ColorMode> {
        match image.color() {
            ColorType::L8 | ColorType::L16 => Ok(ColorMode::L),
            ColorType::La8 | ColorType::La16 => Ok(ColorMode::Rgba),
            ColorType::Rgb8 | ColorType::Rgb16 | ColorType::Rgb32F => Ok(ColorMode::Rgb),
            ColorType::Rgba8 | ColorType::Rgba16 | ColorType::Rgba32F => Ok(ColorMode::Rgba),
            other => Err(Error::UnsupportedMode(format!("{:?}", other))),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ColorMode::L => "L",
            ColorMode::Rgb => "RGB",
            ColorMode::Rgba => "RGBA",
        }
    }
}

/// Loads and saves texture images
pub struct ImageLoader;

impl ImageLoader {
    /// True when the path has a supported texture extension.
    pub fn is_supported<P: AsRef<Path>>(path: P) -> bool {
        extension(path.as_ref())
            .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false)
    }

    /// Load an image from a file path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
        let path = path.as_ref();
        if !Self::is_supported(path) {
            return Err(Error::Other(format!(
                "Unsupported format: {}. Use one of {}.",
                path.display(),
                SUPPORTED_EXTENSIONS.join(", ")
            )));
        }

        let reader = image::ImageReader::open(path)?.with_guessed_format()?;
        let image = reader.decode()?;
        // Reject layouts no map mode can represent.
        ColorMode::of(&image)?;
        Ok(image)
    }

    /// Save an image, choosing the encoder from the extension. Parent
    /// directories are created as needed.
    pub fn save<P: AsRef<Path>>(image: &DynamicImage, output_path: P) -> Result<()> {
        let path = output_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        match extension(path).as_deref() {
            Some("png") | Some("bmp") | Some("tga") | Some("tif") | Some("tiff")
            | Some("gif") => to_8bit(image).save(path)?,
            Some("jpg") | Some("jpeg") => {
                // JPEG has no alpha channel.
                if image.color().has_alpha() {
                    DynamicImage::ImageRgb8(image.to_rgb8()).save(path)?
                } else {
                    to_8bit(image).save(path)?
                }
            }
            Some("exr") => {
                if image.color().has_alpha() {
                    DynamicImage::ImageRgba32F(image.to_rgba32f()).save(path)?
                } else {
                    DynamicImage::ImageRgb32F(image.to_rgb32f()).save(path)?
                }
            }
            other => {
                return Err(Error::Other(format!(
                    "Unsupported output format: {:?}. Use one of {}.",
                    other,
                    SUPPORTED_EXTENSIONS.join(", ")
                )))
            }
        }
        Ok(())
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
}

fn to_8bit(image: &DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageRgb8(_)
        | DynamicImage::ImageRgba8(_) => image.clone(),
        _ if image.color().has_alpha() => DynamicImage::ImageRgba8(image.to_rgba8()),
        _ if image.color().has_color() => DynamicImage::ImageRgb8(image.to_rgb8()),
        _ => DynamicImage::ImageLuma8(image.to_luma8()),
    }
}

/// Convert an image to the 8-bit layout of `mode`.
pub fn enforce_mode(image: &DynamicImage, mode: ColorMode) -> DynamicImage {
    match mode {
        ColorMode::L => match image {
            DynamicImage::ImageLuma8(_) => image.clone(),
            _ => DynamicImage::ImageLuma8(image.to_luma8()),
        },
        ColorMode::Rgb => match image {
            DynamicImage::ImageRgb8(_) => image.clone(),
            _ => DynamicImage::ImageRgb8(image.to_rgb8()),
        },
        ColorMode::Rgba => match image {
            DynamicImage::ImageRgba8(_) => image.clone(),
            _ => DynamicImage::ImageRgba8(image.to_rgba8()),
        },
    }
}

/// Computes new dimensions for an image when scaling the longest edge to the target.
/// Preserves aspect ratio.
pub fn compute_target_dimensions(width: u32, height: u32, max_dim: u32) -> (u32, u32) {
    if width <= max_dim && height <= max_dim {
        return (width, height);
    }

    let scale = if width >= height {
        max_dim as f64 / width as f64
    } else {
        max_dim as f64 / height as f64
    };

    let new_width = (width as f64 * scale).round().max(1.0) as u32;
    let new_height = (height as f64 * scale).round().max(1.0) as u32;

    (new_width, new_height)
}

/// Downscale so the longest edge is at most `max_dim` (Lanczos3).
/// Smaller images are returned unchanged.
pub fn resize_to_max(image: &DynamicImage, max_dim: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    let (new_width, new_height) = compute_target_dimensions(width, height, max_dim);
    if new_width == width && new_height == height {
        return image.clone();
    }
    image.resize_exact(new_width, new_height, FilterType::Lanczos3)
}

/// Short description for log lines, e.g. `64x64 RGB`.
pub fn describe(image: &DynamicImage) -> String {
    let (width, height) = image.dimensions();
    let mode = ColorMode::of(image)
        .map(|m| m.label().to_string())
        .unwrap_or_else(|_| format!("{:?}", image.color()));
    format!("{}x{} {}", width, height, mode)
}
