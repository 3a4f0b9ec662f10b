//! Numeric conversion primitives.
//!
//! Pure pixel math over `image` buffers: specular/gloss to metal/rough,
//! inversions, normal handedness flips, bump to normal, base colour
//! derivation, and channel packing/unpacking for composite maps.
//!
//! All arithmetic is done in normalised `f32`; results are quantised back to
//! 8 bits with rounding.

use crate::config::NormalFormat;
use crate::{Error, Result};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};

/// Rec.601 luma weights
pub const LUMA_WEIGHTS: [f32; 3] = [0.2989, 0.5870, 0.1140];
/// Specular luminance (0-255) below which a texel is treated as dielectric
pub const METALLIC_THRESHOLD: u8 = 55;
/// Width of the dielectric-to-metal ramp above the threshold
pub const METALLIC_SOFTNESS: f32 = 0.2;
/// Exponent applied to `1 - gloss` when deriving roughness
pub const ROUGHNESS_GAMMA: f32 = 2.2;
/// Brightness boost applied to grayscale specular before autocontrast
pub const GLOSS_BRIGHTNESS: f32 = 1.2;
/// Darkening applied to metal texels when deriving base colour
pub const METAL_DARKENING: f32 = 0.22;
/// Correlation magnitude needed to decide a normal map's handedness
pub const NORMAL_FORMAT_THRESHOLD: f32 = 0.1;

/// Fill value for occlusion-like channels with no source
pub const FILL_OCCLUSION: u8 = 255;
/// Fill value for other missing channels
pub const FILL_NEUTRAL: u8 = 128;
/// Fill value for the MSAO detail-mask channel
pub const FILL_DETAIL: u8 = 0;

/// Colour channel selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    R,
    G,
    B,
    A,
}

impl Channel {
    fn index(&self) -> usize {
        match self {
            Channel::R => 0,
            Channel::G => 1,
            Channel::B => 2,
            Channel::A => 3,
        }
    }
}

fn quantize(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn norm(v: u8) -> f32 {
    v as f32 / 255.0
}

fn resize_gray(image: &GrayImage, width: u32, height: u32) -> GrayImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    image::imageops::resize(image, width, height, FilterType::Lanczos3)
}

fn resize_rgb(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    image::imageops::resize(image, width, height, FilterType::Lanczos3)
}

/// 8-bit luminance `0.2989 R + 0.5870 G + 0.1140 B`.
pub fn luminance(image: &DynamicImage) -> GrayImage {
    if let DynamicImage::ImageLuma8(gray) = image {
        return gray.clone();
    }
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let l = LUMA_WEIGHTS[0] * r as f32 + LUMA_WEIGHTS[1] * g as f32 + LUMA_WEIGHTS[2] * b as f32;
        Luma([l.round().clamp(0.0, 255.0) as u8])
    })
}

fn extrema(image: &GrayImage) -> (u8, u8) {
    image
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])))
}

/// Extract one channel as grayscale. `None` when asking for alpha on an
/// image without one.
pub fn extract_channel(image: &DynamicImage, channel: Channel) -> Option<GrayImage> {
    if channel == Channel::A && !image.color().has_alpha() {
        return None;
    }
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let i = channel.index();
    Some(GrayImage::from_fn(width, height, |x, y| Luma([rgba.get_pixel(x, y).0[i]])))
}

/// Alpha channel if it carries data: uniformly transparent and uniformly
/// opaque alpha are both treated as absent.
///
/// Encoders write alpha 255 when a specular map merely has an alpha slot;
/// read as gloss that would make every texel fully glossy.
pub fn meaningful_alpha(image: &DynamicImage) -> Option<GrayImage> {
    let alpha = extract_channel(image, Channel::A)?;
    match extrema(&alpha) {
        (0, 0) | (255, 255) => None,
        _ => Some(alpha),
    }
}

/// Multiply every value by `factor`, clipping at 255.
pub fn brightness(image: &GrayImage, factor: f32) -> GrayImage {
    let mut out = image.clone();
    for p in out.pixels_mut() {
        p.0[0] = (p.0[0] as f32 * factor).round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Stretch the value range to 0..=255. Uniform images are returned as is.
pub fn autocontrast(image: &GrayImage) -> GrayImage {
    let (lo, hi) = extrema(image);
    if hi <= lo {
        return image.clone();
    }
    let scale = 255.0 / (hi - lo) as f32;
    let mut out = image.clone();
    for p in out.pixels_mut() {
        p.0[0] = ((p.0[0] - lo) as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Gloss from a specular map: the requested channel when present and not
/// empty, otherwise brightened, autocontrasted grayscale.
pub fn extract_gloss_from_spec(spec: &DynamicImage, channel: Channel) -> GrayImage {
    let extracted = if channel == Channel::A {
        meaningful_alpha(spec)
    } else {
        extract_channel(spec, channel).filter(|c| extrema(c) != (0, 0))
    };
    if let Some(gloss) = extracted {
        return gloss;
    }
    autocontrast(&brightness(&luminance(spec), GLOSS_BRIGHTNESS))
}

/// Metalness estimated from specular luminance with a soft threshold,
/// suppressed in glossy regions when a gloss map is supplied.
pub fn specular_to_metallic(
    spec: &DynamicImage,
    gloss: Option<&GrayImage>,
    threshold: u8,
    softness: f32,
) -> GrayImage {
    let lum = luminance(spec);
    let (width, height) = lum.dimensions();
    let gloss = gloss.map(|g| resize_gray(g, width, height));
    let cut = threshold as f32 / 255.0;
    let softness = softness.max(f32::EPSILON);

    GrayImage::from_fn(width, height, |x, y| {
        let l = norm(lum.get_pixel(x, y).0[0]);
        let mut metal = ((l - cut) / softness).clamp(0.0, 1.0);
        if let Some(g) = &gloss {
            metal *= 1.0 - norm(g.get_pixel(x, y).0[0]);
        }
        Luma([quantize(metal)])
    })
}

/// `roughness = (1 - gloss)^2.2`
pub fn gloss_to_roughness(gloss: &GrayImage) -> GrayImage {
    let mut out = gloss.clone();
    for p in out.pixels_mut() {
        let r = (1.0 - norm(p.0[0])).powf(ROUGHNESS_GAMMA);
        p.0[0] = quantize(r);
    }
    out
}

/// Roughness from a specular map, using `gloss` when given and the gloss
/// extracted from the specular map otherwise.
pub fn specular_to_roughness(spec: &DynamicImage, gloss: Option<&GrayImage>) -> GrayImage {
    match gloss {
        Some(g) => gloss_to_roughness(g),
        None => gloss_to_roughness(&extract_gloss_from_spec(spec, Channel::A)),
    }
}

/// `255 - x` on colour channels. Alpha and the colour layout are preserved.
pub fn invert(image: &DynamicImage) -> DynamicImage {
    let mut out = image.clone();
    out.invert();
    out
}

pub fn invert_gray(image: &GrayImage) -> GrayImage {
    let mut out = image.clone();
    for p in out.pixels_mut() {
        p.0[0] = 255 - p.0[0];
    }
    out
}

/// Swap normal-map handedness by inverting the green channel only.
pub fn flip_green(image: &DynamicImage) -> DynamicImage {
    if image.color().has_alpha() {
        let mut rgba = image.to_rgba8();
        for p in rgba.pixels_mut() {
            p.0[1] = 255 - p.0[1];
        }
        DynamicImage::ImageRgba8(rgba)
    } else {
        let mut rgb = image.to_rgb8();
        for p in rgb.pixels_mut() {
            p.0[1] = 255 - p.0[1];
        }
        DynamicImage::ImageRgb8(rgb)
    }
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Tangent-space normal map from a height field.
///
/// The height is lightly blurred, linearised, and differentiated with a Sobel
/// kernel (edges clamped). The normal is `normalize(-gx, -gy, 1)`; DirectX
/// output negates the Y component.
pub fn bump_to_normal(height: &DynamicImage, format: NormalFormat, intensity: f32) -> RgbImage {
    let gray = image::imageops::blur(&luminance(height), 0.5);
    let (width, height_px) = gray.dimensions();
    let w = width as usize;
    let h = height_px as usize;
    let lin: Vec<f32> = gray.pixels().map(|p| srgb_to_linear(norm(p.0[0]))).collect();

    let sample = |x: isize, y: isize| -> f32 {
        let cx = x.clamp(0, w as isize - 1) as usize;
        let cy = y.clamp(0, h as isize - 1) as usize;
        lin[cy * w + cx]
    };

    RgbImage::from_fn(width, height_px, |x, y| {
        let (x, y) = (x as isize, y as isize);
        let gx = (-sample(x - 1, y - 1) + sample(x + 1, y - 1) - 2.0 * sample(x - 1, y)
            + 2.0 * sample(x + 1, y)
            - sample(x - 1, y + 1)
            + sample(x + 1, y + 1))
            / 8.0;
        let gy = (-sample(x - 1, y - 1) - 2.0 * sample(x, y - 1) - sample(x + 1, y - 1)
            + sample(x - 1, y + 1)
            + 2.0 * sample(x, y + 1)
            + sample(x + 1, y + 1))
            / 8.0;

        let nx = -gx * intensity;
        let mut ny = -gy * intensity;
        let nz = 1.0f32;
        let len = (nx * nx + ny * ny + nz * nz).sqrt().max(1e-8);
        if format == NormalFormat::DirectX {
            ny = -ny;
        }
        let encode = |v: f32| ((v / len + 1.0) * 127.5).round().clamp(0.0, 255.0) as u8;
        Rgb([encode(nx), encode(ny), encode(nz)])
    })
}

/// Base colour from a specular workflow.
///
/// `base = diffuse (1 - m) + spec m` (or `spec (1 - m)` without diffuse),
/// metal texels (`m > 0.5`) darkened by `metal_darkening`, and optionally
/// rebalanced with `base / (1 - 0.08 m)`.
pub fn base_color_from_spec(
    diffuse: Option<&RgbImage>,
    spec: &RgbImage,
    metal: &GrayImage,
    conserve_energy: bool,
    metal_darkening: f32,
) -> RgbImage {
    let (width, height) = spec.dimensions();
    let metal = resize_gray(metal, width, height);
    let diffuse = diffuse.map(|d| resize_rgb(d, width, height));

    RgbImage::from_fn(width, height, |x, y| {
        let m = norm(metal.get_pixel(x, y).0[0]);
        let s = spec.get_pixel(x, y).0;
        let mut out = [0u8; 3];
        for c in 0..3 {
            let sc = norm(s[c]);
            let mut base = match &diffuse {
                Some(d) => norm(d.get_pixel(x, y).0[c]) * (1.0 - m) + sc * m,
                None => sc * (1.0 - m),
            };
            if metal_darkening > 0.0 && m > 0.5 {
                base *= 1.0 - metal_darkening;
            }
            if conserve_energy {
                base /= 1.0 - 0.08 * m + 1e-6;
            }
            out[c] = quantize(base);
        }
        Rgb(out)
    })
}

/// Black out texels whose metalness is above 128, leaving alpha untouched.
pub fn cleanup_base_color(base: &DynamicImage, metal: &GrayImage) -> DynamicImage {
    let (width, height) = base.dimensions();
    let metal = resize_gray(metal, width, height);
    if base.color().has_alpha() {
        let mut rgba = base.to_rgba8();
        for (x, y, p) in rgba.enumerate_pixels_mut() {
            if metal.get_pixel(x, y).0[0] > 128 {
                p.0 = [0, 0, 0, p.0[3]];
            }
        }
        DynamicImage::ImageRgba8(rgba)
    } else {
        let mut rgb = base.to_rgb8();
        for (x, y, p) in rgb.enumerate_pixels_mut() {
            if metal.get_pixel(x, y).0[0] > 128 {
                p.0 = [0, 0, 0];
            }
        }
        DynamicImage::ImageRgb8(rgb)
    }
}

/// Central-difference gradient along one axis, one-sided at the borders.
fn gradient(values: &[f32], w: usize, h: usize, along_y: bool) -> Vec<f32> {
    let mut out = vec![0.0; w * h];
    let at = |x: usize, y: usize| values[y * w + x];
    for y in 0..h {
        for x in 0..w {
            let (i, n) = if along_y { (y, h) } else { (x, w) };
            let (lo, hi, span) = if i == 0 {
                (0, 1, 1.0)
            } else if i == n - 1 {
                (n - 2, n - 1, 1.0)
            } else {
                (i - 1, i + 1, 2.0)
            };
            let (a, b) = if along_y {
                (at(x, lo), at(x, hi))
            } else {
                (at(lo, y), at(hi, y))
            };
            out[y * w + x] = (b - a) / span;
        }
    }
    out
}

fn correlation(a: &[f32], b: &[f32]) -> Option<f32> {
    let n = a.len() as f64;
    if n == 0.0 {
        return None;
    }
    let mean_a = a.iter().map(|v| *v as f64).sum::<f64>() / n;
    let mean_b = b.iter().map(|v| *v as f64).sum::<f64>() / n;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        let da = *x as f64 - mean_a;
        let db = *y as f64 - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a <= f64::EPSILON || var_b <= f64::EPSILON {
        return None;
    }
    Some((cov / (var_a.sqrt() * var_b.sqrt())) as f32)
}

/// Guess a normal map's handedness.
///
/// For a height field the mixed partials agree, so `dR/dy` correlates with
/// `dG/dx` for OpenGL maps and anti-correlates for DirectX ones.
pub fn detect_normal_format(image: &DynamicImage, threshold: f32) -> Option<NormalFormat> {
    let (width, height) = image.dimensions();
    let reduced = if width.max(height) > 512 {
        image.resize(512, 512, FilterType::Triangle)
    } else {
        image.clone()
    };
    let rgb = reduced.to_rgb8();
    let (w, h) = (rgb.width() as usize, rgb.height() as usize);
    if w < 2 || h < 2 {
        return None;
    }
    let red: Vec<f32> = rgb.pixels().map(|p| p.0[0] as f32).collect();
    let green: Vec<f32> = rgb.pixels().map(|p| p.0[1] as f32).collect();

    let d_red_dy = gradient(&red, w, h, true);
    let d_green_dx = gradient(&green, w, h, false);
    let corr = correlation(&d_red_dy, &d_green_dx)?;

    if corr > threshold {
        Some(NormalFormat::OpenGl)
    } else if corr < -threshold {
        Some(NormalFormat::DirectX)
    } else {
        None
    }
}

/// Resize present channels to the first present one and fill the gaps.
fn align_channels(channels: &[Option<&GrayImage>], fills: &[u8]) -> Result<Vec<GrayImage>> {
    let (width, height) = channels
        .iter()
        .flatten()
        .next()
        .map(|c| c.dimensions())
        .ok_or_else(|| Error::MissingInput("No channels to pack".into()))?;

    Ok(channels
        .iter()
        .zip(fills)
        .map(|(channel, fill)| match channel {
            Some(c) => resize_gray(c, width, height),
            None => GrayImage::from_pixel(width, height, Luma([*fill])),
        })
        .collect())
}

/// ORM: R = ambient occlusion, G = roughness, B = metallic.
pub fn pack_orm(
    ao: Option<&GrayImage>,
    roughness: Option<&GrayImage>,
    metallic: Option<&GrayImage>,
) -> Result<RgbImage> {
    let c = align_channels(&[ao, roughness, metallic], &[FILL_OCCLUSION, FILL_NEUTRAL, FILL_NEUTRAL])?;
    let (width, height) = c[0].dimensions();
    Ok(RgbImage::from_fn(width, height, |x, y| {
        Rgb([c[0].get_pixel(x, y).0[0], c[1].get_pixel(x, y).0[0], c[2].get_pixel(x, y).0[0]])
    }))
}

/// HDRP mask map: R = metallic, G = ambient occlusion, B = detail mask,
/// A = smoothness.
pub fn pack_msao(
    metallic: Option<&GrayImage>,
    ao: Option<&GrayImage>,
    detail: Option<&GrayImage>,
    smoothness: Option<&GrayImage>,
) -> Result<RgbaImage> {
    let c = align_channels(
        &[metallic, ao, detail, smoothness],
        &[FILL_NEUTRAL, FILL_OCCLUSION, FILL_DETAIL, FILL_NEUTRAL],
    )?;
    let (width, height) = c[0].dimensions();
    Ok(RgbaImage::from_fn(width, height, |x, y| {
        Rgba([
            c[0].get_pixel(x, y).0[0],
            c[1].get_pixel(x, y).0[0],
            c[2].get_pixel(x, y).0[0],
            c[3].get_pixel(x, y).0[0],
        ])
    }))
}

/// Metallic in RGB with smoothness in alpha.
pub fn pack_metallic_smoothness(metallic: &GrayImage, smoothness: &GrayImage) -> RgbaImage {
    let (width, height) = metallic.dimensions();
    let smoothness = resize_gray(smoothness, width, height);
    RgbaImage::from_fn(width, height, |x, y| {
        let m = metallic.get_pixel(x, y).0[0];
        Rgba([m, m, m, smoothness.get_pixel(x, y).0[0]])
    })
}

/// Base colour in RGB with opacity in alpha.
pub fn pack_albedo_transparency(base: &DynamicImage, opacity: &GrayImage) -> RgbaImage {
    let rgb = base.to_rgb8();
    let (width, height) = rgb.dimensions();
    let opacity = resize_gray(opacity, width, height);
    RgbaImage::from_fn(width, height, |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        Rgba([r, g, b, opacity.get_pixel(x, y).0[0]])
    })
}

fn require_alpha(image: &DynamicImage, what: &str) -> Result<()> {
    if image.color().has_alpha() {
        Ok(())
    } else {
        Err(Error::UnsupportedMode(format!(
            "{} needs an alpha channel, got {:?}",
            what,
            image.color()
        )))
    }
}

fn channel(image: &DynamicImage, c: Channel) -> Result<GrayImage> {
    extract_channel(image, c)
        .ok_or_else(|| Error::UnsupportedMode(format!("missing {:?} channel", c)))
}

/// `(ao, roughness, metallic)` from an ORM map.
pub fn unpack_orm(image: &DynamicImage) -> Result<(GrayImage, GrayImage, GrayImage)> {
    Ok((channel(image, Channel::R)?, channel(image, Channel::G)?, channel(image, Channel::B)?))
}

/// `(metallic, ao, detail, smoothness)` from an MSAO map.
pub fn unpack_msao(image: &DynamicImage) -> Result<(GrayImage, GrayImage, GrayImage, GrayImage)> {
    require_alpha(image, "MSAO")?;
    Ok((
        channel(image, Channel::R)?,
        channel(image, Channel::G)?,
        channel(image, Channel::B)?,
        channel(image, Channel::A)?,
    ))
}

/// `(metallic, smoothness)` from a metallic-smoothness map.
pub fn unpack_metallic_smoothness(image: &DynamicImage) -> Result<(GrayImage, GrayImage)> {
    require_alpha(image, "Metallic_Smoothness")?;
    Ok((channel(image, Channel::R)?, channel(image, Channel::A)?))
}

/// `(base colour, opacity)` from an albedo-transparency map.
pub fn unpack_albedo_transparency(image: &DynamicImage) -> Result<(RgbImage, GrayImage)> {
    require_alpha(image, "Albedo_Transparency")?;
    Ok((image.to_rgb8(), channel(image, Channel::A)?))
}
