// ============================================================================
// ADJUSTMENTS — the non-destructive pipeline from `original` to `working`
// ============================================================================
//
// Steps run in a fixed order: brightness, contrast, saturation, gamma,
// channel multipliers, then alpha x mask. A step whose factor is 1.0 is
// skipped, and every step is exact at identity, so skipping never changes
// the output bytes.
//
// Operations are parallelized via rayon, one row per task.
// ============================================================================

use std::fmt;
use std::str::FromStr;

use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::canvas::{Mask, PixelBuffer};
use crate::error::{EditorError, Result};
use crate::ops::filters;

/// Per-layer adjustment scalars. All default to 1.0 (identity).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Adjustments {
    pub alpha: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub gamma: f32,
    pub red: f32,
    pub green: f32,
    pub blue: f32,
}

impl Default for Adjustments {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            brightness: 1.0,
            contrast: 1.0,
            saturation: 1.0,
            gamma: 1.0,
            red: 1.0,
            green: 1.0,
            blue: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdjustmentKind {
    Alpha,
    Brightness,
    Contrast,
    Saturation,
    Gamma,
    Red,
    Green,
    Blue,
}

impl AdjustmentKind {
    pub fn all() -> &'static [AdjustmentKind] {
        &[
            AdjustmentKind::Alpha,
            AdjustmentKind::Brightness,
            AdjustmentKind::Contrast,
            AdjustmentKind::Saturation,
            AdjustmentKind::Gamma,
            AdjustmentKind::Red,
            AdjustmentKind::Green,
            AdjustmentKind::Blue,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            AdjustmentKind::Alpha => "alpha",
            AdjustmentKind::Brightness => "brightness",
            AdjustmentKind::Contrast => "contrast",
            AdjustmentKind::Saturation => "saturation",
            AdjustmentKind::Gamma => "gamma",
            AdjustmentKind::Red => "red",
            AdjustmentKind::Green => "green",
            AdjustmentKind::Blue => "blue",
        }
    }
}

impl fmt::Display for AdjustmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AdjustmentKind {
    type Err = EditorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "alpha" | "opacity" => Ok(AdjustmentKind::Alpha),
            "brightness" => Ok(AdjustmentKind::Brightness),
            "contrast" => Ok(AdjustmentKind::Contrast),
            "saturation" | "color" | "colour" => Ok(AdjustmentKind::Saturation),
            "gamma" => Ok(AdjustmentKind::Gamma),
            "red" | "r" => Ok(AdjustmentKind::Red),
            "green" | "g" => Ok(AdjustmentKind::Green),
            "blue" | "b" => Ok(AdjustmentKind::Blue),
            _ => Err(EditorError::invalid(format!("unknown adjustment '{}'", s))),
        }
    }
}

impl Adjustments {
    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }

    pub fn get(&self, kind: AdjustmentKind) -> f32 {
        match kind {
            AdjustmentKind::Alpha => self.alpha,
            AdjustmentKind::Brightness => self.brightness,
            AdjustmentKind::Contrast => self.contrast,
            AdjustmentKind::Saturation => self.saturation,
            AdjustmentKind::Gamma => self.gamma,
            AdjustmentKind::Red => self.red,
            AdjustmentKind::Green => self.green,
            AdjustmentKind::Blue => self.blue,
        }
    }

    /// Set one scalar. Values must be finite and gamma strictly positive.
    /// Negative factors are accepted; the affected samples clamp at 0.
    pub fn set(&mut self, kind: AdjustmentKind, value: f32) -> Result<()> {
        if !value.is_finite() {
            return Err(EditorError::invalid(format!("{} must be finite, got {}", kind, value)));
        }
        if kind == AdjustmentKind::Gamma && value <= 0.0 {
            return Err(EditorError::invalid(format!("gamma must be > 0, got {}", value)));
        }
        let slot = match kind {
            AdjustmentKind::Alpha => &mut self.alpha,
            AdjustmentKind::Brightness => &mut self.brightness,
            AdjustmentKind::Contrast => &mut self.contrast,
            AdjustmentKind::Saturation => &mut self.saturation,
            AdjustmentKind::Gamma => &mut self.gamma,
            AdjustmentKind::Red => &mut self.red,
            AdjustmentKind::Green => &mut self.green,
            AdjustmentKind::Blue => &mut self.blue,
        };
        *slot = value;
        Ok(())
    }
}

// ============================================================================
// PIXEL HELPERS
// ============================================================================

/// ITU-R 601 luma in 16.16 fixed point, rounded.
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16) as u8
}

fn scale_channel(c: u8, factor: f32) -> u8 {
    (c as f32 * factor).round().clamp(0.0, 255.0) as u8
}

/// Interpolate away from (or toward) `pivot`.
fn pivot_channel(c: u8, pivot: f32, factor: f32) -> u8 {
    (pivot + (c as f32 - pivot) * factor).round().clamp(0.0, 255.0) as u8
}

/// `min(255, floor(c * m))`, floored at 0 for negative multipliers.
fn multiply_channel(c: u8, m: f32) -> u8 {
    (c as f32 * m).floor().clamp(0.0, 255.0) as u8
}

fn gamma_lut(gamma: f32) -> [u8; 256] {
    let inv = 1.0 / gamma as f64;
    let mut lut = [0u8; 256];
    for (i, v) in lut.iter_mut().enumerate() {
        *v = (255.0 * (i as f64 / 255.0).powf(inv)).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Mean luma after brightness, rounded to the nearest level. This is the
/// grey that contrast pivots on.
fn contrast_pivot(src: &RgbaImage, brightness: f32) -> f32 {
    let stride = src.width() as usize * 4;
    let total: u64 = src
        .as_raw()
        .par_chunks(stride)
        .map(|row| {
            row.chunks_exact(4)
                .map(|p| {
                    let (r, g, b) = if brightness != 1.0 {
                        (
                            scale_channel(p[0], brightness),
                            scale_channel(p[1], brightness),
                            scale_channel(p[2], brightness),
                        )
                    } else {
                        (p[0], p[1], p[2])
                    };
                    luma(r, g, b) as u64
                })
                .sum::<u64>()
        })
        .sum();
    let n = src.width() as u64 * src.height() as u64;
    (total as f64 / n as f64 + 0.5).floor() as f32
}

/// Mean luma of an image, unrounded.
pub fn mean_luma(src: &RgbaImage) -> f32 {
    let n = src.width() as u64 * src.height() as u64;
    if n == 0 {
        return 0.0;
    }
    let total: u64 = src
        .pixels()
        .map(|p| luma(p[0], p[1], p[2]) as u64)
        .sum();
    (total as f64 / n as f64) as f32
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Run the pipeline over `src`. `mask` (one byte per pixel) scales the final
/// alpha when present.
fn run_pipeline(src: &RgbaImage, mask: Option<&[u8]>, adj: &Adjustments) -> RgbaImage {
    let w = src.width() as usize;
    let stride = w * 4;
    let pivot = (adj.contrast != 1.0).then(|| contrast_pivot(src, adj.brightness));
    let lut = (adj.gamma != 1.0).then(|| gamma_lut(adj.gamma));
    let multipliers = [adj.red, adj.green, adj.blue];

    let mut out = src.clone();
    out.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
        let mask_row = mask.map(|m| &m[y * w..(y + 1) * w]);
        for x in 0..w {
            let pi = x * 4;
            let mut rgb = [row[pi], row[pi + 1], row[pi + 2]];

            if adj.brightness != 1.0 {
                rgb = rgb.map(|c| scale_channel(c, adj.brightness));
            }
            if let Some(p) = pivot {
                rgb = rgb.map(|c| pivot_channel(c, p, adj.contrast));
            }
            if adj.saturation != 1.0 {
                let l = luma(rgb[0], rgb[1], rgb[2]) as f32;
                rgb = rgb.map(|c| pivot_channel(c, l, adj.saturation));
            }
            if let Some(lut) = &lut {
                rgb = rgb.map(|c| lut[c as usize]);
            }
            for (c, &m) in rgb.iter_mut().zip(multipliers.iter()) {
                if m != 1.0 {
                    *c = multiply_channel(*c, m);
                }
            }

            let mut a = row[pi + 3];
            if adj.alpha != 1.0 {
                a = multiply_channel(a, adj.alpha);
            }
            if let Some(m) = mask_row {
                a = (a as u32 * m[x] as u32 / 255) as u8;
            }

            row[pi] = rgb[0];
            row[pi + 1] = rgb[1];
            row[pi + 2] = rgb[2];
            row[pi + 3] = a;
        }
    });
    out
}

/// Derive a layer's working buffer. Identity adjustments with a full mask
/// share the original's storage.
pub fn render_working(original: &PixelBuffer, mask: &Mask, adj: &Adjustments) -> PixelBuffer {
    let full = mask.is_full();
    if adj.is_identity() && full {
        return original.clone();
    }
    let mask_raw = (!full).then(|| mask.image().as_raw().as_slice());
    PixelBuffer::wrap(run_pipeline(original.image(), mask_raw, adj))
}

/// Bake the tonal steps of `adj` into an image (no mask).
pub fn apply_tone(src: &RgbaImage, adj: &Adjustments) -> RgbaImage {
    if adj.is_identity() {
        return src.clone();
    }
    run_pipeline(src, None, adj)
}

/// One-click enhancement: a mild brightness/contrast/colour lift followed by
/// a light unsharp mask.
pub fn auto_enhance(src: &RgbaImage) -> RgbaImage {
    let lift = Adjustments {
        brightness: 1.1,
        contrast: 1.15,
        saturation: 1.1,
        ..Adjustments::default()
    };
    let toned = apply_tone(src, &lift);
    filters::unsharp_mask(&toned, 1.0, 125.0, 3)
}

/// Brightness factors pulling every image toward the common mean luma,
/// clamped to [0.5, 2.0]. Black images keep factor 1.
pub fn balance_factors(images: &[&RgbaImage]) -> Vec<f32> {
    if images.is_empty() {
        return Vec::new();
    }
    let means: Vec<f32> = images.iter().map(|img| mean_luma(img)).collect();
    let target = means.iter().sum::<f32>() / means.len() as f32;
    means
        .iter()
        .map(|&m| if m <= 0.0 { 1.0 } else { (target / m).clamp(0.5, 2.0) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgba};

    fn single(c: [u8; 4]) -> PixelBuffer {
        PixelBuffer::filled(1, 1, Rgba(c)).unwrap()
    }

    fn render(c: [u8; 4], adj: Adjustments) -> Rgba<u8> {
        let buf = single(c);
        render_working(&buf, &Mask::full(1, 1).unwrap(), &adj).get_pixel(0, 0)
    }

    #[test]
    fn identity_shares_storage() {
        let buf = single([10, 20, 30, 40]);
        let out = render_working(&buf, &Mask::full(1, 1).unwrap(), &Adjustments::default());
        assert!(out.shares_storage(&buf));
    }

    #[test]
    fn identity_gamma_lut_is_exact() {
        let lut = gamma_lut(1.0);
        for (i, &v) in lut.iter().enumerate() {
            assert_eq!(v as usize, i);
        }
    }

    #[test]
    fn gamma_brightens_midtones() {
        let adj = Adjustments { gamma: 2.0, ..Adjustments::default() };
        // 255 * (64/255)^0.5 = 127.75
        assert_eq!(render([64, 0, 255, 255], adj), Rgba([128, 0, 255, 255]));
    }

    #[test]
    fn brightness_scales_toward_black() {
        let adj = Adjustments { brightness: 0.5, ..Adjustments::default() };
        assert_eq!(render([200, 100, 50, 77], adj), Rgba([100, 50, 25, 77]));
    }

    #[test]
    fn zero_saturation_is_luma_grey() {
        let adj = Adjustments { saturation: 0.0, ..Adjustments::default() };
        assert_eq!(render([200, 100, 50, 255], adj), Rgba([124, 124, 124, 255]));
    }

    #[test]
    fn contrast_pivots_on_mean() {
        let adj = Adjustments { contrast: 2.0, ..Adjustments::default() };
        assert_eq!(render([100, 100, 100, 255], adj), Rgba([100, 100, 100, 255]));

        let img = RgbaImage::from_fn(2, 1, |x, _| {
            if x == 0 { Rgba([100, 100, 100, 255]) } else { Rgba([200, 200, 200, 255]) }
        });
        let out = run_pipeline(&img, None, &adj);
        assert_eq!(out.get_pixel(0, 0), &Rgba([50, 50, 50, 255]));
        assert_eq!(out.get_pixel(1, 0), &Rgba([250, 250, 250, 255]));
    }

    #[test]
    fn channel_multipliers_saturate_and_floor() {
        let adj = Adjustments { red: 10.0, green: -1.0, blue: 1.5, ..Adjustments::default() };
        assert_eq!(render([100, 100, 100, 255], adj), Rgba([255, 0, 150, 255]));
    }

    #[test]
    fn alpha_scalar_then_mask() {
        let buf = single([1, 2, 3, 255]);
        let mask = Mask::from_image(GrayImage::from_pixel(1, 1, Luma([128]))).unwrap();
        let adj = Adjustments { alpha: 0.5, ..Adjustments::default() };
        assert_eq!(render_working(&buf, &mask, &adj).get_pixel(0, 0), Rgba([1, 2, 3, 63]));

        let boosted = Adjustments { alpha: 4.0, ..Adjustments::default() };
        assert_eq!(render([0, 0, 0, 100], boosted)[3], 255);
    }

    #[test]
    fn set_validates_values() {
        let mut adj = Adjustments::default();
        assert!(adj.set(AdjustmentKind::Gamma, 0.0).is_err());
        assert!(adj.set(AdjustmentKind::Red, f32::NAN).is_err());
        adj.set(AdjustmentKind::Contrast, 1.5).unwrap();
        assert_eq!(adj.get(AdjustmentKind::Contrast), 1.5);
        assert!(!adj.is_identity());
    }

    #[test]
    fn kind_names_parse() {
        for &kind in AdjustmentKind::all() {
            assert_eq!(kind.name().parse::<AdjustmentKind>().unwrap(), kind);
        }
        assert_eq!("Colour".parse::<AdjustmentKind>().unwrap(), AdjustmentKind::Saturation);
        assert!("hue".parse::<AdjustmentKind>().is_err());
    }

    #[test]
    fn balance_pulls_toward_common_mean() {
        let dark = RgbaImage::from_pixel(2, 2, Rgba([50, 50, 50, 255]));
        let light = RgbaImage::from_pixel(2, 2, Rgba([150, 150, 150, 255]));
        let black = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]));
        let f = balance_factors(&[&dark, &light]);
        assert!((f[0] - 2.0).abs() < 1e-6);
        assert!((f[1] - 100.0 / 150.0).abs() < 1e-6);
        assert_eq!(balance_factors(&[&black, &light])[0], 1.0);
    }
}
