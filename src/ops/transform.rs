// ============================================================================
// TRANSFORM OPERATIONS — swirl warp, rotate, flip, resize, reframe, fit
// ============================================================================
//
// Image-level primitives. Layer- and document-level wrappers live in
// `canvas_ops`; these functions never touch layers directly.
// ============================================================================

use std::str::FromStr;

use image::{imageops, ImageBuffer, Pixel, Rgba, RgbaImage};
use rayon::prelude::*;

use crate::canvas::check_dimensions;
use crate::error::{EditorError, Result};

/// Interpolation method for resize operations.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum Interpolation {
    Nearest,
    Bilinear,
    #[default]
    Bicubic,
    Lanczos3,
}

impl Interpolation {
    pub fn to_filter(&self) -> imageops::FilterType {
        match self {
            Interpolation::Nearest  => imageops::FilterType::Nearest,
            Interpolation::Bilinear => imageops::FilterType::Triangle,
            Interpolation::Bicubic  => imageops::FilterType::CatmullRom,
            Interpolation::Lanczos3 => imageops::FilterType::Lanczos3,
        }
    }
}

// ---------------------------------------------------------------------------
//  Swirl
// ---------------------------------------------------------------------------

/// Swirl parameters. `None` picks the buffer-relative default: radius is
/// half the shorter side and the centre is the buffer centre.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SwirlParams {
    /// Rotation in radians at the centre, decaying linearly to 0 at `radius`.
    pub strength: f32,
    pub radius: Option<f32>,
    pub center: Option<(f32, f32)>,
}

impl Default for SwirlParams {
    fn default() -> Self {
        Self { strength: 4.0, radius: None, center: None }
    }
}

impl FromStr for SwirlParams {
    type Err = EditorError;

    /// `STRENGTH[,RADIUS[,CX,CY]]`
    fn from_str(s: &str) -> Result<Self> {
        let values: Vec<f32> = s
            .split(',')
            .map(|p| p.trim().parse::<f32>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| EditorError::invalid(format!("malformed swirl parameters '{}'", s)))?;
        if values.iter().any(|v| !v.is_finite()) {
            return Err(EditorError::invalid(format!("swirl parameters must be finite: '{}'", s)));
        }
        match values.as_slice() {
            [strength] => Ok(Self { strength: *strength, ..Self::default() }),
            [strength, radius] => Ok(Self { strength: *strength, radius: Some(*radius), center: None }),
            [strength, radius, cx, cy] => Ok(Self {
                strength: *strength,
                radius: Some(*radius),
                center: Some((*cx, *cy)),
            }),
            _ => Err(EditorError::invalid(format!(
                "swirl takes STRENGTH[,RADIUS[,CX,CY]], got '{}'",
                s
            ))),
        }
    }
}

/// Rotate pixels around a centre with a strength that fades out at the
/// radius. Pixels closer than 1px to the centre or beyond the radius keep
/// their value; samples that land outside the image are transparent.
pub fn swirl(src: &RgbaImage, params: &SwirlParams) -> RgbaImage {
    let (w, h) = src.dimensions();
    let (cx, cy) = match params.center {
        Some((x, y)) => (x as f64, y as f64),
        None => (w as f64 / 2.0, h as f64 / 2.0),
    };
    let radius = params.radius.map(|r| r as f64).unwrap_or(w.min(h) as f64 / 2.0);
    let strength = params.strength as f64;
    let src_raw = src.as_raw();
    let stride = w as usize * 4;

    let mut out = RgbaImage::new(w, h);
    out.par_chunks_mut(stride).enumerate().for_each(|(y, row_out)| {
        for x in 0..w as usize {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            let r = dx.hypot(dy);
            let pi = x * 4;

            let (sx, sy) = if r < 1.0 || r > radius {
                (x as i64, y as i64)
            } else {
                let theta = dy.atan2(dx) + strength * (1.0 - r / radius);
                ((cx + r * theta.cos()) as i64, (cy + r * theta.sin()) as i64)
            };

            if sx >= 0 && sy >= 0 && sx < w as i64 && sy < h as i64 {
                let si = sy as usize * stride + sx as usize * 4;
                row_out[pi..pi + 4].copy_from_slice(&src_raw[si..si + 4]);
            }
        }
    });
    out
}

// ---------------------------------------------------------------------------
//  Rotate / flip / resize
// ---------------------------------------------------------------------------

/// Rotate clockwise by `degrees`, expanding the output to hold the whole
/// result. Quarter turns are exact; other angles use nearest-neighbour
/// sampling with `fill` outside the source.
pub fn rotate_expand<P>(
    src: &ImageBuffer<P, Vec<P::Subpixel>>,
    degrees: f32,
    fill: P,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel + 'static,
{
    let turn = degrees.rem_euclid(360.0);
    if turn == 0.0 {
        return src.clone();
    } else if turn == 90.0 {
        return imageops::rotate90(src);
    } else if turn == 180.0 {
        return imageops::rotate180(src);
    } else if turn == 270.0 {
        return imageops::rotate270(src);
    }

    let (w, h) = (src.width() as f64, src.height() as f64);
    let (sin, cos) = (turn as f64).to_radians().sin_cos();
    let nw = ((w * cos.abs() + h * sin.abs()) - 1e-9).ceil().max(1.0);
    let nh = ((w * sin.abs() + h * cos.abs()) - 1e-9).ceil().max(1.0);
    let (cx, cy) = (w / 2.0, h / 2.0);
    let (ncx, ncy) = (nw / 2.0, nh / 2.0);

    ImageBuffer::from_fn(nw as u32, nh as u32, |x, y| {
        let dx = x as f64 + 0.5 - ncx;
        let dy = y as f64 + 0.5 - ncy;
        let sx = (cos * dx + sin * dy + cx).floor();
        let sy = (-sin * dx + cos * dy + cy).floor();
        if sx >= 0.0 && sy >= 0.0 && sx < w && sy < h {
            *src.get_pixel(sx as u32, sy as u32)
        } else {
            fill
        }
    })
}

pub fn flip<P>(src: &ImageBuffer<P, Vec<P::Subpixel>>, horizontal: bool) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel + 'static,
{
    if horizontal {
        imageops::flip_horizontal(src)
    } else {
        imageops::flip_vertical(src)
    }
}

pub fn resize<P>(
    src: &ImageBuffer<P, Vec<P::Subpixel>>,
    width: u32,
    height: u32,
    interp: Interpolation,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel + 'static,
    P::Subpixel: 'static,
{
    if src.dimensions() == (width, height) {
        return src.clone();
    }
    imageops::resize(src, width, height, interp.to_filter())
}

/// Copy `src` onto a fresh `width x height` buffer filled with `fill`, with
/// the source's top-left at `offset`. Used for padding, cropping and
/// re-centring.
pub fn reframe<P>(
    src: &ImageBuffer<P, Vec<P::Subpixel>>,
    offset: (i64, i64),
    width: u32,
    height: u32,
    fill: P,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel + 'static,
{
    let mut out = ImageBuffer::from_pixel(width, height, fill);
    let x_start = offset.0.max(0);
    let y_start = offset.1.max(0);
    let x_end = (offset.0 + src.width() as i64).min(width as i64);
    let y_end = (offset.1 + src.height() as i64).min(height as i64);
    for y in y_start..y_end {
        for x in x_start..x_end {
            let p = *src.get_pixel((x - offset.0) as u32, (y - offset.1) as u32);
            out.put_pixel(x as u32, y as u32, p);
        }
    }
    out
}

/// Scale to cover `width x height`, then centre-crop. Bicubic.
pub fn fit_to(src: &RgbaImage, width: u32, height: u32) -> Result<RgbaImage> {
    check_dimensions(width, height)?;
    let (sw, sh) = (src.width() as f64, src.height() as f64);
    let scale = (width as f64 / sw).max(height as f64 / sh);
    let scaled_w = ((sw * scale).round() as u32).max(width);
    let scaled_h = ((sh * scale).round() as u32).max(height);
    check_dimensions(scaled_w, scaled_h)?;
    let scaled = resize(src, scaled_w, scaled_h, Interpolation::Bicubic);
    let x = (scaled_w - width) / 2;
    let y = (scaled_h - height) / 2;
    Ok(imageops::crop_imm(&scaled, x, y, width, height).to_image())
}

/// Transparent RGBA fill for `reframe` / `rotate_expand`.
pub const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);
