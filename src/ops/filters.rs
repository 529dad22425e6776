// ============================================================================
// IMAGE FILTERS — named pixel filters applied to a layer's original buffer
// ============================================================================
//
// Every filter is a pure transform `new = filter(&old)`. Neighbourhood
// filters clamp reads at the image edge, so running one on a crop that
// includes `support()` pixels of context gives the same values as running
// it on the full image.
// ============================================================================

use std::fmt;
use std::str::FromStr;

use image::RgbaImage;
use rayon::prelude::*;

use crate::error::{EditorError, Result};
use crate::ops::adjustments::luma;
use crate::ops::transform::{self, SwirlParams};

const BLUR_SIGMA: f32 = 2.0;
const SHARPEN_SIGMA: f32 = 2.0;
const SHARPEN_PERCENT: f32 = 150.0;
const SHARPEN_THRESHOLD: u8 = 3;
const MEDIAN_RADIUS: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Filter {
    Grayscale,
    Invert,
    Blur,
    Sharpen,
    Emboss,
    Edge,
    Contour,
    Detail,
    Smooth,
    Sepia,
    SkinSmooth,
    Swirl(SwirlParams),
}

/// How much of the surrounding image a filter reads per output pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Support {
    Pixel,
    Halo(u32),
    Global,
}

impl Filter {
    pub fn all_names() -> &'static [&'static str] {
        &[
            "grayscale", "invert", "blur", "sharpen", "emboss", "edge", "contour",
            "detail", "smooth", "sepia", "skin_smooth", "swirl",
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Filter::Grayscale => "grayscale",
            Filter::Invert => "invert",
            Filter::Blur => "blur",
            Filter::Sharpen => "sharpen",
            Filter::Emboss => "emboss",
            Filter::Edge => "edge",
            Filter::Contour => "contour",
            Filter::Detail => "detail",
            Filter::Smooth => "smooth",
            Filter::Sepia => "sepia",
            Filter::SkinSmooth => "skin_smooth",
            Filter::Swirl(_) => "swirl",
        }
    }

    pub fn support(&self) -> Support {
        match self {
            Filter::Grayscale | Filter::Invert | Filter::Sepia => Support::Pixel,
            Filter::Blur => Support::Halo(gaussian_radius(BLUR_SIGMA) as u32),
            Filter::Sharpen => Support::Halo(gaussian_radius(SHARPEN_SIGMA) as u32),
            Filter::Emboss | Filter::Edge | Filter::Contour | Filter::Detail => Support::Halo(1),
            Filter::Smooth => Support::Halo(2),
            Filter::SkinSmooth => Support::Halo(MEDIAN_RADIUS),
            Filter::Swirl(_) => Support::Global,
        }
    }

    pub fn apply(&self, src: &RgbaImage) -> RgbaImage {
        match self {
            Filter::Grayscale => map_pixels(src, |[r, g, b, a]| {
                let l = luma(r, g, b);
                [l, l, l, a]
            }),
            Filter::Invert => map_pixels(src, |[r, g, b, a]| [255 - r, 255 - g, 255 - b, a]),
            Filter::Sepia => map_pixels(src, |[r, g, b, a]| {
                let l = luma(r, g, b) as f32;
                [
                    (l * 1.07).floor().min(255.0) as u8,
                    (l * 0.74).floor().min(255.0) as u8,
                    (l * 0.43).floor().min(255.0) as u8,
                    a,
                ]
            }),
            Filter::Blur => parallel_gaussian_blur(src, BLUR_SIGMA),
            Filter::Sharpen => unsharp_mask(src, SHARPEN_SIGMA, SHARPEN_PERCENT, SHARPEN_THRESHOLD),
            Filter::Emboss => convolve(src, &EMBOSS),
            Filter::Edge => convolve(src, &EDGE_ENHANCE),
            Filter::Contour => convolve(src, &CONTOUR),
            Filter::Detail => convolve(src, &DETAIL),
            Filter::Smooth => convolve(src, &SMOOTH_MORE),
            Filter::SkinSmooth => median(src, MEDIAN_RADIUS),
            Filter::Swirl(params) => transform::swirl(src, params),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Filter {
    type Err = EditorError;

    /// Names are case-insensitive. Swirl takes optional parameters:
    /// `swirl:STRENGTH[,RADIUS[,CX,CY]]`.
    fn from_str(s: &str) -> Result<Self> {
        let (name, args) = match s.split_once(':') {
            Some((n, a)) => (n, Some(a)),
            None => (s, None),
        };
        let name = name.trim().to_lowercase();
        let filter = match name.as_str() {
            "grayscale" | "greyscale" => Filter::Grayscale,
            "invert" => Filter::Invert,
            "blur" | "gaussian" => Filter::Blur,
            "sharpen" | "unsharp" => Filter::Sharpen,
            "emboss" => Filter::Emboss,
            "edge" | "edge_enhance" => Filter::Edge,
            "contour" => Filter::Contour,
            "detail" => Filter::Detail,
            "smooth" | "smooth_more" => Filter::Smooth,
            "sepia" => Filter::Sepia,
            "skin_smooth" | "skin smooth" | "median" => Filter::SkinSmooth,
            "swirl" | "liquify" => Filter::Swirl(match args {
                Some(a) => a.parse()?,
                None => SwirlParams::default(),
            }),
            _ => return Err(EditorError::invalid(format!("unknown filter '{}'", s))),
        };
        if args.is_some() && !matches!(filter, Filter::Swirl(_)) {
            return Err(EditorError::invalid(format!("filter '{}' takes no parameters", name)));
        }
        Ok(filter)
    }
}

// ---------------------------------------------------------------------------
//  Per-pixel helper
// ---------------------------------------------------------------------------

fn map_pixels<F>(src: &RgbaImage, f: F) -> RgbaImage
where
    F: Fn([u8; 4]) -> [u8; 4] + Sync,
{
    let stride = src.width() as usize * 4;
    let mut out = src.clone();
    out.par_chunks_mut(stride).for_each(|row| {
        for px in row.chunks_exact_mut(4) {
            let mapped = f([px[0], px[1], px[2], px[3]]);
            px.copy_from_slice(&mapped);
        }
    });
    out
}

// ---------------------------------------------------------------------------
//  Convolution kernels
// ---------------------------------------------------------------------------

/// Square kernel, applied as `sum / scale + offset` to R, G and B.
/// Alpha passes through.
struct Kernel {
    size: usize,
    weights: &'static [f32],
    scale: f32,
    offset: f32,
}

const EMBOSS: Kernel = Kernel {
    size: 3,
    weights: &[-1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
    scale: 1.0,
    offset: 128.0,
};

const EDGE_ENHANCE: Kernel = Kernel {
    size: 3,
    weights: &[-1.0, -1.0, -1.0, -1.0, 10.0, -1.0, -1.0, -1.0, -1.0],
    scale: 2.0,
    offset: 0.0,
};

const CONTOUR: Kernel = Kernel {
    size: 3,
    weights: &[-1.0, -1.0, -1.0, -1.0, 8.0, -1.0, -1.0, -1.0, -1.0],
    scale: 1.0,
    offset: 255.0,
};

const DETAIL: Kernel = Kernel {
    size: 3,
    weights: &[0.0, -1.0, 0.0, -1.0, 10.0, -1.0, 0.0, -1.0, 0.0],
    scale: 6.0,
    offset: 0.0,
};

const SMOOTH_MORE: Kernel = Kernel {
    size: 5,
    weights: &[
        1.0, 1.0, 1.0, 1.0, 1.0,
        1.0, 5.0, 5.0, 5.0, 1.0,
        1.0, 5.0, 44.0, 5.0, 1.0,
        1.0, 5.0, 5.0, 5.0, 1.0,
        1.0, 1.0, 1.0, 1.0, 1.0,
    ],
    scale: 100.0,
    offset: 0.0,
};

fn convolve(src: &RgbaImage, kernel: &Kernel) -> RgbaImage {
    let w = src.width() as usize;
    let h = src.height() as usize;
    let radius = (kernel.size / 2) as isize;
    let src_raw = src.as_raw();
    let stride = w * 4;

    let mut out = src.clone();
    out.par_chunks_mut(stride).enumerate().for_each(|(y, row_out)| {
        for x in 0..w {
            let mut acc = [0.0f32; 3];
            for ky in 0..kernel.size {
                let sy = (y as isize + ky as isize - radius).clamp(0, h as isize - 1) as usize;
                for kx in 0..kernel.size {
                    let kv = kernel.weights[ky * kernel.size + kx];
                    if kv == 0.0 {
                        continue;
                    }
                    let sx = (x as isize + kx as isize - radius).clamp(0, w as isize - 1) as usize;
                    let idx = sy * stride + sx * 4;
                    acc[0] += src_raw[idx] as f32 * kv;
                    acc[1] += src_raw[idx + 1] as f32 * kv;
                    acc[2] += src_raw[idx + 2] as f32 * kv;
                }
            }
            let pi = x * 4;
            for c in 0..3 {
                row_out[pi + c] = (acc[c] / kernel.scale + kernel.offset).round().clamp(0.0, 255.0) as u8;
            }
        }
    });
    out
}

// ---------------------------------------------------------------------------
//  Parallel separable Gaussian blur (rayon)
// ---------------------------------------------------------------------------

/// Kernel radius for a given sigma: ceil(3 * sigma).
pub fn gaussian_radius(sigma: f32) -> usize {
    (sigma * 3.0).ceil().max(0.0) as usize
}

/// Build a 1-D Gaussian kernel truncated at ceil(3*sigma).
fn build_gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = gaussian_radius(sigma);
    if radius == 0 {
        return vec![1.0];
    }
    let len = radius * 2 + 1;
    let mut kernel = vec![0.0f32; len];
    let s2 = 2.0 * sigma * sigma;
    let mut sum = 0.0f32;
    for (i, k) in kernel.iter_mut().enumerate() {
        let x = i as f32 - radius as f32;
        let v = (-x * x / s2).exp();
        *k = v;
        sum += v;
    }
    let inv = 1.0 / sum;
    for v in &mut kernel {
        *v *= inv;
    }
    kernel
}

/// Separable Gaussian blur over all four channels, clamp-to-edge.
pub fn parallel_gaussian_blur(src: &RgbaImage, sigma: f32) -> RgbaImage {
    let w = src.width() as usize;
    let h = src.height() as usize;
    if w == 0 || h == 0 {
        return src.clone();
    }

    let kernel = build_gaussian_kernel(sigma);
    let radius = kernel.len() / 2;
    let buf_in: Vec<f32> = src.as_raw().iter().map(|&b| b as f32).collect();
    let pixel_count = buf_in.len();

    // --- Horizontal pass (parallel by row) ---
    let mut buf_h = vec![0.0f32; pixel_count];
    buf_h.par_chunks_mut(w * 4).enumerate().for_each(|(y, row_out)| {
        let row_in_start = y * w * 4;
        for x in 0..w {
            let mut acc = [0.0f32; 4];
            for (ki, &kv) in kernel.iter().enumerate() {
                let sx = (x as isize + ki as isize - radius as isize)
                    .clamp(0, w as isize - 1) as usize;
                let idx = row_in_start + sx * 4;
                for c in 0..4 {
                    acc[c] += buf_in[idx + c] * kv;
                }
            }
            row_out[x * 4..x * 4 + 4].copy_from_slice(&acc);
        }
    });

    // --- Vertical pass (parallel by row) ---
    let mut out = src.clone();
    out.par_chunks_mut(w * 4).enumerate().for_each(|(y, row_out)| {
        for x in 0..w {
            let mut acc = [0.0f32; 4];
            for (ki, &kv) in kernel.iter().enumerate() {
                let sy = (y as isize + ki as isize - radius as isize)
                    .clamp(0, h as isize - 1) as usize;
                let idx = sy * w * 4 + x * 4;
                for c in 0..4 {
                    acc[c] += buf_h[idx + c] * kv;
                }
            }
            for c in 0..4 {
                row_out[x * 4 + c] = acc[c].round().clamp(0.0, 255.0) as u8;
            }
        }
    });
    out
}

/// Unsharp mask: push each colour channel away from its blurred value by
/// `percent`, leaving differences below `threshold` alone. Alpha passes
/// through.
pub fn unsharp_mask(src: &RgbaImage, sigma: f32, percent: f32, threshold: u8) -> RgbaImage {
    let blurred = parallel_gaussian_blur(src, sigma);
    let blur_raw = blurred.as_raw();
    let stride = src.width() as usize * 4;
    let amount = percent / 100.0;

    let mut out = src.clone();
    out.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
        let blur_row = &blur_raw[y * stride..(y + 1) * stride];
        for (i, v) in row.iter_mut().enumerate() {
            if i % 4 == 3 {
                continue;
            }
            let diff = *v as i32 - blur_row[i] as i32;
            if diff.unsigned_abs() < threshold as u32 {
                continue;
            }
            *v = (*v as f32 + diff as f32 * amount).round().clamp(0.0, 255.0) as u8;
        }
    });
    out
}

/// Per-channel median over a (2r+1)^2 window, clamp-to-edge.
pub fn median(src: &RgbaImage, radius: u32) -> RgbaImage {
    let w = src.width() as usize;
    let h = src.height() as usize;
    let r = radius as isize;
    let src_raw = src.as_raw();
    let stride = w * 4;
    let side = (2 * radius + 1) as usize;

    let mut out = src.clone();
    out.par_chunks_mut(stride).enumerate().for_each(|(y, row_out)| {
        let mut window = vec![0u8; side * side];
        for x in 0..w {
            for c in 0..4 {
                let mut n = 0;
                for dy in -r..=r {
                    let sy = (y as isize + dy).clamp(0, h as isize - 1) as usize;
                    for dx in -r..=r {
                        let sx = (x as isize + dx).clamp(0, w as isize - 1) as usize;
                        window[n] = src_raw[sy * stride + sx * 4 + c];
                        n += 1;
                    }
                }
                window.sort_unstable();
                row_out[x * 4 + c] = window[window.len() / 2];
            }
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{imageops, Rgba};

    fn noisy(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| {
            let v = x.wrapping_mul(2654435761).wrapping_add(y.wrapping_mul(40503)) as u8;
            Rgba([v, v.wrapping_mul(3), v ^ 0x5a, 200 + (x % 50) as u8])
        })
    }

    #[test]
    fn every_name_parses() {
        for name in Filter::all_names() {
            let f: Filter = name.parse().unwrap();
            assert_eq!(f.name(), *name);
        }
        assert_eq!("Liquify".parse::<Filter>().unwrap().name(), "swirl");
        assert_eq!("skin smooth".parse::<Filter>().unwrap(), Filter::SkinSmooth);
        assert!(matches!("posterize".parse::<Filter>(), Err(EditorError::InvalidArgument(_))));
        assert!("blur:3".parse::<Filter>().is_err());
    }

    #[test]
    fn point_filters() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([200, 100, 50, 90]));
        assert_eq!(Filter::Invert.apply(&img).get_pixel(0, 0), &Rgba([55, 155, 205, 90]));
        assert_eq!(Filter::Grayscale.apply(&img).get_pixel(0, 0), &Rgba([124, 124, 124, 90]));
        // L = 124 -> 132.68, 91.76, 53.32
        assert_eq!(Filter::Sepia.apply(&img).get_pixel(0, 0), &Rgba([132, 91, 53, 90]));
        let white = RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 255]));
        assert_eq!(Filter::Sepia.apply(&white).get_pixel(0, 0), &Rgba([255, 188, 109, 255]));
    }

    #[test]
    fn smoothing_filters_keep_flat_images_flat() {
        let flat = RgbaImage::from_pixel(7, 5, Rgba([40, 80, 120, 255]));
        for f in [Filter::Blur, Filter::Smooth, Filter::SkinSmooth, Filter::Sharpen, Filter::Detail, Filter::Edge] {
            assert_eq!(f.apply(&flat), flat, "{}", f);
        }
    }

    #[test]
    fn emboss_and_contour_offsets() {
        let flat = RgbaImage::from_pixel(3, 3, Rgba([40, 80, 120, 255]));
        assert_eq!(Filter::Emboss.apply(&flat).get_pixel(1, 1), &Rgba([128, 128, 128, 255]));
        assert_eq!(Filter::Contour.apply(&flat).get_pixel(1, 1), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn median_removes_speckle() {
        let mut img = RgbaImage::from_pixel(5, 5, Rgba([10, 10, 10, 255]));
        img.put_pixel(2, 2, Rgba([255, 255, 255, 255]));
        assert_eq!(median(&img, 2).get_pixel(2, 2), &Rgba([10, 10, 10, 255]));
    }

    #[test]
    fn filtering_a_haloed_crop_matches_full_image() {
        let img = noisy(40, 30);
        let (x, y, w, h) = (9u32, 7u32, 12u32, 10u32);
        for name in Filter::all_names() {
            let f: Filter = name.parse().unwrap();
            let halo = match f.support() {
                Support::Pixel => 0,
                Support::Halo(n) => n,
                Support::Global => continue,
            };
            let full = f.apply(&img);
            let (sx, sy) = (x.saturating_sub(halo), y.saturating_sub(halo));
            let crop = imageops::crop_imm(&img, sx, sy, (x + w + halo).min(40) - sx, (y + h + halo).min(30) - sy)
                .to_image();
            let part = f.apply(&crop);
            for yy in y..y + h {
                for xx in x..x + w {
                    assert_eq!(part.get_pixel(xx - sx, yy - sy), full.get_pixel(xx, yy), "{} at {},{}", name, xx, yy);
                }
            }
        }
    }
}
