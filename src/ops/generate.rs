// ============================================================================
// GENERATED LAYERS — solid, gradient, pattern, noise and shape fills
// ============================================================================

use std::str::FromStr;

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::canvas::check_dimensions;
use crate::error::{EditorError, Result};

/// Content for a freshly generated layer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Fill {
    Blank,
    Solid(Rgba<u8>),
    Gradient { from: Rgba<u8>, to: Rgba<u8>, vertical: bool },
    /// `color` on even bands, transparent on odd ones.
    Stripes { color: Rgba<u8>, size: u32 },
    Checker { color: Rgba<u8>, size: u32 },
    /// `density` percent of pixels take `fg`, the rest `bg`.
    Noise { density: f32, fg: Rgba<u8>, bg: Rgba<u8>, seed: u32 },
    /// Radii are fractions of the shorter canvas side.
    Circle { color: Rgba<u8>, radius: f32 },
    Ring { color: Rgba<u8>, outer: f32, inner: f32 },
}

/// Parse `#rgb`, `#rrggbb` or `#rrggbbaa` (the `#` is optional).
pub fn parse_color(s: &str) -> Result<Rgba<u8>> {
    let hex = s.trim().trim_start_matches('#');
    let bad = || EditorError::invalid(format!("malformed colour '{}'", s));
    let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2).ok_or_else(bad)?, 16).map_err(|_| bad());
    match hex.len() {
        3 => {
            let mut c = [0u8; 4];
            for (i, ch) in hex.chars().enumerate() {
                let v = ch.to_digit(16).ok_or_else(bad)? as u8;
                c[i] = v * 17;
            }
            c[3] = 255;
            Ok(Rgba(c))
        }
        6 => Ok(Rgba([byte(0)?, byte(2)?, byte(4)?, 255])),
        8 => Ok(Rgba([byte(0)?, byte(2)?, byte(4)?, byte(6)?])),
        _ => Err(bad()),
    }
}

pub fn format_color(c: Rgba<u8>) -> String {
    if c[3] == 255 {
        format!("#{:02x}{:02x}{:02x}", c[0], c[1], c[2])
    } else {
        format!("#{:02x}{:02x}{:02x}{:02x}", c[0], c[1], c[2], c[3])
    }
}

#[inline]
fn hash_u32(mut x: u32) -> u32 {
    x = x.wrapping_mul(0x9E3779B9);
    x ^= x >> 16;
    x = x.wrapping_mul(0x85EBCA6B);
    x ^= x >> 13;
    x = x.wrapping_mul(0xC2B2AE35);
    x ^= x >> 16;
    x
}

/// Hash to f32 in [0, 1).
#[inline]
fn hash_f32(x: u32, y: u32, seed: u32) -> f32 {
    let h = hash_u32(
        x.wrapping_mul(374761393)
            .wrapping_add(y.wrapping_mul(668265263))
            .wrapping_add(seed),
    );
    (h & 0x00FFFFFF) as f32 / 16777216.0
}

fn lerp_channel(a: u8, b: u8, t: f32) -> u8 {
    (a as f32 + (b as f32 - a as f32) * t) as u8
}

impl Fill {
    fn validate(&self) -> Result<()> {
        match *self {
            Fill::Stripes { size, .. } | Fill::Checker { size, .. } if size == 0 => {
                Err(EditorError::invalid("pattern size must be at least 1"))
            }
            Fill::Noise { density, .. } if !(0.0..=100.0).contains(&density) => {
                Err(EditorError::invalid(format!("noise density must be 0-100, got {}", density)))
            }
            Fill::Circle { radius, .. } if !(0.0..=1.0).contains(&radius) => {
                Err(EditorError::invalid(format!("circle radius must be 0-1, got {}", radius)))
            }
            Fill::Ring { outer, inner, .. }
                if !(0.0..=1.0).contains(&outer) || !(0.0..=outer).contains(&inner) =>
            {
                Err(EditorError::invalid(format!("ring radii must satisfy 0 <= inner <= outer <= 1, got {}/{}", inner, outer)))
            }
            _ => Ok(()),
        }
    }

    /// Render a `width x height` buffer.
    pub fn render(&self, width: u32, height: u32) -> Result<RgbaImage> {
        check_dimensions(width, height)?;
        self.validate()?;

        let fill = *self;
        let short = width.min(height) as f32;
        let (cx, cy) = ((width / 2) as i64, (height / 2) as i64);
        let mut out = RgbaImage::new(width, height);
        out.par_chunks_mut(width as usize * 4).enumerate().for_each(|(y, row)| {
            let y = y as u32;
            for x in 0..width {
                let px = match fill {
                    Fill::Blank => None,
                    Fill::Solid(c) => Some(c),
                    Fill::Gradient { from, to, vertical } => {
                        let (pos, span) = if vertical { (y, height) } else { (x, width) };
                        let t = if span > 1 { pos as f32 / (span - 1) as f32 } else { 0.0 };
                        Some(Rgba([
                            lerp_channel(from[0], to[0], t),
                            lerp_channel(from[1], to[1], t),
                            lerp_channel(from[2], to[2], t),
                            lerp_channel(from[3], to[3], t),
                        ]))
                    }
                    Fill::Stripes { color, size } => ((x / size) % 2 == 0).then_some(color),
                    Fill::Checker { color, size } => ((x / size + y / size) % 2 == 0).then_some(color),
                    Fill::Noise { density, fg, bg, seed } => {
                        Some(if hash_f32(x, y, seed) * 100.0 < density { fg } else { bg })
                    }
                    Fill::Circle { color, radius } => {
                        let r = (short * radius) as i64;
                        let d2 = (x as i64 - cx).pow(2) + (y as i64 - cy).pow(2);
                        (d2 <= r * r).then_some(color)
                    }
                    Fill::Ring { color, outer, inner } => {
                        let ro = (short * outer) as i64;
                        let ri = (short * inner) as i64;
                        let d2 = (x as i64 - cx).pow(2) + (y as i64 - cy).pow(2);
                        (ri * ri < d2 && d2 <= ro * ro).then_some(color)
                    }
                };
                if let Some(c) = px {
                    let pi = x as usize * 4;
                    row[pi..pi + 4].copy_from_slice(&c.0);
                }
            }
        });
        Ok(out)
    }
}

impl FromStr for Fill {
    type Err = EditorError;

    /// `blank`, `solid:#c`, `gradient:#a,#b[,vertical]`, `stripes:#c[,SIZE]`,
    /// `checker:#c[,SIZE]`, `noise:DENSITY[,#fg,#bg[,SEED]]`,
    /// `circle:#c[,RADIUS]`, `ring:#c[,OUTER,INNER]`.
    fn from_str(s: &str) -> Result<Self> {
        let (kind, args) = s.split_once(':').unwrap_or((s, ""));
        let args: Vec<&str> = args.split(',').map(str::trim).filter(|a| !a.is_empty()).collect();
        let num = |i: usize, default: f32| -> Result<f32> {
            match args.get(i) {
                Some(a) => a.parse::<f32>().map_err(|_| EditorError::invalid(format!("malformed number '{}'", a))),
                None => Ok(default),
            }
        };
        let color = |i: usize, default: Rgba<u8>| -> Result<Rgba<u8>> {
            args.get(i).map_or(Ok(default), |a| parse_color(a))
        };
        let white = Rgba([255, 255, 255, 255]);
        let black = Rgba([0, 0, 0, 255]);

        match kind.trim().to_lowercase().as_str() {
            "blank" => Ok(Fill::Blank),
            "solid" | "color" | "colour" => Ok(Fill::Solid(color(0, white)?)),
            "gradient" => Ok(Fill::Gradient {
                from: color(0, black)?,
                to: color(1, white)?,
                vertical: args.get(2).is_some_and(|a| a.starts_with('v')),
            }),
            "stripes" => Ok(Fill::Stripes { color: color(0, white)?, size: num(1, 20.0)? as u32 }),
            "checker" => Ok(Fill::Checker { color: color(0, white)?, size: num(1, 20.0)? as u32 }),
            "noise" => Ok(Fill::Noise {
                density: num(0, 50.0)?,
                fg: color(1, white)?,
                bg: color(2, black)?,
                seed: num(3, 0.0)? as u32,
            }),
            "circle" => Ok(Fill::Circle { color: color(0, white)?, radius: num(1, 0.3)? }),
            "ring" => Ok(Fill::Ring { color: color(0, white)?, outer: num(1, 0.45)?, inner: num(2, 0.3)? }),
            _ => Err(EditorError::invalid(format!("unknown layer fill '{}'", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    #[test]
    fn colours_parse() {
        assert_eq!(parse_color("#ff0000").unwrap(), RED);
        assert_eq!(parse_color("f00").unwrap(), RED);
        assert_eq!(parse_color("#ff000080").unwrap(), Rgba([255, 0, 0, 128]));
        assert!(parse_color("#ff00").is_err());
        assert!(parse_color("#gg0000").is_err());
        assert_eq!(format_color(RED), "#ff0000");
    }

    #[test]
    fn gradient_runs_end_to_end() {
        let fill = Fill::Gradient { from: Rgba([0, 0, 0, 255]), to: Rgba([255, 255, 255, 255]), vertical: false };
        let img = fill.render(256, 2).unwrap();
        assert_eq!(img.get_pixel(0, 1), &Rgba([0, 0, 0, 255]));
        assert_eq!(img.get_pixel(255, 0), &Rgba([255, 255, 255, 255]));
        let mid = img.get_pixel(128, 0)[0];
        assert!((127..=128).contains(&mid));
    }

    #[test]
    fn patterns() {
        let stripes = Fill::Stripes { color: RED, size: 2 }.render(6, 1).unwrap();
        let alphas: Vec<u8> = stripes.pixels().map(|p| p[3]).collect();
        assert_eq!(alphas, vec![255, 255, 0, 0, 255, 255]);
        let checker = Fill::Checker { color: RED, size: 1 }.render(2, 2).unwrap();
        assert_eq!(checker.get_pixel(0, 0)[3], 255);
        assert_eq!(checker.get_pixel(1, 0)[3], 0);
        assert_eq!(checker.get_pixel(1, 1)[3], 255);
    }

    #[test]
    fn noise_density_extremes_and_determinism() {
        let bg = Rgba([0, 0, 0, 255]);
        let none = Fill::Noise { density: 0.0, fg: RED, bg, seed: 1 }.render(8, 8).unwrap();
        assert!(none.pixels().all(|p| *p == bg));
        let all = Fill::Noise { density: 100.0, fg: RED, bg, seed: 1 }.render(8, 8).unwrap();
        assert!(all.pixels().all(|p| *p == RED));
        let half = Fill::Noise { density: 50.0, fg: RED, bg, seed: 7 };
        assert_eq!(half.render(16, 16).unwrap(), half.render(16, 16).unwrap());
    }

    #[test]
    fn shapes() {
        let circle = Fill::Circle { color: RED, radius: 0.25 }.render(20, 20).unwrap();
        assert_eq!(circle.get_pixel(10, 10), &RED);
        assert_eq!(circle.get_pixel(15, 10), &RED);
        assert_eq!(circle.get_pixel(16, 10)[3], 0);
        let ring = Fill::Ring { color: RED, outer: 0.4, inner: 0.2 }.render(20, 20).unwrap();
        assert_eq!(ring.get_pixel(10, 10)[3], 0);
        assert_eq!(ring.get_pixel(16, 10), &RED);
        assert!(Fill::Ring { color: RED, outer: 0.2, inner: 0.4 }.render(4, 4).is_err());
    }

    #[test]
    fn fill_specs_parse() {
        assert_eq!("blank".parse::<Fill>().unwrap(), Fill::Blank);
        assert_eq!("solid:#ff0000".parse::<Fill>().unwrap(), Fill::Solid(RED));
        assert_eq!(
            "checker:#f00,4".parse::<Fill>().unwrap(),
            Fill::Checker { color: RED, size: 4 }
        );
        assert!(matches!("gradient:#000,#fff,vertical".parse::<Fill>().unwrap(), Fill::Gradient { vertical: true, .. }));
        assert!("plasma".parse::<Fill>().is_err());
    }
}
