// ============================================================================
// PAINT OPERATIONS — brush, eraser and mask strokes
// ============================================================================
//
// A stroke is a polyline swept by a round brush: a pixel is covered when
// its distance to the nearest segment is at most half the brush size.
// Coverage is hard-edged, so repainting the same stroke is idempotent.
// ============================================================================

use std::str::FromStr;

use image::{GrayImage, Rgba, RgbaImage};
use rayon::prelude::*;

use crate::error::{EditorError, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct Stroke {
    /// Points in image coordinates. A single point stamps one dab.
    pub points: Vec<(f32, f32)>,
    /// Brush diameter in pixels.
    pub size: f32,
}

impl Stroke {
    pub fn new(points: Vec<(f32, f32)>, size: f32) -> Result<Self> {
        if points.is_empty() {
            return Err(EditorError::invalid("stroke needs at least one point"));
        }
        if !(size.is_finite() && size > 0.0) {
            return Err(EditorError::invalid(format!("brush size must be > 0, got {}", size)));
        }
        if let Some(&(x, y)) = points.iter().find(|(x, y)| !(x.is_finite() && y.is_finite())) {
            return Err(EditorError::invalid(format!("stroke point {},{} is not finite", x, y)));
        }
        Ok(Self { points, size })
    }

    /// Same stroke shifted by `(dx, dy)`; maps canvas points into a layer.
    pub fn translated(&self, dx: f32, dy: f32) -> Self {
        Self {
            points: self.points.iter().map(|&(x, y)| (x + dx, y + dy)).collect(),
            size: self.size,
        }
    }

    /// Pixel rows/columns the stroke can touch, clipped to the image.
    fn bounds(&self, width: u32, height: u32) -> Option<(usize, usize, usize, usize)> {
        let r = self.size / 2.0;
        let (mut x0, mut y0, mut x1, mut y1) = (f32::MAX, f32::MAX, f32::MIN, f32::MIN);
        for &(x, y) in &self.points {
            x0 = x0.min(x - r);
            y0 = y0.min(y - r);
            x1 = x1.max(x + r);
            y1 = y1.max(y + r);
        }
        // clamp in f32 before the integer cast
        let x0 = x0.floor().clamp(0.0, width as f32) as i64;
        let y0 = y0.floor().clamp(0.0, height as f32) as i64;
        let x1 = (x1.ceil() + 1.0).clamp(0.0, width as f32) as i64;
        let y1 = (y1.ceil() + 1.0).clamp(0.0, height as f32) as i64;
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0 as usize, y0 as usize, x1 as usize, y1 as usize))
    }

    fn covers(&self, px: f32, py: f32) -> bool {
        let r2 = (self.size / 2.0) * (self.size / 2.0);
        if self.points.len() == 1 {
            let (x, y) = self.points[0];
            return (px - x).powi(2) + (py - y).powi(2) <= r2;
        }
        self.points.windows(2).any(|seg| {
            let (ax, ay) = seg[0];
            let (bx, by) = seg[1];
            let (vx, vy) = (bx - ax, by - ay);
            let len2 = vx * vx + vy * vy;
            let t = if len2 == 0.0 {
                0.0
            } else {
                (((px - ax) * vx + (py - ay) * vy) / len2).clamp(0.0, 1.0)
            };
            let (cx, cy) = (ax + vx * t, ay + vy * t);
            (px - cx).powi(2) + (py - cy).powi(2) <= r2
        })
    }

    /// Parse `x0,y0[,x1,y1,...]` into a stroke of the given size.
    pub fn parse_points(s: &str, size: f32) -> Result<Self> {
        let values: Vec<f32> = s
            .split(',')
            .map(|p| p.trim().parse::<f32>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| EditorError::invalid(format!("malformed stroke '{}'", s)))?;
        if values.len() % 2 != 0 {
            return Err(EditorError::invalid(format!("stroke needs x,y pairs, got '{}'", s)));
        }
        let points = values.chunks_exact(2).map(|p| (p[0], p[1])).collect();
        Self::new(points, size)
    }
}

impl FromStr for Stroke {
    type Err = EditorError;

    /// `x0,y0,...[/SIZE]`; size defaults to 10.
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((pts, size)) => {
                let size = size
                    .trim()
                    .parse::<f32>()
                    .map_err(|_| EditorError::invalid(format!("malformed brush size '{}'", size)))?;
                Self::parse_points(pts, size)
            }
            None => Self::parse_points(s, 10.0),
        }
    }
}

/// Visit every covered pixel of an interleaved buffer in parallel rows.
fn for_each_covered<F>(raw: &mut [u8], width: u32, height: u32, channels: usize, stroke: &Stroke, f: F)
where
    F: Fn(&mut [u8]) + Sync,
{
    let Some((x0, y0, x1, y1)) = stroke.bounds(width, height) else {
        return;
    };
    let stride = width as usize * channels;
    raw.par_chunks_mut(stride)
        .enumerate()
        .skip(y0)
        .take(y1 - y0)
        .for_each(|(y, row)| {
            for x in x0..x1 {
                if stroke.covers(x as f32, y as f32) {
                    f(&mut row[x * channels..(x + 1) * channels]);
                }
            }
        });
}

/// Paint `color` under the stroke, replacing what was there.
pub fn paint(img: &mut RgbaImage, stroke: &Stroke, color: Rgba<u8>) {
    let (w, h) = img.dimensions();
    for_each_covered(img, w, h, 4, stroke, |px| px.copy_from_slice(&color.0));
}

/// Clear alpha under the stroke.
pub fn erase(img: &mut RgbaImage, stroke: &Stroke) {
    let (w, h) = img.dimensions();
    for_each_covered(img, w, h, 4, stroke, |px| px[3] = 0);
}

/// Set mask values under the stroke: 0 hides, 255 reveals.
pub fn paint_mask(mask: &mut GrayImage, stroke: &Stroke, value: u8) {
    let (w, h) = mask.dimensions();
    for_each_covered(mask, w, h, 1, stroke, |px| px[0] = value);
}
