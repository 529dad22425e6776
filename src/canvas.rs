// ============================================================================
// CANVAS — pixel buffers, layers, the document and the compositor
// ============================================================================
//
// Pixel storage is copy-on-write: `PixelBuffer` and `Mask` wrap their image
// in an `Arc`, so cloning a layer (history snapshots, duplicate-layer) only
// bumps a refcount. The first mutation through `make_mut()` detaches a
// private copy, leaving every other holder untouched.
// ============================================================================

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use image::{GrayImage, Luma, Rgba, RgbaImage};
use rayon::prelude::*;

use crate::error::{EditorError, Result};
use crate::ops::adjustments::{self, AdjustmentKind, Adjustments};
use crate::ops::filters::{Filter, Support};

// ============================================================================
// PIXEL BUFFER
// ============================================================================

/// Fixed-size RGBA grid with shared, copy-on-write storage.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelBuffer {
    image: Arc<RgbaImage>,
}

impl PixelBuffer {
    /// Fully transparent buffer.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        Self::filled(width, height, Rgba([0, 0, 0, 0]))
    }

    pub fn filled(width: u32, height: u32, color: Rgba<u8>) -> Result<Self> {
        check_dimensions(width, height)?;
        Ok(Self { image: Arc::new(RgbaImage::from_pixel(width, height, color)) })
    }

    pub fn from_image(image: RgbaImage) -> Result<Self> {
        check_dimensions(image.width(), image.height())?;
        Ok(Self { image: Arc::new(image) })
    }

    /// Wrap an image produced from an already valid buffer.
    pub(crate) fn wrap(image: RgbaImage) -> Self {
        debug_assert!(image.width() > 0 && image.height() > 0);
        Self { image: Arc::new(image) }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Mutable access; detaches from any snapshot sharing the same storage.
    pub fn make_mut(&mut self) -> &mut RgbaImage {
        Arc::make_mut(&mut self.image)
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        *self.image.get_pixel(x, y)
    }

    pub fn into_image(self) -> RgbaImage {
        Arc::try_unwrap(self.image).unwrap_or_else(|shared| (*shared).clone())
    }

    /// True when both buffers point at the same storage.
    pub fn shares_storage(&self, other: &PixelBuffer) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }

    /// Bytes uniquely owned by this buffer. Storage shared with snapshots
    /// only counts the pointer.
    pub fn memory_bytes(&self) -> usize {
        if Arc::strong_count(&self.image) == 1 {
            self.image.as_raw().len()
        } else {
            std::mem::size_of::<usize>() * 2
        }
    }
}

// ============================================================================
// MASK
// ============================================================================

/// Single-channel visibility mask: 255 = revealed, 0 = hidden.
#[derive(Clone, Debug, PartialEq)]
pub struct Mask {
    image: Arc<GrayImage>,
}

impl Mask {
    /// All-revealed mask.
    pub fn full(width: u32, height: u32) -> Result<Self> {
        Self::filled(width, height, 255)
    }

    pub fn filled(width: u32, height: u32, value: u8) -> Result<Self> {
        check_dimensions(width, height)?;
        Ok(Self { image: Arc::new(GrayImage::from_pixel(width, height, Luma([value]))) })
    }

    pub fn from_image(image: GrayImage) -> Result<Self> {
        check_dimensions(image.width(), image.height())?;
        Ok(Self { image: Arc::new(image) })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn make_mut(&mut self) -> &mut GrayImage {
        Arc::make_mut(&mut self.image)
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.image.get_pixel(x, y)[0]
    }

    pub fn is_full(&self) -> bool {
        self.image.as_raw().iter().all(|&v| v == 255)
    }

    pub fn invert(&mut self) {
        for v in self.make_mut().iter_mut() {
            *v = 255 - *v;
        }
    }

    pub fn memory_bytes(&self) -> usize {
        if Arc::strong_count(&self.image) == 1 {
            self.image.as_raw().len()
        } else {
            std::mem::size_of::<usize>() * 2
        }
    }
}

/// Largest buffer side in pixels. Drafts, new documents and every resize
/// are held to it.
pub const MAX_CANVAS_DIM: u32 = 32_768;

/// Reject sizes outside `1..=MAX_CANVAS_DIM` on either axis.
pub fn check_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 || width > MAX_CANVAS_DIM || height > MAX_CANVAS_DIM {
        return Err(EditorError::invalid(format!(
            "buffer dimensions must be 1x1 to {}x{}, got {}x{}",
            MAX_CANVAS_DIM, MAX_CANVAS_DIM, width, height
        )));
    }
    Ok(())
}

// ============================================================================
// BLEND MODES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    SoftLight,
}

impl BlendMode {
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
            BlendMode::SoftLight,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::SoftLight => "Soft Light",
        }
    }

    /// Convert to a stable u8 for binary serialization
    pub fn to_u8(&self) -> u8 {
        match self {
            BlendMode::Normal => 0,
            BlendMode::Multiply => 1,
            BlendMode::Screen => 2,
            BlendMode::Overlay => 3,
            BlendMode::SoftLight => 4,
        }
    }

    /// Reconstruct from a u8 (defaults to Normal for unknown values)
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => BlendMode::Multiply,
            2 => BlendMode::Screen,
            3 => BlendMode::Overlay,
            4 => BlendMode::SoftLight,
            _ => BlendMode::Normal,
        }
    }
}

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BlendMode {
    type Err = EditorError;

    fn from_str(s: &str) -> Result<Self> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .collect::<String>()
            .to_lowercase();
        match key.as_str() {
            "normal" => Ok(BlendMode::Normal),
            "multiply" => Ok(BlendMode::Multiply),
            "screen" => Ok(BlendMode::Screen),
            "overlay" => Ok(BlendMode::Overlay),
            "softlight" => Ok(BlendMode::SoftLight),
            _ => Err(EditorError::invalid(format!("unknown blend mode '{}'", s))),
        }
    }
}

/// Blend `top` onto `base`.
///
/// Normal is Porter-Duff source-over. The other modes compute the blended
/// colour `B(base, top)` and composite that over the base exactly like
/// Normal, weighted by the top alpha.
pub fn blend_pixel(base: Rgba<u8>, top: Rgba<u8>, mode: BlendMode) -> Rgba<u8> {
    // Fast path: fully transparent top pixel — nothing to blend
    if top[3] == 0 {
        return base;
    }

    // Fast path: Normal blend, fully opaque top pixel — just overwrite
    if mode == BlendMode::Normal && top[3] == 255 {
        return top;
    }

    let base_r = base[0] as f32 / 255.0;
    let base_g = base[1] as f32 / 255.0;
    let base_b = base[2] as f32 / 255.0;
    let base_a = base[3] as f32 / 255.0;

    let top_r = top[0] as f32 / 255.0;
    let top_g = top[1] as f32 / 255.0;
    let top_b = top[2] as f32 / 255.0;
    let top_a = top[3] as f32 / 255.0;

    let (r, g, b) = match mode {
        BlendMode::Normal => (top_r, top_g, top_b),
        BlendMode::Multiply => (base_r * top_r, base_g * top_g, base_b * top_b),
        BlendMode::Screen => (
            screen_channel(base_r, top_r),
            screen_channel(base_g, top_g),
            screen_channel(base_b, top_b),
        ),
        BlendMode::Overlay => (
            overlay_channel(base_r, top_r),
            overlay_channel(base_g, top_g),
            overlay_channel(base_b, top_b),
        ),
        BlendMode::SoftLight => (
            soft_light_channel(base_r, top_r),
            soft_light_channel(base_g, top_g),
            soft_light_channel(base_b, top_b),
        ),
    };

    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a == 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let out_r = (r * top_a + base_r * base_a * (1.0 - top_a)) / out_a;
    let out_g = (g * top_a + base_g * base_a * (1.0 - top_a)) / out_a;
    let out_b = (b * top_a + base_b * base_a * (1.0 - top_a)) / out_a;

    Rgba([
        (out_r * 255.0).round().clamp(0.0, 255.0) as u8,
        (out_g * 255.0).round().clamp(0.0, 255.0) as u8,
        (out_b * 255.0).round().clamp(0.0, 255.0) as u8,
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

fn screen_channel(base: f32, top: f32) -> f32 {
    1.0 - (1.0 - base) * (1.0 - top)
}

fn overlay_channel(base: f32, top: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

/// W3C Soft Light formula.
fn soft_light_channel(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        base - (1.0 - 2.0 * top) * base * (1.0 - base)
    } else {
        let d = if base <= 0.25 {
            ((16.0 * base - 12.0) * base + 4.0) * base
        } else {
            base.sqrt()
        };
        base + (2.0 * top - 1.0) * (d - base)
    }
}

// ============================================================================
// LAYER
// ============================================================================

/// Half-open pixel rectangle `[x0, x1) x [y0, y1)`. Coordinates may lie
/// outside the buffer; operations clip before use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub x0: i64,
    pub y0: i64,
    pub x1: i64,
    pub y1: i64,
}

impl Region {
    pub fn new(x0: i64, y0: i64, x1: i64, y1: i64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Clip to a `width x height` buffer. `None` when nothing is left.
    pub fn clip(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x0.clamp(0, width as i64);
        let y0 = self.y0.clamp(0, height as i64);
        let x1 = self.x1.clamp(0, width as i64);
        let y1 = self.y1.clamp(0, height as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

impl FromStr for Region {
    type Err = EditorError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<i64> = s
            .split(',')
            .map(|p| p.trim().parse::<i64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| EditorError::invalid(format!("malformed box '{}'", s)))?;
        match parts.as_slice() {
            [x0, y0, x1, y1] => Ok(Region::new(*x0, *y0, *x1, *y1)),
            _ => Err(EditorError::invalid(format!("box needs 4 values, got '{}'", s))),
        }
    }
}

/// One editable image plane.
///
/// `working` is derived state: every path that touches `original`, `mask`
/// or the adjustment scalars recomputes it before returning.
#[derive(Clone, Debug)]
pub struct Layer {
    pub name: String,
    pub visible: bool,
    pub blend_mode: BlendMode,
    pub offset: (i32, i32),
    original: PixelBuffer,
    mask: Mask,
    adjustments: Adjustments,
    working: PixelBuffer,
}

impl Layer {
    pub fn new(name: impl Into<String>, original: PixelBuffer) -> Self {
        let (w, h) = original.dimensions();
        let mask = Mask { image: Arc::new(GrayImage::from_pixel(w, h, Luma([255]))) };
        let working = original.clone();
        Self {
            name: name.into(),
            visible: true,
            blend_mode: BlendMode::Normal,
            offset: (0, 0),
            original,
            mask,
            adjustments: Adjustments::default(),
            working,
        }
    }

    /// Rebuild a layer from stored parts (history restore, drafts).
    /// The working buffer is always recomputed.
    pub fn from_parts(
        name: impl Into<String>,
        original: PixelBuffer,
        mask: Mask,
        adjustments: Adjustments,
    ) -> Result<Self> {
        if original.dimensions() != mask.dimensions() {
            return Err(EditorError::invalid(format!(
                "mask {:?} does not match layer {:?}",
                mask.dimensions(),
                original.dimensions()
            )));
        }
        let mut layer = Self::new(name, original);
        layer.mask = mask;
        layer.adjustments = adjustments;
        layer.apply_adjustments();
        Ok(layer)
    }

    pub fn original(&self) -> &PixelBuffer {
        &self.original
    }

    pub fn working(&self) -> &PixelBuffer {
        &self.working
    }

    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    pub fn adjustments(&self) -> &Adjustments {
        &self.adjustments
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.original.dimensions()
    }

    pub fn set_adjustments(&mut self, adjustments: Adjustments) {
        self.adjustments = adjustments;
        self.apply_adjustments();
    }

    pub fn set_adjustment(&mut self, kind: AdjustmentKind, value: f32) -> Result<()> {
        self.adjustments.set(kind, value)?;
        self.apply_adjustments();
        Ok(())
    }

    /// Recompute `working` from `original`, `mask` and the adjustments.
    pub fn apply_adjustments(&mut self) {
        self.working = adjustments::render_working(&self.original, &self.mask, &self.adjustments);
    }

    /// Replace `original` with `filter(original)`.
    pub fn apply_filter(&mut self, filter: &Filter) {
        let filtered = filter.apply(self.original.image());
        self.original = PixelBuffer::wrap(filtered);
        self.apply_filter_log(filter, None);
        self.apply_adjustments();
    }

    /// Filter only the pixels inside `region`.
    ///
    /// Neighbourhood filters read a halo around the box so the result inside
    /// it matches the whole-layer path exactly. Swirl depends on the whole
    /// layer and is computed globally.
    pub fn apply_filter_to_region(&mut self, filter: &Filter, region: Region) {
        let (w, h) = self.original.dimensions();
        let Some((x, y, rw, rh)) = region.clip(w, h) else {
            return;
        };

        let (sx, sy, sub) = match filter.support() {
            Support::Global => (0, 0, filter.apply(self.original.image())),
            Support::Pixel | Support::Halo(_) => {
                let halo = match filter.support() {
                    Support::Halo(n) => n,
                    _ => 0,
                };
                let sx = x.saturating_sub(halo);
                let sy = y.saturating_sub(halo);
                let ex = (x + rw + halo).min(w);
                let ey = (y + rh + halo).min(h);
                let crop = image::imageops::crop_imm(self.original.image(), sx, sy, ex - sx, ey - sy)
                    .to_image();
                (sx, sy, filter.apply(&crop))
            }
        };

        let stride = rw as usize * 4;
        let sub_w = sub.width() as usize;
        let sub_raw = sub.as_raw();
        let dst = self.original.make_mut();
        let dst_w = dst.width() as usize;
        let dst_raw: &mut [u8] = dst;
        for row in 0..rh as usize {
            let src_off = ((y - sy) as usize + row) * sub_w * 4 + (x - sx) as usize * 4;
            let dst_off = (y as usize + row) * dst_w * 4 + x as usize * 4;
            dst_raw[dst_off..dst_off + stride].copy_from_slice(&sub_raw[src_off..src_off + stride]);
        }
        self.apply_filter_log(filter, Some((x, y, rw, rh)));
        self.apply_adjustments();
    }

    fn apply_filter_log(&self, filter: &Filter, region: Option<(u32, u32, u32, u32)>) {
        match region {
            Some((x, y, w, h)) => {
                log::debug!("filter {} on '{}' region {}x{}+{}+{}", filter.name(), self.name, w, h, x, y)
            }
            None => log::debug!("filter {} on '{}'", filter.name(), self.name),
        }
    }

    /// Mutate `original` in place, then refresh `working`.
    /// The closure must keep the image dimensions unchanged.
    pub fn edit_original<F>(&mut self, f: F)
    where
        F: FnOnce(&mut RgbaImage),
    {
        f(self.original.make_mut());
        self.apply_adjustments();
    }

    /// Mutate the mask in place, then refresh `working`.
    pub fn edit_mask<F>(&mut self, f: F)
    where
        F: FnOnce(&mut GrayImage),
    {
        f(self.mask.make_mut());
        self.apply_adjustments();
    }

    pub fn invert_mask(&mut self) {
        self.mask.invert();
        self.apply_adjustments();
    }

    /// Swap in new pixel and mask buffers (geometric edits that change size).
    pub fn replace_pixels(&mut self, original: PixelBuffer, mask: Mask) -> Result<()> {
        if original.dimensions() != mask.dimensions() {
            return Err(EditorError::invalid(format!(
                "mask {:?} does not match layer {:?}",
                mask.dimensions(),
                original.dimensions()
            )));
        }
        self.original = original;
        self.mask = mask;
        self.apply_adjustments();
        Ok(())
    }

    /// Alpha of the working buffer at a canvas point, if the layer covers it.
    pub fn alpha_at(&self, canvas_x: i64, canvas_y: i64) -> Option<u8> {
        let lx = canvas_x - self.offset.0 as i64;
        let ly = canvas_y - self.offset.1 as i64;
        let (w, h) = self.working.dimensions();
        if lx < 0 || ly < 0 || lx >= w as i64 || ly >= h as i64 {
            return None;
        }
        Some(self.working.get_pixel(lx as u32, ly as u32)[3])
    }

    pub fn memory_bytes(&self) -> usize {
        let working = if self.working.shares_storage(&self.original) {
            0
        } else {
            self.working.memory_bytes()
        };
        self.original.memory_bytes() + self.mask.memory_bytes() + working
    }
}

// ============================================================================
// COMPOSITOR
// ============================================================================

/// Copy `src` onto a fresh transparent `width x height` canvas at `offset`.
/// Pixels landing outside the canvas are dropped.
pub fn place_on_canvas(src: &RgbaImage, offset: (i32, i32), width: u32, height: u32) -> RgbaImage {
    let mut out = RgbaImage::new(width, height);
    let (sw, sh) = (src.width() as i64, src.height() as i64);
    let (ox, oy) = (offset.0 as i64, offset.1 as i64);

    let x_start = ox.max(0);
    let x_end = (ox + sw).min(width as i64);
    if x_end <= x_start {
        return out;
    }
    let span = (x_end - x_start) as usize * 4;
    let src_x = (x_start - ox) as usize * 4;
    let src_raw = src.as_raw();
    let src_stride = sw as usize * 4;

    out.par_chunks_mut(width as usize * 4).enumerate().for_each(|(y, row_out)| {
        let sy = y as i64 - oy;
        if sy < 0 || sy >= sh {
            return;
        }
        let src_off = sy as usize * src_stride + src_x;
        let dst_off = x_start as usize * 4;
        row_out[dst_off..dst_off + span].copy_from_slice(&src_raw[src_off..src_off + span]);
    });
    out
}

/// Composite `layers` bottom to top onto a transparent canvas sized by the
/// first layer. Hidden layers are skipped unless `include_hidden` is set.
pub fn composite_layers(layers: &[Layer], include_hidden: bool) -> Result<RgbaImage> {
    let first = layers.first().ok_or(EditorError::EmptyDocument)?;
    let (width, height) = first.dimensions();
    let mut acc = RgbaImage::new(width, height);
    let stride = width as usize * 4;

    for layer in layers.iter().filter(|l| include_hidden || l.visible) {
        let overlay = place_on_canvas(layer.working.image(), layer.offset, width, height);
        let overlay_raw = overlay.as_raw();
        let mode = layer.blend_mode;

        acc.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
            let top_row = &overlay_raw[y * stride..(y + 1) * stride];
            for x in 0..width as usize {
                let pi = x * 4;
                let top = Rgba([top_row[pi], top_row[pi + 1], top_row[pi + 2], top_row[pi + 3]]);
                if top[3] == 0 {
                    continue;
                }
                let base = Rgba([row[pi], row[pi + 1], row[pi + 2], row[pi + 3]]);
                let out = blend_pixel(base, top, mode);
                row[pi..pi + 4].copy_from_slice(&out.0);
            }
        });
    }

    Ok(acc)
}

// ============================================================================
// DOCUMENT
// ============================================================================

/// Ordered layer stack (bottom to top) plus the current selection.
#[derive(Clone, Debug, Default)]
pub struct Document {
    layers: Vec<Layer>,
    selected: Option<usize>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_layers(layers: Vec<Layer>, selected: Option<usize>) -> Self {
        let selected = selected.filter(|&i| i < layers.len());
        Self { layers, selected }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Canvas size: the first layer's size.
    pub fn canvas_size(&self) -> Option<(u32, u32)> {
        self.layers.first().map(|l| l.dimensions())
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn layer(&self, index: usize) -> Result<&Layer> {
        let len = self.layers.len();
        self.layers.get(index).ok_or(EditorError::OutOfRangeIndex { index, len })
    }

    pub fn layer_mut(&mut self, index: usize) -> Result<&mut Layer> {
        let len = self.layers.len();
        self.layers.get_mut(index).ok_or(EditorError::OutOfRangeIndex { index, len })
    }

    /// Index of the selected layer, validated against the current stack.
    pub fn selected_index(&self) -> Result<usize> {
        let index = self.selected.ok_or(EditorError::NoSelection)?;
        if index >= self.layers.len() {
            return Err(EditorError::OutOfRangeIndex { index, len: self.layers.len() });
        }
        Ok(index)
    }

    pub fn selected_layer(&self) -> Result<&Layer> {
        let index = self.selected_index()?;
        self.layer(index)
    }

    pub fn selected_layer_mut(&mut self) -> Result<&mut Layer> {
        let index = self.selected_index()?;
        self.layer_mut(index)
    }

    pub fn select(&mut self, index: usize) -> Result<()> {
        self.layer(index)?;
        self.selected = Some(index);
        Ok(())
    }

    pub fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    /// Append on top and select it.
    pub fn push_layer(&mut self, layer: Layer) {
        self.layers.push(layer);
        self.selected = Some(self.layers.len() - 1);
    }

    /// Insert at `index` (clamped to the stack) and select it.
    pub fn insert_layer(&mut self, index: usize, layer: Layer) {
        let index = index.min(self.layers.len());
        self.layers.insert(index, layer);
        self.selected = Some(index);
    }

    /// Remove a layer. The selection moves to the layer below, or clears
    /// when the stack empties.
    pub fn remove_layer(&mut self, index: usize) -> Result<Layer> {
        self.layer(index)?;
        let removed = self.layers.remove(index);
        self.selected = if self.layers.is_empty() {
            None
        } else {
            Some(index.saturating_sub(1).min(self.layers.len() - 1))
        };
        Ok(removed)
    }

    pub fn swap_layers(&mut self, a: usize, b: usize) -> Result<()> {
        self.layer(a)?;
        self.layer(b)?;
        self.layers.swap(a, b);
        Ok(())
    }

    /// Replace the whole stack (history restore, merges, layouts).
    pub fn replace_layers(&mut self, layers: Vec<Layer>, selected: Option<usize>) {
        self.selected = selected.filter(|&i| i < layers.len());
        self.layers = layers;
    }

    pub fn composite(&self, include_hidden: bool) -> Result<RgbaImage> {
        composite_layers(&self.layers, include_hidden)
    }

    /// Topmost visible layer with a non-transparent working pixel at a
    /// canvas point.
    pub fn layer_at(&self, x: i64, y: i64) -> Option<usize> {
        self.layers
            .iter()
            .enumerate()
            .rev()
            .find(|(_, l)| l.visible && l.alpha_at(x, y).is_some_and(|a| a > 0))
            .map(|(i, _)| i)
    }

    pub fn memory_bytes(&self) -> usize {
        self.layers.iter().map(|l| l.memory_bytes()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, c: [u8; 4]) -> PixelBuffer {
        PixelBuffer::filled(w, h, Rgba(c)).unwrap()
    }

    fn gradient(w: u32, h: u32) -> PixelBuffer {
        let img = RgbaImage::from_fn(w, h, |x, y| {
            Rgba([(x * 37 % 256) as u8, (y * 53 % 256) as u8, ((x + y) * 11 % 256) as u8, 255])
        });
        PixelBuffer::from_image(img).unwrap()
    }

    #[test]
    fn zero_sized_buffers_are_rejected() {
        assert!(matches!(PixelBuffer::new(0, 4), Err(EditorError::InvalidArgument(_))));
        assert!(matches!(Mask::full(3, 0), Err(EditorError::InvalidArgument(_))));
    }

    #[test]
    fn clones_share_until_mutated() {
        let a = solid(4, 4, [1, 2, 3, 255]);
        let mut b = a.clone();
        assert!(a.shares_storage(&b));
        b.make_mut().put_pixel(0, 0, Rgba([9, 9, 9, 9]));
        assert!(!a.shares_storage(&b));
        assert_eq!(a.get_pixel(0, 0), Rgba([1, 2, 3, 255]));
    }

    #[test]
    fn identity_layer_working_equals_original() {
        let layer = Layer::new("g", gradient(9, 7));
        assert_eq!(layer.working().image(), layer.original().image());
    }

    #[test]
    fn apply_adjustments_is_idempotent() {
        let mut layer = Layer::new("g", gradient(16, 16));
        layer.set_adjustment(AdjustmentKind::Contrast, 1.4).unwrap();
        layer.set_adjustment(AdjustmentKind::Gamma, 0.8).unwrap();
        let first = layer.working().clone();
        layer.apply_adjustments();
        assert_eq!(&first, layer.working());
    }

    #[test]
    fn zero_mask_hides_everything() {
        let mut layer = Layer::new("g", gradient(8, 8));
        layer.set_adjustment(AdjustmentKind::Alpha, 3.0).unwrap();
        layer.set_adjustment(AdjustmentKind::Brightness, 1.3).unwrap();
        layer.edit_mask(|m| m.fill(0));
        assert!(layer.working().image().pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn single_opaque_layer_composites_to_itself() {
        let layer = Layer::new("g", gradient(5, 6));
        let out = composite_layers(std::slice::from_ref(&layer), false).unwrap();
        assert_eq!(&out, layer.working().image());
    }

    #[test]
    fn half_red_over_white() {
        let base = Layer::new("base", solid(2, 2, [255, 255, 255, 255]));
        let top = Layer::new("red", solid(2, 2, [255, 0, 0, 128]));
        let out = composite_layers(&[base, top], false).unwrap();
        for p in out.pixels() {
            assert_eq!(*p, Rgba([255, 127, 127, 255]));
        }
    }

    #[test]
    fn empty_stack_has_nothing_to_composite() {
        assert!(matches!(composite_layers(&[], false), Err(EditorError::EmptyDocument)));
    }

    #[test]
    fn hidden_layers_are_skipped_unless_requested() {
        let base = Layer::new("base", solid(2, 2, [0, 0, 255, 255]));
        let mut top = Layer::new("top", solid(2, 2, [0, 255, 0, 255]));
        top.visible = false;
        let layers = [base, top];
        assert_eq!(composite_layers(&layers, false).unwrap().get_pixel(0, 0), &Rgba([0, 0, 255, 255]));
        assert_eq!(composite_layers(&layers, true).unwrap().get_pixel(0, 0), &Rgba([0, 255, 0, 255]));
    }

    #[test]
    fn offsets_drop_pixels_outside_canvas() {
        let base = Layer::new("base", solid(4, 4, [0, 0, 0, 255]));
        let mut top = Layer::new("top", solid(2, 2, [255, 255, 255, 255]));
        top.offset = (3, -1);
        let out = composite_layers(&[base, top], false).unwrap();
        assert_eq!(out.get_pixel(3, 0), &Rgba([255, 255, 255, 255]));
        assert_eq!(out.get_pixel(3, 1), &Rgba([0, 0, 0, 255]));
        assert_eq!(out.get_pixel(2, 0), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn blend_modes_on_opaque_base() {
        let base = Rgba([128, 64, 255, 255]);
        let top = Rgba([255, 128, 0, 255]);
        assert_eq!(blend_pixel(base, top, BlendMode::Multiply), Rgba([128, 32, 0, 255]));
        assert_eq!(blend_pixel(base, top, BlendMode::Screen), Rgba([255, 160, 255, 255]));
        // overlay: base 128 is above mid-grey, base 64 below
        assert_eq!(blend_pixel(base, top, BlendMode::Overlay), Rgba([255, 64, 255, 255]));
        let soft = blend_pixel(Rgba([0, 255, 128, 255]), Rgba([200, 10, 128, 255]), BlendMode::SoftLight);
        assert_eq!(soft[0], 0);
        assert_eq!(soft[1], 255);
    }

    #[test]
    fn blend_over_translucent_base_uses_blended_colour() {
        let base = Rgba([0, 0, 0, 128]);
        let top = Rgba([200, 100, 50, 255]);
        assert_eq!(blend_pixel(base, top, BlendMode::Normal), top);
        assert_eq!(blend_pixel(base, top, BlendMode::Multiply), Rgba([0, 0, 0, 255]));
        assert_eq!(blend_pixel(base, top, BlendMode::Screen), top);
        assert_eq!(blend_pixel(base, top, BlendMode::Overlay), Rgba([0, 0, 0, 255]));
        assert_eq!(blend_pixel(base, top, BlendMode::SoftLight), Rgba([0, 0, 0, 255]));

        // bottom layer multiplied onto nothing comes out black at its own alpha
        let clear = Rgba([0, 0, 0, 0]);
        assert_eq!(blend_pixel(clear, Rgba([255, 0, 0, 255]), BlendMode::Multiply), Rgba([0, 0, 0, 255]));
        assert_eq!(blend_pixel(clear, Rgba([255, 0, 0, 128]), BlendMode::Multiply), Rgba([0, 0, 0, 128]));
    }

    #[test]
    fn multiply_at_the_bottom_of_the_stack_darkens_to_black() {
        let mut bottom = Layer::new("bottom", solid(2, 2, [90, 180, 30, 255]));
        bottom.blend_mode = BlendMode::Multiply;
        let out = composite_layers(&[bottom], false).unwrap();
        assert!(out.pixels().all(|p| *p == Rgba([0, 0, 0, 255])));
    }

    #[test]
    fn oversized_buffers_are_rejected() {
        assert!(PixelBuffer::new(MAX_CANVAS_DIM + 1, 1).is_err());
        assert!(Mask::full(1, u32::MAX).is_err());
        assert!(check_dimensions(MAX_CANVAS_DIM, 1).is_ok());
    }

    #[test]
    fn blend_mode_names_parse() {
        assert_eq!("soft light".parse::<BlendMode>().unwrap(), BlendMode::SoftLight);
        assert_eq!("SOFT_LIGHT".parse::<BlendMode>().unwrap(), BlendMode::SoftLight);
        assert_eq!("Multiply".parse::<BlendMode>().unwrap(), BlendMode::Multiply);
        assert!("dissolve".parse::<BlendMode>().is_err());
        for &mode in BlendMode::all() {
            assert_eq!(BlendMode::from_u8(mode.to_u8()), mode);
        }
    }

    #[test]
    fn region_clipping() {
        assert_eq!(Region::new(-5, -5, 3, 2).clip(10, 10), Some((0, 0, 3, 2)));
        assert_eq!(Region::new(8, 8, 20, 20).clip(10, 10), Some((8, 8, 2, 2)));
        assert_eq!(Region::new(12, 0, 20, 5).clip(10, 10), None);
        assert_eq!(Region::new(4, 4, 4, 9).clip(10, 10), None);
        assert_eq!("1, 2,3,4".parse::<Region>().unwrap(), Region::new(1, 2, 3, 4));
        assert!("1,2,3".parse::<Region>().is_err());
    }

    #[test]
    fn document_delete_moves_selection_down() {
        let mut doc = Document::new();
        for i in 0..3 {
            doc.push_layer(Layer::new(format!("l{}", i), solid(2, 2, [0, 0, 0, 255])));
        }
        doc.select(2).unwrap();
        doc.remove_layer(2).unwrap();
        assert_eq!(doc.selected(), Some(1));
        doc.select(0).unwrap();
        doc.remove_layer(0).unwrap();
        assert_eq!(doc.selected(), Some(0));
        doc.remove_layer(0).unwrap();
        assert_eq!(doc.selected(), None);
        assert!(matches!(doc.remove_layer(0), Err(EditorError::OutOfRangeIndex { index: 0, len: 0 })));
    }

    #[test]
    fn layer_at_picks_topmost_visible_opaque() {
        let mut doc = Document::new();
        doc.push_layer(Layer::new("bg", solid(4, 4, [0, 0, 0, 255])));
        let mut small = Layer::new("small", solid(2, 2, [255, 0, 0, 255]));
        small.offset = (2, 2);
        doc.push_layer(small);
        let mut hidden = Layer::new("hidden", solid(4, 4, [0, 255, 0, 255]));
        hidden.visible = false;
        doc.push_layer(hidden);
        assert_eq!(doc.layer_at(3, 3), Some(1));
        assert_eq!(doc.layer_at(0, 0), Some(0));
        assert_eq!(doc.layer_at(9, 9), None);
    }
}
