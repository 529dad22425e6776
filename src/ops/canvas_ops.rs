// ============================================================================
// CANVAS-LEVEL OPERATIONS — merge, duplicate, reorder, geometry, collage
// ============================================================================
//
// None of these functions push undo history; `Project` snapshots before
// calling them. Each one validates its arguments before touching the
// document, so an `Err` leaves every layer as it was.
// ============================================================================

use image::{GrayImage, Luma, Rgba, RgbaImage};

use crate::canvas::{check_dimensions, Document, Layer, Mask, PixelBuffer, Region, MAX_CANVAS_DIM};
use crate::error::{EditorError, Result};
use crate::ops::adjustments::{self, AdjustmentKind};
use crate::ops::transform::{self, Interpolation, CLEAR};

const HIDDEN: Luma<u8> = Luma([0]);

pub const MAX_FEATHER_RADIUS: f32 = 50.0;

fn canvas_size(doc: &Document) -> Result<(u32, u32)> {
    doc.canvas_size().ok_or(EditorError::EmptyDocument)
}

fn check_size(width: u32, height: u32) -> Result<()> {
    check_dimensions(width, height)
        .map_err(|_| EditorError::invalid(format!("canvas size must be 1x1 to {m}x{m}, got {}x{}", width, height, m = MAX_CANVAS_DIM)))
}

/// Swap a layer's pixels and mask for buffers that were derived from the
/// layer's own (valid) buffers.
fn set_pixels(layer: &mut Layer, original: RgbaImage, mask: GrayImage) -> Result<()> {
    layer.replace_pixels(PixelBuffer::from_image(original)?, Mask::from_image(mask)?)
}

// ----------------------------------------------------------------------------
//  Layer stack
// ----------------------------------------------------------------------------

/// Flatten every visible layer into one "Merged" layer on top. Hidden layers
/// stay where they are, in order.
pub fn merge_visible(doc: &mut Document) -> Result<()> {
    if doc.is_empty() {
        return Err(EditorError::EmptyDocument);
    }
    if !doc.layers().iter().any(|l| l.visible) {
        return Err(EditorError::invalid("no visible layers to merge"));
    }
    let merged = doc.composite(false)?;
    let mut layers: Vec<Layer> = doc.layers().iter().filter(|l| !l.visible).cloned().collect();
    let hidden = layers.len();
    layers.push(Layer::new("Merged", PixelBuffer::from_image(merged)?));
    log::info!("merged {} visible layer(s), kept {} hidden", doc.len() - hidden, hidden);
    let top = layers.len() - 1;
    doc.replace_layers(layers, Some(top));
    Ok(())
}

/// Copy a layer (pixels, mask, offset, blend mode and adjustments) and
/// insert the copy directly above it. Returns the copy's index.
pub fn duplicate_layer(doc: &mut Document, index: usize) -> Result<usize> {
    let mut copy = doc.layer(index)?.clone();
    copy.name = format!("{} copy", copy.name);
    doc.insert_layer(index + 1, copy);
    Ok(index + 1)
}

/// Swap a layer with its neighbour `delta` positions away (positive = up).
/// Moving past either end of the stack returns `Ok(false)` and changes
/// nothing. The selection follows the moved layer.
pub fn move_layer(doc: &mut Document, index: usize, delta: isize) -> Result<bool> {
    doc.layer(index)?;
    let target = index as isize + delta;
    if target < 0 || target >= doc.len() as isize {
        return Ok(false);
    }
    let target = target as usize;
    doc.swap_layers(index, target)?;
    doc.select(target)?;
    Ok(true)
}

/// Can `move_layer` succeed? Lets callers skip the history snapshot.
pub fn can_move_layer(doc: &Document, index: usize, delta: isize) -> bool {
    let target = index as isize + delta;
    index < doc.len() && target >= 0 && target < doc.len() as isize
}

// ----------------------------------------------------------------------------
//  Layer geometry
// ----------------------------------------------------------------------------

/// Rotate a layer clockwise with expansion, then centre the result on a
/// canvas-sized buffer. Corners that leave the canvas are cut; uncovered
/// area is transparent and hidden by the mask.
pub fn rotate_layer(doc: &mut Document, index: usize, degrees: f32) -> Result<()> {
    if !degrees.is_finite() {
        return Err(EditorError::invalid(format!("rotation must be finite, got {}", degrees)));
    }
    let (cw, ch) = canvas_size(doc)?;
    let layer = doc.layer_mut(index)?;

    let rotated = transform::rotate_expand(layer.original().image(), degrees, CLEAR);
    let rotated_mask = transform::rotate_expand(layer.mask().image(), degrees, HIDDEN);
    let at = (
        (cw as i64 - rotated.width() as i64).div_euclid(2),
        (ch as i64 - rotated.height() as i64).div_euclid(2),
    );
    let original = transform::reframe(&rotated, at, cw, ch, CLEAR);
    let mask = transform::reframe(&rotated_mask, at, cw, ch, HIDDEN);
    set_pixels(layer, original, mask)
}

pub fn flip_layer(doc: &mut Document, index: usize, horizontal: bool) -> Result<()> {
    let layer = doc.layer_mut(index)?;
    let original = transform::flip(layer.original().image(), horizontal);
    let mask = transform::flip(layer.mask().image(), horizontal);
    set_pixels(layer, original, mask)
}

// ----------------------------------------------------------------------------
//  Canvas geometry
// ----------------------------------------------------------------------------

fn scaled(len: u32, new_canvas: u32, old_canvas: u32) -> u32 {
    ((len as u64 * new_canvas as u64) / old_canvas as u64).max(1) as u32
}

/// Scale every layer, mask and offset so the canvas becomes
/// `width x height`. Bicubic.
pub fn resize_canvas(doc: &mut Document, width: u32, height: u32) -> Result<()> {
    check_size(width, height)?;
    let (cw, ch) = canvas_size(doc)?;
    if (cw, ch) == (width, height) {
        return Ok(());
    }
    let (sx, sy) = (width as f64 / cw as f64, height as f64 / ch as f64);

    for layer in doc.layers_mut() {
        let (w, h) = layer.dimensions();
        let (nw, nh) = (scaled(w, width, cw), scaled(h, height, ch));
        check_size(nw, nh)?;
        let original = transform::resize(layer.original().image(), nw, nh, Interpolation::Bicubic);
        let mask = transform::resize(layer.mask().image(), nw, nh, Interpolation::Bicubic);
        layer.offset = (
            (layer.offset.0 as f64 * sx).round() as i32,
            (layer.offset.1 as f64 * sy).round() as i32,
        );
        set_pixels(layer, original, mask)?;
    }
    log::info!("canvas resized {}x{} -> {}x{}", cw, ch, width, height);
    Ok(())
}

/// Re-frame every layer onto a `width x height` canvas whose top-left sits
/// at canvas point `origin`. Offsets are folded into the pixels and reset.
fn reframe_all(doc: &mut Document, origin: (i64, i64), width: u32, height: u32) -> Result<()> {
    for layer in doc.layers_mut() {
        let at = (
            layer.offset.0 as i64 - origin.0,
            layer.offset.1 as i64 - origin.1,
        );
        let original = transform::reframe(layer.original().image(), at, width, height, CLEAR);
        let mask = transform::reframe(layer.mask().image(), at, width, height, HIDDEN);
        layer.offset = (0, 0);
        set_pixels(layer, original, mask)?;
    }
    Ok(())
}

/// Change the canvas size without scaling. Growing pads right/bottom with
/// transparent, hidden pixels; shrinking crops from the top-left corner.
pub fn resize_canvas_no_scale(doc: &mut Document, width: u32, height: u32) -> Result<()> {
    check_size(width, height)?;
    let current = canvas_size(doc)?;
    if current == (width, height) {
        return Ok(());
    }
    reframe_all(doc, (0, 0), width, height)?;
    log::info!("canvas size {}x{} -> {}x{} (no scaling)", current.0, current.1, width, height);
    Ok(())
}

/// Crop every layer to `region` in canvas space. The region is clipped to
/// the canvas first; nothing left after clipping is an error.
pub fn crop(doc: &mut Document, region: Region) -> Result<()> {
    let (cw, ch) = canvas_size(doc)?;
    let (x, y, w, h) = region
        .clip(cw, ch)
        .ok_or_else(|| EditorError::invalid(format!("crop box {:?} does not overlap the {}x{} canvas", region, cw, ch)))?;
    reframe_all(doc, (x as i64, y as i64), w, h)?;
    log::info!("cropped canvas to {}x{}+{}+{}", w, h, x, y);
    Ok(())
}

/// Arrange the visible layers into a `columns`-wide grid and bake them onto
/// a canvas of `columns * cell_w` by `rows * cell_h`.
///
/// With an explicit `cell` size every layer is scaled to fit its cell
/// (Lanczos3, aspect kept) and centred in it. Without one, cells take the
/// largest visible layer's size and layers sit at their cell's top-left.
/// Hidden layers are padded or cropped to the new canvas.
pub fn layout_grid(doc: &mut Document, columns: u32, cell: Option<(u32, u32)>) -> Result<()> {
    if columns == 0 {
        return Err(EditorError::invalid("layout needs at least one column"));
    }
    if let Some((w, h)) = cell {
        check_size(w, h)?;
    }
    if doc.is_empty() {
        return Err(EditorError::EmptyDocument);
    }
    let visible: Vec<usize> = (0..doc.len()).filter(|&i| doc.layers()[i].visible).collect();
    if visible.is_empty() {
        return Err(EditorError::invalid("no visible layers to lay out"));
    }

    let (cell_w, cell_h) = cell.unwrap_or_else(|| {
        visible.iter().fold((1, 1), |(mw, mh), &i| {
            let (w, h) = doc.layers()[i].dimensions();
            (mw.max(w), mh.max(h))
        })
    });
    let rows = (visible.len() as u32).div_ceil(columns);
    let (width, height) = (
        cell_w
            .checked_mul(columns)
            .ok_or_else(|| EditorError::invalid("layout canvas too wide"))?,
        cell_h
            .checked_mul(rows)
            .ok_or_else(|| EditorError::invalid("layout canvas too tall"))?,
    );
    check_size(width, height)?;

    for (slot, &i) in visible.iter().enumerate() {
        let layer = doc.layer_mut(i)?;
        let (col, row) = (slot as u32 % columns, slot as u32 / columns);
        let mut at = ((col * cell_w) as i64, (row * cell_h) as i64);

        let (mut original, mut mask) = (layer.original().image().clone(), layer.mask().image().clone());
        if cell.is_some() {
            let (w, h) = layer.dimensions();
            let scale = (cell_w as f64 / w as f64).min(cell_h as f64 / h as f64);
            let nw = ((w as f64 * scale) as u32).max(1);
            let nh = ((h as f64 * scale) as u32).max(1);
            original = transform::resize(&original, nw, nh, Interpolation::Lanczos3);
            mask = transform::resize(&mask, nw, nh, Interpolation::Lanczos3);
            at.0 += (cell_w.saturating_sub(nw) / 2) as i64;
            at.1 += (cell_h.saturating_sub(nh) / 2) as i64;
        }
        let original = transform::reframe(&original, at, width, height, CLEAR);
        let mask = transform::reframe(&mask, at, width, height, HIDDEN);
        layer.offset = (0, 0);
        set_pixels(layer, original, mask)?;
    }

    for layer in doc.layers_mut().iter_mut().filter(|l| !l.visible) {
        let original = transform::reframe(layer.original().image(), (0, 0), width, height, CLEAR);
        let mask = transform::reframe(layer.mask().image(), (0, 0), width, height, HIDDEN);
        set_pixels(layer, original, mask)?;
    }

    log::info!(
        "laid out {} layer(s) in {}x{} grid of {}x{} cells",
        visible.len(), columns, rows, cell_w, cell_h
    );
    Ok(())
}

// ----------------------------------------------------------------------------
//  Tone and mask helpers
// ----------------------------------------------------------------------------

/// Scale each visible layer's brightness toward the mean luminance of all
/// visible layers (measured on `original`).
pub fn auto_balance(doc: &mut Document) -> Result<()> {
    if doc.is_empty() {
        return Err(EditorError::EmptyDocument);
    }
    let visible: Vec<usize> = (0..doc.len()).filter(|&i| doc.layers()[i].visible).collect();
    if visible.is_empty() {
        return Err(EditorError::invalid("no visible layers to balance"));
    }
    let images: Vec<&RgbaImage> = visible.iter().map(|&i| doc.layers()[i].original().image()).collect();
    let factors = adjustments::balance_factors(&images);

    for (&i, factor) in visible.iter().zip(factors) {
        let layer = doc.layer_mut(i)?;
        let brightness = layer.adjustments().brightness * factor;
        layer.set_adjustment(AdjustmentKind::Brightness, brightness)?;
        log::debug!("auto balance: '{}' brightness x{:.3}", layer.name, factor);
    }
    Ok(())
}

/// Bake auto-enhance into a layer's original pixels.
pub fn auto_enhance(layer: &mut Layer) {
    let enhanced = adjustments::auto_enhance(layer.original().image());
    layer.edit_original(|img| *img = enhanced);
}

/// Fill every pixel the mask mostly hides (mask < 128) with an opaque colour.
pub fn replace_background(layer: &mut Layer, color: Rgba<u8>) {
    let fill = Rgba([color[0], color[1], color[2], 255]);
    let mask = layer.mask().clone();
    layer.edit_original(|img| {
        for (px, m) in img.pixels_mut().zip(mask.image().pixels()) {
            if m[0] < 128 {
                *px = fill;
            }
        }
    });
}

/// Soften mask edges with a Gaussian blur of `radius` (1 to 50).
pub fn feather_mask(layer: &mut Layer, radius: f32) -> Result<()> {
    check_feather_radius(radius)?;
    let blurred = image::imageops::blur(layer.mask().image(), radius);
    layer.edit_mask(|m| *m = blurred);
    Ok(())
}

pub fn check_feather_radius(radius: f32) -> Result<()> {
    if !(radius.is_finite() && (1.0..=MAX_FEATHER_RADIUS).contains(&radius)) {
        return Err(EditorError::invalid(format!(
            "feather radius must be 1-{}, got {}",
            MAX_FEATHER_RADIUS, radius
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, c: [u8; 4]) -> Layer {
        Layer::new("l", PixelBuffer::filled(w, h, Rgba(c)).unwrap())
    }

    fn doc_of(layers: Vec<Layer>) -> Document {
        let n = layers.len();
        Document::from_layers(layers, n.checked_sub(1))
    }

    #[test]
    fn merge_keeps_hidden_layers_below_merged() {
        let mut hidden = solid(2, 2, [0, 255, 0, 255]);
        hidden.visible = false;
        hidden.name = "hidden".into();
        let mut doc = doc_of(vec![solid(2, 2, [255, 255, 255, 255]), hidden, solid(2, 2, [255, 0, 0, 128])]);
        merge_visible(&mut doc).unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.layers()[0].name, "hidden");
        assert_eq!(doc.layers()[1].name, "Merged");
        assert_eq!(doc.selected(), Some(1));
        assert_eq!(doc.layers()[1].original().get_pixel(0, 0), Rgba([255, 127, 127, 255]));
    }

    #[test]
    fn merge_needs_something_visible() {
        let mut doc = Document::new();
        assert!(matches!(merge_visible(&mut doc), Err(EditorError::EmptyDocument)));
        let mut l = solid(2, 2, [0, 0, 0, 255]);
        l.visible = false;
        let mut doc = doc_of(vec![l]);
        assert!(merge_visible(&mut doc).is_err());
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn duplicate_copies_everything_above() {
        let mut src = solid(3, 3, [9, 9, 9, 255]);
        src.offset = (2, -1);
        src.set_adjustment(AdjustmentKind::Gamma, 2.0).unwrap();
        src.edit_mask(|m| m.put_pixel(0, 0, Luma([0])));
        let mut doc = doc_of(vec![solid(3, 3, [0, 0, 0, 255]), src]);
        assert_eq!(duplicate_layer(&mut doc, 1).unwrap(), 2);
        let (a, b) = (&doc.layers()[1], &doc.layers()[2]);
        assert_eq!(b.name, "l copy");
        assert_eq!(b.offset, a.offset);
        assert_eq!(b.adjustments(), a.adjustments());
        assert_eq!(b.mask(), a.mask());
        assert_eq!(b.working(), a.working());
        assert_eq!(doc.selected(), Some(2));
    }

    #[test]
    fn move_past_the_ends_is_a_no_op() {
        let mut doc = doc_of(vec![solid(1, 1, [1, 0, 0, 255]), solid(1, 1, [2, 0, 0, 255])]);
        assert!(!move_layer(&mut doc, 1, 1).unwrap());
        assert!(move_layer(&mut doc, 1, -1).unwrap());
        assert_eq!(doc.layers()[0].original().get_pixel(0, 0)[0], 2);
        assert_eq!(doc.selected(), Some(0));
        assert!(!can_move_layer(&doc, 0, -1));
    }

    #[test]
    fn quarter_rotation_keeps_canvas_size_and_mask() {
        let mut doc = doc_of(vec![solid(4, 2, [5, 5, 5, 255])]);
        rotate_layer(&mut doc, 0, 90.0).unwrap();
        let layer = &doc.layers()[0];
        assert_eq!(layer.dimensions(), (4, 2));
        assert_eq!(layer.mask().dimensions(), (4, 2));
        // the 2x4 rotated block lands centred at x = 1..3
        assert_eq!(layer.working().get_pixel(0, 0)[3], 0);
        assert_eq!(layer.working().get_pixel(1, 0), Rgba([5, 5, 5, 255]));
        assert_eq!(layer.working().get_pixel(3, 0)[3], 0);
    }

    #[test]
    fn flip_moves_mask_with_pixels() {
        let mut layer = solid(3, 1, [1, 1, 1, 255]);
        layer.edit_mask(|m| m.put_pixel(0, 0, Luma([0])));
        let mut doc = doc_of(vec![layer]);
        flip_layer(&mut doc, 0, true).unwrap();
        assert_eq!(doc.layers()[0].mask().get(2, 0), 0);
        assert_eq!(doc.layers()[0].mask().get(0, 0), 255);
    }

    #[test]
    fn resize_scales_layers_and_offsets() {
        let mut small = solid(2, 2, [0, 0, 0, 255]);
        small.offset = (3, 1);
        let mut doc = doc_of(vec![solid(10, 6, [1, 2, 3, 255]), small]);
        resize_canvas(&mut doc, 20, 3).unwrap();
        assert_eq!(doc.canvas_size(), Some((20, 3)));
        assert_eq!(doc.layers()[1].dimensions(), (4, 1));
        assert_eq!(doc.layers()[1].offset, (6, 1));
        assert!(resize_canvas(&mut doc, 0, 3).is_err());
    }

    #[test]
    fn canvas_no_scale_pads_then_crops() {
        let mut doc = doc_of(vec![solid(2, 2, [7, 7, 7, 255])]);
        resize_canvas_no_scale(&mut doc, 4, 3).unwrap();
        let layer = &doc.layers()[0];
        assert_eq!(layer.dimensions(), (4, 3));
        assert_eq!(layer.working().get_pixel(1, 1), Rgba([7, 7, 7, 255]));
        assert_eq!(layer.working().get_pixel(3, 2)[3], 0);
        assert_eq!(layer.mask().get(3, 2), 0);

        resize_canvas_no_scale(&mut doc, 1, 1).unwrap();
        assert_eq!(doc.canvas_size(), Some((1, 1)));
        assert_eq!(doc.layers()[0].working().get_pixel(0, 0), Rgba([7, 7, 7, 255]));
    }

    #[test]
    fn crop_folds_offsets_in() {
        let base = solid(6, 6, [0, 0, 0, 255]);
        let mut dot = solid(1, 1, [255, 0, 0, 255]);
        dot.offset = (3, 4);
        let mut doc = doc_of(vec![base, dot]);
        let before = doc.composite(false).unwrap();
        crop(&mut doc, Region::new(2, 2, 5, 6)).unwrap();
        assert_eq!(doc.canvas_size(), Some((3, 4)));
        assert!(doc.layers().iter().all(|l| l.offset == (0, 0) && l.dimensions() == (3, 4)));
        let after = doc.composite(false).unwrap();
        for (x, y, p) in after.enumerate_pixels() {
            assert_eq!(p, before.get_pixel(x + 2, y + 2));
        }
        assert!(crop(&mut doc, Region::new(10, 10, 20, 20)).is_err());
        assert_eq!(doc.canvas_size(), Some((3, 4)));
    }

    #[test]
    fn layout_grid_places_visible_layers_in_cells() {
        let mut hidden = solid(1, 1, [0, 0, 255, 255]);
        hidden.visible = false;
        let mut doc = doc_of(vec![
            solid(2, 2, [255, 0, 0, 255]),
            solid(2, 2, [0, 255, 0, 255]),
            hidden,
            solid(2, 2, [9, 9, 9, 255]),
        ]);
        layout_grid(&mut doc, 2, None).unwrap();
        assert_eq!(doc.canvas_size(), Some((4, 4)));
        let out = doc.composite(false).unwrap();
        assert_eq!(out.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
        assert_eq!(out.get_pixel(2, 0), &Rgba([0, 255, 0, 255]));
        assert_eq!(out.get_pixel(1, 3), &Rgba([9, 9, 9, 255]));
        assert_eq!(out.get_pixel(3, 3)[3], 0);
        assert_eq!(doc.layers()[2].dimensions(), (4, 4));
    }

    #[test]
    fn layout_with_cells_scales_and_centres() {
        let mut doc = doc_of(vec![solid(4, 2, [255, 0, 0, 255])]);
        layout_grid(&mut doc, 1, Some((2, 2))).unwrap();
        assert_eq!(doc.canvas_size(), Some((2, 2)));
        let layer = &doc.layers()[0];
        // 4x2 scaled to 2x1, centred vertically in a 2x2 cell (rows 0..1)
        assert_eq!(layer.working().get_pixel(0, 0)[3], 255);
        assert_eq!(layer.working().get_pixel(0, 1)[3], 0);
        assert!(layout_grid(&mut doc, 0, None).is_err());
    }

    #[test]
    fn auto_balance_pulls_toward_common_mean() {
        let mut doc = doc_of(vec![solid(2, 2, [50, 50, 50, 255]), solid(2, 2, [150, 150, 150, 255])]);
        auto_balance(&mut doc).unwrap();
        assert!((doc.layers()[0].adjustments().brightness - 2.0).abs() < 1e-6);
        assert!((doc.layers()[1].adjustments().brightness - 100.0 / 150.0).abs() < 1e-3);
        assert_eq!(doc.layers()[0].working().get_pixel(0, 0), Rgba([100, 100, 100, 255]));
    }

    #[test]
    fn replace_background_uses_mask() {
        let mut layer = solid(2, 1, [1, 2, 3, 255]);
        layer.edit_mask(|m| m.put_pixel(1, 0, Luma([100])));
        replace_background(&mut layer, Rgba([200, 100, 50, 7]));
        assert_eq!(layer.original().get_pixel(0, 0), Rgba([1, 2, 3, 255]));
        assert_eq!(layer.original().get_pixel(1, 0), Rgba([200, 100, 50, 255]));
    }

    #[test]
    fn feather_softens_a_hard_edge() {
        let mut layer = solid(20, 1, [0, 0, 0, 255]);
        layer.edit_mask(|m| {
            for x in 10..20 {
                m.put_pixel(x, 0, Luma([0]));
            }
        });
        feather_mask(&mut layer, 2.0).unwrap();
        let edge = layer.mask().get(10, 0);
        assert!(edge > 0 && edge < 255, "{}", edge);
        assert!(feather_mask(&mut layer, 0.0).is_err());
        assert!(feather_mask(&mut layer, 51.0).is_err());
    }
}
