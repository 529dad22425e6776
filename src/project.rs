use std::path::Path;

use image::{Rgba, RgbaImage};

use crate::canvas::{BlendMode, Document, Layer, PixelBuffer, Region};
use crate::components::history::HistoryManager;
use crate::error::{EditorError, Result};
use crate::io;
use crate::ops::adjustments::AdjustmentKind;
use crate::ops::canvas_ops;
use crate::ops::filters::Filter;
use crate::ops::generate::Fill;
use crate::ops::paint::{self, Stroke};
use crate::ops::transform;

/// What a mask stroke does to the pixels it covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaskBrush {
    Hide,
    Reveal,
}

impl MaskBrush {
    fn value(self) -> u8 {
        match self {
            MaskBrush::Hide => 0,
            MaskBrush::Reveal => 255,
        }
    }
}

/// Single open document plus its undo history.
///
/// Every editing command runs against a staged copy of the document (cheap:
/// pixel storage is shared copy-on-write). Only when the command succeeds is
/// the previous state recorded in history and the copy committed, so a
/// rejected command changes neither the document nor the history.
pub struct Project {
    document: Document,
    history: HistoryManager,
    /// The live document differs from the snapshot at the history cursor.
    pending: bool,
}

impl Default for Project {
    fn default() -> Self {
        Self::new()
    }
}

impl Project {
    pub fn new() -> Self {
        Self::with_history_limit(crate::components::history::DEFAULT_MAX_HISTORY)
    }

    pub fn with_history_limit(max_history: usize) -> Self {
        Self {
            document: Document::new(),
            history: HistoryManager::new(max_history),
            pending: false,
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    // ------------------------------------------------------------------
    // History plumbing
    // ------------------------------------------------------------------

    /// Make sure the live state is the snapshot at the cursor.
    fn record(&mut self) {
        if self.pending || self.history.cursor().is_none() {
            self.history.save(&self.document);
            self.pending = false;
        }
    }

    /// Run `f` on a staged copy; on success snapshot the current state and
    /// commit the copy.
    fn apply<T, F>(&mut self, label: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Document) -> Result<T>,
    {
        let mut staged = self.document.clone();
        let out = f(&mut staged)?;
        self.record();
        self.history.truncate_redo();
        self.document = staged;
        self.pending = true;
        log::debug!("command: {}", label);
        Ok(out)
    }

    /// Like `apply`, scoped to the selected layer.
    fn apply_selected<T, F>(&mut self, label: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Layer) -> Result<T>,
    {
        self.document.selected_index()?;
        self.apply(label, |doc| f(doc.selected_layer_mut()?))
    }

    /// Step back one command. Returns `false` when there is nothing to undo.
    pub fn undo(&mut self) -> Result<bool> {
        if self.pending {
            // keep the live state reachable by redo
            self.history.save(&self.document);
            self.pending = false;
        }
        self.history.undo(&mut self.document)
    }

    pub fn redo(&mut self) -> Result<bool> {
        if self.pending {
            return Ok(false);
        }
        self.history.redo(&mut self.document)
    }

    pub fn can_undo(&self) -> bool {
        self.pending || self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        !self.pending && self.history.can_redo()
    }

    pub fn set_history_limit(&mut self, max: usize) {
        self.history.set_max_history_size(max);
    }

    // ------------------------------------------------------------------
    // Layer creation
    // ------------------------------------------------------------------

    /// Replace the document with one "Background" layer.
    pub fn new_document(&mut self, width: u32, height: u32, fill: Fill) -> Result<()> {
        let pixels = fill.render(width, height)?;
        self.apply("new document", |doc| {
            let layer = Layer::new("Background", PixelBuffer::from_image(pixels)?);
            doc.replace_layers(vec![layer], Some(0));
            Ok(())
        })
    }

    /// Push an image as a new top layer. Returns its index.
    pub fn add_image_layer(&mut self, name: impl Into<String>, image: RgbaImage) -> Result<usize> {
        let layer = Layer::new(name, PixelBuffer::from_image(image)?);
        self.apply("add image layer", |doc| {
            doc.push_layer(layer);
            Ok(doc.len() - 1)
        })
    }

    /// Push a canvas-sized generated layer. Returns its index.
    pub fn add_generated_layer(&mut self, name: impl Into<String>, fill: Fill) -> Result<usize> {
        let (w, h) = self.document.canvas_size().ok_or(EditorError::EmptyDocument)?;
        let layer = Layer::new(name, PixelBuffer::from_image(fill.render(w, h)?)?);
        self.apply("add generated layer", |doc| {
            doc.push_layer(layer);
            Ok(doc.len() - 1)
        })
    }

    // ------------------------------------------------------------------
    // Layer stack
    // ------------------------------------------------------------------

    pub fn delete_layer(&mut self) -> Result<()> {
        let index = self.document.selected_index()?;
        self.apply("delete layer", |doc| doc.remove_layer(index).map(|_| ()))
    }

    pub fn duplicate_layer(&mut self) -> Result<usize> {
        let index = self.document.selected_index()?;
        self.apply("duplicate layer", |doc| canvas_ops::duplicate_layer(doc, index))
    }

    /// Move the selected layer `delta` places (positive = toward the top).
    /// Past either end nothing happens and no history is recorded.
    pub fn move_layer(&mut self, delta: isize) -> Result<bool> {
        let index = self.document.selected_index()?;
        if !canvas_ops::can_move_layer(&self.document, index, delta) {
            return Ok(false);
        }
        self.apply("move layer", |doc| canvas_ops::move_layer(doc, index, delta))
    }

    pub fn merge_visible(&mut self) -> Result<()> {
        self.apply("merge visible", canvas_ops::merge_visible)
    }

    pub fn select_layer(&mut self, index: usize) -> Result<()> {
        self.document.select(index)
    }

    /// Select the topmost visible layer showing a pixel at a canvas point.
    pub fn select_layer_at(&mut self, x: i64, y: i64) -> Option<usize> {
        let hit = self.document.layer_at(x, y)?;
        self.document.select(hit).ok()?;
        Some(hit)
    }

    // ------------------------------------------------------------------
    // Layer properties
    // ------------------------------------------------------------------

    pub fn rename_layer(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(EditorError::invalid("layer name cannot be empty"));
        }
        self.apply_selected("rename layer", |layer| {
            layer.name = name;
            Ok(())
        })
    }

    pub fn toggle_visibility(&mut self) -> Result<bool> {
        self.apply_selected("toggle visibility", |layer| {
            layer.visible = !layer.visible;
            Ok(layer.visible)
        })
    }

    pub fn set_blend_mode(&mut self, mode: BlendMode) -> Result<()> {
        self.apply_selected("set blend mode", |layer| {
            layer.blend_mode = mode;
            Ok(())
        })
    }

    pub fn set_adjustment(&mut self, kind: AdjustmentKind, value: f32) -> Result<()> {
        self.apply_selected("set adjustment", |layer| layer.set_adjustment(kind, value))
    }

    pub fn set_offset(&mut self, x: i32, y: i32) -> Result<()> {
        self.apply_selected("set offset", |layer| {
            layer.offset = (x, y);
            Ok(())
        })
    }

    pub fn translate_layer(&mut self, dx: i32, dy: i32) -> Result<()> {
        self.apply_selected("translate layer", |layer| {
            layer.offset = (layer.offset.0.saturating_add(dx), layer.offset.1.saturating_add(dy));
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Pixels
    // ------------------------------------------------------------------

    pub fn apply_filter(&mut self, filter: Filter) -> Result<()> {
        self.apply_selected("filter", |layer| {
            layer.apply_filter(&filter);
            Ok(())
        })
    }

    /// Filter a box given in canvas coordinates. A box that misses the layer
    /// is a silent no-op (still recorded).
    pub fn apply_filter_to_region(&mut self, filter: Filter, region: Region) -> Result<()> {
        self.apply_selected("filter region", |layer| {
            let (ox, oy) = (layer.offset.0 as i64, layer.offset.1 as i64);
            let local = Region::new(region.x0 - ox, region.y0 - oy, region.x1 - ox, region.y1 - oy);
            layer.apply_filter_to_region(&filter, local);
            Ok(())
        })
    }

    /// Paint a canvas-space stroke onto the selected layer.
    pub fn paint(&mut self, stroke: &Stroke, color: Rgba<u8>) -> Result<()> {
        self.apply_selected("paint", |layer| {
            let local = to_layer_space(stroke, layer);
            layer.edit_original(|img| paint::paint(img, &local, color));
            Ok(())
        })
    }

    pub fn erase(&mut self, stroke: &Stroke) -> Result<()> {
        self.apply_selected("erase", |layer| {
            let local = to_layer_space(stroke, layer);
            layer.edit_original(|img| paint::erase(img, &local));
            Ok(())
        })
    }

    pub fn paint_mask(&mut self, stroke: &Stroke, brush: MaskBrush) -> Result<()> {
        self.apply_selected("paint mask", |layer| {
            let local = to_layer_space(stroke, layer);
            layer.edit_mask(|m| paint::paint_mask(m, &local, brush.value()));
            Ok(())
        })
    }

    pub fn invert_mask(&mut self) -> Result<()> {
        self.apply_selected("invert mask", |layer| {
            layer.invert_mask();
            Ok(())
        })
    }

    pub fn feather_mask(&mut self, radius: f32) -> Result<()> {
        canvas_ops::check_feather_radius(radius)?;
        self.apply_selected("feather mask", |layer| canvas_ops::feather_mask(layer, radius))
    }

    pub fn auto_enhance(&mut self) -> Result<()> {
        self.apply_selected("auto enhance", |layer| {
            canvas_ops::auto_enhance(layer);
            Ok(())
        })
    }

    pub fn replace_background(&mut self, color: Rgba<u8>) -> Result<()> {
        self.apply_selected("replace background", |layer| {
            canvas_ops::replace_background(layer, color);
            Ok(())
        })
    }

    pub fn auto_balance(&mut self) -> Result<()> {
        self.apply("auto balance", canvas_ops::auto_balance)
    }

    // ------------------------------------------------------------------
    // Geometry
    // ------------------------------------------------------------------

    pub fn rotate_layer(&mut self, degrees: f32) -> Result<()> {
        let index = self.document.selected_index()?;
        self.apply("rotate layer", |doc| canvas_ops::rotate_layer(doc, index, degrees))
    }

    pub fn flip_layer(&mut self, horizontal: bool) -> Result<()> {
        let index = self.document.selected_index()?;
        self.apply("flip layer", |doc| canvas_ops::flip_layer(doc, index, horizontal))
    }

    pub fn resize_canvas(&mut self, width: u32, height: u32) -> Result<()> {
        self.apply("resize canvas", |doc| canvas_ops::resize_canvas(doc, width, height))
    }

    pub fn resize_canvas_no_scale(&mut self, width: u32, height: u32) -> Result<()> {
        self.apply("canvas size", |doc| canvas_ops::resize_canvas_no_scale(doc, width, height))
    }

    pub fn crop(&mut self, region: Region) -> Result<()> {
        self.apply("crop", |doc| canvas_ops::crop(doc, region))
    }

    pub fn layout_grid(&mut self, columns: u32, cell: Option<(u32, u32)>) -> Result<()> {
        self.apply("layout", |doc| canvas_ops::layout_grid(doc, columns, cell))
    }

    // ------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------

    /// Composite of the visible layers.
    pub fn composite(&self) -> Result<RgbaImage> {
        self.document.composite(false)
    }

    /// Composite, scaled to cover `width x height` and centre-cropped.
    pub fn export_preset(&self, width: u32, height: u32) -> Result<RgbaImage> {
        transform::fit_to(&self.composite()?, width, height)
    }

    /// Record the live state, then write it as a draft.
    pub fn save_draft(&mut self, path: &Path) -> Result<()> {
        self.record();
        let snapshot = self
            .history
            .current()
            .ok_or_else(|| EditorError::draft("nothing recorded to save"))?;
        io::save_draft(snapshot, path)
    }

    /// Replace the document with a draft and restart history from it.
    pub fn load_draft(&mut self, path: &Path) -> Result<()> {
        let snapshot = io::load_draft(path)?;
        snapshot.restore_into(&mut self.document)?;
        self.history.reset_to(snapshot);
        self.pending = false;
        Ok(())
    }
}

fn to_layer_space(stroke: &Stroke, layer: &Layer) -> Stroke {
    stroke.translated(-(layer.offset.0 as f32), -(layer.offset.1 as f32))
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    fn project_with(n: usize) -> Project {
        let mut p = Project::new();
        p.new_document(4, 4, Fill::Solid(WHITE)).unwrap();
        for i in 1..n {
            p.add_generated_layer(format!("l{}", i), Fill::Blank).unwrap();
        }
        p
    }

    #[test]
    fn undo_reverts_exactly_one_command() {
        let mut p = project_with(1);
        p.set_adjustment(AdjustmentKind::Brightness, 0.5).unwrap();
        p.set_blend_mode(BlendMode::Screen).unwrap();

        assert!(p.undo().unwrap());
        let layer = p.document().selected_layer().unwrap();
        assert_eq!(layer.blend_mode, BlendMode::Normal);
        assert_eq!(layer.adjustments().brightness, 0.5);

        assert!(p.undo().unwrap());
        assert_eq!(p.document().selected_layer().unwrap().adjustments().brightness, 1.0);

        assert!(p.redo().unwrap());
        assert!(p.redo().unwrap());
        assert_eq!(p.document().selected_layer().unwrap().blend_mode, BlendMode::Screen);
        assert!(!p.redo().unwrap());
    }

    #[test]
    fn first_command_undoes_to_empty() {
        let mut p = Project::new();
        assert!(!p.undo().unwrap());
        p.new_document(2, 2, Fill::Blank).unwrap();
        assert!(p.undo().unwrap());
        assert!(p.document().is_empty());
        assert!(!p.undo().unwrap());
    }

    #[test]
    fn rejected_commands_leave_history_alone() {
        let mut p = project_with(1);
        let len = p.history().len();
        assert!(p.set_adjustment(AdjustmentKind::Gamma, 0.0).is_err());
        assert!(p.crop(Region::new(10, 10, 20, 20)).is_err());
        assert!(p.feather_mask(0.0).is_err());
        assert_eq!(p.history().len(), len);
        assert_eq!(p.document().selected_layer().unwrap().adjustments().gamma, 1.0);
    }

    #[test]
    fn commands_after_undo_drop_the_redo_branch() {
        let mut p = project_with(1);
        p.rename_layer("a").unwrap();
        p.rename_layer("b").unwrap();
        p.undo().unwrap();
        p.rename_layer("c").unwrap();
        assert!(!p.can_redo());
        assert!(p.undo().unwrap());
        assert_eq!(p.document().selected_layer().unwrap().name, "a");
        assert!(p.undo().unwrap());
        assert_eq!(p.document().selected_layer().unwrap().name, "Background");
    }

    #[test]
    fn selection_is_not_an_edit() {
        let mut p = project_with(3);
        let len = p.history().len();
        p.select_layer(0).unwrap();
        assert_eq!(p.select_layer_at(1, 1), Some(0));
        assert_eq!(p.history().len(), len);
        assert!(p.select_layer(7).is_err());
    }

    #[test]
    fn move_past_top_records_nothing() {
        let mut p = project_with(2);
        let len = p.history().len();
        assert!(!p.move_layer(1).unwrap());
        assert_eq!(p.history().len(), len);
        assert!(p.move_layer(-1).unwrap());
        assert_eq!(p.document().selected(), Some(0));
    }

    #[test]
    fn strokes_follow_layer_offset() {
        let mut p = project_with(2);
        p.set_offset(2, 0).unwrap();
        let stroke = Stroke::new(vec![(2.0, 0.0)], 1.0).unwrap();
        p.paint(&stroke, Rgba([255, 0, 0, 255])).unwrap();
        let layer = p.document().selected_layer().unwrap();
        assert_eq!(layer.original().get_pixel(0, 0), Rgba([255, 0, 0, 255]));
        assert_eq!(p.composite().unwrap().get_pixel(2, 0), &Rgba([255, 0, 0, 255]));

        p.paint_mask(&stroke, MaskBrush::Hide).unwrap();
        assert_eq!(p.composite().unwrap().get_pixel(2, 0), &WHITE);
    }

    #[test]
    fn strokes_far_off_the_canvas_change_nothing() {
        let mut p = project_with(1);
        let before = p.composite().unwrap();
        p.paint_mask(&"1e30,0/2".parse().unwrap(), MaskBrush::Hide).unwrap();
        assert_eq!(p.composite().unwrap(), before);
    }

    #[test]
    fn oversized_documents_are_rejected() {
        let mut p = Project::new();
        let err = p.new_document(u32::MAX, u32::MAX, Fill::Blank);
        assert!(matches!(err, Err(EditorError::InvalidArgument(_))));
        assert!(p.history().is_empty());

        p.new_document(4, 4, Fill::Blank).unwrap();
        assert!(matches!(p.resize_canvas(40_000, 4), Err(EditorError::InvalidArgument(_))));
        assert!(matches!(p.layout_grid(20_000, Some((2, 2))), Err(EditorError::InvalidArgument(_))));
        assert!(p.export_preset(u32::MAX, 1).is_err());
        assert_eq!(p.document().canvas_size(), Some((4, 4)));
    }

    #[test]
    fn layer_commands_need_a_selection() {
        let mut p = Project::new();
        assert!(matches!(p.invert_mask(), Err(EditorError::NoSelection)));
        assert!(matches!(p.add_generated_layer("x", Fill::Blank), Err(EditorError::EmptyDocument)));
        assert!(matches!(p.composite(), Err(EditorError::EmptyDocument)));
    }

    #[test]
    fn export_preset_crops_to_fit() {
        let mut p = Project::new();
        p.new_document(8, 4, Fill::Solid(WHITE)).unwrap();
        let out = p.export_preset(2, 2).unwrap();
        assert_eq!(out.dimensions(), (2, 2));
    }

    #[test]
    fn drafts_restart_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.rsd");
        let mut p = project_with(2);
        p.set_adjustment(AdjustmentKind::Contrast, 1.5).unwrap();
        p.save_draft(&path).unwrap();
        let expected = p.composite().unwrap();

        let mut q = Project::new();
        q.load_draft(&path).unwrap();
        assert_eq!(q.history().len(), 1);
        assert!(!q.can_undo());
        assert_eq!(q.document().len(), 2);
        assert_eq!(q.composite().unwrap(), expected);
    }
}
