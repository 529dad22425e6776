use std::collections::VecDeque;

use crate::canvas::{BlendMode, Document, Layer, Mask, PixelBuffer};
use crate::error::Result;
use crate::ops::adjustments::Adjustments;

pub const DEFAULT_MAX_HISTORY: usize = 100;

// ============================================================================
// SNAPSHOTS
// ============================================================================

/// Stored copy of one layer. Pixel and mask storage is shared with the live
/// layer until either side is modified.
#[derive(Clone, Debug)]
pub struct LayerSnapshot {
    pub name: String,
    pub visible: bool,
    pub blend_mode: BlendMode,
    pub offset: (i32, i32),
    pub adjustments: Adjustments,
    pub original: PixelBuffer,
    pub mask: Mask,
}

impl LayerSnapshot {
    pub fn capture(layer: &Layer) -> Self {
        Self {
            name: layer.name.clone(),
            visible: layer.visible,
            blend_mode: layer.blend_mode,
            offset: layer.offset,
            adjustments: *layer.adjustments(),
            original: layer.original().clone(),
            mask: layer.mask().clone(),
        }
    }

    /// Fresh layer with its working buffer recomputed.
    pub fn restore(&self) -> Result<Layer> {
        let mut layer = Layer::from_parts(
            self.name.clone(),
            self.original.clone(),
            self.mask.clone(),
            self.adjustments,
        )?;
        layer.visible = self.visible;
        layer.blend_mode = self.blend_mode;
        layer.offset = self.offset;
        Ok(layer)
    }
}

/// Immutable copy of the whole document at one point in time.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub layers: Vec<LayerSnapshot>,
    pub selected: Option<usize>,
}

impl Snapshot {
    pub fn capture(doc: &Document) -> Self {
        Self {
            layers: doc.layers().iter().map(LayerSnapshot::capture).collect(),
            selected: doc.selected(),
        }
    }

    /// Replace the document's layers with fresh layers built from this
    /// snapshot. Nothing changes if any layer fails to rebuild.
    pub fn restore_into(&self, doc: &mut Document) -> Result<()> {
        let layers = self
            .layers
            .iter()
            .map(LayerSnapshot::restore)
            .collect::<Result<Vec<_>>>()?;
        doc.replace_layers(layers, self.selected);
        Ok(())
    }

    /// Bytes this snapshot keeps alive on its own.
    pub fn memory_bytes(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.original.memory_bytes() + l.mask.memory_bytes())
            .sum()
    }
}

// ============================================================================
// HISTORY MANAGER
// ============================================================================

/// Bounded list of snapshots with a cursor.
///
/// `cursor` is `None` until the first save; otherwise it indexes the
/// snapshot matching the state undo/redo last restored (or the last save).
pub struct HistoryManager {
    snapshots: VecDeque<Snapshot>,
    cursor: Option<usize>,
    max_history_size: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl HistoryManager {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            snapshots: VecDeque::new(),
            cursor: None,
            max_history_size: max_history_size.max(1),
        }
    }

    /// Record the current document. Drops any redo branch first and evicts
    /// the oldest snapshot past the cap.
    pub fn save(&mut self, doc: &Document) {
        self.truncate_redo();
        self.snapshots.push_back(Snapshot::capture(doc));
        self.prune();
        self.cursor = Some(self.snapshots.len() - 1);
    }

    /// Discard every snapshot after the cursor.
    pub fn truncate_redo(&mut self) {
        match self.cursor {
            Some(c) => self.snapshots.truncate(c + 1),
            None => self.snapshots.clear(),
        }
    }

    /// Step back one snapshot and restore it. Returns `false` at the start.
    pub fn undo(&mut self, doc: &mut Document) -> Result<bool> {
        let target = match self.cursor {
            Some(c) if c > 0 => c - 1,
            _ => return Ok(false),
        };
        self.snapshots[target].restore_into(doc)?;
        self.cursor = Some(target);
        log::debug!("undo -> snapshot {}/{}", target + 1, self.snapshots.len());
        Ok(true)
    }

    /// Step forward one snapshot and restore it. Returns `false` at the end.
    pub fn redo(&mut self, doc: &mut Document) -> Result<bool> {
        let target = match self.cursor {
            Some(c) if c + 1 < self.snapshots.len() => c + 1,
            _ => return Ok(false),
        };
        self.snapshots[target].restore_into(doc)?;
        self.cursor = Some(target);
        log::debug!("redo -> snapshot {}/{}", target + 1, self.snapshots.len());
        Ok(true)
    }

    pub fn can_undo(&self) -> bool {
        matches!(self.cursor, Some(c) if c > 0)
    }

    pub fn can_redo(&self) -> bool {
        matches!(self.cursor, Some(c) if c + 1 < self.snapshots.len())
    }

    /// Replace the whole history with one snapshot (draft loading).
    pub fn reset_to(&mut self, snapshot: Snapshot) {
        self.snapshots.clear();
        self.snapshots.push_back(snapshot);
        self.cursor = Some(0);
    }

    pub fn current(&self) -> Option<&Snapshot> {
        self.cursor.and_then(|c| self.snapshots.get(c))
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn max_history_size(&self) -> usize {
        self.max_history_size
    }

    pub fn set_max_history_size(&mut self, max: usize) {
        self.max_history_size = max.max(1);
        let before = self.snapshots.len();
        self.prune();
        if let Some(c) = self.cursor {
            let evicted = before - self.snapshots.len();
            self.cursor = Some(c.saturating_sub(evicted));
        }
    }

    /// Memory held by snapshots beyond what live layers already share.
    pub fn memory_bytes(&self) -> usize {
        self.snapshots.iter().map(Snapshot::memory_bytes).sum()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.cursor = None;
    }

    /// Prune old snapshots to stay within the cap
    fn prune(&mut self) {
        while self.snapshots.len() > self.max_history_size {
            self.snapshots.pop_front();
            log::debug!("history full ({}), evicted oldest snapshot", self.max_history_size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn doc_with(names: &[&str]) -> Document {
        let mut doc = Document::new();
        for name in names {
            let buf = PixelBuffer::filled(2, 2, Rgba([10, 20, 30, 255])).unwrap();
            doc.push_layer(Layer::new(*name, buf));
        }
        doc
    }

    #[test]
    fn empty_history_cannot_move() {
        let mut doc = doc_with(&["a"]);
        let mut h = HistoryManager::default();
        assert_eq!(h.cursor(), None);
        assert!(!h.undo(&mut doc).unwrap());
        assert!(!h.redo(&mut doc).unwrap());
    }

    #[test]
    fn cap_evicts_oldest_and_undo_stops_there() {
        let cap = 5;
        let mut h = HistoryManager::new(cap);
        let mut doc = Document::new();
        for i in 0..cap + 3 {
            doc.push_layer(Layer::new(format!("l{}", i), PixelBuffer::new(1, 1).unwrap()));
            h.save(&doc);
        }
        assert_eq!(h.len(), cap);
        assert_eq!(h.cursor(), Some(cap - 1));

        for _ in 0..cap - 1 {
            assert!(h.undo(&mut doc).unwrap());
        }
        assert!(!h.undo(&mut doc).unwrap());
        assert_eq!(h.cursor(), Some(0));
        // oldest retained snapshot had 4 layers (saves 1..=3 were evicted)
        assert_eq!(doc.len(), 4);
    }

    #[test]
    fn saving_after_undo_drops_redo_branch() {
        let mut doc = doc_with(&["a"]);
        let mut h = HistoryManager::default();
        h.save(&doc);
        h.save(&doc);
        h.undo(&mut doc).unwrap();
        h.save(&doc);
        assert_eq!(h.len(), 2);
        assert_eq!(h.cursor(), Some(1));
        assert!(!h.can_redo());
    }

    #[test]
    fn undo_and_redo_restore_layers_and_selection() {
        let mut doc = doc_with(&["a", "b"]);
        doc.select(0).unwrap();
        let mut h = HistoryManager::default();
        h.save(&doc);

        doc.layer_mut(0).unwrap().name = "renamed".into();
        doc.layer_mut(0).unwrap().set_adjustment(crate::ops::adjustments::AdjustmentKind::Brightness, 0.5).unwrap();
        doc.push_layer(Layer::new("c", PixelBuffer::new(2, 2).unwrap()));
        h.save(&doc);

        assert!(h.undo(&mut doc).unwrap());
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.selected(), Some(0));
        assert_eq!(doc.layer(0).unwrap().name, "a");
        assert_eq!(doc.layer(0).unwrap().working().get_pixel(0, 0), Rgba([10, 20, 30, 255]));

        assert!(h.redo(&mut doc).unwrap());
        assert_eq!(doc.len(), 3);
        assert_eq!(doc.selected(), Some(2));
        assert_eq!(doc.layer(0).unwrap().working().get_pixel(0, 0), Rgba([5, 10, 15, 255]));
        assert!(!h.redo(&mut doc).unwrap());
    }

    #[test]
    fn snapshots_share_pixels_until_edited() {
        let mut doc = doc_with(&["a"]);
        let mut h = HistoryManager::default();
        h.save(&doc);
        let shared = h.memory_bytes();

        doc.layer_mut(0).unwrap().edit_original(|img| img.put_pixel(0, 0, Rgba([0, 0, 0, 0])));
        assert!(h.memory_bytes() > shared);
        assert_eq!(h.current().unwrap().layers[0].original.get_pixel(0, 0), Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn reset_and_shrink() {
        let mut doc = doc_with(&["a"]);
        let mut h = HistoryManager::new(10);
        for _ in 0..6 {
            h.save(&doc);
        }
        h.set_max_history_size(3);
        assert_eq!(h.len(), 3);
        assert_eq!(h.cursor(), Some(2));

        h.reset_to(Snapshot::capture(&doc));
        assert_eq!((h.len(), h.cursor()), (1, Some(0)));
        assert!(!h.undo(&mut doc).unwrap());
    }
}
