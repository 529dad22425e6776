use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::tga::TgaEncoder;
use image::{DynamicImage, ImageEncoder, RgbaImage};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::canvas::{BlendMode, Mask, PixelBuffer, MAX_CANVAS_DIM};
use crate::components::history::{LayerSnapshot, Snapshot};
use crate::error::{EditorError, Result};
use crate::ops::adjustments::Adjustments;

// ============================================================================
// IMAGE SOURCE / SINK
// ============================================================================

/// Output formats for composited images.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SaveFormat {
    #[default]
    Png,
    Jpeg,
    Bmp,
    Tga,
}

impl SaveFormat {
    pub fn all() -> &'static [SaveFormat] {
        &[SaveFormat::Png, SaveFormat::Jpeg, SaveFormat::Bmp, SaveFormat::Tga]
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SaveFormat::Png => "png",
            SaveFormat::Jpeg => "jpg",
            SaveFormat::Bmp => "bmp",
            SaveFormat::Tga => "tga",
        }
    }

    /// Format implied by a path's extension, if it is one we write.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| e.parse().ok())
    }
}

impl FromStr for SaveFormat {
    type Err = EditorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "png" => Ok(SaveFormat::Png),
            "jpg" | "jpeg" => Ok(SaveFormat::Jpeg),
            "bmp" => Ok(SaveFormat::Bmp),
            "tga" => Ok(SaveFormat::Tga),
            other => Err(EditorError::invalid(format!(
                "unsupported output format '{}' (supported: png, jpg, bmp, tga)",
                other
            ))),
        }
    }
}

/// Decode any format the `image` crate understands into RGBA.
pub fn load_image(path: &Path) -> Result<RgbaImage> {
    let img = image::open(path)?.to_rgba8();
    log::info!("loaded {} ({}x{})", path.display(), img.width(), img.height());
    Ok(img)
}

/// Encode and write an image. `quality` (1-100) only affects JPEG; JPEG
/// output drops alpha.
pub fn save_image(image: &RgbaImage, path: &Path, format: SaveFormat, quality: u8) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    let (w, h) = image.dimensions();

    match format {
        SaveFormat::Png => {
            PngEncoder::new(&mut writer).write_image(image.as_raw(), w, h, image::ColorType::Rgba8)?;
        }
        SaveFormat::Jpeg => {
            let rgb_image = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100));
            encoder.encode(rgb_image.as_raw(), w, h, image::ColorType::Rgb8)?;
        }
        SaveFormat::Bmp => {
            let mut encoder = BmpEncoder::new(&mut writer);
            encoder.encode(image.as_raw(), w, h, image::ColorType::Rgba8)?;
        }
        SaveFormat::Tga => {
            let encoder = TgaEncoder::new(&mut writer);
            encoder.encode(image.as_raw(), w, h, image::ColorType::Rgba8)?;
        }
    }

    log::info!("saved {} ({}x{}, {:?})", path.display(), w, h, format);
    Ok(())
}

// ============================================================================
// DRAFT FILE FORMAT
// ============================================================================

/// Magic header for draft files
const DRAFT_MAGIC: &str = "RSD1";
pub const DRAFT_EXTENSION: &str = "rsd";

/// Maximum number of layers in a draft file.
const MAX_LAYERS: usize = 256;

#[derive(Serialize, Deserialize)]
struct DraftFile {
    magic: String,
    selected: Option<u64>,
    layers: Vec<DraftLayer>,
}

/// One layer: parameters plus flat RGBA pixels and 8-bit mask.
#[derive(Serialize, Deserialize)]
struct DraftLayer {
    name: String,
    visible: bool,
    blend_mode: u8,
    offset: (i32, i32),
    adjustments: Adjustments,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    mask: Vec<u8>,
}

fn build_draft(snapshot: &Snapshot) -> DraftFile {
    let layers = snapshot
        .layers
        .iter()
        .map(|l| {
            let (width, height) = l.original.dimensions();
            DraftLayer {
                name: l.name.clone(),
                visible: l.visible,
                blend_mode: l.blend_mode.to_u8(),
                offset: l.offset,
                adjustments: l.adjustments,
                width,
                height,
                pixels: l.original.image().as_raw().clone(),
                mask: l.mask.image().as_raw().clone(),
            }
        })
        .collect();

    DraftFile {
        magic: DRAFT_MAGIC.to_string(),
        selected: snapshot.selected.map(|i| i as u64),
        layers,
    }
}

/// Write a snapshot as a draft file.
pub fn save_draft(snapshot: &Snapshot, path: &Path) -> Result<()> {
    let draft = build_draft(snapshot);
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    bincode::serialize_into(writer, &draft)?;
    log::info!("draft saved: {} ({} layers)", path.display(), draft.layers.len());
    Ok(())
}

/// Read and validate a draft file.
pub fn load_draft(path: &Path) -> Result<Snapshot> {
    let raw = std::fs::read(path)?;
    // bincode writes a String as an 8-byte length prefix plus UTF-8 data,
    // so the 4-byte magic sits at bytes 8..12.
    let magic = raw.get(8..12).and_then(|m| std::str::from_utf8(m).ok());
    if magic != Some(DRAFT_MAGIC) {
        return Err(EditorError::draft(format!("{} is not a draft file", path.display())));
    }

    let draft: DraftFile = bincode::deserialize(&raw)?;
    let snapshot = snapshot_from_draft(draft)?;
    log::info!("draft loaded: {} ({} layers)", path.display(), snapshot.layers.len());
    Ok(snapshot)
}

fn snapshot_from_draft(draft: DraftFile) -> Result<Snapshot> {
    if draft.layers.len() > MAX_LAYERS {
        return Err(EditorError::draft(format!(
            "draft contains {} layers, which exceeds the maximum of {}",
            draft.layers.len(),
            MAX_LAYERS
        )));
    }

    let mut layers = Vec::with_capacity(draft.layers.len());
    for dl in draft.layers {
        if dl.width == 0 || dl.height == 0 || dl.width > MAX_CANVAS_DIM || dl.height > MAX_CANVAS_DIM {
            return Err(EditorError::draft(format!(
                "layer '{}' has size {}x{}, allowed 1x1 to {}x{}",
                dl.name, dl.width, dl.height, MAX_CANVAS_DIM, MAX_CANVAS_DIM
            )));
        }
        let area = dl.width as usize * dl.height as usize;
        if dl.pixels.len() != area * 4 || dl.mask.len() != area {
            return Err(EditorError::draft(format!(
                "layer '{}' has {} pixel / {} mask bytes, expected {} / {}",
                dl.name,
                dl.pixels.len(),
                dl.mask.len(),
                area * 4,
                area
            )));
        }
        let mut adjustments = Adjustments::default();
        for &kind in crate::ops::adjustments::AdjustmentKind::all() {
            adjustments
                .set(kind, dl.adjustments.get(kind))
                .map_err(|e| EditorError::draft(format!("layer '{}': {}", dl.name, e)))?;
        }

        let original = RgbaImage::from_raw(dl.width, dl.height, dl.pixels)
            .ok_or_else(|| EditorError::draft(format!("failed to rebuild pixels for layer '{}'", dl.name)))?;
        let mask = image::GrayImage::from_raw(dl.width, dl.height, dl.mask)
            .ok_or_else(|| EditorError::draft(format!("failed to rebuild mask for layer '{}'", dl.name)))?;

        layers.push(LayerSnapshot {
            name: dl.name,
            visible: dl.visible,
            blend_mode: BlendMode::from_u8(dl.blend_mode),
            offset: dl.offset,
            adjustments,
            original: PixelBuffer::from_image(original)?,
            mask: Mask::from_image(mask)?,
        });
    }

    let selected = draft
        .selected
        .and_then(|i| usize::try_from(i).ok())
        .filter(|&i| i < layers.len());
    Ok(Snapshot { layers, selected })
}

/// Draft files in `dir`, sorted by name. A missing directory has none.
pub fn list_drafts(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut drafts: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == DRAFT_EXTENSION))
        .collect();
    drafts.sort();
    Ok(drafts)
}

/// Delete every draft in `dir`; returns how many were removed.
pub fn delete_all_drafts(dir: &Path) -> Result<usize> {
    let drafts = list_drafts(dir)?;
    for path in &drafts {
        std::fs::remove_file(path)?;
    }
    if !drafts.is_empty() {
        log::info!("deleted {} draft(s) from {}", drafts.len(), dir.display());
    }
    Ok(drafts.len())
}

/// Peek at a draft's layer count without keeping its pixels around.
pub fn draft_layer_count(path: &Path) -> Result<usize> {
    let file = File::open(path)?;
    let draft: DraftFile = bincode::deserialize_from(BufReader::new(file))?;
    if draft.magic != DRAFT_MAGIC {
        return Err(EditorError::draft(format!("{} is not a draft file", path.display())));
    }
    Ok(draft.layers.len())
}
