//! Multi-layer raster editing core: copy-on-write pixel buffers, layers with
//! non-destructive adjustments, five-mode compositing, filters, bounded
//! undo/redo, and a bincode draft format.

pub mod canvas;
pub mod cli;
pub mod components;
pub mod error;
pub mod io;
pub mod logger;
pub mod ops;
pub mod project;
pub mod settings;

pub use canvas::{BlendMode, Document, Layer, Mask, PixelBuffer, Region};
pub use components::history::HistoryManager;
pub use error::{EditorError, Result};
pub use project::Project;
