pub mod adjustments;
pub mod canvas_ops;
pub mod filters;
pub mod generate;
pub mod paint;
pub mod transform;
