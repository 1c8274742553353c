// THEORY:
// This file is the entry point of the `crowd_heat` library crate. It turns person
// detections plus a source image into a density heatmap overlay.
//
// Callers render through `pipeline::OverlayPipeline` (or the `render_overlay`
// shortcut), or through `parallel_pipeline::ParallelRenderer` to spread a render
// across cores. The individual stages live in `core_modules`; they stay public so
// intermediate results such as the density field can be inspected.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use config::{ImageSize, OutOfBoundsPolicy, RenderConfig};
pub use core_modules::detection::{
    Detection, DetectionDocument, DetectionSet, parse_detections, parse_document,
};
pub use core_modules::gradient::{ColorGradient, GradientStop, HEAT_GRADIENT};
pub use error::{HeatmapError, Result};
pub use parallel_pipeline::ParallelRenderer;
pub use pipeline::{OverlayPipeline, image_from_raw, render_overlay};
