// THEORY:
// `ParallelRenderer` runs the same pipeline as `OverlayPipeline`, spread over a
// pool of blocking workers. The image is cut into horizontal row bands and each
// band goes through two phases:
//
//   phase 1: accumulate the band's slice of the density field   (parallel)
//   sync:    reduce the band maxima into the global peak        (serial)
//   phase 2: normalize, colorize and blend the band's rows      (parallel)
//
// The global peak is the only cross-band dependency. Bands never write into one
// another, and every pixel sums its splats in the same order as the sequential
// pipeline, so the output is byte-identical to `OverlayPipeline::render`.

use crate::core_modules::compositor::blend_rows;
use crate::core_modules::density::{DensityField, accumulate_rows, resolve_detections};
use crate::error::{HeatmapError, Result};
use crate::pipeline::{DetectionDocument, DetectionSet, OverlayPipeline, check_declared_size};
use futures::future::try_join_all;
use image::RgbImage;
use log::debug;
use std::ops::Range;
use std::sync::Arc;
use tokio::task::JoinError;

/// Bands smaller than this are not worth a task of their own.
const MIN_BAND_ROWS: u32 = 16;

/// Renders overlays on tokio's blocking pool, one task per row band.
#[derive(Debug, Clone)]
pub struct ParallelRenderer {
    pipeline: Arc<OverlayPipeline>,
    workers: usize,
}

impl ParallelRenderer {
    /// One band per available CPU.
    pub fn new(pipeline: OverlayPipeline) -> Self {
        Self::with_workers(pipeline, num_cpus::get())
    }

    pub fn with_workers(pipeline: OverlayPipeline, workers: usize) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            workers: workers.max(1),
        }
    }

    pub fn pipeline(&self) -> &OverlayPipeline {
        &self.pipeline
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub async fn render_document(
        &self,
        image: Arc<RgbImage>,
        document: &DetectionDocument,
    ) -> Result<RgbImage> {
        check_declared_size(&image, document)?;
        self.render_overlay(image, &document.detections).await
    }

    /// Renders the overlay for `detections` on top of `image`.
    pub async fn render_overlay(
        &self,
        image: Arc<RgbImage>,
        detections: &DetectionSet,
    ) -> Result<RgbImage> {
        let (width, height) = image.dimensions();
        let config = self.pipeline.config();
        let resolved = Arc::new(resolve_detections(
            detections,
            width,
            height,
            config.out_of_bounds,
        )?);
        if width == 0 || height == 0 {
            return Ok((*image).clone());
        }

        let bands = row_bands(height, self.workers);
        debug!(
            "Rendering {}x{} overlay for {} detections across {} bands",
            width,
            height,
            resolved.len(),
            bands.len()
        );

        // Phase 1: per-band density.
        let accumulations = bands.iter().cloned().map(|rows| {
            let pipeline = Arc::clone(&self.pipeline);
            let resolved = Arc::clone(&resolved);
            tokio::task::spawn_blocking(move || {
                accumulate_rows(&resolved, width, rows, pipeline.config())
            })
        });
        let fields: Vec<DensityField> = try_join_all(accumulations).await.map_err(worker_error)?;

        // Sync point: every band must be complete before anything is normalized.
        let peak = fields.iter().map(DensityField::max).fold(0.0, f32::max);
        debug!("Global density peak {:.6}", peak);

        // Phase 2: per-band blend.
        let row_bytes = width as usize * 3;
        let blends = bands.into_iter().zip(fields).map(|(rows, field)| {
            let pipeline = Arc::clone(&self.pipeline);
            let image = Arc::clone(&image);
            tokio::task::spawn_blocking(move || {
                let normalized = field.normalize_with(peak);
                let start = rows.start as usize * row_bytes;
                let end = rows.end as usize * row_bytes;
                let mut output = vec![0u8; end - start];
                blend_rows(
                    &image.as_raw()[start..end],
                    normalized.values(),
                    pipeline.gradient(),
                    pipeline.config(),
                    &mut output,
                );
                output
            })
        });
        let parts: Vec<Vec<u8>> = try_join_all(blends).await.map_err(worker_error)?;

        RgbImage::from_raw(width, height, parts.concat()).ok_or_else(|| {
            HeatmapError::Worker("row bands did not cover the whole image".to_string())
        })
    }
}

/// Splits `0..height` into at most `workers` contiguous, non-empty bands.
pub fn row_bands(height: u32, workers: usize) -> Vec<Range<u32>> {
    if height == 0 {
        return Vec::new();
    }
    let max_bands = height.div_ceil(MIN_BAND_ROWS).max(1);
    let count = (workers.max(1) as u32).min(max_bands);
    let rows_per_band = height.div_ceil(count);

    (0..count)
        .map(|band| band * rows_per_band..((band + 1) * rows_per_band).min(height))
        .filter(|rows| !rows.is_empty())
        .collect()
}

fn worker_error(err: JoinError) -> HeatmapError {
    HeatmapError::Worker(err.to_string())
}
