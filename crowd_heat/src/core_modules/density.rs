// THEORY:
// The `density` module turns discrete detections into a continuous field. Each
// detection is "splatted" onto a grid the size of the image as a truncated 2-D
// Gaussian scaled by its weight, and overlapping splats simply add up. Where
// people cluster, the field peaks.
//
// Key architectural principles:
// 1.  **Separable kernel**: The Gaussian factors into a horizontal and a vertical
//     1-D profile. Per detection we evaluate `exp` once per column and once per row
//     of its window, then add the outer product. The support is a disc of
//     `kernel_radius` pixels around the rounded centre, wide enough (4 sigma) that
//     the cut is invisible. It is clipped at the grid edge, never wrapped.
// 2.  **Row bands**: `accumulate_rows` computes any horizontal slice of the field
//     on its own. Every pixel sums its contributions in detection order whatever
//     the slicing, so a field built band by band is bit-identical to one built in
//     a single pass. The parallel pipeline relies on this.
// 3.  **Ownership hand-off**: The accumulator owns and mutates the `DensityField`.
//     Normalizing consumes it and returns an immutable `NormalizedField`.
// 4.  **Degenerate fields**: A field whose peak is zero normalizes to all zeros.
//     There is no division by zero and no error.

use crate::config::{OutOfBoundsPolicy, RenderConfig};
use crate::core_modules::detection::{Detection, DetectionSet, MAX_WEIGHT};
use crate::error::{HeatmapError, Result};
use log::{debug, warn};
use std::ops::Range;

/// A row-major grid of non-negative raw density values.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityField {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl DensityField {
    /// A zero-filled field.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            values: vec![0.0; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.values.get((y * self.width + x) as usize).copied()
    }

    /// The largest value in the field, or 0.0 for an empty field.
    pub fn max(&self) -> f32 {
        self.values.iter().copied().fold(0.0, f32::max)
    }

    /// Scales the field by its own maximum.
    pub fn normalize(self) -> NormalizedField {
        let peak = self.max();
        self.normalize_with(peak)
    }

    /// Scales the field by an externally reduced maximum.
    ///
    /// Used when the field is one band of a larger image and `peak` is the
    /// maximum over all bands.
    pub fn normalize_with(self, peak: f32) -> NormalizedField {
        let values = if peak > 0.0 && peak.is_finite() {
            self.values
                .into_iter()
                .map(|value| (value / peak).clamp(0.0, 1.0))
                .collect()
        } else {
            vec![0.0; self.values.len()]
        };

        NormalizedField {
            width: self.width,
            height: self.height,
            peak: peak.max(0.0),
            values,
        }
    }
}

/// Density rescaled into `[0, 1]`. Read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedField {
    width: u32,
    height: u32,
    peak: f32,
    values: Vec<f32>,
}

impl NormalizedField {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The raw density that was mapped to 1.0.
    pub fn peak(&self) -> f32 {
        self.peak
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.values.get((y * self.width + x) as usize).copied()
    }

    /// True when no pixel carries any heat.
    pub fn is_cold(&self) -> bool {
        self.peak <= 0.0
    }
}

/// Applies the out-of-bounds policy to every detection.
///
/// A location is inside the image when `0 <= x < width` and `0 <= y < height`.
/// With `Clip` the returned detections are clamped onto the edge pixels; with
/// `Reject` any outside location fails the whole call.
pub fn resolve_detections(
    detections: &DetectionSet,
    width: u32,
    height: u32,
    policy: OutOfBoundsPolicy,
) -> Result<Vec<Detection>> {
    let mut resolved = Vec::with_capacity(detections.len());
    let mut clipped = 0usize;

    for (index, detection) in detections.iter().enumerate() {
        if !detection.x.is_finite() || !detection.y.is_finite() || !detection.weight.is_finite() {
            return Err(HeatmapError::validation(format!(
                "detection {index}: non-finite coordinates or weight"
            )));
        }
        if !(0.0..=MAX_WEIGHT).contains(&detection.weight) {
            return Err(HeatmapError::validation(format!(
                "detection {index}: weight {} outside [0, {MAX_WEIGHT}]",
                detection.weight
            )));
        }

        let inside = detection.x >= 0.0
            && detection.y >= 0.0
            && detection.x < width as f32
            && detection.y < height as f32;
        if inside {
            resolved.push(*detection);
            continue;
        }

        match policy {
            OutOfBoundsPolicy::Reject => {
                return Err(HeatmapError::dimension_mismatch(format!(
                    "detection {index} at ({}, {}) lies outside the {width}x{height} image",
                    detection.x, detection.y
                )));
            }
            OutOfBoundsPolicy::Clip => {
                clipped += 1;
                if width == 0 || height == 0 {
                    continue;
                }
                resolved.push(Detection {
                    x: detection.x.clamp(0.0, (width - 1) as f32),
                    y: detection.y.clamp(0.0, (height - 1) as f32),
                    weight: detection.weight,
                });
            }
        }
    }

    if clipped > 0 {
        warn!("Clipped {clipped} detection(s) into the {width}x{height} image");
    }
    Ok(resolved)
}

/// Builds the full-resolution density field for a detection set.
pub fn accumulate(
    detections: &DetectionSet,
    width: u32,
    height: u32,
    config: &RenderConfig,
) -> Result<DensityField> {
    let resolved = resolve_detections(detections, width, height, config.out_of_bounds)?;
    let field = accumulate_rows(&resolved, width, 0..height, config);
    debug!(
        "Accumulated {} detections into {}x{} field (peak {:.6})",
        resolved.len(),
        width,
        height,
        field.max()
    );
    Ok(field)
}

/// Builds the slice of the density field covering `rows`.
///
/// The returned field is `width x rows.len()`; its row 0 is image row `rows.start`.
/// `detections` must already be resolved against the full image.
pub fn accumulate_rows(
    detections: &[Detection],
    width: u32,
    rows: Range<u32>,
    config: &RenderConfig,
) -> DensityField {
    let band_height = rows.end.saturating_sub(rows.start);
    let mut field = DensityField::new(width, band_height);
    if width == 0 || band_height == 0 {
        return field;
    }

    let radius = config.kernel_radius() as i64;
    let radius_sq = radius * radius;
    let inverse_two_sigma_sq = 1.0 / (2.0 * config.sigma * config.sigma);
    let stride = width as usize;
    let last_column = width as i64 - 1;
    let first_row = rows.start as i64;
    let last_row = rows.end as i64 - 1;

    let mut column_weights: Vec<f32> = Vec::with_capacity(stride);

    for detection in detections {
        if detection.weight <= 0.0 {
            continue;
        }

        let center_x = detection.x.round() as i64;
        let center_y = detection.y.round() as i64;
        let x_start = (center_x - radius).max(0);
        let x_end = (center_x + radius).min(last_column);
        let y_start = (center_y - radius).max(first_row);
        let y_end = (center_y + radius).min(last_row);
        if x_start > x_end || y_start > y_end {
            continue;
        }

        column_weights.clear();
        column_weights.extend((x_start..=x_end).map(|x| {
            let dx = x as f32 - detection.x;
            (-dx * dx * inverse_two_sigma_sq).exp()
        }));

        for y in y_start..=y_end {
            // Circular support: the row's span shrinks towards the top and bottom.
            let offset_y = y - center_y;
            let span = (radius_sq - offset_y * offset_y).isqrt();
            let row_start = (center_x - span).max(x_start);
            let row_end = (center_x + span).min(x_end);
            if row_start > row_end {
                continue;
            }

            let dy = y as f32 - detection.y;
            let row_weight = detection.weight * (-dy * dy * inverse_two_sigma_sq).exp();
            let weights = &column_weights[(row_start - x_start) as usize..=(row_end - x_start) as usize];
            let offset = (y - first_row) as usize * stride + row_start as usize;
            let row = &mut field.values[offset..offset + weights.len()];
            for (value, column_weight) in row.iter_mut().zip(weights) {
                *value += row_weight * column_weight;
            }
        }
    }

    field
}
