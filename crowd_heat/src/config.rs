// THEORY:
// `RenderConfig` holds the numeric constants of the pipeline: the smoothing
// kernel, the opacity curve and the out-of-bounds policy. It is built once at
// startup, validated, and then only ever borrowed. Requests never carry their
// own kernel settings.

use crate::error::{HeatmapError, Result};
use std::fmt;
use std::str::FromStr;

/// Smoothing sigma in pixels used by the original service on 708x480 frames.
pub const DEFAULT_SIGMA: f32 = 15.0;
/// Kernel radius expressed in sigmas. At 4 sigma the kernel has fallen to
/// about 3e-4 of its peak, below one colour level.
pub const DEFAULT_TRUNCATE: f32 = 4.0;
pub const DEFAULT_MAX_OPACITY: f32 = 0.6;
/// Normalized density at which the overlay reaches full opacity.
pub const DEFAULT_OPACITY_RAMP: f32 = 0.10;
/// Upper bound on `sigma * truncate`, in pixels.
pub const MAX_KERNEL_RADIUS: f32 = 1.0e6;

/// What to do with a detection whose location falls outside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutOfBoundsPolicy {
    /// Clamp the location onto the nearest edge pixel.
    #[default]
    Clip,
    /// Fail the whole render with `DimensionMismatch`.
    Reject,
}

/// Configuration for the heatmap pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    /// Standard deviation of the Gaussian kernel, in pixels.
    pub sigma: f32,
    /// Kernel support radius in multiples of `sigma`. Contributions beyond it are dropped.
    pub truncate: f32,
    /// Opacity of the heat layer at and above `opacity_ramp`.
    pub max_opacity: f32,
    /// Normalized density where the opacity ramp tops out.
    pub opacity_ramp: f32,
    pub out_of_bounds: OutOfBoundsPolicy,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            sigma: DEFAULT_SIGMA,
            truncate: DEFAULT_TRUNCATE,
            max_opacity: DEFAULT_MAX_OPACITY,
            opacity_ramp: DEFAULT_OPACITY_RAMP,
            out_of_bounds: OutOfBoundsPolicy::Clip,
        }
    }
}

impl RenderConfig {
    /// Checks that every constant is usable. Call once after building a config.
    pub fn validate(&self) -> Result<()> {
        if !self.sigma.is_finite() || self.sigma <= 0.0 {
            return Err(HeatmapError::InvalidConfig(format!(
                "sigma must be positive, got {}",
                self.sigma
            )));
        }
        if !self.truncate.is_finite() || self.truncate <= 0.0 {
            return Err(HeatmapError::InvalidConfig(format!(
                "truncate must be positive, got {}",
                self.truncate
            )));
        }
        let reach = self.sigma * self.truncate;
        if reach > MAX_KERNEL_RADIUS {
            return Err(HeatmapError::InvalidConfig(format!(
                "kernel radius sigma * truncate = {reach} exceeds {MAX_KERNEL_RADIUS} px"
            )));
        }
        if !(1.0 / (2.0 * self.sigma * self.sigma)).is_finite() {
            return Err(HeatmapError::InvalidConfig(format!(
                "sigma {} is too small",
                self.sigma
            )));
        }
        if !(self.max_opacity > 0.0 && self.max_opacity <= 1.0) {
            return Err(HeatmapError::InvalidConfig(format!(
                "max_opacity must lie in (0, 1], got {}",
                self.max_opacity
            )));
        }
        if !(self.opacity_ramp > 0.0 && self.opacity_ramp <= 1.0) {
            return Err(HeatmapError::InvalidConfig(format!(
                "opacity_ramp must lie in (0, 1], got {}",
                self.opacity_ramp
            )));
        }
        Ok(())
    }

    /// Radius of the kernel window in whole pixels.
    pub fn kernel_radius(&self) -> usize {
        (self.truncate * self.sigma).ceil() as usize
    }

    /// Opacity of the heat layer for a normalized density `d`.
    ///
    /// Zero at `d == 0`, rising linearly to `max_opacity` at `opacity_ramp`, flat above.
    pub fn opacity(&self, density: f32) -> f32 {
        if density <= 0.0 || density.is_nan() {
            return 0.0;
        }
        self.max_opacity * (density / self.opacity_ramp).min(1.0)
    }
}

/// A `WIDTHxHEIGHT` pair, as given on the command line (e.g. `708x480`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl FromStr for ImageSize {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (width, height) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
        let width: u32 = width
            .trim()
            .parse()
            .map_err(|_| format!("invalid width in {s:?}"))?;
        let height: u32 = height
            .trim()
            .parse()
            .map_err(|_| format!("invalid height in {s:?}"))?;
        if width == 0 || height == 0 {
            return Err(format!("size must be non-zero, got {s:?}"));
        }
        Ok(Self { width, height })
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
