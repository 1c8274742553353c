// THEORY:
// The `gradient` module maps a normalized density in [0, 1] onto a color. The
// mapping is piecewise-linear between a handful of fixed stops, running from a
// cold blue through green, yellow and orange to a hot red.
//
// The stop table of `HEAT_GRADIENT` is part of the public contract: visual
// regression baselines are rendered against exactly these values.
//
//   0.00  blue    (  0,   0, 255)
//   0.25  green   (  0, 255,   0)
//   0.50  yellow  (255, 255,   0)
//   0.75  orange  (255, 165,   0)
//   1.00  red     (255,   0,   0)
//
// The gradient is immutable and lives in a `static`; every render borrows it.

use crate::error::{HeatmapError, Result};
use image::Rgb;
use std::borrow::Cow;

/// A (position, color) anchor of a gradient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientStop {
    pub position: f32,
    pub color: Rgb<u8>,
}

impl GradientStop {
    pub const fn new(position: f32, color: [u8; 3]) -> Self {
        Self {
            position,
            color: Rgb(color),
        }
    }
}

const HEAT_STOPS: [GradientStop; 5] = [
    GradientStop::new(0.00, [0, 0, 255]),
    GradientStop::new(0.25, [0, 255, 0]),
    GradientStop::new(0.50, [255, 255, 0]),
    GradientStop::new(0.75, [255, 165, 0]),
    GradientStop::new(1.00, [255, 0, 0]),
];

/// The blue → green → yellow → orange → red heat gradient.
pub static HEAT_GRADIENT: ColorGradient = ColorGradient {
    stops: Cow::Borrowed(&HEAT_STOPS),
};

/// An ordered, validated list of gradient stops.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorGradient {
    stops: Cow<'static, [GradientStop]>,
}

impl Default for ColorGradient {
    fn default() -> Self {
        HEAT_GRADIENT.clone()
    }
}

impl ColorGradient {
    /// Builds a custom gradient.
    ///
    /// Requires at least two stops with finite, strictly increasing positions,
    /// the first at 0.0 and the last at 1.0.
    pub fn new(stops: Vec<GradientStop>) -> Result<Self> {
        if stops.len() < 2 {
            return Err(HeatmapError::InvalidConfig(
                "a gradient needs at least two stops".to_string(),
            ));
        }
        if stops.iter().any(|stop| !stop.position.is_finite()) {
            return Err(HeatmapError::InvalidConfig(
                "gradient positions must be finite".to_string(),
            ));
        }
        if stops.windows(2).any(|pair| pair[0].position >= pair[1].position) {
            return Err(HeatmapError::InvalidConfig(
                "gradient positions must be strictly increasing".to_string(),
            ));
        }
        if stops[0].position != 0.0 || stops[stops.len() - 1].position != 1.0 {
            return Err(HeatmapError::InvalidConfig(
                "gradient must start at 0.0 and end at 1.0".to_string(),
            ));
        }
        Ok(Self {
            stops: Cow::Owned(stops),
        })
    }

    pub fn stops(&self) -> &[GradientStop] {
        &self.stops
    }

    /// Color for a normalized density.
    ///
    /// Input is clamped to [0, 1] (NaN reads as 0) and never extrapolated.
    pub fn color_at(&self, t: f32) -> Rgb<u8> {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };

        let upper = self
            .stops
            .iter()
            .position(|stop| stop.position >= t)
            .unwrap_or(self.stops.len() - 1);
        if upper == 0 {
            return self.stops[0].color;
        }

        let low = &self.stops[upper - 1];
        let high = &self.stops[upper];
        let ratio = (t - low.position) / (high.position - low.position);

        let mut channels = [0u8; 3];
        for (channel, (&from, &to)) in channels
            .iter_mut()
            .zip(low.color.0.iter().zip(high.color.0.iter()))
        {
            let value = from as f32 + (to as f32 - from as f32) * ratio;
            *channel = value.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hue(color: Rgb<u8>) -> f32 {
        let [r, g, b] = color.0.map(|c| c as f32 / 255.0);
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let chroma = max - min;
        if chroma <= 1e-6 {
            return 0.0;
        }
        let sector = if max == r {
            (g - b) / chroma
        } else if max == g {
            (b - r) / chroma + 2.0
        } else {
            (r - g) / chroma + 4.0
        };
        let degrees = sector * 60.0;
        if degrees < 0.0 { degrees + 360.0 } else { degrees }
    }

    #[test]
    fn hits_every_stop_exactly() {
        assert_eq!(HEAT_GRADIENT.color_at(0.0), Rgb([0, 0, 255]));
        assert_eq!(HEAT_GRADIENT.color_at(0.25), Rgb([0, 255, 0]));
        assert_eq!(HEAT_GRADIENT.color_at(0.5), Rgb([255, 255, 0]));
        assert_eq!(HEAT_GRADIENT.color_at(0.75), Rgb([255, 165, 0]));
        assert_eq!(HEAT_GRADIENT.color_at(1.0), Rgb([255, 0, 0]));
    }

    #[test]
    fn interpolates_between_stops() {
        assert_eq!(HEAT_GRADIENT.color_at(0.125), Rgb([0, 128, 128]));
        assert_eq!(HEAT_GRADIENT.color_at(0.875), Rgb([255, 83, 0]));
    }

    #[test]
    fn clamps_out_of_range_input() {
        assert_eq!(HEAT_GRADIENT.color_at(-3.0), HEAT_GRADIENT.color_at(0.0));
        assert_eq!(HEAT_GRADIENT.color_at(7.5), HEAT_GRADIENT.color_at(1.0));
        assert_eq!(HEAT_GRADIENT.color_at(f32::NAN), HEAT_GRADIENT.color_at(0.0));
        assert_eq!(HEAT_GRADIENT.color_at(f32::INFINITY), HEAT_GRADIENT.color_at(1.0));
    }

    #[test]
    fn temperature_never_reverses() {
        let mut previous_hue = hue(HEAT_GRADIENT.color_at(0.0));
        for step in 1..=1000 {
            let current = hue(HEAT_GRADIENT.color_at(step as f32 / 1000.0));
            assert!(
                current <= previous_hue + 1e-3,
                "hue went from {previous_hue} back up to {current} at step {step}"
            );
            previous_hue = current;
        }
        assert_eq!(previous_hue, 0.0);
    }

    #[test]
    fn lookup_is_deterministic() {
        for step in 0..=200 {
            let t = step as f32 / 200.0;
            assert_eq!(HEAT_GRADIENT.color_at(t), HEAT_GRADIENT.color_at(t));
        }
    }

    #[test]
    fn custom_gradients_are_validated() {
        let two = ColorGradient::new(vec![
            GradientStop::new(0.0, [0, 0, 0]),
            GradientStop::new(1.0, [255, 255, 255]),
        ])
        .expect("valid gradient");
        assert_eq!(two.color_at(0.5), Rgb([128, 128, 128]));

        assert!(ColorGradient::new(vec![GradientStop::new(0.0, [0, 0, 0])]).is_err());
        assert!(ColorGradient::new(vec![
            GradientStop::new(0.0, [0, 0, 0]),
            GradientStop::new(0.6, [1, 1, 1]),
            GradientStop::new(0.4, [2, 2, 2]),
            GradientStop::new(1.0, [3, 3, 3]),
        ])
        .is_err());
        assert!(ColorGradient::new(vec![
            GradientStop::new(0.1, [0, 0, 0]),
            GradientStop::new(1.0, [3, 3, 3]),
        ])
        .is_err());
    }

    #[test]
    fn default_is_the_heat_gradient() {
        assert_eq!(ColorGradient::default(), HEAT_GRADIENT);
        assert_eq!(HEAT_GRADIENT.stops().len(), 5);
    }
}
