// THEORY:
// The `pipeline` module is the top-level API of the heatmap engine. It chains the
// five stages into a single call:
//
//   detections -> resolve (out-of-bounds policy) -> accumulate -> normalize
//              -> colorize + composite -> overlay image
//
// `OverlayPipeline` validates its configuration once and can then be shared
// freely; rendering takes `&self` and keeps no state between calls. Rendering the
// same inputs twice yields byte-identical images.

use crate::config::RenderConfig;
use crate::core_modules::compositor::composite;
use crate::core_modules::density::accumulate;
use crate::core_modules::gradient::{ColorGradient, HEAT_GRADIENT};
use crate::error::{HeatmapError, Result};
use image::RgbImage;
use log::debug;

// Re-export key data structures for the public API.
pub use crate::config::OutOfBoundsPolicy;
pub use crate::core_modules::detection::{Detection, DetectionDocument, DetectionSet};

/// The heatmap renderer. Holds the validated configuration and the gradient.
#[derive(Debug, Clone)]
pub struct OverlayPipeline {
    config: RenderConfig,
    gradient: ColorGradient,
}

impl OverlayPipeline {
    /// A pipeline using the standard heat gradient.
    pub fn new(config: RenderConfig) -> Result<Self> {
        Self::with_gradient(config, HEAT_GRADIENT.clone())
    }

    pub fn with_gradient(config: RenderConfig, gradient: ColorGradient) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, gradient })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn gradient(&self) -> &ColorGradient {
        &self.gradient
    }

    /// Renders the density overlay for `detections` on top of `image`.
    ///
    /// Returns a new image of the same size. An empty detection set yields an
    /// unmodified copy.
    pub fn render(&self, image: &RgbImage, detections: &DetectionSet) -> Result<RgbImage> {
        let (width, height) = image.dimensions();

        let field = accumulate(detections, width, height, &self.config)?;
        let normalized = field.normalize();
        debug!(
            "Normalized {}x{} field against peak {:.6}",
            width,
            height,
            normalized.peak()
        );

        composite(image, &normalized, &self.gradient, &self.config)
    }

    /// Renders a parsed document, checking any image size it declares first.
    pub fn render_document(&self, image: &RgbImage, document: &DetectionDocument) -> Result<RgbImage> {
        check_declared_size(image, document)?;
        self.render(image, &document.detections)
    }
}

impl Default for OverlayPipeline {
    fn default() -> Self {
        Self {
            config: RenderConfig::default(),
            gradient: HEAT_GRADIENT.clone(),
        }
    }
}

/// Renders with the default configuration and heat gradient.
pub fn render_overlay(image: &RgbImage, detections: &DetectionSet) -> Result<RgbImage> {
    OverlayPipeline::default().render(image, detections)
}

/// Fails when the document reports an image size different from `image`.
pub fn check_declared_size(image: &RgbImage, document: &DetectionDocument) -> Result<()> {
    match document.declared_size {
        Some(declared) if declared != image.dimensions() => {
            Err(HeatmapError::dimension_mismatch(format!(
                "detections were produced for a {}x{} image but the image is {}x{}",
                declared.0,
                declared.1,
                image.width(),
                image.height()
            )))
        }
        _ => Ok(()),
    }
}

/// Wraps a raw pixel buffer as an RGB image.
///
/// Only packed 8-bit, 3-channel RGB is accepted.
pub fn image_from_raw(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Result<RgbImage> {
    if channels != 3 {
        return Err(HeatmapError::UnsupportedFormat(format!(
            "expected 3 channels, got {channels}"
        )));
    }
    let expected = width as usize * height as usize * 3;
    if data.len() != expected {
        return Err(HeatmapError::UnsupportedFormat(format!(
            "buffer holds {} bytes, a {width}x{height} RGB image needs {expected}",
            data.len()
        )));
    }
    RgbImage::from_raw(width, height, data).ok_or_else(|| {
        HeatmapError::UnsupportedFormat(format!("cannot wrap buffer as {width}x{height} RGB"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::detection::parse_document_str;
    use image::Rgb;

    fn blank(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([255, 255, 255]))
    }

    fn is_tinted(pixel: &Rgb<u8>) -> bool {
        pixel.0 != [255, 255, 255]
    }

    #[test]
    fn output_keeps_input_dimensions() {
        let image = blank(123, 77);
        let detections: DetectionSet = vec![Detection::new(10.0, 10.0), Detection::new(100.0, 70.0)].into();
        let output = render_overlay(&image, &detections).unwrap();
        assert_eq!(output.dimensions(), (123, 77));
    }

    #[test]
    fn no_detections_means_no_heat() {
        let image = RgbImage::from_fn(64, 48, |x, y| Rgb([x as u8, y as u8, (x + y) as u8]));
        let output = render_overlay(&image, &DetectionSet::new()).unwrap();
        assert_eq!(output, image);
    }

    #[test]
    fn centered_detection_draws_a_fading_blob() {
        let image = blank(400, 300);
        let detections: DetectionSet = vec![Detection::new(200.0, 150.0)].into();
        let output = render_overlay(&image, &detections).unwrap();

        // Hottest at the center: full-opacity red over white.
        assert_eq!(output.get_pixel(200, 150), &Rgb([255, 102, 102]));
        // The edge of the blob is cool: mostly blue/green, no red.
        let edge = output.get_pixel(238, 150);
        assert!(is_tinted(edge));
        assert!(edge.0[0] < edge.0[2] || edge.0[0] < edge.0[1], "edge pixel {edge:?}");
        // Outside the kernel the image is untouched.
        assert_eq!(output.get_pixel(261, 150), &Rgb([255, 255, 255]));
        assert_eq!(output.get_pixel(0, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn blob_fades_out_without_a_visible_edge() {
        let image = blank(400, 300);
        let detections: DetectionSet = vec![Detection::new(200.0, 150.0)].into();
        let output = render_overlay(&image, &detections).unwrap();

        let largest_step = |points: &[(u32, u32)]| {
            points
                .windows(2)
                .flat_map(|pair| {
                    let a = output.get_pixel(pair[0].0, pair[0].1).0;
                    let b = output.get_pixel(pair[1].0, pair[1].1).0;
                    (0..3).map(move |c| a[c].abs_diff(b[c]))
                })
                .max()
                .unwrap()
        };

        let through_center: Vec<_> = (252..=270).map(|x| (x, 150)).collect();
        let off_center: Vec<_> = (245..=265).map(|x| (x, 170)).collect();
        let diagonal: Vec<_> = (37..=48).map(|k| (200 + k, 150 + k)).collect();
        for (name, points) in [("row 150", through_center), ("row 170", off_center), ("diagonal", diagonal)] {
            let step = largest_step(&points);
            assert!(step <= 2, "{name}: step of {step} levels at the blob rim");
        }
    }

    #[test]
    fn nearby_pair_is_hotter_between_than_a_separated_pair() {
        let image = blank(400, 300);
        let config = RenderConfig::default();
        let close: DetectionSet = vec![Detection::new(190.0, 150.0), Detection::new(210.0, 150.0)].into();
        let apart: DetectionSet = vec![Detection::new(60.0, 150.0), Detection::new(340.0, 150.0)].into();

        let close_field = accumulate(&close, 400, 300, &config).unwrap();
        let apart_field = accumulate(&apart, 400, 300, &config).unwrap();
        assert!(close_field.get(200, 150).unwrap() > apart_field.max());

        let rendered = render_overlay(&image, &close).unwrap();
        // The midpoint carries the global peak, so it is rendered red.
        assert_eq!(rendered.get_pixel(200, 150), &Rgb([255, 102, 102]));
    }

    #[test]
    fn rendering_is_idempotent() {
        let image = RgbImage::from_fn(90, 60, |x, y| Rgb([(x * 2) as u8, (y * 3) as u8, 40]));
        let detections: DetectionSet = vec![
            Detection::new(20.0, 20.0).with_weight(0.4),
            Detection::new(45.5, 30.25),
            Detection::new(47.0, 33.0).with_weight(2.0),
        ]
        .into();
        let first = render_overlay(&image, &detections).unwrap();
        let second = render_overlay(&image, &detections).unwrap();
        assert_eq!(first.as_raw(), second.as_raw());
    }

    #[test]
    fn out_of_bounds_detections_follow_the_policy() {
        let image = blank(100, 100);
        let detections: DetectionSet = vec![Detection::new(150.0, 50.0)].into();

        let clipped = render_overlay(&image, &detections).unwrap();
        assert_eq!(clipped.get_pixel(99, 50), &Rgb([255, 102, 102]));

        let strict = OverlayPipeline::new(RenderConfig {
            out_of_bounds: OutOfBoundsPolicy::Reject,
            ..RenderConfig::default()
        })
        .unwrap();
        assert!(matches!(
            strict.render(&image, &detections),
            Err(HeatmapError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn declared_size_must_match_the_image() {
        let image = blank(708, 480);
        let matching = parse_document_str(
            r#"{ "image_width": 708, "image_height": 480, "detections": [ { "x": 10, "y": 10 } ] }"#,
        )
        .unwrap();
        let other = parse_document_str(
            r#"{ "image_width": 1920, "image_height": 1080, "detections": [] }"#,
        )
        .unwrap();

        let pipeline = OverlayPipeline::default();
        assert!(pipeline.render_document(&image, &matching).is_ok());
        assert!(matches!(
            pipeline.render_document(&image, &other),
            Err(HeatmapError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn malformed_document_produces_no_output() {
        let result = parse_document_str(r#"{ "detections": [ { "confidence": 1.0 } ] }"#)
            .and_then(|document| OverlayPipeline::default().render_document(&blank(10, 10), &document));
        assert!(matches!(result, Err(HeatmapError::Validation { .. })));
    }

    #[test]
    fn invalid_config_is_refused_up_front() {
        let config = RenderConfig { sigma: -1.0, ..RenderConfig::default() };
        assert!(matches!(OverlayPipeline::new(config), Err(HeatmapError::InvalidConfig(_))));
    }

    #[test]
    fn raw_buffers_must_be_packed_rgb() {
        assert!(image_from_raw(2, 2, 3, vec![0; 12]).is_ok());
        assert!(matches!(
            image_from_raw(2, 2, 4, vec![0; 16]),
            Err(HeatmapError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            image_from_raw(2, 2, 3, vec![0; 11]),
            Err(HeatmapError::UnsupportedFormat(_))
        ));
    }
}
