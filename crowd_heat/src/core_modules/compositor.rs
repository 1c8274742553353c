// THEORY:
// The compositor lays the colorized density over the source image. Each pixel is
// blended as `original * (1 - a) + heat * a`, with `a` taken from the fixed opacity
// curve in `RenderConfig`: zero where there is no density, capped below full
// opacity at the hottest points so the scene always shows through.
//
// Pixels with zero density are copied verbatim. An image with no detections
// therefore comes back byte-for-byte unchanged.

use crate::config::RenderConfig;
use crate::core_modules::density::NormalizedField;
use crate::core_modules::gradient::ColorGradient;
use crate::error::{HeatmapError, Result};
use image::RgbImage;

const CHANNELS: usize = 3;

/// Blends the heat layer onto a copy of `image`.
pub fn composite(
    image: &RgbImage,
    field: &NormalizedField,
    gradient: &ColorGradient,
    config: &RenderConfig,
) -> Result<RgbImage> {
    let (width, height) = image.dimensions();
    if (field.width(), field.height()) != (width, height) {
        return Err(HeatmapError::dimension_mismatch(format!(
            "density field is {}x{} but the image is {}x{}",
            field.width(),
            field.height(),
            width,
            height
        )));
    }

    let mut output = vec![0u8; image.as_raw().len()];
    blend_rows(image.as_raw(), field.values(), gradient, config, &mut output);

    RgbImage::from_raw(width, height, output).ok_or_else(|| {
        HeatmapError::UnsupportedFormat("output buffer does not match image size".to_string())
    })
}

/// Blends a run of RGB pixels against their densities into `output`.
///
/// `source` and `output` hold `densities.len()` packed RGB pixels each. Works on
/// any contiguous span of rows, which is how the parallel pipeline calls it.
pub fn blend_rows(
    source: &[u8],
    densities: &[f32],
    gradient: &ColorGradient,
    config: &RenderConfig,
    output: &mut [u8],
) {
    debug_assert_eq!(source.len(), densities.len() * CHANNELS);
    debug_assert_eq!(output.len(), source.len());

    let pixels = source
        .chunks_exact(CHANNELS)
        .zip(output.chunks_exact_mut(CHANNELS))
        .zip(densities);

    for ((original, blended), &density) in pixels {
        let alpha = config.opacity(density);
        if alpha <= 0.0 {
            blended.copy_from_slice(original);
            continue;
        }

        let heat = gradient.color_at(density);
        for channel in 0..CHANNELS {
            let value = original[channel] as f32 * (1.0 - alpha) + heat.0[channel] as f32 * alpha;
            blended[channel] = value.round().clamp(0.0, 255.0) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::density::{DensityField, accumulate};
    use crate::core_modules::detection::{Detection, DetectionSet};
    use crate::core_modules::gradient::HEAT_GRADIENT;
    use image::Rgb;

    fn gray(width: u32, height: u32, level: u8) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([level, level, level]))
    }

    #[test]
    fn cold_field_leaves_the_image_untouched() {
        let image = RgbImage::from_fn(8, 4, |x, y| Rgb([x as u8 * 30, y as u8 * 60, 7]));
        let field = DensityField::new(8, 4).normalize();
        let output = composite(&image, &field, &HEAT_GRADIENT, &RenderConfig::default()).unwrap();
        assert_eq!(output, image);
    }

    #[test]
    fn blends_toward_the_gradient_color() {
        let config = RenderConfig::default();
        let source = [100u8, 100, 100, 100, 100, 100];
        let mut output = [0u8; 6];
        blend_rows(&source, &[1.0, 0.05], &HEAT_GRADIENT, &config, &mut output);

        // Peak: 60% red over gray.
        assert_eq!(&output[..3], &[193, 40, 40]);
        // Half way up the ramp: 30% of a blue-green.
        let heat = HEAT_GRADIENT.color_at(0.05);
        for channel in 0..3 {
            let expected = (100.0 * 0.7 + heat.0[channel] as f32 * 0.3).round() as u8;
            assert_eq!(output[3 + channel], expected);
        }
    }

    #[test]
    fn peak_never_fully_hides_the_image() {
        let config = RenderConfig::default();
        let mut output = [0u8; 3];
        blend_rows(&[0, 255, 255], &[1.0], &HEAT_GRADIENT, &config, &mut output);
        // Red at 60% over cyan: green and blue keep 40% of the original.
        assert_eq!(output, [153, 102, 102]);
    }

    #[test]
    fn source_image_is_not_modified() {
        let image = gray(4, 4, 50);
        let before = image.clone();
        let detections: DetectionSet = vec![Detection::new(1.0, 1.0)].into();
        let config = RenderConfig::default();
        let field = accumulate(&detections, 4, 4, &config).unwrap().normalize();
        let output = composite(&image, &field, &HEAT_GRADIENT, &config).unwrap();
        assert_eq!(image, before);
        assert_ne!(output, image);
    }

    #[test]
    fn mismatched_field_is_rejected() {
        let image = gray(10, 10, 0);
        let field = DensityField::new(10, 9).normalize();
        let result = composite(&image, &field, &HEAT_GRADIENT, &RenderConfig::default());
        assert!(matches!(result, Err(HeatmapError::DimensionMismatch { .. })));
    }
}
