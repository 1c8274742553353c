use anyhow::{Context, Result};
use clap::Parser;
use crowd_heat::{
    DetectionDocument, ImageSize, OutOfBoundsPolicy, OverlayPipeline, RenderConfig, parse_document,
};
use image::imageops::FilterType;
use image::RgbImage;
use log::info;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Renders a crowd density overlay for one image and writes it as PNG.
#[derive(Debug, Parser)]
#[command(name = "overlay_tester")]
struct Args {
    /// Source image (any format the `image` crate decodes).
    image: PathBuf,
    /// Detection document (JSON).
    detections: PathBuf,
    /// Where to write the overlay PNG.
    output: PathBuf,

    /// Gaussian sigma in pixels.
    #[arg(long, default_value_t = crowd_heat::config::DEFAULT_SIGMA)]
    sigma: f32,

    /// Resize the image to WIDTHxHEIGHT before rendering.
    #[arg(long)]
    resize: Option<ImageSize>,

    /// Fail on detections outside the image instead of clipping them.
    #[arg(long)]
    reject_out_of_bounds: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    // --- 1. Pipeline Initialization ---
    let config = RenderConfig {
        sigma: args.sigma,
        out_of_bounds: if args.reject_out_of_bounds {
            OutOfBoundsPolicy::Reject
        } else {
            OutOfBoundsPolicy::Clip
        },
        ..RenderConfig::default()
    };
    let pipeline = OverlayPipeline::new(config).context("invalid render settings")?;

    // --- 2. Input Loading ---
    let image = load_image(&args.image, args.resize)?;
    let document = load_detections(&args.detections)?;

    // --- 3. Rendering ---
    let started = Instant::now();
    let overlay = pipeline
        .render_document(&image, &document)
        .context("rendering failed")?;
    info!(
        "Rendered {} detections onto {}x{} image in {:?}",
        document.detections.len(),
        overlay.width(),
        overlay.height(),
        started.elapsed()
    );

    // --- 4. Output ---
    save_png(&overlay, &args.output)?;
    info!("Processing complete. Output saved to {}", args.output.display());
    Ok(())
}

fn load_image(path: &Path, resize: Option<ImageSize>) -> Result<RgbImage> {
    let image = image::open(path)
        .with_context(|| format!("cannot open image {}", path.display()))?
        .to_rgb8();
    Ok(match resize {
        Some(size) => image::imageops::resize(&image, size.width, size.height, FilterType::Triangle),
        None => image,
    })
}

fn load_detections(path: &Path) -> Result<DetectionDocument> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("cannot read detections {}", path.display()))?;
    parse_document(&bytes).with_context(|| format!("invalid detections in {}", path.display()))
}

fn save_png(image: &RgbImage, path: &Path) -> Result<()> {
    image
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("cannot write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn renders_files_end_to_end() {
        let dir = tempfile::tempdir().expect("temp dir");
        let image_path = dir.path().join("scene.png");
        let json_path = dir.path().join("detections.json");
        let output_path = dir.path().join("overlay.png");

        RgbImage::from_pixel(400, 300, Rgb([255, 255, 255]))
            .save(&image_path)
            .unwrap();
        std::fs::write(&json_path, r#"{ "detections": [ { "x": 200, "y": 150 } ] }"#).unwrap();

        let image = load_image(&image_path, None).unwrap();
        let document = load_detections(&json_path).unwrap();
        let overlay = OverlayPipeline::default().render_document(&image, &document).unwrap();
        save_png(&overlay, &output_path).unwrap();

        let written = image::open(&output_path).unwrap().to_rgb8();
        assert_eq!(written.dimensions(), (400, 300));
        assert_eq!(written.get_pixel(200, 150), &Rgb([255, 102, 102]));
        assert_eq!(written.get_pixel(10, 10), &Rgb([255, 255, 255]));
    }

    #[test]
    fn resizes_on_load() {
        let dir = tempfile::tempdir().expect("temp dir");
        let image_path = dir.path().join("small.png");
        RgbImage::from_pixel(32, 16, Rgb([10, 20, 30])).save(&image_path).unwrap();

        let size = ImageSize { width: 64, height: 48 };
        let image = load_image(&image_path, Some(size)).unwrap();
        assert_eq!(image.dimensions(), (64, 48));
    }

    #[test]
    fn reports_bad_detection_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let json_path = dir.path().join("broken.json");
        std::fs::write(&json_path, r#"{ "detections": [ { "label": "person" } ] }"#).unwrap();

        let err = load_detections(&json_path).unwrap_err();
        assert!(err.to_string().contains("invalid detections"));
        assert!(err.downcast_ref::<crowd_heat::HeatmapError>().is_some());
        assert!(load_detections(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn parses_command_line() {
        let args = Args::try_parse_from([
            "overlay_tester",
            "in.jpg",
            "people.json",
            "out.png",
            "--sigma",
            "20",
            "--resize",
            "708x480",
            "--reject-out-of-bounds",
        ])
        .unwrap();
        assert_eq!(args.sigma, 20.0);
        assert_eq!(args.resize, Some(ImageSize { width: 708, height: 480 }));
        assert!(args.reject_out_of_bounds);
    }
}
