// THEORY:
// `crowd_heat_server` is the request-handling layer around the heatmap engine.
// It owns everything outside the engine: multipart parsing, file
// type and size checks, image decoding, optional resizing and PNG encoding.
// Rendering itself is handed to a shared `ParallelRenderer`. Decoding, parsing
// and encoding run on tokio's blocking pool as well.
//
// Routes:
//   POST /generate-overlay   multipart `image` + `json_data` -> image/png
//   GET  /healthz            liveness probe

mod error;

pub use error::ApiError;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use clap::Parser;
use crowd_heat::{
    ImageSize, OutOfBoundsPolicy, OverlayPipeline, ParallelRenderer, RenderConfig, parse_document,
};
use image::imageops::FilterType;
use image::{ImageFormat, RgbImage};
use log::{debug, info, warn};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;

/// 15 MB, the JSON limit of the original service.
pub const MAX_JSON_SIZE: usize = 15_000_000;
/// 5 MB.
pub const MAX_IMAGE_SIZE: usize = 5_000_000;
/// Room for multipart boundaries and headers on top of the two payloads.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Debug, Clone, Parser)]
#[command(name = "crowd_heat_server", about = "Serves crowd density heatmap overlays over HTTP")]
pub struct ServerConfig {
    /// Address to listen on.
    #[arg(long, env = "CROWD_HEAT_BIND", default_value = "127.0.0.1:8000")]
    pub bind_addr: String,

    /// Largest accepted image upload, in bytes.
    #[arg(long, env = "CROWD_HEAT_MAX_IMAGE_BYTES", default_value_t = MAX_IMAGE_SIZE)]
    pub max_image_bytes: usize,

    /// Largest accepted detection document, in bytes.
    #[arg(long, env = "CROWD_HEAT_MAX_JSON_BYTES", default_value_t = MAX_JSON_SIZE)]
    pub max_json_bytes: usize,

    /// Resize every decoded image to WIDTHxHEIGHT before rendering (e.g. 708x480).
    #[arg(long, env = "CROWD_HEAT_RESIZE")]
    pub resize: Option<ImageSize>,

    /// Fail requests with out-of-bounds detections instead of clipping them.
    #[arg(long, env = "CROWD_HEAT_REJECT_OUT_OF_BOUNDS")]
    pub reject_out_of_bounds: bool,

    /// Render workers per request. Defaults to the number of CPUs.
    #[arg(long, env = "CROWD_HEAT_WORKERS")]
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            max_image_bytes: MAX_IMAGE_SIZE,
            max_json_bytes: MAX_JSON_SIZE,
            resize: None,
            reject_out_of_bounds: false,
            workers: None,
        }
    }
}

/// Shared, read-only state handed to every request.
#[derive(Debug, Clone)]
pub struct AppState {
    renderer: ParallelRenderer,
    max_image_bytes: usize,
    max_json_bytes: usize,
    resize: Option<ImageSize>,
}

impl AppState {
    pub fn new(cfg: &ServerConfig) -> anyhow::Result<Self> {
        let render_config = RenderConfig {
            out_of_bounds: if cfg.reject_out_of_bounds {
                OutOfBoundsPolicy::Reject
            } else {
                OutOfBoundsPolicy::Clip
            },
            ..RenderConfig::default()
        };
        let pipeline = OverlayPipeline::new(render_config)?;
        let renderer = match cfg.workers {
            Some(workers) => ParallelRenderer::with_workers(pipeline, workers),
            None => ParallelRenderer::new(pipeline),
        };
        Ok(Self {
            renderer,
            max_image_bytes: cfg.max_image_bytes,
            max_json_bytes: cfg.max_json_bytes,
            resize: cfg.resize,
        })
    }
}

/// One file field of the multipart upload.
#[derive(Debug, Clone, Default)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// The two fields `POST /generate-overlay` expects.
#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub image: Option<UploadedFile>,
    pub json_data: Option<UploadedFile>,
}

impl Upload {
    async fn from_multipart(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut upload = Upload::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let data = field.bytes().await?;
            let file = UploadedFile {
                file_name,
                content_type,
                data,
            };
            match name.as_str() {
                "image" => upload.image = Some(file),
                "json_data" => upload.json_data = Some(file),
                other => debug!("Ignoring unexpected multipart field {other:?}"),
            }
        }
        Ok(upload)
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.max_image_bytes + state.max_json_bytes + MULTIPART_OVERHEAD;
    Router::new()
        .route("/generate-overlay", post(generate_overlay))
        .route("/healthz", get(|| async { "ok" }))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn generate_overlay(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let upload = Upload::from_multipart(multipart).await?;
    let png = render_upload(&state, upload).await?;

    let mut response = png.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("attachment; filename=overlay.png"),
    );
    Ok(response)
}

/// Validates an upload, renders the overlay and returns it PNG-encoded.
pub async fn render_upload(state: &AppState, upload: Upload) -> Result<Vec<u8>, ApiError> {
    let started = Instant::now();

    let image_file = upload
        .image
        .ok_or_else(|| ApiError::BadRequest("Missing image file".to_string()))?;
    let json_file = upload
        .json_data
        .ok_or_else(|| ApiError::BadRequest("Missing JSON detection data".to_string()))?;

    let is_image = image_file
        .content_type
        .as_deref()
        .is_some_and(|content_type| content_type.starts_with("image/"));
    if !is_image {
        return Err(ApiError::BadRequest("Invalid image file type".to_string()));
    }
    let is_json = json_file
        .file_name
        .as_deref()
        .is_some_and(|file_name| file_name.ends_with(".json"));
    if !is_json {
        return Err(ApiError::BadRequest("JSON file required".to_string()));
    }

    if json_file.data.len() > state.max_json_bytes {
        return Err(ApiError::PayloadTooLarge(format!(
            "JSON file too large (max {} bytes allowed)",
            state.max_json_bytes
        )));
    }
    if image_file.data.len() > state.max_image_bytes {
        return Err(ApiError::PayloadTooLarge(format!(
            "Image file too large (max {} bytes allowed)",
            state.max_image_bytes
        )));
    }

    // Decoding and parsing are CPU-bound; keep them off the async workers.
    let resize = state.resize;
    let (image, document) = tokio::task::spawn_blocking(move || {
        let image = decode_image(&image_file.data, resize)?;
        let document = parse_document(&json_file.data)?;
        Ok::<_, ApiError>((image, document))
    })
    .await??;
    if document.detections.is_empty() {
        warn!("No person detections in upload; returning the image unchanged");
    }

    let detection_count = document.detections.len();
    let (width, height) = image.dimensions();
    let overlay = state
        .renderer
        .render_document(Arc::new(image), &document)
        .await?;
    let png = tokio::task::spawn_blocking(move || encode_png(&overlay)).await??;

    info!(
        "Rendered {}x{} overlay for {} detections in {:?} ({} bytes)",
        width,
        height,
        detection_count,
        started.elapsed(),
        png.len()
    );
    Ok(png)
}

/// Decodes any supported image format into packed RGB, resizing if requested.
pub fn decode_image(data: &[u8], resize: Option<ImageSize>) -> Result<RgbImage, ApiError> {
    let decoded = image::load_from_memory(data)
        .map_err(|err| {
            debug!("Image decode failed: {err}");
            ApiError::BadRequest("Invalid image file".to_string())
        })?
        .to_rgb8();

    Ok(match resize {
        Some(size) if decoded.dimensions() != (size.width, size.height) => {
            image::imageops::resize(&decoded, size.width, size.height, FilterType::Triangle)
        }
        _ => decoded,
    })
}

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, ApiError> {
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(png)
}

/// Binds the listener and serves the API on a background task.
pub async fn start_server(cfg: ServerConfig) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    use anyhow::Context;

    let state = AppState::new(&cfg)?;
    let workers = state.renderer.workers();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.bind_addr))?;
    info!(
        "crowd_heat server listening on http://{} (workers={}, resize={}, out_of_bounds={})",
        cfg.bind_addr,
        workers,
        cfg.resize.map(|size| size.to_string()).unwrap_or_else(|| "off".into()),
        if cfg.reject_out_of_bounds { "reject" } else { "clip" }
    );

    let server = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            log::error!("Server stopped: {err}");
        }
    });
    Ok(server)
}
