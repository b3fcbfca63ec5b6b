use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use clap::Args;
use serde::{Deserialize, Serialize};
use tokio::task;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::cache::{PreviewCache, DEFAULT_CACHE_ENTRIES};
use crate::core::color::{apply_mix, MixMatrix};
use crate::core::png::encode_data_uri;
use crate::core::resize::{downscale, PREVIEW_RESOLUTION};
use crate::core::tensor::ImageTensor;
use crate::node::{ChannelMixerNode, MixParams, NodeInputs, NODE_CLASS};
use crate::registry::NodeRegistry;

pub const UPDATE_ROUTE: &str = "/olm/api/channelmixer/update";
pub const NODE_ROUTE: &str = "/olm/api/channelmixer/node";
pub const WEB_ROUTE: &str = "/extensions/olm-channelmixer";

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    #[arg(long, default_value_t = 8188)]
    port: u16,
    /// Maximum cached preview sources across all nodes
    #[arg(long, default_value_t = DEFAULT_CACHE_ENTRIES)]
    cache_entries: usize,
    /// Longest preview edge in pixels
    #[arg(long, default_value_t = PREVIEW_RESOLUTION)]
    preview_size: usize,
    /// Directory with the editor widget scripts
    #[arg(long)]
    web_dir: Option<PathBuf>,
    /// Run the node once on this image at startup so previews work immediately
    #[arg(long)]
    preload: Option<PathBuf>,
    #[arg(long, default_value = "preload")]
    preload_node_id: String,
    #[arg(long)]
    rayon_threads: Option<usize>,
    #[arg(long, default_value_t = 4)]
    tokio_workers: usize,
    #[arg(long, default_value_t = 16)]
    tokio_blocking_threads: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<PreviewCache>,
    pub registry: Arc<NodeRegistry>,
    /// (width, height) bound for previews.
    pub preview_size: (usize, usize),
}

impl AppState {
    pub fn new(cache: Arc<PreviewCache>, preview_size: usize) -> Self {
        Self {
            cache,
            registry: Arc::new(NodeRegistry::builtin()),
            preview_size: (preview_size, preview_size),
        }
    }
}

#[derive(Deserialize)]
struct KeyQuery {
    key: Option<String>,
}

#[derive(Deserialize)]
struct PreviewRequest {
    matrix: Option<Vec<Vec<f32>>>,
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum PreviewResponse {
    Success {
        #[serde(rename = "updatedimage")]
        updated_image: String,
    },
    Error {
        message: String,
    },
}

impl IntoResponse for PreviewResponse {
    fn into_response(self) -> Response {
        let status = match self {
            PreviewResponse::Success { .. } => StatusCode::OK,
            PreviewResponse::Error { .. } => StatusCode::BAD_REQUEST,
        };
        (status, Json(self)).into_response()
    }
}

/// Register the HTTP routes. Static widget files are mounted when `web_dir`
/// is given.
pub fn router(state: AppState, web_dir: Option<&Path>) -> Router {
    let mut app = Router::new()
        .route("/healthz", get(healthz))
        .route(NODE_ROUTE, get(get_node_definition))
        .route(UPDATE_ROUTE, post(update_preview))
        .with_state(state);
    if let Some(dir) = web_dir {
        app = app.nest_service(WEB_ROUTE, ServeDir::new(dir));
    }
    app.layer(TraceLayer::new_for_http())
}

pub fn run(args: ServeArgs) -> Result<()> {
    if let Some(threads) = args.rayon_threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| anyhow!("rayon init failed: {}", e))?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.tokio_workers)
        .max_blocking_threads(args.tokio_blocking_threads)
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args))
}

async fn async_main(args: ServeArgs) -> Result<()> {
    if args.preview_size == 0 {
        return Err(anyhow!("--preview-size must be > 0"));
    }
    let cache = Arc::new(PreviewCache::new(args.cache_entries)?);
    let state = AppState::new(cache.clone(), args.preview_size);

    if let Some(path) = args.preload.as_deref() {
        let key = preload(&cache, path, &args.preload_node_id)?;
        info!("preloaded {} key={}", path.display(), key);
    }
    if let Some(dir) = args.web_dir.as_deref() {
        if !dir.is_dir() {
            return Err(anyhow!("web dir not found: {}", dir.display()));
        }
        info!("serving widget files from {} at {}", dir.display(), WEB_ROUTE);
    }

    let app = router(state, args.web_dir.as_deref());
    let addr = format!("{}:{}", args.host, args.port);
    info!(
        "listening on http://{} (cache_entries={}, preview_size={}, rayon_threads={}, tokio_workers={})",
        addr,
        args.cache_entries,
        args.preview_size,
        rayon::current_num_threads(),
        args.tokio_workers
    );
    info!("preview url: http://{}{}?key=<cache_key>", addr, UPDATE_ROUTE);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Execute the node with identity weights on an image file.
fn preload(cache: &Arc<PreviewCache>, path: &Path, node_id: &str) -> Result<String> {
    let img = image::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .to_rgb8();
    let node = ChannelMixerNode::new(cache.clone());
    let mut inputs = NodeInputs::new(ImageTensor::from_rgb_image(&img), MixParams::default());
    inputs.unique_id = Some(node_id.to_string());
    Ok(node.execute(inputs)?.ui.cache_key)
}

async fn healthz() -> impl IntoResponse {
    "ok"
}

async fn get_node_definition(State(state): State<AppState>) -> Response {
    match state.registry.get(NODE_CLASS) {
        Some(def) => Json(def.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn update_preview(
    State(state): State<AppState>,
    query: Result<Query<KeyQuery>, QueryRejection>,
    body: Bytes,
) -> PreviewResponse {
    let start = Instant::now();
    let key = query
        .map(|Query(q)| q.key)
        .map_err(|e| anyhow!("invalid query string: {}", e.body_text()));
    match render_update(&state, key, &body).await {
        Ok(updated_image) => {
            info!(
                "preview rendered bytes={} ms={}",
                updated_image.len(),
                start.elapsed().as_millis()
            );
            PreviewResponse::Success { updated_image }
        }
        Err(err) => {
            let message = format!("{:#}", err);
            warn!("preview failed: {}", message);
            PreviewResponse::Error { message }
        }
    }
}

/// `key` carries the query-string parse result so a bad query is reported
/// in the same JSON error body, after the request body checks.
async fn render_update(
    state: &AppState,
    key: Result<Option<String>>,
    body: &[u8],
) -> Result<String> {
    let request: PreviewRequest =
        serde_json::from_slice(body).context("invalid JSON request body")?;
    let rows = request
        .matrix
        .filter(|rows| !rows.is_empty())
        .ok_or_else(|| anyhow!("Missing matrix in request."))?;
    let matrix = MixMatrix::from_rows(&rows)?;
    debug!("preview request matrix={}", matrix);

    let key = key?
        .filter(|k| !k.is_empty())
        .ok_or_else(|| anyhow!("Missing key in request."))?;
    let source = state.cache.fetch(&key)?;

    let preview_size = state.preview_size;
    task::spawn_blocking(move || render_preview(&source, &matrix, preview_size))
        .await
        .map_err(|e| anyhow!("preview task failed: {}", e))?
}

/// Downscale, mix and encode a cached source as a PNG data URI.
pub fn render_preview(
    source: &ImageTensor,
    matrix: &MixMatrix,
    max_size: (usize, usize),
) -> Result<String> {
    let thumbnail = downscale(source, max_size);
    let mixed = apply_mix(&thumbnail, matrix);
    encode_data_uri(&mixed)
}
