//! Backend query surface (§4.F): the HTTP endpoints the GUI's browser
//! frontend consumes. The GUI's own HTML/CSS/JS rendering is out of
//! scope (§1) — only the JSON/binary contracts are implemented here.
//!
//! Runs on a single-threaded Tokio runtime (see `run` in `main.rs`'s
//! `serve` subcommand) to mirror §5's cooperative concurrency model: one
//! request is handled to completion with awaits only at I/O suspension
//! points, and shared mutable state is touched only from within handler
//! bodies, never behind a request-scoped mutex. The `parking_lot::RwLock`
//! guards below exist for interior mutability across awaits, not for
//! cross-thread contention — there is effectively none on one thread.

pub mod handlers;

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use lru::LruCache;
use parking_lot::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::bundle::BundleReader;
use crate::config::Config;
use crate::convert::DdsConverter;
use crate::schema::Schema;

const PREVIEW_CACHE_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
}

#[derive(Debug, Default)]
pub struct FileCatalog {
    pub entries: Vec<FileEntry>,
    pub version: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct OperationStatus {
    #[serde(rename = "type")]
    pub op_type: String,
    pub status: String,
    pub progress: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub schema: Arc<Schema>,
    pub catalog: Arc<RwLock<FileCatalog>>,
    pub preview_cache: Arc<RwLock<LruCache<String, Vec<u8>>>>,
    pub operations: Arc<RwLock<HashMap<String, OperationStatus>>>,
    pub bundle_reader: Arc<BundleReader>,
    pub dds_converter: Arc<DdsConverter>,
    pub index_timestamp: Arc<RwLock<i64>>,
    pub ggpk_status: Arc<RwLock<Option<handlers::GgpkStatus>>>,
}

impl AppState {
    pub fn new(config: Config, schema: Schema, bundle_utility: PathBuf, dds_tool: PathBuf) -> Self {
        Self {
            config: Arc::new(config),
            schema: Arc::new(schema),
            catalog: Arc::new(RwLock::new(FileCatalog::default())),
            preview_cache: Arc::new(RwLock::new(LruCache::new(
                NonZeroUsize::new(PREVIEW_CACHE_CAPACITY).unwrap(),
            ))),
            operations: Arc::new(RwLock::new(HashMap::new())),
            bundle_reader: Arc::new(BundleReader::new(bundle_utility)),
            dds_converter: Arc::new(DdsConverter::new(dds_tool)),
            index_timestamp: Arc::new(RwLock::new(0)),
            ggpk_status: Arc::new(RwLock::new(None)),
        }
    }
}

pub fn gen_router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(handlers::status))
        .route("/rebuild-index", post(handlers::rebuild_index))
        .route("/browse", get(handlers::browse))
        .route("/search", get(handlers::search))
        .route("/folders", get(handlers::folders))
        .route("/file", get(handlers::file))
        .route("/extract", post(handlers::extract))
        .route("/operation/:id", get(handlers::operation_status))
        .route("/cleanup", post(handlers::cleanup))
        .route("/export-json", post(handlers::export_json))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
