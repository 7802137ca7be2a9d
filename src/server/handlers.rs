//! One handler per endpoint in §4.F. Every endpoint returns JSON on
//! success and a JSON `{error}` with an appropriate status on failure,
//! per §6's "Backend HTTP surface" contract.

use std::path::PathBuf;

use axum::extract::{Path as AxPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use walkdir::WalkDir;

use super::{AppState, FileEntry, OperationStatus};
use crate::pipeline::{self, PipelineOptions};
use crate::table::decode::derive_table_name;

#[derive(Serialize)]
pub struct ErrorBody {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn err(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ErrorBody { error: message.into() }))
}

// ── status ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusConfig {
    #[serde(rename = "poe2Path")]
    poe2_path: String,
}

#[derive(Serialize, Clone)]
pub struct GgpkStatus {
    #[serde(rename = "bundleCount")]
    pub bundle_count: usize,
    #[serde(rename = "fileCount")]
    pub file_count: usize,
}

#[derive(Serialize)]
pub struct ExtractedStatus {
    #[serde(rename = "fileCount")]
    file_count: usize,
}

#[derive(Serialize)]
pub struct SchemaStatus {
    exists: bool,
    #[serde(rename = "createdAt")]
    created_at: i64,
    #[serde(rename = "tableCount")]
    table_count: usize,
    version: u32,
}

#[derive(Serialize)]
pub struct StatusResponse {
    config: StatusConfig,
    ggpk: Option<GgpkStatus>,
    extracted: ExtractedStatus,
    #[serde(rename = "indexTimestamp")]
    index_timestamp: i64,
    schema: SchemaStatus,
}

#[instrument(skip(state))]
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let catalog_len = state.catalog.read().entries.iter().filter(|e| !e.is_dir).count();
    let ggpk = state.ggpk_status.read().clone();
    Json(StatusResponse {
        config: StatusConfig { poe2_path: state.config.poe2_path.to_string_lossy().into_owned() },
        ggpk,
        extracted: ExtractedStatus { file_count: catalog_len },
        index_timestamp: *state.index_timestamp.read(),
        schema: SchemaStatus {
            exists: true,
            created_at: state.schema.created_at,
            table_count: state.schema.tables.len(),
            version: state.schema.version,
        },
    })
}

// ── rebuild-index ────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct RebuildIndexResponse {
    #[serde(rename = "fileCount")]
    file_count: usize,
    version: u64,
}

#[instrument(skip(state))]
pub async fn rebuild_index(State(state): State<AppState>) -> Json<RebuildIndexResponse> {
    let root = state.config.output_dir.clone();
    let entries = tokio::task::spawn_blocking(move || build_catalog(&root)).await.unwrap_or_default();

    let mut catalog = state.catalog.write();
    catalog.version += 1;
    let file_count = entries.iter().filter(|e| !e.is_dir).count();
    catalog.entries = entries;
    let version = catalog.version;
    drop(catalog);

    *state.index_timestamp.write() = chrono::Utc::now().timestamp();

    match state.bundle_reader.list_files(&state.config.poe2_path).await {
        Ok((bundle_count, ggpk_file_count, _)) => {
            *state.ggpk_status.write() = Some(GgpkStatus { bundle_count, file_count: ggpk_file_count });
        }
        Err(e) => {
            warn!(error = %e, "failed to refresh ggpk bundle/file counts");
        }
    }

    Json(RebuildIndexResponse { file_count, version })
}

fn build_catalog(root: &std::path::Path) -> Vec<FileEntry> {
    let mut out = Vec::new();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if entry.path() == root {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else { continue };
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        out.push(FileEntry {
            path: rel.to_string_lossy().replace('\\', "/"),
            size,
            is_dir: entry.file_type().is_dir(),
        });
    }
    out
}

// ── browse ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct BrowseParams {
    #[serde(default)]
    folder: String,
    #[serde(default = "default_page")]
    page: usize,
    #[serde(rename = "perPage", default = "default_per_page")]
    per_page: usize,
    #[serde(rename = "type", default)]
    type_filter: Option<String>,
}

fn default_page() -> usize {
    1
}
fn default_per_page() -> usize {
    100
}

#[derive(Serialize)]
pub struct BrowseResponse {
    folder: String,
    files: Vec<String>,
    subfolders: Vec<String>,
    total: usize,
    page: usize,
    #[serde(rename = "perPage")]
    per_page: usize,
    #[serde(rename = "hasMore")]
    has_more: bool,
}

#[instrument(skip(state))]
pub async fn browse(State(state): State<AppState>, Query(params): Query<BrowseParams>) -> Json<BrowseResponse> {
    let catalog = state.catalog.read();
    let prefix = params.folder.trim_matches('/');

    let mut direct_files = Vec::new();
    let mut subfolders = std::collections::BTreeSet::new();

    for entry in &catalog.entries {
        let rel = if prefix.is_empty() {
            Some(entry.path.as_str())
        } else {
            match entry.path.strip_prefix(prefix) {
                Some(r) if r.starts_with('/') => Some(&r[1..]),
                _ => None,
            }
        };
        let Some(rel) = rel else { continue };
        if rel.is_empty() {
            continue;
        }
        match rel.split_once('/') {
            None => {
                if !entry.is_dir {
                    if matches_type(&entry.path, params.type_filter.as_deref()) {
                        direct_files.push(entry.path.clone());
                    }
                }
            }
            Some((first, _)) => {
                subfolders.insert(first.to_string());
            }
        }
    }

    direct_files.sort();
    let total = direct_files.len();
    let start = (params.page.max(1) - 1) * params.per_page;
    let page_files: Vec<String> = direct_files.into_iter().skip(start).take(params.per_page).collect();
    let has_more = start + page_files.len() < total;

    Json(BrowseResponse {
        folder: params.folder,
        files: page_files,
        subfolders: subfolders.into_iter().collect(),
        total,
        page: params.page,
        per_page: params.per_page,
        has_more,
    })
}

fn matches_type(path: &str, type_filter: Option<&str>) -> bool {
    match type_filter {
        None => true,
        Some(t) => path.to_lowercase().ends_with(&format!(".{}", t.to_lowercase())),
    }
}

// ── search ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SearchParams {
    q: String,
    #[serde(rename = "type", default)]
    type_filter: Option<String>,
    #[serde(default = "default_search_limit")]
    limit: usize,
}

fn default_search_limit() -> usize {
    100
}

#[derive(Serialize)]
pub struct SearchResponse {
    results: Vec<String>,
    total: usize,
}

#[instrument(skip(state))]
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    if params.q.len() < 2 {
        return Err(err(StatusCode::BAD_REQUEST, "query must be at least 2 characters"));
    }
    let needle = params.q.to_lowercase();
    let catalog = state.catalog.read();
    let matches: Vec<String> = catalog
        .entries
        .iter()
        .filter(|e| !e.is_dir)
        .filter(|e| e.path.to_lowercase().contains(&needle))
        .filter(|e| matches_type(&e.path, params.type_filter.as_deref()))
        .take(params.limit)
        .map(|e| e.path.clone())
        .collect();
    let total = matches.len();
    Ok(Json(SearchResponse { results: matches, total }))
}

// ── folders ──────────────────────────────────────────────────────────────

#[derive(Serialize, Default)]
pub struct FolderNode {
    name: String,
    #[serde(rename = "fileCount")]
    file_count: usize,
    children: Vec<FolderNode>,
}

#[instrument(skip(state))]
pub async fn folders(State(state): State<AppState>) -> Json<FolderNode> {
    let catalog = state.catalog.read();
    let mut root = FolderNode { name: String::new(), file_count: 0, children: Vec::new() };

    for entry in &catalog.entries {
        if entry.is_dir {
            continue;
        }
        let parts: Vec<&str> = entry.path.split('/').collect();
        insert_into_tree(&mut root, &parts[..parts.len().saturating_sub(1)]);
    }
    Json(root)
}

fn insert_into_tree(node: &mut FolderNode, path: &[&str]) {
    node.file_count += 1;
    let Some((first, rest)) = path.split_first() else { return };
    let child = match node.children.iter_mut().find(|c| c.name == *first) {
        Some(c) => c,
        None => {
            node.children.push(FolderNode { name: first.to_string(), file_count: 0, children: Vec::new() });
            node.children.last_mut().unwrap()
        }
    };
    insert_into_tree(child, rest);
}

// ── file ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct FileParams {
    path: String,
}

#[instrument(skip(state))]
pub async fn file(State(state): State<AppState>, Query(params): Query<FileParams>) -> Result<Response, ApiError> {
    let full_path = state.config.output_dir.join(&params.path);
    if !full_path.exists() {
        return Err(err(StatusCode::NOT_FOUND, "file not found"));
    }

    let ext = full_path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
    match ext.as_str() {
        "json" => {
            let bytes = tokio::fs::read(&full_path).await.map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
            Ok(([("content-type", "application/json")], bytes).into_response())
        }
        "png" | "jpg" | "jpeg" | "webp" => {
            let bytes = tokio::fs::read(&full_path).await.map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
            Ok(([("content-type", format!("image/{ext}"))], bytes).into_response())
        }
        "ogg" | "wav" => {
            let bytes = tokio::fs::read(&full_path).await.map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
            Ok(([("content-type", format!("audio/{ext}"))], bytes).into_response())
        }
        "dds" => {
            let cache_key = params.path.clone();
            if let Some(cached) = state.preview_cache.write().get(&cache_key).cloned() {
                return Ok(([("content-type", "image/png")], cached).into_response());
            }
            let out_path = full_path.with_extension("png");
            state
                .dds_converter
                .convert(&full_path, &out_path, "png", crate::convert::PREVIEW_TIMEOUT)
                .await
                .map_err(|e| {
                    warn!(error = %e, "dds preview conversion failed");
                    err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                })?;
            let bytes = tokio::fs::read(&out_path).await.map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
            state.preview_cache.write().put(cache_key, bytes.clone());
            Ok(([("content-type", "image/png")], bytes).into_response())
        }
        _ if ext.starts_with("dat") => {
            let bytes = tokio::fs::read(&full_path).await.map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
            let table_name = derive_table_name(&params.path);
            let tables = state.schema.tables_for_product(crate::schema::DEFAULT_PRODUCT_BIT);
            match tables.get(&table_name) {
                Some(table_def) => match crate::table::decode::decode(&bytes, table_def) {
                    Ok(outcome) => Ok(Json(serde_json::json!({
                        "table": outcome.table_name,
                        "rowCount": outcome.row_count,
                        "rows": outcome.rows,
                        "warning": outcome.warning,
                    }))
                    .into_response()),
                    Err(e) => Ok(Json(serde_json::json!({ "hexPreview": hex::encode(&bytes[..bytes.len().min(256)]), "error": e.to_string() })).into_response()),
                },
                None => Ok(Json(serde_json::json!({ "hexPreview": hex::encode(&bytes[..bytes.len().min(256)]) })).into_response()),
            }
        }
        _ => {
            let bytes = tokio::fs::read(&full_path).await.map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
            Ok(([("content-type", "application/octet-stream")], bytes).into_response())
        }
    }
}

// ── extract ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ExtractRequest {
    pattern: Option<String>,
    preset: Option<String>,
}

#[derive(Serialize)]
pub struct ExtractResponse {
    #[serde(rename = "operationId")]
    operation_id: String,
}

#[instrument(skip(state, body))]
pub async fn extract(
    State(state): State<AppState>,
    Json(body): Json<ExtractRequest>,
) -> Result<Json<ExtractResponse>, ApiError> {
    let pattern = body
        .preset
        .as_deref()
        .and_then(pipeline::preset_pattern)
        .map(str::to_string)
        .or(body.pattern)
        .ok_or_else(|| err(StatusCode::BAD_REQUEST, "either pattern or preset is required"))?;

    let operation_id = uuid_like_id();
    state.operations.write().insert(
        operation_id.clone(),
        OperationStatus { op_type: "extract".into(), status: "running".into(), progress: 0.0, error: None },
    );

    let state_clone = state.clone();
    let op_id = operation_id.clone();
    let archive_path = state.config.poe2_path.clone();
    let output_dir = state.config.output_dir.clone();
    let schema = state.schema.clone();

    tokio::spawn(async move {
        let options = PipelineOptions::default();
        let result = pipeline::run(
            &state_clone.bundle_reader,
            &archive_path,
            &output_dir,
            &pattern,
            Some(&state_clone.dds_converter),
            Some(schema),
            crate::schema::DEFAULT_PRODUCT_BIT,
            options,
        )
        .await;

        let mut ops = state_clone.operations.write();
        if let Some(op) = ops.get_mut(&op_id) {
            match result {
                Ok(_) => {
                    op.status = "completed".into();
                    op.progress = 1.0;
                }
                Err(e) => {
                    op.status = "error".into();
                    op.error = Some(e.to_string());
                }
            }
        }
    });

    Ok(Json(ExtractResponse { operation_id }))
}

fn uuid_like_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
    format!("op-{nanos:x}")
}

// ── operation/:id ────────────────────────────────────────────────────────

#[instrument(skip(state))]
pub async fn operation_status(
    State(state): State<AppState>,
    AxPath(id): AxPath<String>,
) -> Result<Json<OperationStatus>, ApiError> {
    state
        .operations
        .read()
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| err(StatusCode::NOT_FOUND, "unknown operation id"))
}

// ── cleanup ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct CleanupResponse {
    removed: usize,
}

#[instrument(skip(state))]
pub async fn cleanup(State(state): State<AppState>) -> Json<CleanupResponse> {
    let root = state.config.output_dir.clone();
    let removed = tokio::task::spawn_blocking(move || pipeline::cleanup_sweep(&root)).await.unwrap_or(0);
    Json(CleanupResponse { removed })
}

// ── export-json ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ExportJsonRequest {
    path: String,
}

#[derive(Serialize)]
pub struct ExportJsonResponse {
    #[serde(rename = "jsonPath")]
    json_path: String,
}

#[instrument(skip(state, body))]
pub async fn export_json(
    State(state): State<AppState>,
    Json(body): Json<ExportJsonRequest>,
) -> Result<Json<ExportJsonResponse>, ApiError> {
    let full_path: PathBuf = state.config.output_dir.join(&body.path);
    let table_name = derive_table_name(&body.path);
    let tables = state.schema.tables_for_product(crate::schema::DEFAULT_PRODUCT_BIT);
    let table_def = tables
        .get(&table_name)
        .ok_or_else(|| err(StatusCode::NOT_FOUND, "no schema for this table"))?;

    let bytes = tokio::fs::read(&full_path).await.map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let outcome = crate::table::decode::decode(&bytes, table_def)
        .map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let json_path = full_path.with_extension("json");
    let file = std::fs::File::create(&json_path).map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    serde_json::to_writer(file, &outcome.rows).map_err(|e| err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let root = state.config.output_dir.clone();
    let entries = tokio::task::spawn_blocking(move || build_catalog(&root)).await.unwrap_or_default();
    let mut catalog = state.catalog.write();
    catalog.entries = entries;
    catalog.version += 1;
    drop(catalog);

    Ok(Json(ExportJsonResponse { json_path: json_path.to_string_lossy().into_owned() }))
}
