//! Extraction pipeline (§4.E): pattern-matched bundle extraction,
//! optional DDS conversion, optional table decode, JSON emission, and
//! cleanup — all orchestrated, none of it reimplementing a codec itself.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::warn;
use walkdir::WalkDir;

use crate::bundle::{BundleError, BundleReader};
use crate::convert::{ConvertError, DdsConverter, SINGLE_FILE_TIMEOUT};
use crate::schema::Schema;
use crate::table::decode::derive_table_name;

/// Fixed preset-name to pattern map, per §4.E.
pub const PRESETS: &[(&str, &str)] = &[
    ("all", ".*"),
    ("data", r".*\.datc?64$"),
    ("textures", r".*\.dds$"),
    ("audio", r".*\.(ogg|wav)$"),
    ("ui", r"^art/2dart/.*"),
    ("items", r"^art/2ditems/.*"),
    ("skills", r"^art/2dart/skillicons/.*"),
    ("passives", r"^art/2dart/skillicons/passives/.*"),
];

pub fn preset_pattern(name: &str) -> Option<&'static str> {
    PRESETS.iter().find(|(n, _)| *n == name).map(|(_, p)| *p)
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ConvertedCounts {
    pub converted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ParsedCounts {
    pub parsed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PipelineMetrics {
    pub extracted: usize,
    pub images: ConvertedCounts,
    pub data: ParsedCounts,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub exclude_languages: bool,
    pub auto_convert_images: bool,
    pub image_format: String,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self { exclude_languages: true, auto_convert_images: false, image_format: "png".into() }
    }
}

/// Runs pattern-matched extraction followed by whatever per-file
/// post-processing the pattern's matches require. Any single stage
/// failing is counted, not fatal to the run.
pub async fn run(
    bundle_reader: &BundleReader,
    archive_path: &Path,
    output_dir: &Path,
    pattern: &str,
    dds_converter: Option<&DdsConverter>,
    schema: Option<Arc<Schema>>,
    product_bit: u32,
    options: PipelineOptions,
) -> Result<PipelineMetrics, BundleError> {
    let start = Instant::now();

    let summary = bundle_reader
        .extract_by_pattern(archive_path, output_dir, pattern, options.exclude_languages, |_| {})
        .await?;

    let mut metrics = PipelineMetrics { extracted: summary.extracted, ..Default::default() };

    let dds_files: Vec<PathBuf> = WalkDir::new(output_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("dds")).unwrap_or(false))
        .collect();

    let table_files: Vec<PathBuf> = WalkDir::new(output_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.to_lowercase().contains(".datc") && n.to_lowercase().ends_with("64"))
                .unwrap_or(false)
        })
        .collect();

    if options.auto_convert_images {
        if let Some(converter) = dds_converter {
            for dds in &dds_files {
                let out = dds.with_extension(&options.image_format);
                match converter.convert(dds, &out, &options.image_format, SINGLE_FILE_TIMEOUT).await {
                    Ok(()) => {
                        metrics.images.converted += 1;
                        let _ = std::fs::remove_file(dds);
                    }
                    Err(e) => {
                        warn!(file = %dds.display(), error = %e, "dds conversion failed");
                        metrics.images.failed += 1;
                    }
                }
            }
        }
    }

    if let Some(schema) = schema {
        let tables = schema.tables_for_product(product_bit);
        for path in &table_files {
            match decode_table_file(path, &tables) {
                Ok(()) => {
                    metrics.data.parsed += 1;
                    let _ = std::fs::remove_file(path);
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "table decode failed");
                    metrics.data.failed += 1;
                }
            }
        }
    }

    metrics.elapsed_ms = start.elapsed().as_millis();
    Ok(metrics)
}

fn decode_table_file(
    path: &Path,
    tables: &std::collections::HashMap<String, &crate::schema::TableDef>,
) -> Result<(), String> {
    let table_name = derive_table_name(&path.to_string_lossy());
    let table_def = tables.get(&table_name).ok_or_else(|| "no schema".to_string())?;
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    let outcome = crate::table::decode::decode(&bytes, table_def).map_err(|e| e.to_string())?;
    let json_path = path.with_extension("json");
    let file = std::fs::File::create(&json_path).map_err(|e| e.to_string())?;
    serde_json::to_writer(file, &outcome.rows).map_err(|e| e.to_string())?;
    Ok(())
}

/// Sweeps `dir` deleting any `.dds` whose sibling `.<ext>` (png/webp)
/// exists and any `.datc*64` whose sibling `.json` exists.
pub fn cleanup_sweep(dir: &Path) -> usize {
    let mut removed = 0;
    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let is_dds = path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("dds")).unwrap_or(false);
        let is_table = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_lowercase().contains(".datc") && n.to_lowercase().ends_with("64"))
            .unwrap_or(false);

        if is_dds {
            if path.with_extension("webp").exists() || path.with_extension("png").exists() {
                if std::fs::remove_file(path).is_ok() {
                    removed += 1;
                }
            }
        } else if is_table {
            if path.with_extension("json").exists() {
                if std::fs::remove_file(path).is_ok() {
                    removed += 1;
                }
            }
        }
    }
    removed
}

/// Errors surfaced from the preview conversion path used by the backend's
/// `/file` endpoint; kept distinct from `BundleError` since it wraps
/// `ConvertError` rather than the bundle subprocess.
#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_match_fixed_map() {
        assert_eq!(preset_pattern("all"), Some(".*"));
        assert_eq!(preset_pattern("passives"), Some(r"^art/2dart/skillicons/passives/.*"));
        assert_eq!(preset_pattern("nonexistent"), None);
    }

    #[test]
    fn cleanup_sweep_removes_only_files_with_sibling() {
        let dir = tempfile::tempdir().unwrap();
        let dds_with_sibling = dir.path().join("a.dds");
        std::fs::write(&dds_with_sibling, b"x").unwrap();
        std::fs::write(dds_with_sibling.with_extension("webp"), b"y").unwrap();

        let dds_without_sibling = dir.path().join("b.dds");
        std::fs::write(&dds_without_sibling, b"x").unwrap();

        let removed = cleanup_sweep(dir.path());
        assert_eq!(removed, 1);
        assert!(!dds_with_sibling.exists());
        assert!(dds_without_sibling.exists());
    }
}
