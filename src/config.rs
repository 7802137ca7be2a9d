//! Configuration document (§6). Deliberately thin: loading a config file
//! is an explicit Non-goal (§1) — it is "an external collaborator" this
//! crate reads but does not design a UI or validation layer around.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("io error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("config is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPaths {
    pub libggpk3: Option<PathBuf>,
    pub pypoe: Option<PathBuf>,
    pub ooz: Option<PathBuf>,
    /// Not explicitly named in §6's documented shape; added because the
    /// DDS-converter is a required external collaborator for both the
    /// extraction pipeline and the backend's `/file` preview endpoint
    /// (see DESIGN.md, Open Question decisions).
    #[serde(rename = "ddsConverter")]
    pub dds_converter: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdsConversionConfig {
    pub format: String,
    pub quality: i32,
    #[serde(rename = "preserveOriginals")]
    pub preserve_originals: bool,
}

impl Default for DdsConversionConfig {
    fn default() -> Self {
        Self { format: "png".into(), quality: 90, preserve_originals: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConversionConfig {
    pub dds: DdsConversionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "poe2Path")]
    pub poe2_path: PathBuf,
    #[serde(rename = "outputDir", default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(rename = "cacheDir", default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(rename = "schemaPath", default = "default_schema_path")]
    pub schema_path: PathBuf,
    pub tools: ToolPaths,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default, rename = "extraction")]
    pub extraction: ExtractionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub patterns: std::collections::HashMap<String, Vec<String>>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./extracted")
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache")
}
fn default_threads() -> usize {
    4
}
fn default_schema_path() -> PathBuf {
    PathBuf::from("./schema.min.json")
}

impl Config {
    /// Reads the JSON config file and applies the two documented
    /// environment-variable overrides (`GGPK_POE2_PATH`, `GGPK_OUTPUT_DIR`).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        let mut config: Config = serde_json::from_slice(&bytes)?;
        if let Ok(poe2_path) = std::env::var("GGPK_POE2_PATH") {
            config.poe2_path = PathBuf::from(poe2_path);
        }
        if let Ok(output_dir) = std::env::var("GGPK_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(output_dir);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        assert_eq!(default_output_dir(), PathBuf::from("./extracted"));
        assert_eq!(default_cache_dir(), PathBuf::from("./cache"));
        assert_eq!(default_threads(), 4);
        assert_eq!(default_schema_path(), PathBuf::from("./schema.min.json"));
    }
}
