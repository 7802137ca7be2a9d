//! The schema document that drives the table decoder: a versioned list of
//! table definitions, each describing its columns. Loaded wholesale as
//! data — this crate never interprets table semantics beyond what the
//! schema declares (§1 Non-goal).

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bit 1 of a table's `validFor` mask selects this product, per the
/// GLOSSARY ("this instance selects bit 1").
pub const DEFAULT_PRODUCT_BIT: u32 = 0b10;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("io error reading schema: {0}")]
    Io(#[from] std::io::Error),
    #[error("schema is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Bool,
    I16,
    I32,
    U16,
    U32,
    F32,
    String,
    Row,
    Foreignrow,
    Enumrow,
    Array,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub array: bool,
    #[serde(rename = "type")]
    pub ty: ColumnType,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub localized: bool,
    #[serde(default)]
    pub references: Option<ColumnRef>,
    #[serde(default)]
    pub until: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub files: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    #[serde(rename = "validFor")]
    pub valid_for: u32,
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub version: u32,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    pub tables: Vec<TableDef>,
}

impl Schema {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SchemaError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Tables whose `validFor` mask intersects `product_bit`, keyed by
    /// lowercased table name as the table decoder's lookup expects.
    pub fn tables_for_product(&self, product_bit: u32) -> HashMap<String, &TableDef> {
        self.tables
            .iter()
            .filter(|t| t.valid_for & product_bit != 0)
            .map(|t| (t.name.to_lowercase(), t))
            .collect()
    }
}
