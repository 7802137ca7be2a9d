//! Decoder for the fixed+variable `.datc64` record format (§4.C, the
//! hardest subsystem in this crate).
//!
//! ```text
//! row_count:u32
//! fixed_region: row_count rows, each of identical byte size R
//! variable_data_magic: 8 bytes of 0xBB
//! variable_region: arbitrarily addressed bytes
//! ```
//!
//! `R` is not trusted from the schema — it is recovered empirically from
//! the position of the magic marker, and the observed value always wins
//! over the schema's computed row size (a stale schema must still decode
//! something useful).

use thiserror::Error;

use crate::schema::{ColumnDef, ColumnType, TableDef};
use crate::table::value::{Row, Value};

const MAX_ARRAY_LEN: i64 = 100_000;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("buffer is empty")]
    EmptyBuffer,
    #[error("buffer is shorter than the 4-byte row_count header")]
    BufferTooShort,
}

#[derive(Debug, Clone)]
pub struct DecodeOutcome {
    pub table_name: String,
    pub row_count: usize,
    pub rows: Vec<Row>,
    /// A decode-warning (§7): schema/observed row size mismatch, missing
    /// magic bytes, or a truncated buffer. Decoding still returns whatever
    /// rows it could recover.
    pub warning: Option<String>,
}

/// Nominal fixed-region byte size of a column's non-array encoding.
fn nominal_size(ty: ColumnType) -> usize {
    match ty {
        ColumnType::Bool => 1,
        ColumnType::I16 | ColumnType::U16 => 2,
        ColumnType::I32 | ColumnType::U32 | ColumnType::Enumrow => 4,
        ColumnType::F32 => 4,
        ColumnType::String => 8,
        ColumnType::Row => 8,
        ColumnType::Foreignrow => 16,
        ColumnType::Array => 16,
    }
}

fn schema_row_size(columns: &[ColumnDef]) -> usize {
    columns
        .iter()
        .map(|c| if c.array { 16 } else { nominal_size(c.ty) })
        .sum()
}

/// Scans forward from offset 4 for the first 8-byte run of `0xBB`.
fn find_magic_offset(buf: &[u8]) -> Option<usize> {
    if buf.len() < 12 {
        return None;
    }
    let mut i = 4;
    while i + 8 <= buf.len() {
        if buf[i..i + 8] == [0xBB; 8] {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// UTF-16LE code units starting at `var_start as i64 + offset`, read until
/// a 4-byte run of zeros. Out-of-range offsets and truncated sequences
/// resolve to the empty string rather than an error.
fn resolve_string(buf: &[u8], var_start: usize, offset: i64) -> String {
    let abs = var_start as i64 + offset;
    if abs < 0 {
        return String::new();
    }
    let mut pos = abs as usize;
    let mut units = Vec::new();
    loop {
        if pos + 4 > buf.len() {
            return String::new();
        }
        if buf[pos..pos + 4] == [0, 0, 0, 0] {
            break;
        }
        units.push(u16::from_le_bytes([buf[pos], buf[pos + 1]]));
        pos += 2;
    }
    String::from_utf16(&units).unwrap_or_default()
}

fn read_i64(buf: &[u8], at: usize) -> i64 {
    i64::from_le_bytes(buf[at..at + 8].try_into().unwrap())
}

fn is_row_null(id: i64) -> bool {
    id == -1 || (id as u64) == 0xFEFE_FEFE_FEFE_FEFEu64
}

fn is_foreignrow_null(id: i64) -> bool {
    id == -1 || id == -2 || (id as u64) == 0xFEFE_FEFE_FEFE_FEFEu64
}

/// Decodes one non-array scalar field of `ty` at absolute offset `at`.
/// Caller has already bounds-checked the field's nominal size.
fn decode_scalar(buf: &[u8], at: usize, ty: ColumnType, var_start: usize) -> Value {
    match ty {
        ColumnType::Bool => Value::Bool(buf[at] != 0),
        ColumnType::I16 => Value::I16(i16::from_le_bytes(buf[at..at + 2].try_into().unwrap())),
        ColumnType::U16 => Value::U16(u16::from_le_bytes(buf[at..at + 2].try_into().unwrap())),
        ColumnType::I32 => Value::I32(i32::from_le_bytes(buf[at..at + 4].try_into().unwrap())),
        ColumnType::U32 => Value::U32(u32::from_le_bytes(buf[at..at + 4].try_into().unwrap())),
        ColumnType::Enumrow => Value::EnumRow(i32::from_le_bytes(buf[at..at + 4].try_into().unwrap())),
        ColumnType::F32 => Value::F32(f32::from_le_bytes(buf[at..at + 4].try_into().unwrap())),
        ColumnType::String => {
            let offset = read_i64(buf, at);
            if offset < 0 {
                Value::Null
            } else {
                Value::String(resolve_string(buf, var_start, offset))
            }
        }
        ColumnType::Row => {
            let id = read_i64(buf, at);
            if is_row_null(id) {
                Value::Row(None)
            } else {
                Value::Row(Some(id))
            }
        }
        ColumnType::Foreignrow => {
            // Trailing 8 bytes (table tag) are intentionally discarded.
            let id = read_i64(buf, at);
            if is_foreignrow_null(id) {
                Value::ForeignRow(None)
            } else {
                Value::ForeignRow(Some(id))
            }
        }
        // An element type of `array` is a schema error; decode as empty.
        ColumnType::Array => Value::Array(Vec::new()),
    }
}

/// Decodes the 16-byte array field (length:i64, offset:i64) at `at`,
/// reading `length` elements of `element_ty` from the variable region.
fn decode_array_field(buf: &[u8], at: usize, element_ty: ColumnType, var_start: usize) -> Value {
    if element_ty == ColumnType::Array {
        return Value::Array(Vec::new());
    }
    let length = read_i64(buf, at);
    let offset = read_i64(buf, at + 8);
    if length <= 0 || length > MAX_ARRAY_LEN || offset < 0 {
        return Value::Array(Vec::new());
    }

    let element_size = nominal_size(element_ty);
    let start = var_start as i64 + offset;
    if start < 0 {
        return Value::Array(Vec::new());
    }
    let mut pos = start as usize;
    let mut items = Vec::with_capacity(length.min(1024) as usize);
    for _ in 0..length {
        if pos + element_size > buf.len() {
            break; // halt; return the partial list collected so far
        }
        items.push(decode_scalar(buf, pos, element_ty, var_start));
        pos += element_size;
    }
    Value::Array(items)
}

fn decode_field(buf: &[u8], at: usize, col: &ColumnDef, var_start: usize) -> Value {
    if col.array {
        decode_array_field(buf, at, col.ty, var_start)
    } else {
        decode_scalar(buf, at, col.ty, var_start)
    }
}

/// Strips leading non-alphabetic characters and the `.datc64` suffix,
/// then lowercases — the table decoder's schema lookup key.
pub fn derive_table_name(filename: &str) -> String {
    let base = std::path::Path::new(filename)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    let trimmed = base.trim_start_matches(|c: char| !c.is_alphabetic());
    let without_ext = trimmed.strip_suffix(".datc64").unwrap_or(trimmed);
    without_ext.to_lowercase()
}

/// Decodes a `.datc64` buffer against `table`'s column list.
pub fn decode(buf: &[u8], table: &TableDef) -> Result<DecodeOutcome, TableError> {
    if buf.is_empty() {
        return Err(TableError::EmptyBuffer);
    }
    if buf.len() < 4 {
        return Err(TableError::BufferTooShort);
    }

    let row_count = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    let schema_size = schema_row_size(&table.columns);

    if row_count == 0 {
        return Ok(DecodeOutcome { table_name: table.name.clone(), row_count: 0, rows: Vec::new(), warning: None });
    }

    let (r, var_start, mut warning) = match find_magic_offset(buf) {
        Some(magic_offset) => {
            let observed = (magic_offset - 4) / row_count;
            let warning = if observed != schema_size {
                Some(format!(
                    "schema row size {schema_size} disagrees with observed row size {observed}; using observed size"
                ))
            } else {
                None
            };
            (observed.max(1), magic_offset, warning)
        }
        None => (
            schema_size.max(1),
            buf.len(),
            Some("variable-data magic (0xBB) not found; falling back to schema row size".to_string()),
        ),
    };

    let mut rows = Vec::with_capacity(row_count);
    for i in 0..row_count {
        let row_start = 4 + i * r;
        if row_start >= buf.len() {
            warning = Some(match warning {
                Some(w) => format!("{w}; buffer truncated before row {i}"),
                None => format!("buffer truncated before row {i}"),
            });
            break;
        }

        let mut row = Row::new();
        let mut cursor = row_start;
        for col in &table.columns {
            let field_size = if col.array { 16 } else { nominal_size(col.ty) };
            let value = if cursor + field_size > buf.len() {
                Value::Null
            } else {
                decode_field(buf, cursor, col, var_start)
            };
            if let Some(name) = &col.name {
                row.insert(name.clone(), value);
            }
            cursor += field_size;
        }
        // Hard reset: the next row always starts at row_start + R,
        // regardless of how many bytes this row's columns actually
        // consumed.
        rows.push(row);
    }

    Ok(DecodeOutcome { table_name: table.name.clone(), row_count: rows.len(), rows, warning })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnRef;

    fn col(name: &str, ty: ColumnType, array: bool) -> ColumnDef {
        ColumnDef {
            name: Some(name.to_string()),
            description: None,
            array,
            ty,
            unique: false,
            localized: false,
            references: None,
            until: None,
            file: None,
            files: None,
        }
    }

    fn table_with(columns: Vec<ColumnDef>) -> TableDef {
        TableDef { valid_for: 0b10, name: "SampleTable".into(), columns }
    }

    fn utf16le(s: &str) -> Vec<u8> {
        let mut out = Vec::new();
        for u in s.encode_utf16() {
            out.extend_from_slice(&u.to_le_bytes());
        }
        out.extend_from_slice(&[0, 0, 0, 0]); // 4-byte terminator
        out
    }

    #[test]
    fn decode_resolves_string_and_array_fields_across_two_rows() {
        // Two rows of [i32, string, array<i32>]; one string "hi" shared,
        // one 3-element array [10,20,30] shared.
        let columns = vec![
            col("id", ColumnType::I32, false),
            col("label", ColumnType::String, false),
            col("values", ColumnType::I32, true),
        ];
        let table = table_with(columns);

        // R = 4 (i32) + 8 (string offset) + 16 (array) = 28.
        let row_count: u32 = 2;
        let mut buf = Vec::new();
        buf.extend_from_slice(&row_count.to_le_bytes());

        // Variable region layout (after the magic): string "hi" then array data.
        // We'll compute offsets relative to the magic position once known.
        let string_bytes = utf16le("hi");
        let array_bytes: Vec<u8> = [10i32, 20, 30].iter().flat_map(|v| v.to_le_bytes()).collect();

        // Row 0: id=1, label offset -> string_bytes at var+0, array offset -> var+string_bytes.len()
        let string_rel_offset = 0i64;
        let array_rel_offset = string_bytes.len() as i64;

        let mut row0 = Vec::new();
        row0.extend_from_slice(&1i32.to_le_bytes());
        row0.extend_from_slice(&string_rel_offset.to_le_bytes());
        row0.extend_from_slice(&3i64.to_le_bytes());
        row0.extend_from_slice(&array_rel_offset.to_le_bytes());
        assert_eq!(row0.len(), 28);

        let mut row1 = Vec::new();
        row1.extend_from_slice(&2i32.to_le_bytes());
        row1.extend_from_slice(&string_rel_offset.to_le_bytes());
        row1.extend_from_slice(&3i64.to_le_bytes());
        row1.extend_from_slice(&array_rel_offset.to_le_bytes());

        buf.extend_from_slice(&row0);
        buf.extend_from_slice(&row1);
        buf.extend_from_slice(&[0xBB; 8]);
        buf.extend_from_slice(&string_bytes);
        buf.extend_from_slice(&array_bytes);

        let outcome = decode(&buf, &table).unwrap();
        assert_eq!(outcome.row_count, 2);
        assert_eq!(outcome.rows[0]["id"], Value::I32(1));
        assert_eq!(outcome.rows[0]["label"], Value::String("hi".into()));
        assert_eq!(
            outcome.rows[0]["values"],
            Value::Array(vec![Value::I32(10), Value::I32(20), Value::I32(30)])
        );
        assert_eq!(outcome.rows[1]["id"], Value::I32(2));
    }

    #[test]
    fn null_sentinels_decode_to_null() {
        let columns = vec![
            col("label", ColumnType::String, false),
            col("self_ref", ColumnType::Row, false),
        ];
        let table = table_with(columns);

        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&(-1i64).to_le_bytes()); // negative string offset
        buf.extend_from_slice(&[0xFE; 8]); // row-id sentinel
        buf.extend_from_slice(&[0xBB; 8]);

        let outcome = decode(&buf, &table).unwrap();
        assert_eq!(outcome.rows[0]["label"], Value::Null);
        assert_eq!(outcome.rows[0]["self_ref"], Value::Row(None));
    }

    #[test]
    fn row_size_mismatch_does_not_desynchronize_rows() {
        // Schema claims 3 columns of i32 (size 12) but actual rows are 8
        // bytes wide (an i32 + an i16, say) — observed size must win.
        let columns = vec![
            col("a", ColumnType::I32, false),
            col("b", ColumnType::I32, false),
            col("c", ColumnType::I32, false),
        ];
        let table = table_with(columns);

        let row_count: u32 = 2;
        let observed_r = 8usize;
        let mut buf = Vec::new();
        buf.extend_from_slice(&row_count.to_le_bytes());
        for v in [1i32, 2] {
            buf.extend_from_slice(&v.to_le_bytes());
            buf.extend_from_slice(&0i32.to_le_bytes());
        }
        assert_eq!(buf.len(), 4 + 2 * observed_r);
        buf.extend_from_slice(&[0xBB; 8]);

        let outcome = decode(&buf, &table).unwrap();
        assert_eq!(outcome.row_count, 2);
        assert!(outcome.warning.is_some());
        // column "c" should never desynchronize into row 1's bytes.
        assert_eq!(outcome.rows[0]["a"], Value::I32(1));
        assert_eq!(outcome.rows[1]["a"], Value::I32(2));
    }

    #[test]
    fn array_length_over_cap_decodes_empty() {
        let columns = vec![col("values", ColumnType::I32, true)];
        let table = table_with(columns);

        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&(100_001i64).to_le_bytes());
        buf.extend_from_slice(&0i64.to_le_bytes());
        buf.extend_from_slice(&[0xBB; 8]);

        let outcome = decode(&buf, &table).unwrap();
        assert_eq!(outcome.rows[0]["values"], Value::Array(vec![]));
    }

    #[test]
    fn empty_buffer_is_fatal() {
        let table = table_with(vec![]);
        assert!(matches!(decode(&[], &table), Err(TableError::EmptyBuffer)));
    }

    #[test]
    fn table_name_derivation_strips_prefix_and_suffix() {
        assert_eq!(derive_table_name("1Passives.datc64"), "passives");
        assert_eq!(derive_table_name("skills.datc64"), "skills");
    }

    #[test]
    #[allow(dead_code)]
    fn unused_column_ref_variant_compiles() {
        let _ = ColumnRef { table: "x".into(), column: "y".into() };
    }
}
