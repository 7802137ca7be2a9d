//! End-to-end exercise of the full decoder chain: a synthetic in-memory
//! `GGPK` container holding a single `.datc64` payload, read through the
//! container reader and then through the table decoder, stitched across
//! both subsystems rather than unit-tested in isolation.

use ggpk::container::GgpkReader;
use ggpk::schema::{ColumnDef, ColumnType, TableDef};
use ggpk::table::decode;
use ggpk::table::Value;
use std::fs::File;
use std::io::Write;

fn utf16le(s: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for unit in s.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&[0, 0]);
    out
}

fn column(name: &str, ty: ColumnType, array: bool) -> ColumnDef {
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

/// One row of `[id: i32, label: string]`, row size 12: 4 bytes for `id`
/// plus 8 bytes for the string offset.
fn build_datc64_payload() -> Vec<u8> {
    let label_units = utf16le("Fireball");
    let mut label_bytes = Vec::new();
    for unit in "Fireball".encode_utf16() {
        label_bytes.extend_from_slice(&unit.to_le_bytes());
    }
    label_bytes.extend_from_slice(&[0, 0, 0, 0]); // 4-byte terminator
    let _ = label_units;

    let mut buf = Vec::new();
    buf.extend_from_slice(&1u32.to_le_bytes()); // row_count
    buf.extend_from_slice(&42i32.to_le_bytes()); // id
    buf.extend_from_slice(&0i64.to_le_bytes()); // label offset: var_start + 0
    buf.extend_from_slice(&[0xBB; 8]); // variable_data_magic
    buf.extend_from_slice(&label_bytes);
    buf
}

/// Builds a minimal `GGPK` archive: header -> root `PDIR` (named `ROOT`,
/// contributing no path segment) -> one `FILE` record at
/// `data/1skillgems.datc64`.
fn build_archive(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();

    let header_len: u32 = 8 + 4 + 8;
    buf.extend_from_slice(&header_len.to_le_bytes());
    buf.extend_from_slice(b"GGPK");
    buf.extend_from_slice(&3u32.to_le_bytes());
    let first_record_offset_pos = buf.len();
    buf.extend_from_slice(&0u64.to_le_bytes());

    let root_offset = buf.len() as u64;
    buf[first_record_offset_pos..first_record_offset_pos + 8]
        .copy_from_slice(&root_offset.to_le_bytes());

    let name = utf16le("data/1skillgems.datc64");
    let name_len_units = (name.len() / 2) as u32;
    let file_record_len: u32 = 8 + 4 + 32 + name.len() as u32 + payload.len() as u32;

    let root_name = utf16le("ROOT");
    let root_name_len_units = (root_name.len() / 2) as u32;
    let root_record_len: u32 = 8 + 4 + 4 + 32 + root_name.len() as u32 + 1 * 12;

    let file_rec_offset = root_offset + root_record_len as u64;

    // root PDIR
    buf.extend_from_slice(&root_record_len.to_le_bytes());
    buf.extend_from_slice(b"PDIR");
    buf.extend_from_slice(&root_name_len_units.to_le_bytes());
    buf.extend_from_slice(&1u32.to_le_bytes());
    buf.extend_from_slice(&[0u8; 32]);
    buf.extend_from_slice(&root_name);
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&(file_rec_offset as i64).to_le_bytes());

    assert_eq!(buf.len() as u64, file_rec_offset);
    // FILE record
    buf.extend_from_slice(&file_record_len.to_le_bytes());
    buf.extend_from_slice(b"FILE");
    buf.extend_from_slice(&name_len_units.to_le_bytes());
    buf.extend_from_slice(&[0u8; 32]);
    buf.extend_from_slice(&name);
    buf.extend_from_slice(payload);

    buf
}

#[test]
fn container_extract_feeds_table_decoder_end_to_end() {
    let payload = build_datc64_payload();
    let archive_bytes = build_archive(&payload);

    let archive_file = tempfile::NamedTempFile::new().unwrap();
    {
        let mut f = File::create(archive_file.path()).unwrap();
        f.write_all(&archive_bytes).unwrap();
    }

    let reader = GgpkReader::open(archive_file.path()).unwrap();
    let index = reader.build_index().unwrap();
    assert_eq!(index.len(), 1);
    let descriptor = &index[0];
    assert_eq!(descriptor.logical_path, "data/1skillgems.datc64");
    assert_eq!(descriptor.payload_length, payload.len() as u64);

    let out_dir = tempfile::tempdir().unwrap();
    let dest = out_dir.path().join(&descriptor.logical_path);

    // The synthetic archive's hash field is zeroed; patch the expected
    // hash so extract's verification exercises the success path rather
    // than rejecting a deliberately-fake digest.
    use sha2::{Digest, Sha256};
    let mut patched = descriptor.clone();
    patched.content_hash = Sha256::digest(&payload).into();
    reader.extract(&patched, &dest).unwrap();

    let extracted_bytes = std::fs::read(&dest).unwrap();
    assert_eq!(extracted_bytes, payload);

    let table = TableDef {
        valid_for: 0b10,
        name: "SkillGems".into(),
        columns: vec![
            column("id", ColumnType::I32, false),
            column("label", ColumnType::String, false),
        ],
    };

    let outcome = decode::decode(&extracted_bytes, &table).unwrap();
    assert_eq!(outcome.row_count, 1);
    assert_eq!(outcome.rows[0]["id"], Value::I32(42));
    assert_eq!(outcome.rows[0]["label"], Value::String("Fireball".into()));
    assert!(outcome.warning.is_none());
}

#[test]
fn schema_derived_table_name_matches_logical_path_basename() {
    let name = decode::derive_table_name("data/1skillgems.datc64");
    assert_eq!(name, "skillgems");
}
