use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ggpk::schema::{ColumnDef, ColumnType, TableDef};
use ggpk::table::decode;

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

fn utf16le(s: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for unit in s.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&[0, 0, 0, 0]);
    out
}

/// Builds a synthetic `.datc64` buffer with `row_count` rows of
/// `[i32, string, array<i32>]`, all strings and arrays sharing the same
/// variable-region bytes (the decoder re-resolves them independently per
/// row, so this still exercises the full per-row cost).
fn build_buffer(row_count: u32) -> Vec<u8> {
    let string_bytes = utf16le("passive_skill_name");
    let array_bytes: Vec<u8> = [1i32, 2, 3, 4, 5].iter().flat_map(|v| v.to_le_bytes()).collect();
    let string_rel_offset = 0i64;
    let array_rel_offset = string_bytes.len() as i64;

    let mut buf = Vec::new();
    buf.extend_from_slice(&row_count.to_le_bytes());
    for i in 0..row_count {
        buf.extend_from_slice(&(i as i32).to_le_bytes());
        buf.extend_from_slice(&string_rel_offset.to_le_bytes());
        buf.extend_from_slice(&5i64.to_le_bytes());
        buf.extend_from_slice(&array_rel_offset.to_le_bytes());
    }
    buf.extend_from_slice(&[0xBB; 8]);
    buf.extend_from_slice(&string_bytes);
    buf.extend_from_slice(&array_bytes);
    buf
}

fn bench_table_decode(c: &mut Criterion) {
    let table = TableDef {
        valid_for: 0b10,
        name: "BenchTable".into(),
        columns: vec![
            col("id", ColumnType::I32, false),
            col("name", ColumnType::String, false),
            col("values", ColumnType::I32, true),
        ],
    };

    let small = build_buffer(100);
    let large = build_buffer(20_000);

    c.bench_function("decode_100_rows", |b| {
        b.iter(|| decode::decode(black_box(&small), black_box(&table)).unwrap())
    });
    c.bench_function("decode_20000_rows", |b| {
        b.iter(|| decode::decode(black_box(&large), black_box(&table)).unwrap())
    });
}

criterion_group!(benches, bench_table_decode);
criterion_main!(benches);
