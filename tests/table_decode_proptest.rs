//! Property test for the table decoder's row-size reconciliation
//! invariant: regardless of how the schema's computed row size compares
//! to the empirically observed size, every row decodes from exactly `R`
//! bytes and no row ever reads into its neighbor.

use ggpk::schema::{ColumnDef, ColumnType, TableDef};
use ggpk::table::decode;
use ggpk::table::Value;
use proptest::prelude::*;

fn single_i32_table() -> TableDef {
    TableDef {
        valid_for: 0b10,
        name: "PropTable".into(),
        columns: vec![ColumnDef {
            name: Some("idx".into()),
            description: None,
            array: false,
            ty: ColumnType::I32,
            unique: false,
            localized: false,
            references: None,
            until: None,
            file: None,
            files: None,
        }],
    }
}

/// Builds a buffer with `row_count` rows of exactly `observed_row_size`
/// bytes each; the first 4 bytes of each row encode the row's own index
/// as an `i32`, the remainder is padding. The schema above always claims
/// a 4-byte row, so any `observed_row_size != 4` exercises the mismatch
/// path.
fn build_buffer(row_count: u32, observed_row_size: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&row_count.to_le_bytes());
    for i in 0..row_count {
        let mut row = vec![0u8; observed_row_size];
        row[0..4].copy_from_slice(&(i as i32).to_le_bytes());
        buf.extend_from_slice(&row);
    }
    buf.extend_from_slice(&[0xBB; 8]);
    buf
}

proptest! {
    #[test]
    fn row_size_mismatch_never_desynchronizes_rows(
        row_count in 1u32..64,
        observed_row_size in 4usize..65,
    ) {
        let buf = build_buffer(row_count, observed_row_size);
        let table = single_i32_table();

        let outcome = decode::decode(&buf, &table).unwrap();
        prop_assert_eq!(outcome.row_count, row_count as usize);

        for (i, row) in outcome.rows.iter().enumerate() {
            prop_assert_eq!(row["idx"].clone(), Value::I32(i as i32));
        }

        if observed_row_size != 4 {
            prop_assert!(outcome.warning.is_some());
        } else {
            prop_assert!(outcome.warning.is_none());
        }
    }
}
