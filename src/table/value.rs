//! The row value model. Row values are heterogeneous by column (§9 Design
//! Note: "represent them as a tagged value type; do not erase to `any`").
//!
//! `Value` deliberately does **not** derive `Serialize` — serde's default
//! enum representation would tag every value as `{"Bool": true}` or
//! `{"String": null}`. JSON emission needs a plain scalar or `null`,
//! never a wrapper tag, so the `Serialize` impl below is hand-written.

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeSeq, Serializer};

/// One decoded table row, column name to value, insertion-ordered so the
/// JSON output's field order matches the schema's column order rather
/// than an arbitrary hash order.
pub type Row = IndexMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    F32(f32),
    String(String),
    /// Self-row reference: an integer row id, or null.
    Row(Option<i64>),
    /// Foreign-row reference: an integer row id, or null. The trailing
    /// 8-byte table tag is discarded at decode time (§9 Open Question b).
    ForeignRow(Option<i64>),
    EnumRow(i32),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::I16(v) => serializer.serialize_i16(*v),
            Value::U16(v) => serializer.serialize_u16(*v),
            Value::I32(v) => serializer.serialize_i32(*v),
            Value::U32(v) => serializer.serialize_u32(*v),
            Value::F32(v) => serializer.serialize_f32(*v),
            Value::String(s) => serializer.serialize_str(s),
            Value::Row(Some(id)) | Value::ForeignRow(Some(id)) => serializer.serialize_i64(*id),
            Value::Row(None) | Value::ForeignRow(None) => serializer.serialize_none(),
            Value::EnumRow(v) => serializer.serialize_i32(*v),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}
