//! Decoder for the game's fixed+variable data table format
//! (extension `.datc64`). See `decode.rs` for the algorithm and `value.rs`
//! for the row value model.

pub mod decode;
pub mod value;

pub use decode::{decode, derive_table_name, DecodeOutcome, TableError};
pub use value::{Row, Value};
