//! Record types for the outer container archive.
//!
//! # On-disk layout
//!
//! Every record is prefixed by `(length:u32, tag:4 bytes)`, little-endian
//! length, tag read as raw ASCII bytes:
//!
//! ```text
//! GGPK  version:u32  first_record_offset:u64
//! PDIR  name_length:u32  child_count:u32  hash:[u8;32]  name:UTF-16LE
//!       (name_hash:u32, child_offset:i64) * child_count
//! FILE  name_length:u32  hash:[u8;32]  name:UTF-16LE  payload:[u8] (rest of record)
//! FREE  next_free:u64
//! ```
//!
//! `name_length` counts UTF-16 code units including the terminator, so the
//! name occupies `2 * name_length` bytes on disk.

use std::io;
use thiserror::Error;

pub const TAG_GGPK: [u8; 4] = *b"GGPK";
pub const TAG_PDIR: [u8; 4] = *b"PDIR";
pub const TAG_FILE: [u8; 4] = *b"FILE";
pub const TAG_FREE: [u8; 4] = *b"FREE";

/// Minimum bytes a record header itself can ever be: `length:u32 + tag:4`.
pub const RECORD_HEADER_SIZE: u64 = 8;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("invalid magic — not a GGPK archive")]
    InvalidMagic,
    #[error("record length {0} is below the minimum header size of {RECORD_HEADER_SIZE}")]
    RecordTooShort(u32),
    #[error("unrecognised record tag {0:?} at offset {1}")]
    UnknownTag([u8; 4], u64),
    #[error("child offset {0} is out of bounds for an archive of {1} bytes")]
    OffsetOutOfBounds(i64, u64),
    #[error("content-hash mismatch on extract: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// The four-way tagged union the container's records form. Never modelled
/// as an inheritance tree — the tag selects the variant and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordTag {
    Header,
    Directory,
    File,
    Free,
}

impl RecordTag {
    pub fn from_bytes(tag: &[u8; 4]) -> Option<Self> {
        match *tag {
            TAG_GGPK => Some(RecordTag::Header),
            TAG_PDIR => Some(RecordTag::Directory),
            TAG_FILE => Some(RecordTag::File),
            TAG_FREE => Some(RecordTag::Free),
            _ => None,
        }
    }
}

/// The header record (`GGPK`). Exactly one per archive, at the offset
/// the reader was told to expect it (conventionally 0, but the reader
/// never assumes this).
#[derive(Debug, Clone)]
pub struct HeaderRecord {
    pub version: u32,
    pub first_record_offset: u64,
}

/// A single child slot inside a directory record.
#[derive(Debug, Clone, Copy)]
pub struct DirectoryEntry {
    pub name_hash: u32,
    pub child_offset: i64,
}

/// The directory record (`PDIR`). A `name` of `"ROOT"` contributes no
/// path segment when the container reader assembles logical paths.
#[derive(Debug, Clone)]
pub struct DirectoryRecord {
    pub hash: [u8; 32],
    pub name: String,
    pub entries: Vec<DirectoryEntry>,
}

/// Metadata for a `FILE` record, decoded without touching the payload
/// bytes. `payload_offset` and `payload_length` are absolute positions in
/// the archive file:
/// `payload_offset = record_start + 8 + 4 + 32 + 2*name_length`,
/// `payload_length = record_length - (8 + 4 + 32 + 2*name_length - 8)`
/// i.e. `record_length` minus everything before the payload that isn't
/// the 8-byte record header itself.
#[derive(Debug, Clone)]
pub struct FileRecordMeta {
    pub hash: [u8; 32],
    pub name: String,
    pub payload_offset: u64,
    pub payload_length: u64,
}

/// The free-list record (`FREE`). Not traversed for indexing purposes;
/// kept only so the reader recognises it rather than erroring on it.
#[derive(Debug, Clone, Copy)]
pub struct FreeRecord {
    pub next_free: u64,
}
