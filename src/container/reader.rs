//! Random-access reader for the outer container archive.
//!
//! Every read is a positioned read against the open file — the reader
//! never exposes or relies on a shared seek cursor, so `build_index` and
//! `extract` can interleave freely and the handle is safe to use from
//! multiple logical call sites without a mutex around a cursor.

use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::record::{
    ContainerError, DirectoryEntry, DirectoryRecord, FileRecordMeta, HeaderRecord, RecordTag,
    RECORD_HEADER_SIZE, TAG_GGPK,
};

/// Positioned-read abstraction so the reader never needs a shared cursor.
/// `std::fs::File` implements this on both Unix (`FileExt::read_at`) and
/// Windows (`FileExt::seek_read`, looped to fill `buf` fully).
pub trait PositionedRead {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()>;
    fn len(&self) -> std::io::Result<u64>;
}

impl PositionedRead for File {
    #[cfg(unix)]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        use std::os::unix::fs::FileExt;
        FileExt::read_exact_at(self, buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        use std::os::windows::fs::FileExt;
        let mut read = 0usize;
        while read < buf.len() {
            let n = FileExt::seek_read(self, &mut buf[read..], offset + read as u64)?;
            if n == 0 {
                return Err(std::io::ErrorKind::UnexpectedEof.into());
            }
            read += n;
        }
        Ok(())
    }

    fn len(&self) -> std::io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

/// Lightweight descriptor for one `FILE` record, produced by `build_index`.
/// No payload bytes are copied; fetching them requires `extract`.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub logical_path: String,
    pub archive_offset: u64,
    pub payload_offset: u64,
    pub payload_length: u64,
    pub content_hash: [u8; 32],
}

/// Either a plain case-insensitive substring or a full regular expression,
/// used both by `list` here and by the extraction pipeline's presets.
pub enum Pattern {
    Substring(String),
    Regex(regex::Regex),
}

impl Pattern {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Pattern::Substring(s) => path.to_lowercase().contains(&s.to_lowercase()),
            Pattern::Regex(re) => re.is_match(path),
        }
    }
}

/// Above this payload size, `extract` copies in chunks rather than in one
/// positioned read.
pub const DEFAULT_CHUNK_THRESHOLD: u64 = 50 * 1024 * 1024;
const COPY_CHUNK_SIZE: usize = 1024 * 1024;

pub struct GgpkReader<R: PositionedRead> {
    handle: R,
    pub header: HeaderRecord,
    archive_len: u64,
    chunk_threshold: u64,
}

impl GgpkReader<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ContainerError> {
        let file = File::open(path)?;
        Self::from_handle(file)
    }
}

impl<R: PositionedRead> GgpkReader<R> {
    pub fn from_handle(handle: R) -> Result<Self, ContainerError> {
        let archive_len = handle.len()?;
        let header = read_header(&handle)?;
        Ok(Self {
            handle,
            header,
            archive_len,
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
        })
    }

    pub fn with_chunk_threshold(mut self, threshold: u64) -> Self {
        self.chunk_threshold = threshold;
        self
    }

    /// Walk the directory graph from the root, accumulating `FILE`
    /// descriptors keyed by slash-delimited logical path. A `PDIR` named
    /// `ROOT` contributes no path segment. A record that fails to decode
    /// is logged and its subtree abandoned; traversal continues.
    pub fn build_index(&self) -> Result<Vec<FileDescriptor>, ContainerError> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        self.walk(self.header.first_record_offset, String::new(), &mut visited, &mut out);
        Ok(out)
    }

    fn walk(
        &self,
        offset: u64,
        prefix: String,
        visited: &mut HashSet<u64>,
        out: &mut Vec<FileDescriptor>,
    ) {
        if offset >= self.archive_len || !visited.insert(offset) {
            return;
        }

        let (length, tag) = match read_record_header(&self.handle, offset) {
            Ok(v) => v,
            Err(e) => {
                warn!(offset, error = %e, "failed to read record header, abandoning subtree");
                return;
            }
        };

        match RecordTag::from_bytes(&tag) {
            Some(RecordTag::Directory) => {
                let dir = match read_directory_record(&self.handle, offset, length) {
                    Ok(d) => d,
                    Err(e) => {
                        warn!(offset, error = %e, "malformed directory record, abandoning subtree");
                        return;
                    }
                };
                let next_prefix = if dir.name.eq_ignore_ascii_case("ROOT") || dir.name.is_empty() {
                    prefix
                } else if prefix.is_empty() {
                    dir.name.clone()
                } else {
                    format!("{prefix}/{}", dir.name)
                };
                for entry in &dir.entries {
                    self.walk_entry(entry, next_prefix.clone(), visited, out);
                }
            }
            Some(RecordTag::File) => {
                match read_file_record(&self.handle, offset, length) {
                    Ok(meta) => {
                        let logical_path = if prefix.is_empty() {
                            meta.name.clone()
                        } else {
                            format!("{prefix}/{}", meta.name)
                        };
                        out.push(FileDescriptor {
                            logical_path,
                            archive_offset: offset,
                            payload_offset: meta.payload_offset,
                            payload_length: meta.payload_length,
                            content_hash: meta.hash,
                        });
                    }
                    Err(e) => warn!(offset, error = %e, "malformed file record, skipping"),
                }
            }
            Some(RecordTag::Free) | Some(RecordTag::Header) => {
                debug!(offset, "non-directory record reached during traversal, skipping");
            }
            None => {
                warn!(offset, tag = ?tag, "unrecognised record tag, abandoning subtree");
            }
        }
    }

    fn walk_entry(
        &self,
        entry: &DirectoryEntry,
        prefix: String,
        visited: &mut HashSet<u64>,
        out: &mut Vec<FileDescriptor>,
    ) {
        if entry.child_offset < 0 || entry.child_offset as u64 >= self.archive_len {
            warn!(offset = entry.child_offset, "child offset out of bounds, skipping");
            return;
        }
        self.walk(entry.child_offset as u64, prefix, visited, out);
    }

    /// Recovery path: enumerate `FILE` records by scanning record lengths
    /// alone, ignoring the directory graph entirely. Used when the root is
    /// unreachable or the graph is too damaged to traverse normally.
    pub fn scan_records(&self) -> Vec<FileDescriptor> {
        let mut out = Vec::new();
        let mut offset = 0u64;
        while offset + RECORD_HEADER_SIZE <= self.archive_len {
            let (length, tag) = match read_record_header(&self.handle, offset) {
                Ok(v) => v,
                Err(_) => break,
            };
            if length < RECORD_HEADER_SIZE as u32 {
                break;
            }
            if RecordTag::from_bytes(&tag) == Some(RecordTag::File) {
                if let Ok(meta) = read_file_record(&self.handle, offset, length) {
                    out.push(FileDescriptor {
                        logical_path: meta.name.clone(),
                        archive_offset: offset,
                        payload_offset: meta.payload_offset,
                        payload_length: meta.payload_length,
                        content_hash: meta.hash,
                    });
                }
            }
            offset += length as u64;
        }
        out
    }

    pub fn list(&self, pattern: Option<&Pattern>) -> Result<Vec<String>, ContainerError> {
        let mut paths: Vec<String> = self
            .build_index()?
            .into_iter()
            .map(|d| d.logical_path)
            .filter(|p| pattern.map(|pat| pat.matches(p)).unwrap_or(true))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Write the descriptor's payload bytes to `destination`, creating
    /// parent directories as needed. Verifies the written bytes' SHA-256
    /// digest against the descriptor's recorded content hash.
    pub fn extract(&self, descriptor: &FileDescriptor, destination: &Path) -> Result<(), ContainerError> {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(destination)?;
        let mut hasher = Sha256::new();

        if descriptor.payload_length <= self.chunk_threshold {
            let mut buf = vec![0u8; descriptor.payload_length as usize];
            self.handle.read_at(descriptor.payload_offset, &mut buf)?;
            hasher.update(&buf);
            out.write_all(&buf)?;
        } else {
            let mut remaining = descriptor.payload_length;
            let mut offset = descriptor.payload_offset;
            let mut buf = vec![0u8; COPY_CHUNK_SIZE];
            while remaining > 0 {
                let n = remaining.min(COPY_CHUNK_SIZE as u64) as usize;
                self.handle.read_at(offset, &mut buf[..n])?;
                hasher.update(&buf[..n]);
                out.write_all(&buf[..n])?;
                offset += n as u64;
                remaining -= n as u64;
            }
        }

        let actual: [u8; 32] = hasher.finalize().into();
        if actual != descriptor.content_hash {
            return Err(ContainerError::HashMismatch {
                expected: hex::encode(descriptor.content_hash),
                actual: hex::encode(actual),
            });
        }
        Ok(())
    }

    /// Idempotent; there is nothing to flush since every read is
    /// positioned, but kept for symmetry with the teacher's reader API.
    pub fn close(self) {}
}

fn read_record_header<R: PositionedRead>(handle: &R, offset: u64) -> Result<(u32, [u8; 4]), ContainerError> {
    let mut buf = [0u8; 8];
    handle.read_at(offset, &mut buf)?;
    let length = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    if (length as u64) < RECORD_HEADER_SIZE {
        return Err(ContainerError::RecordTooShort(length));
    }
    let tag: [u8; 4] = buf[4..8].try_into().unwrap();
    Ok((length, tag))
}

fn read_header<R: PositionedRead>(handle: &R) -> Result<HeaderRecord, ContainerError> {
    let (_, tag) = read_record_header(handle, 0)?;
    if tag != TAG_GGPK {
        return Err(ContainerError::InvalidMagic);
    }
    let mut buf = [0u8; 12];
    handle.read_at(8, &mut buf)?;
    let version = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let first_record_offset = u64::from_le_bytes(buf[4..12].try_into().unwrap());
    Ok(HeaderRecord { version, first_record_offset })
}

fn read_directory_record<R: PositionedRead>(
    handle: &R,
    offset: u64,
    length: u32,
) -> Result<DirectoryRecord, ContainerError> {
    let mut head = [0u8; 8];
    handle.read_at(offset + 8, &mut head)?;
    let name_length = u32::from_le_bytes(head[0..4].try_into().unwrap()) as u64;
    let child_count = u32::from_le_bytes(head[4..8].try_into().unwrap()) as usize;

    let mut hash = [0u8; 32];
    handle.read_at(offset + 16, &mut hash)?;

    let name_bytes_len = (name_length * 2) as usize;
    let mut name_buf = vec![0u8; name_bytes_len];
    handle.read_at(offset + 48, &mut name_buf)?;
    let name = decode_utf16le_terminated(&name_buf);

    let entries_start = offset + 48 + name_bytes_len as u64;
    let entries_bytes_len = child_count * 12;
    if entries_start + entries_bytes_len as u64 > offset + length as u64 {
        return Err(ContainerError::RecordTooShort(length));
    }
    let mut entries_buf = vec![0u8; entries_bytes_len];
    handle.read_at(entries_start, &mut entries_buf)?;

    let mut entries = Vec::with_capacity(child_count);
    for i in 0..child_count {
        let base = i * 12;
        let name_hash = u32::from_le_bytes(entries_buf[base..base + 4].try_into().unwrap());
        let child_offset = i64::from_le_bytes(entries_buf[base + 4..base + 12].try_into().unwrap());
        entries.push(DirectoryEntry { name_hash, child_offset });
    }

    Ok(DirectoryRecord { hash, name, entries })
}

fn read_file_record<R: PositionedRead>(
    handle: &R,
    offset: u64,
    length: u32,
) -> Result<FileRecordMeta, ContainerError> {
    let mut head = [0u8; 4];
    handle.read_at(offset + 8, &mut head)?;
    let name_length = u32::from_le_bytes(head) as u64;

    let mut hash = [0u8; 32];
    handle.read_at(offset + 12, &mut hash)?;

    let name_bytes_len = (name_length * 2) as usize;
    let mut name_buf = vec![0u8; name_bytes_len];
    handle.read_at(offset + 44, &mut name_buf)?;
    let name = decode_utf16le_terminated(&name_buf);

    // Payload bytes start after the 8-byte record header, the 4-byte
    // name length, the 32-byte hash, and the UTF-16LE name itself.
    let payload_offset_within_record = 8 + 4 + 32 + name_bytes_len as u64;
    if payload_offset_within_record > length as u64 {
        return Err(ContainerError::RecordTooShort(length));
    }
    let payload_length = length as u64 - payload_offset_within_record;
    let payload_offset = offset + payload_offset_within_record;

    Ok(FileRecordMeta { hash, name, payload_offset, payload_length })
}

/// Decode UTF-16LE code units up to (but not including) the terminator.
/// The container format's names are always null-terminated, unlike the
/// table decoder's variable-region strings which terminate on a run of
/// zeros found by scanning rather than a known length.
fn decode_utf16le_terminated(buf: &[u8]) -> String {
    let units: Vec<u16> = buf
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}
