//! The bundle subsystem: a secondary, compressed container layered over
//! the outer archive, addressed by logical path via a master index.
//! Block decompression is delegated to an external utility because the
//! codec (Oodle) is proprietary — see `reader.rs`.

pub mod reader;

pub use reader::{BundleError, BundleReader, ExtractSummary, LANGUAGE_PATTERNS};
