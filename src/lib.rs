//! # ggpk — decoder chain for a GGPK-style game archive
//!
//! This crate implements the three binary-format decoders that turn an
//! opaque on-disk game archive into structured, usable data:
//!
//! - [`container`] — the outer record archive (magic `GGPK`): positioned
//!   reads against files far larger than memory, a lazily-walked
//!   directory graph, streaming single-file extraction.
//! - [`bundle`] — the inner bundle subsystem: a compressed master index
//!   mapping logical paths to `(bundle, offset, size)`, with block
//!   decompression delegated to an external utility (the codec is
//!   proprietary).
//! - [`table`] — the fixed+variable `.datc64` record decoder, driven by
//!   an external [`schema`] document.
//!
//! [`driver`] schedules batches of table decodes across a worker pool.
//! [`pipeline`] orchestrates extract → convert → decode → cleanup.
//! [`server`] exposes the HTTP query surface a GUI frontend consumes.
//!
//! All three on-disk formats are read-only; this crate never writes any
//! of them back out. Oodle bundle-block decompression and DDS→PNG/WebP
//! image conversion are delegated to external native tools — see
//! [`bundle::reader`] and [`convert`].

pub mod bundle;
pub mod config;
pub mod container;
pub mod convert;
pub mod driver;
pub mod pipeline;
pub mod schema;
pub mod server;
pub mod table;

pub use bundle::{BundleError, BundleReader, ExtractSummary};
pub use config::{Config, ConfigError};
pub use container::{ContainerError, FileDescriptor, GgpkReader, Pattern};
pub use convert::{ConvertError, DdsConverter};
pub use driver::{BatchReport, DriverError, DriverOptions, TaskResult, TaskStatus};
pub use schema::{Schema, SchemaError, TableDef};
pub use table::{decode, DecodeOutcome, Row, TableError, Value};
