//! Tabular source: turns flat files into record batches.
//!
//! Most callers should use [`read`] for a single file and [`discover_sources`] to enumerate the
//! files of a source directory. Each file becomes one [`crate::types::DataSet`] whose rows keep
//! the file's record order.

pub mod csv;
pub mod source;

pub use source::{discover_sources, read, SourceFile, SourceFormat};
