//! Source discovery and the format-dispatching `read` entrypoint.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{PipelineError, PipelineResult};
use crate::types::DataSet;

use super::csv;

/// Supported source formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Comma-separated values.
    Csv,
}

impl SourceFormat {
    /// Parse a source format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }
}

/// A discovered source file and the logical entity (file stem) it feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Full path to the file.
    pub path: PathBuf,
    /// File stem, lower-cased: `Schedules.csv` -> `schedules`.
    pub entity: String,
    /// Format inferred from the extension.
    pub format: SourceFormat,
}

/// Read one source file into a record batch.
///
/// Every failure (missing file, malformed CSV, unsupported extension) is reported as
/// [`PipelineError::SourceRead`] naming the file.
pub fn read(path: impl AsRef<Path>) -> PipelineResult<DataSet> {
    let path = path.as_ref();
    let format = path
        .extension()
        .and_then(|s| s.to_str())
        .and_then(SourceFormat::from_extension)
        .ok_or_else(|| PipelineError::SourceRead {
            path: path.to_path_buf(),
            message: "unsupported source format".to_string(),
        })?;

    let result = match format {
        SourceFormat::Csv => csv::read_csv_from_path(path),
    };

    result.map_err(|e| match e {
        already @ PipelineError::SourceRead { .. } => already,
        other => PipelineError::SourceRead {
            path: path.to_path_buf(),
            message: other.to_string(),
        },
    })
}

/// List the source files directly under `dir`, sorted by file name.
///
/// Sub-directories and files with unsupported extensions are ignored.
pub fn discover_sources(dir: impl AsRef<Path>) -> PipelineResult<Vec<SourceFile>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(PipelineError::SourceRead {
            path: dir.to_path_buf(),
            message: "source directory does not exist".to_string(),
        });
    }
    let mut out = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| PipelineError::SourceRead {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let Some(format) = path
            .extension()
            .and_then(|s| s.to_str())
            .and_then(SourceFormat::from_extension)
        else {
            continue;
        };
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        out.push(SourceFile {
            path: path.to_path_buf(),
            entity: stem.to_ascii_lowercase(),
            format,
        });
    }
    Ok(out)
}
