//! Report writers.
//!
//! Every artifact is staged in a temporary file next to its destination,
//! flushed to disk and then renamed into place, so readers only ever see a
//! complete file or none at all.

mod csv;
mod json;
mod stats;

pub use self::csv::{CsvExporter, DEFAULT_CSV_FILE};
pub use self::json::{JsonReportWriter, DEFAULT_SUMMARY_FILE};
pub use self::stats::{StatsExporter, DEFAULT_STATS_FILE, DEFAULT_SUM_COLUMN};

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::FetchError;

/// Write a file atomically.
///
/// `write` receives a handle to a temporary file in the destination
/// directory. Once it returns, the file is synced and renamed to `path`.
pub(crate) fn write_atomic<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = io::BufWriter::new(&mut tmp);
        write(&mut writer)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Map a write failure for `path` to a run-level serialization error.
pub(crate) fn artifact_error(path: &Path, err: io::Error) -> FetchError {
    FetchError::serialization(format!("failed to write {}: {}", path.display(), err))
}

/// Replace characters that would escape the output directory.
pub(crate) fn sanitize_file_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();

    match cleaned.trim() {
        "" | "." | ".." => "unknown".to_string(),
        trimmed => trimmed.to_string(),
    }
}

/// Artifacts produced by a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifacts {
    /// JSON summary.
    pub summary: Option<PathBuf>,

    /// CSV exports, one per group.
    pub csv: Vec<PathBuf>,

    /// Stats export.
    pub stats: Option<PathBuf>,
}

impl Artifacts {
    /// All written paths.
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.summary.iter().chain(self.csv.iter()).chain(self.stats.iter())
    }
}
