//! JSON summary artifact.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::aggregator::Summary;
use crate::error::RunResult;

use super::{artifact_error, write_atomic};

/// Default summary file name.
pub const DEFAULT_SUMMARY_FILE: &str = "schema_results.json";

/// Writes the run summary as a single JSON document.
#[derive(Debug, Clone)]
pub struct JsonReportWriter {
    path: PathBuf,
}

impl JsonReportWriter {
    /// Writer targeting `dir/file_name`.
    pub fn new(dir: impl AsRef<Path>, file_name: &str) -> Self {
        Self {
            path: dir.as_ref().join(file_name),
        }
    }

    /// Destination path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize `summary` and replace the artifact atomically.
    pub fn write(&self, summary: &Summary) -> RunResult<PathBuf> {
        // Serialize fully before touching the filesystem.
        let body = serde_json::to_vec_pretty(summary)?;

        write_atomic(&self.path, |w| {
            w.write_all(&body)?;
            w.write_all(b"\n")
        })
        .map_err(|e| artifact_error(&self.path, e))?;

        tracing::info!(
            path = %self.path.display(),
            bytes = body.len(),
            schemas = summary.total_schemas,
            "Summary written"
        );
        Ok(self.path.clone())
    }

    /// Read a previously written artifact.
    pub fn read(path: impl AsRef<Path>) -> RunResult<Summary> {
        let bytes = std::fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
