//! Per-schema statistics export.
//!
//! One line per successful schema, built from the first row it returned, with
//! every value coerced to an integer.

use std::path::{Path, PathBuf};

use schema_drivers::Row;

use crate::aggregator::Summary;
use crate::error::RunResult;

use super::{artifact_error, write_atomic};

/// Default stats file name.
pub const DEFAULT_STATS_FILE: &str = "schema_stats.csv";

/// Default name of the column adding up the configured columns.
pub const DEFAULT_SUM_COLUMN: &str = "sum";

#[derive(Debug, Clone)]
pub struct StatsExporter {
    path: PathBuf,
    sum_columns: Vec<String>,
    sum_name: String,
}

impl StatsExporter {
    pub fn new(dir: impl AsRef<Path>, file_name: &str) -> Self {
        Self {
            path: dir.as_ref().join(file_name),
            sum_columns: Vec::new(),
            sum_name: DEFAULT_SUM_COLUMN.to_string(),
        }
    }

    /// Add a `sum` column adding up these columns.
    pub fn with_sum_columns(mut self, columns: Vec<String>) -> Self {
        self.sum_columns = columns;
        self
    }

    /// Header of the sum column.
    pub fn with_sum_name(mut self, name: impl Into<String>) -> Self {
        self.sum_name = name.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sum(&self, row: Option<&Row>) -> i64 {
        self.sum_columns
            .iter()
            .map(|c| row.and_then(|r| r.get(c)).map_or(0, |v| v.to_i64_lossy()))
            .fold(0i64, i64::saturating_add)
    }

    /// Write the stats file.
    pub fn write(&self, summary: &Summary) -> RunResult<PathBuf> {
        let mut lines: Vec<(&str, Option<&Row>)> = summary
            .results
            .iter()
            .map(|o| (o.schema.as_str(), o.rows().and_then(|rows| rows.first())))
            .collect();
        lines.sort_by(|a, b| a.0.cmp(b.0));

        let columns: Vec<&str> = lines
            .iter()
            .find_map(|(_, row)| *row)
            .map(|row| row.keys().map(String::as_str).collect())
            .unwrap_or_default();
        let with_sum = !self.sum_columns.is_empty();

        write_atomic(&self.path, |w| {
            let mut writer = ::csv::Writer::from_writer(w);

            let mut header = vec!["schema"];
            header.extend(columns.iter().copied());
            if with_sum {
                header.push(self.sum_name.as_str());
            }
            writer.write_record(&header)?;

            for (schema, row) in &lines {
                let mut record = vec![schema.to_string()];
                record.extend(columns.iter().map(|c| {
                    row.and_then(|r| r.get(*c))
                        .map_or(0, |v| v.to_i64_lossy())
                        .to_string()
                }));
                if with_sum {
                    record.push(self.sum(*row).to_string());
                }
                writer.write_record(&record)?;
            }
            writer.flush()
        })
        .map_err(|e| artifact_error(&self.path, e))?;

        tracing::info!(
            path = %self.path.display(),
            schemas = lines.len(),
            columns = columns.len(),
            "Stats written"
        );
        Ok(self.path.clone())
    }
}
