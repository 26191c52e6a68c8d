//! Flat CSV export of every captured row.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use schema_drivers::Row;

use crate::aggregator::Summary;
use crate::error::RunResult;

use super::{artifact_error, sanitize_file_component, write_atomic};

/// Default file name when rows are not grouped.
pub const DEFAULT_CSV_FILE: &str = "schema_results.csv";

const LOG_EVERY_ROWS: usize = 10_000;
const UNKNOWN_GROUP: &str = "unknown";

/// Writes captured rows as CSV, optionally split by the value of one column.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    dir: PathBuf,
    group_column: Option<String>,
    file_name: String,
}

/// Rows destined for one file.
struct Group<'a> {
    header: Vec<&'a str>,
    rows: Vec<(&'a str, &'a Row)>,
}

impl CsvExporter {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            group_column: None,
            file_name: DEFAULT_CSV_FILE.to_string(),
        }
    }

    /// Split output into `<column>_<value>.csv` files.
    pub fn with_group_column(mut self, column: Option<String>) -> Self {
        self.group_column = column.filter(|c| !c.trim().is_empty());
        self
    }

    /// File name used when rows are not grouped.
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = name.into();
        self
    }

    fn file_for(&self, row: &Row) -> String {
        match &self.group_column {
            None => self.file_name.clone(),
            Some(column) => {
                let value = row
                    .get(column)
                    .filter(|v| !v.is_null())
                    .map(|v| sanitize_file_component(&v.to_plain_string()))
                    .unwrap_or_else(|| UNKNOWN_GROUP.to_string());
                format!("{}_{}.csv", sanitize_file_component(column), value)
            }
        }
    }

    fn group<'a>(&self, summary: &'a Summary) -> IndexMap<String, Group<'a>> {
        let mut groups: IndexMap<String, Group<'a>> = IndexMap::new();

        for outcome in &summary.results {
            let Some(rows) = outcome.rows() else { continue };
            for row in rows {
                let group = groups.entry(self.file_for(row)).or_insert_with(|| {
                    let mut header: Vec<&str> = row.keys().map(String::as_str).collect();
                    header.sort_unstable();
                    Group {
                        header,
                        rows: Vec::new(),
                    }
                });
                group.rows.push((outcome.schema.as_str(), row));
            }
        }

        groups
    }

    /// Write every row of every successful schema. Returns the files written.
    pub fn write(&self, summary: &Summary) -> RunResult<Vec<PathBuf>> {
        let groups = self.group(summary);
        let mut written = Vec::with_capacity(groups.len());
        let mut total_rows = 0usize;

        for (file_name, group) in &groups {
            let path = self.dir.join(file_name);

            write_atomic(&path, |w| {
                let mut writer = ::csv::Writer::from_writer(w);
                writer.write_record(std::iter::once("schema").chain(group.header.iter().copied()))?;

                for (schema, row) in &group.rows {
                    let cells = group.header.iter().map(|column| {
                        row.get(*column)
                            .map(|v| v.to_plain_string())
                            .unwrap_or_default()
                    });
                    writer.write_record(std::iter::once(schema.to_string()).chain(cells))?;

                    total_rows += 1;
                    if total_rows % LOG_EVERY_ROWS == 0 {
                        tracing::info!(rows = total_rows, "CSV export progress");
                    }
                }
                writer.flush()
            })
            .map_err(|e| artifact_error(&path, e))?;

            tracing::info!(
                path = %path.display(),
                rows = group.rows.len(),
                "CSV file written"
            );
            written.push(path);
        }

        tracing::info!(files = written.len(), rows = total_rows, "CSV export complete");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::ResultAggregator;
    use crate::outcome::{FailureKind, FetchFailure, FetchOutcome};
    use schema_drivers::Value;
    use std::time::Duration;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn summary() -> Summary {
        let aggregator = ResultAggregator::new(3);
        aggregator.record(FetchOutcome::success(
            "alpha",
            vec![
                row(&[("region", "eu".into()), ("count", Value::Int(3))]),
                row(&[("region", "us".into()), ("count", Value::Int(4))]),
            ],
            Duration::ZERO,
        ));
        aggregator.record(FetchOutcome::success(
            "beta",
            vec![row(&[("count", Value::Int(9)), ("region", Value::Null), ("extra", "x".into())])],
            Duration::ZERO,
        ));
        aggregator.record(FetchOutcome::failure(
            "gamma",
            FetchFailure::new(FailureKind::Network, "refused"),
            Duration::ZERO,
        ));
        aggregator.finish(Duration::ZERO)
    }

    fn read(path: &Path) -> Vec<Vec<String>> {
        let mut reader = ::csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn test_single_file_export() {
        let dir = tempfile::tempdir().unwrap();
        let files = CsvExporter::new(dir.path()).write(&summary()).unwrap();
        assert_eq!(files, vec![dir.path().join(DEFAULT_CSV_FILE)]);

        let records = read(&files[0]);
        assert_eq!(records[0], vec!["schema", "count", "region"]);
        assert_eq!(records[1], vec!["alpha", "3", "eu"]);
        assert_eq!(records[2], vec!["alpha", "4", "us"]);
        // Header comes from the first row, so "extra" is dropped.
        assert_eq!(records[3], vec!["beta", "9", ""]);
        assert_eq!(records.len(), 4);
    }

    #[test]
    fn test_grouped_export() {
        let dir = tempfile::tempdir().unwrap();
        let files = CsvExporter::new(dir.path())
            .with_group_column(Some("region".to_string()))
            .write(&summary())
            .unwrap();

        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["region_eu.csv", "region_us.csv", "region_unknown.csv"]);

        let unknown = read(&dir.path().join("region_unknown.csv"));
        assert_eq!(unknown[0], vec!["schema", "count", "extra", "region"]);
        assert_eq!(unknown[1], vec!["beta", "9", "x", ""]);
    }

    #[test]
    fn test_group_value_cannot_escape_directory() {
        let aggregator = ResultAggregator::new(1);
        aggregator.record(FetchOutcome::success(
            "alpha",
            vec![row(&[("region", "../etc".into())])],
            Duration::ZERO,
        ));
        let summary = aggregator.finish(Duration::ZERO);

        let dir = tempfile::tempdir().unwrap();
        let files = CsvExporter::new(dir.path())
            .with_group_column(Some("region".to_string()))
            .write(&summary)
            .unwrap();
        assert_eq!(files, vec![dir.path().join("region_.._etc.csv")]);
    }

    #[test]
    fn test_no_rows_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let files = CsvExporter::new(dir.path())
            .write(&Summary::empty(Duration::ZERO))
            .unwrap();
        assert!(files.is_empty());
    }
}
