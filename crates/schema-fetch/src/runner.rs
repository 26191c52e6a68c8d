//! Run lifecycle.

use std::path::PathBuf;
use std::sync::Arc;

use schema_drivers::drivers::create_default_registry;
use schema_drivers::DriverRegistry;

use crate::aggregator::Summary;
use crate::config::FetchConfig;
use crate::error::{FetchError, RunResult};
use crate::executor::FetchExecutor;
use crate::meta::CredentialStore;
use crate::progress::ProgressTracker;
use crate::report::{Artifacts, CsvExporter, JsonReportWriter, StatsExporter};
use crate::worker::FetchPool;

/// Outcome of a complete run.
#[derive(Debug)]
pub struct RunReport {
    pub summary: Summary,
    pub artifacts: Artifacts,
}

/// Loads credentials, fans out over every schema and persists the results.
pub struct Fetcher {
    config: FetchConfig,
    registry: Arc<DriverRegistry>,
}

impl Fetcher {
    /// Fetcher using the built-in MySQL and PostgreSQL drivers.
    pub fn new(config: FetchConfig) -> Self {
        let registry = create_default_registry(config.connect_timeout);
        Self::with_registry(config, registry)
    }

    /// Fetcher using a caller-supplied driver registry.
    pub fn with_registry(config: FetchConfig, registry: DriverRegistry) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
        }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn progress_path(&self) -> PathBuf {
        self.config.output_dir.join(&self.config.progress_file)
    }

    /// Fetch every schema listed in the meta database.
    ///
    /// Fails only if the credential list cannot be loaded; per-schema
    /// failures are part of the returned summary.
    pub async fn fetch_all(&self) -> RunResult<Summary> {
        self.config.validate()?;

        let dir = &self.config.output_dir;
        std::fs::create_dir_all(dir).map_err(|e| {
            FetchError::Config(format!("cannot create output directory {}: {}", dir.display(), e))
        })?;

        let credentials = CredentialStore::new(
            &self.registry,
            &self.config.meta,
            &self.config.credentials_query,
            self.config.schema_kind,
        )
        .load()
        .await?;

        let progress = Arc::new(ProgressTracker::new());
        let ticker = self.config.progress.then(|| {
            progress.start_ticker(self.progress_path(), self.config.progress_interval)
        });

        let executor = FetchExecutor::new(
            self.registry.clone(),
            self.config.query.as_str(),
            progress.clone(),
        );
        let summary = FetchPool::new(executor, self.config.max_workers)
            .with_deadline(self.config.run_deadline)
            .with_log_every(self.config.log_every)
            .run(credentials)
            .await;

        if let Some(ticker) = ticker {
            ticker.abort();
            let path = self.progress_path();
            if let Err(e) = progress.write_snapshot(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Final progress snapshot failed");
            }
        }

        tracing::info!(peak_active = progress.peak_active(), "Peak concurrency");
        Ok(summary)
    }

    /// Fetch everything, then write every enabled artifact.
    ///
    /// If an artifact cannot be written the returned error carries the
    /// summary so nothing fetched is lost.
    pub async fn run(&self) -> RunResult<RunReport> {
        let summary = self.fetch_all().await?;

        match self.write_artifacts(&summary) {
            Ok(artifacts) => Ok(RunReport { summary, artifacts }),
            Err(e) => Err(e.with_summary(summary)),
        }
    }

    fn write_artifacts(&self, summary: &Summary) -> RunResult<Artifacts> {
        let dir = &self.config.output_dir;
        let mut artifacts = Artifacts::default();

        let json = JsonReportWriter::new(dir, &self.config.output_file);
        artifacts.summary = Some(json.write(summary)?);

        if self.config.csv {
            artifacts.csv = CsvExporter::new(dir)
                .with_group_column(self.config.group_column.clone())
                .with_file_name(self.config.csv_file.as_str())
                .write(summary)?;
        }

        if self.config.stats {
            artifacts.stats = Some(
                StatsExporter::new(dir, &self.config.stats_file)
                    .with_sum_columns(self.config.sum_columns.clone())
                    .with_sum_name(self.config.sum_name.as_str())
                    .write(summary)?,
            );
        }

        Ok(artifacts)
    }
}
