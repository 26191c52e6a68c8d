//! schema-fetch binary.
//!
//! Loads schema credentials from the meta database, runs the configured
//! query against every schema and writes the results.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use schema_fetch::{ConfigOverrides, FetchConfig, FetchError, Fetcher, Summary};

const DEFAULT_LOG_FILTER: &str = "info,schema_fetch=debug,schema_drivers=info";
const ERRORS_SHOWN: usize = 5;

#[derive(Parser, Debug)]
#[command(name = "schema-fetch")]
#[command(version, about = "Run one query against every schema in the meta database", long_about = None)]
struct Cli {
    /// Query run against every schema (overrides FETCH_QUERY)
    #[arg(short, long, conflicts_with = "query_file")]
    query: Option<String>,

    /// Read the query from a file
    #[arg(long, value_name = "PATH")]
    query_file: Option<PathBuf>,

    /// Maximum concurrent fetches
    #[arg(short, long)]
    workers: Option<usize>,

    /// Connect timeout per schema
    #[arg(long, value_name = "SECS")]
    connect_timeout: Option<u64>,

    /// Cancel whatever is still outstanding after this long
    #[arg(long, value_name = "SECS")]
    deadline: Option<u64>,

    /// Directory for every output file
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// JSON summary file name
    #[arg(long, value_name = "NAME")]
    output_file: Option<String>,

    /// Also write captured rows as CSV
    #[arg(long)]
    csv: bool,

    /// Split the CSV export by the value of this column
    #[arg(long, value_name = "COLUMN")]
    group_column: Option<String>,

    /// CSV file name when rows are not grouped
    #[arg(long, value_name = "NAME")]
    csv_file: Option<String>,

    /// Also write per-schema stats
    #[arg(long)]
    stats: bool,

    /// Stats file name
    #[arg(long, value_name = "NAME")]
    stats_file: Option<String>,

    /// Columns added into the stats sum column
    #[arg(long, value_name = "A,B", value_delimiter = ',')]
    sum_columns: Option<Vec<String>>,

    /// Header of the stats sum column
    #[arg(long, value_name = "NAME")]
    sum_name: Option<String>,

    /// Do not write progress snapshots
    #[arg(long)]
    no_progress: bool,

    /// Directory for the log file
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Write the log file as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            query: self.query.clone(),
            query_file: self.query_file.clone(),
            max_workers: self.workers,
            connect_timeout_secs: self.connect_timeout,
            run_deadline_secs: self.deadline,
            output_dir: self.output_dir.clone(),
            output_file: self.output_file.clone(),
            csv: self.csv,
            group_column: self.group_column.clone(),
            csv_file: self.csv_file.clone(),
            stats: self.stats,
            stats_file: self.stats_file.clone(),
            sum_columns: self.sum_columns.clone(),
            sum_name: self.sum_name.clone(),
            no_progress: self.no_progress,
            log_dir: self.log_dir.clone(),
        }
    }
}

/// Install the console and file log layers. The guard must outlive the run.
fn init_tracing(log_dir: &Path, json: bool) -> Result<(WorkerGuard, PathBuf)> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("cannot create log directory {}", log_dir.display()))?;

    let file_name = format!(
        "schema_fetch_{}.log",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    let appender = tracing_appender::rolling::never(log_dir, &file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(fmt::layer())
        .with(json.then(|| fmt::layer().json().with_writer(writer.clone())))
        .with((!json).then(|| fmt::layer().with_ansi(false).with_writer(writer)))
        .init();

    Ok((guard, log_dir.join(file_name)))
}

fn print_summary(summary: &Summary) {
    println!("{}", "=".repeat(60));
    println!("SUMMARY");
    println!("{}", "=".repeat(60));
    println!("Total schemas: {}", summary.total_schemas);
    println!("Successful:    {}", summary.successful);
    println!("Failed:        {}", summary.failed);
    println!("Rows:          {}", summary.total_rows());
    println!("Duration:      {:.2}s", summary.duration.as_secs_f64());

    if !summary.errors.is_empty() {
        println!();
        println!("First errors:");
        for outcome in summary.errors.iter().take(ERRORS_SHOWN) {
            if let Some(failure) = outcome.failure_info() {
                println!("  {} [{}]: {}", outcome.schema, failure.kind, failure.message);
            }
        }
        if summary.errors.len() > ERRORS_SHOWN {
            println!("  ... and {} more", summary.errors.len() - ERRORS_SHOWN);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = FetchConfig::from_env(cli.overrides())?;

    let (_guard, log_file) = init_tracing(&config.log_dir, cli.log_json)?;
    tracing::info!(log_file = %log_file.display(), "Starting schema-fetch");
    tracing::info!(
        meta = ?config.meta,
        workers = config.max_workers,
        connect_timeout_secs = config.connect_timeout.as_secs(),
        output_dir = %config.output_dir.display(),
        "Configuration loaded"
    );

    let fetcher = Fetcher::new(config);

    // Handle shutdown signals
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Cannot listen for CTRL+C");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    };

    tokio::select! {
        result = fetcher.run() => match result {
            Ok(report) => {
                print_summary(&report.summary);
                for path in report.artifacts.paths() {
                    println!("Wrote {}", path.display());
                }
                tracing::info!("Run complete");
                Ok(())
            }
            Err(e) => {
                if let FetchError::Serialization { summary: Some(summary), .. } = &e {
                    print_summary(summary);
                }
                tracing::error!(error = %e, "Run failed");
                Err(e.into())
            }
        },
        _ = shutdown => {
            bail!("interrupted before all schemas were fetched");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::try_parse_from([
            "schema-fetch",
            "--query",
            "SELECT 1",
            "-w",
            "25",
            "--deadline",
            "600",
            "--csv",
            "--group-column",
            "region",
            "--sum-columns",
            "a,b",
            "--sum-name",
            "sum_tests_and_cases",
            "--no-progress",
        ])
        .unwrap();

        let overrides = cli.overrides();
        assert_eq!(overrides.query.as_deref(), Some("SELECT 1"));
        assert_eq!(overrides.max_workers, Some(25));
        assert_eq!(overrides.run_deadline_secs, Some(600));
        assert!(overrides.csv);
        assert_eq!(overrides.group_column.as_deref(), Some("region"));
        assert_eq!(
            overrides.sum_columns,
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(overrides.sum_name.as_deref(), Some("sum_tests_and_cases"));
        assert!(overrides.no_progress);
    }

    #[test]
    fn test_cli_rejects_two_query_sources() {
        let result = Cli::try_parse_from([
            "schema-fetch",
            "--query",
            "SELECT 1",
            "--query-file",
            "q.sql",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_without_arguments() {
        let cli = Cli::try_parse_from(["schema-fetch"]).unwrap();
        assert!(cli.query.is_none());
        assert!(!cli.csv);
    }
}
