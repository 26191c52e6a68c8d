//! Run configuration.
//!
//! Values come from, highest precedence first: command-line overrides,
//! environment variables (`META_DB_*` for the meta database, `FETCH_*` for the
//! run), then defaults. The binary loads a `.env` file into the environment
//! before any of this runs.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use schema_drivers::{DatabaseKind, SchemaCredential};
use serde::{Deserialize, Deserializer};

use crate::aggregator::DEFAULT_LOG_EVERY;
use crate::error::{FetchError, RunResult};
use crate::progress::{DEFAULT_PROGRESS_FILE, DEFAULT_PROGRESS_INTERVAL};
use crate::report::{
    DEFAULT_CSV_FILE, DEFAULT_STATS_FILE, DEFAULT_SUMMARY_FILE, DEFAULT_SUM_COLUMN,
};

/// Default credential enumeration query.
pub const DEFAULT_CREDENTIALS_QUERY: &str = "SELECT * FROM schema_credentials";

/// Default number of concurrent fetches.
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Meta database connection settings.
///
/// Environment variables are prefixed with `META_DB_`:
/// - `META_DB_TYPE`: `mysql` or `postgres` (default: "mysql")
/// - `META_DB_HOST`: Database host (default: "localhost")
/// - `META_DB_PORT`: Database port (default: the kind's port)
/// - `META_DB_USER`: Database user (default: "root")
/// - `META_DB_PASSWORD`: Database password
/// - `META_DB_DATABASE`: Database name (default: "meta")
#[derive(Clone, Deserialize)]
pub struct MetaDbConfig {
    /// Database engine
    #[serde(rename = "type", default = "default_kind", deserialize_with = "de_kind")]
    pub kind: DatabaseKind,

    /// Database host
    #[serde(default = "default_host")]
    pub host: String,

    /// Database port
    #[serde(default)]
    pub port: Option<u16>,

    /// Database user
    #[serde(default = "default_user")]
    pub user: String,

    /// Database password
    #[serde(default)]
    pub password: String,

    /// Database name
    #[serde(default = "default_database")]
    pub database: String,
}

fn default_kind() -> DatabaseKind {
    DatabaseKind::Mysql
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_user() -> String {
    "root".to_string()
}

fn default_database() -> String {
    "meta".to_string()
}

fn de_kind<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DatabaseKind, D::Error> {
    let raw = String::deserialize(deserializer)?;
    DatabaseKind::from_str(&raw).map_err(serde::de::Error::custom)
}

impl MetaDbConfig {
    /// Load configuration from `META_DB_*` variables.
    pub fn from_env() -> RunResult<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Load configuration from an explicit variable list.
    pub fn from_vars<I>(vars: I) -> RunResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::prefixed("META_DB_").from_iter(vars)?)
    }

    /// Port, falling back to the kind's default.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.kind.default_port())
    }

    /// Credential used to open the meta connection.
    pub fn credential(&self) -> SchemaCredential {
        SchemaCredential::new(
            &self.database,
            self.kind,
            &self.host,
            &self.user,
            &self.password,
        )
        .with_port(self.port())
    }
}

impl Default for MetaDbConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            host: default_host(),
            port: None,
            user: default_user(),
            password: String::new(),
            database: default_database(),
        }
    }
}

impl fmt::Debug for MetaDbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaDbConfig")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port())
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

/// `FETCH_*` variables, all optional.
#[derive(Debug, Default, Deserialize)]
struct FetchEnv {
    query: Option<String>,
    credentials_query: Option<String>,
    schema_db_type: Option<String>,
    max_workers: Option<usize>,
    connect_timeout_secs: Option<u64>,
    run_deadline_secs: Option<u64>,
    output_dir: Option<PathBuf>,
    output_file: Option<String>,
    csv: Option<bool>,
    group_column: Option<String>,
    csv_file: Option<String>,
    stats: Option<bool>,
    stats_file: Option<String>,
    stats_sum_columns: Option<String>,
    stats_sum_name: Option<String>,
    progress: Option<bool>,
    progress_file: Option<String>,
    progress_interval_secs: Option<u64>,
    log_dir: Option<PathBuf>,
    progress_log_every: Option<usize>,
}

/// Values supplied on the command line. `None` leaves the environment value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub query: Option<String>,
    pub query_file: Option<PathBuf>,
    pub max_workers: Option<usize>,
    pub connect_timeout_secs: Option<u64>,
    pub run_deadline_secs: Option<u64>,
    pub output_dir: Option<PathBuf>,
    pub output_file: Option<String>,
    pub csv: bool,
    pub group_column: Option<String>,
    pub csv_file: Option<String>,
    pub stats: bool,
    pub stats_file: Option<String>,
    pub sum_columns: Option<Vec<String>>,
    pub sum_name: Option<String>,
    pub no_progress: bool,
    pub log_dir: Option<PathBuf>,
}

/// Complete, validated run configuration.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Where credentials live.
    pub meta: MetaDbConfig,

    /// Query run against every schema.
    pub query: String,

    /// Query listing schema credentials in the meta database.
    pub credentials_query: String,

    /// Kind assumed for credential rows that do not carry one.
    pub schema_kind: DatabaseKind,

    /// Maximum concurrent fetches.
    pub max_workers: usize,

    /// Per-connection connect timeout.
    pub connect_timeout: Duration,

    /// Optional limit on the whole run.
    pub run_deadline: Option<Duration>,

    /// Directory receiving every artifact.
    pub output_dir: PathBuf,

    /// JSON summary file name.
    pub output_file: String,

    /// Write the CSV export.
    pub csv: bool,

    /// Split the CSV export by this column.
    pub group_column: Option<String>,

    /// CSV file name when not grouped.
    pub csv_file: String,

    /// Write the stats export.
    pub stats: bool,

    /// Stats file name.
    pub stats_file: String,

    /// Columns added into the stats sum column.
    pub sum_columns: Vec<String>,

    /// Header of the stats sum column.
    pub sum_name: String,

    /// Write progress snapshots.
    pub progress: bool,

    /// Progress snapshot file name.
    pub progress_file: String,

    /// Interval between progress snapshots.
    pub progress_interval: Duration,

    /// Directory for the log file.
    pub log_dir: PathBuf,

    /// Completions between aggregator progress log lines.
    pub log_every: usize,
}

impl FetchConfig {
    /// Configuration with defaults for everything but the meta database and query.
    pub fn new(meta: MetaDbConfig, query: impl Into<String>) -> Self {
        let schema_kind = meta.kind;
        Self {
            meta,
            query: query.into(),
            credentials_query: DEFAULT_CREDENTIALS_QUERY.to_string(),
            schema_kind,
            max_workers: DEFAULT_MAX_WORKERS,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            run_deadline: None,
            output_dir: PathBuf::from("."),
            output_file: DEFAULT_SUMMARY_FILE.to_string(),
            csv: false,
            group_column: None,
            csv_file: DEFAULT_CSV_FILE.to_string(),
            stats: false,
            stats_file: DEFAULT_STATS_FILE.to_string(),
            sum_columns: Vec::new(),
            sum_name: DEFAULT_SUM_COLUMN.to_string(),
            progress: true,
            progress_file: DEFAULT_PROGRESS_FILE.to_string(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            log_dir: PathBuf::from("."),
            log_every: DEFAULT_LOG_EVERY,
        }
    }

    /// Load from the process environment and apply `overrides`.
    pub fn from_env(overrides: ConfigOverrides) -> RunResult<Self> {
        Self::from_vars(std::env::vars(), overrides)
    }

    /// Load from an explicit variable list and apply `overrides`.
    pub fn from_vars<I>(vars: I, overrides: ConfigOverrides) -> RunResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: Vec<(String, String)> = vars.into_iter().collect();
        let meta = MetaDbConfig::from_vars(vars.iter().cloned())?;
        let env: FetchEnv = envy::prefixed("FETCH_").from_iter(vars)?;

        let query = match (overrides.query, &overrides.query_file) {
            (Some(query), _) => query,
            (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| {
                FetchError::Config(format!("cannot read query file {}: {}", path.display(), e))
            })?,
            (None, None) => env.query.unwrap_or_default(),
        };

        let mut config = Self::new(meta, query.trim());

        if let Some(q) = env.credentials_query {
            config.credentials_query = q;
        }
        if let Some(kind) = env.schema_db_type {
            config.schema_kind = DatabaseKind::from_str(&kind)
                .map_err(|e| FetchError::Config(format!("FETCH_SCHEMA_DB_TYPE: {}", e)))?;
        }
        if let Some(n) = overrides.max_workers.or(env.max_workers) {
            config.max_workers = n;
        }
        if let Some(secs) = overrides.connect_timeout_secs.or(env.connect_timeout_secs) {
            config.connect_timeout = Duration::from_secs(secs);
        }
        config.run_deadline = overrides
            .run_deadline_secs
            .or(env.run_deadline_secs)
            .map(Duration::from_secs);
        if let Some(dir) = overrides.output_dir.or(env.output_dir) {
            config.output_dir = dir;
        }
        if let Some(file) = overrides.output_file.or(env.output_file) {
            config.output_file = file;
        }

        config.csv = overrides.csv || env.csv.unwrap_or(false);
        config.group_column = overrides
            .group_column
            .or(env.group_column)
            .filter(|c| !c.trim().is_empty());
        if let Some(file) = overrides.csv_file.or(env.csv_file) {
            config.csv_file = file;
        }

        config.stats = overrides.stats || env.stats.unwrap_or(false);
        if let Some(file) = overrides.stats_file.or(env.stats_file) {
            config.stats_file = file;
        }
        config.sum_columns = match overrides.sum_columns {
            Some(columns) => columns,
            None => env.stats_sum_columns.as_deref().map(split_list).unwrap_or_default(),
        };
        if let Some(name) = overrides.sum_name.or(env.stats_sum_name) {
            config.sum_name = name.trim().to_string();
        }

        config.progress = !overrides.no_progress && env.progress.unwrap_or(true);
        if let Some(file) = env.progress_file {
            config.progress_file = file;
        }
        if let Some(secs) = env.progress_interval_secs {
            config.progress_interval = Duration::from_secs(secs);
        }
        if let Some(dir) = overrides.log_dir.or(env.log_dir) {
            config.log_dir = dir;
        }
        if let Some(n) = env.progress_log_every {
            config.log_every = n;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations a run cannot start with.
    pub fn validate(&self) -> RunResult<()> {
        if self.query.trim().is_empty() {
            return Err(FetchError::Config(
                "no query configured (set FETCH_QUERY, --query or --query-file)".to_string(),
            ));
        }
        if self.credentials_query.trim().is_empty() {
            return Err(FetchError::Config("credentials query is empty".to_string()));
        }
        if self.max_workers == 0 {
            return Err(FetchError::Config("max workers must be at least 1".to_string()));
        }
        if self.connect_timeout.is_zero() {
            return Err(FetchError::Config(
                "connect timeout must be greater than zero".to_string(),
            ));
        }
        if self.run_deadline.is_some_and(|d| d.is_zero()) {
            return Err(FetchError::Config(
                "run deadline must be greater than zero".to_string(),
            ));
        }
        if self.progress && self.progress_interval.is_zero() {
            return Err(FetchError::Config(
                "progress interval must be greater than zero".to_string(),
            ));
        }
        if self.stats && !self.sum_columns.is_empty() && self.sum_name.trim().is_empty() {
            return Err(FetchError::Config("stats sum column name is empty".to_string()));
        }
        for name in [
            &self.output_file,
            &self.csv_file,
            &self.stats_file,
            &self.progress_file,
        ] {
            if name.trim().is_empty() || name.contains(['/', '\\']) {
                return Err(FetchError::Config(format!("invalid output file name '{}'", name)));
            }
        }
        Ok(())
    }
}

/// Split a comma separated list, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
