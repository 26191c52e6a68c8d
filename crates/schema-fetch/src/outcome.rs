//! Per-schema fetch outcome types.

use std::fmt;
use std::time::Duration;

use schema_drivers::{DriverError, Row};
use serde::{Deserialize, Serialize, Serializer};

/// Clamp a duration to whole microseconds, the precision kept in artifacts.
pub(crate) fn to_micros(d: Duration) -> Duration {
    Duration::from_micros(u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
}

/// Decode fractional seconds at microsecond precision.
pub(crate) fn duration_from_secs(secs: f64) -> Result<Duration, String> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("invalid duration {}", secs));
    }
    Ok(Duration::from_micros((secs * 1e6).round() as u64))
}

/// Status of a schema fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    /// Rows were captured.
    Success,
    /// The schema could not be fetched.
    Error,
}

impl FetchStatus {
    /// Returns true if the status indicates success.
    pub fn is_success(&self) -> bool {
        matches!(self, FetchStatus::Success)
    }

    /// Returns true if the status indicates an error.
    pub fn is_error(&self) -> bool {
        matches!(self, FetchStatus::Error)
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchStatus::Success => write!(f, "success"),
            FetchStatus::Error => write!(f, "error"),
        }
    }
}

/// Why a schema fetch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connect attempt exceeded the connect timeout.
    Timeout,
    /// Credentials rejected.
    Authentication,
    /// Socket or TLS failure.
    Network,
    /// Other connection failure.
    Connection,
    /// The query failed.
    Query,
    /// Unusable credential (unknown database kind, bad parameters).
    Configuration,
    /// Stopped by the run deadline.
    Cancelled,
    /// The task ended without reporting.
    Internal,
}

impl FailureKind {
    /// Stable snake_case tag, as written to artifacts.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Authentication => "authentication",
            FailureKind::Network => "network",
            FailureKind::Connection => "connection",
            FailureKind::Query => "query",
            FailureKind::Configuration => "configuration",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        }
    }

    /// Connection-phase failures, as opposed to query or run-level ones.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            FailureKind::Timeout
                | FailureKind::Authentication
                | FailureKind::Network
                | FailureKind::Connection
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&DriverError> for FailureKind {
    fn from(err: &DriverError) -> Self {
        match err {
            DriverError::Timeout(_) => FailureKind::Timeout,
            DriverError::Auth(_) => FailureKind::Authentication,
            DriverError::Network(_) => FailureKind::Network,
            DriverError::Connection(_) => FailureKind::Connection,
            DriverError::Query(_) => FailureKind::Query,
            DriverError::Unsupported(_) | DriverError::Configuration(_) => {
                FailureKind::Configuration
            }
        }
    }
}

/// Error description of a failed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<DriverError> for FetchFailure {
    fn from(err: DriverError) -> Self {
        Self {
            kind: FailureKind::from(&err),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Rows or an error, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    Success { rows: Vec<Row> },
    Error(FetchFailure),
}

/// Result of processing one schema.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "OutcomeRecord")]
pub struct FetchOutcome {
    /// Schema name.
    pub schema: String,

    /// Time spent connecting and querying.
    pub elapsed: Duration,

    /// Captured rows or failure.
    pub result: FetchResult,
}

impl FetchOutcome {
    /// Create a successful outcome.
    pub fn success(schema: impl Into<String>, rows: Vec<Row>, elapsed: Duration) -> Self {
        Self {
            schema: schema.into(),
            elapsed: to_micros(elapsed),
            result: FetchResult::Success { rows },
        }
    }

    /// Create a failed outcome.
    pub fn failure(schema: impl Into<String>, failure: FetchFailure, elapsed: Duration) -> Self {
        Self {
            schema: schema.into(),
            elapsed: to_micros(elapsed),
            result: FetchResult::Error(failure),
        }
    }

    pub fn status(&self) -> FetchStatus {
        match self.result {
            FetchResult::Success { .. } => FetchStatus::Success,
            FetchResult::Error(_) => FetchStatus::Error,
        }
    }

    /// Returns true if the outcome indicates success.
    pub fn is_success(&self) -> bool {
        self.status().is_success()
    }

    /// Captured rows; `None` for failures.
    pub fn rows(&self) -> Option<&[Row]> {
        match &self.result {
            FetchResult::Success { rows } => Some(rows),
            FetchResult::Error(_) => None,
        }
    }

    /// Number of captured rows; `None` for failures.
    pub fn row_count(&self) -> Option<usize> {
        self.rows().map(<[Row]>::len)
    }

    /// Failure description; `None` for successes.
    pub fn failure_info(&self) -> Option<&FetchFailure> {
        match &self.result {
            FetchResult::Success { .. } => None,
            FetchResult::Error(failure) => Some(failure),
        }
    }
}

/// Borrowed wire form, so serializing a large outcome never clones its rows.
#[derive(Serialize)]
struct OutcomeRecordRef<'a> {
    schema: &'a str,
    status: FetchStatus,
    elapsed_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a [Row]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

#[derive(Deserialize)]
struct OutcomeRecord {
    schema: String,
    status: FetchStatus,
    #[serde(default)]
    elapsed_seconds: f64,
    #[serde(default)]
    row_count: Option<usize>,
    #[serde(default)]
    data: Option<Vec<Row>>,
    #[serde(default)]
    error_kind: Option<FailureKind>,
    #[serde(default)]
    error: Option<String>,
}

impl Serialize for FetchOutcome {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let failure = self.failure_info();
        OutcomeRecordRef {
            schema: &self.schema,
            status: self.status(),
            elapsed_seconds: self.elapsed.as_secs_f64(),
            row_count: self.row_count(),
            data: self.rows(),
            error_kind: failure.map(|f| f.kind),
            error: failure.map(|f| f.message.as_str()),
        }
        .serialize(serializer)
    }
}

impl TryFrom<OutcomeRecord> for FetchOutcome {
    type Error = String;

    fn try_from(record: OutcomeRecord) -> Result<Self, Self::Error> {
        let elapsed = duration_from_secs(record.elapsed_seconds)
            .map_err(|e| format!("schema {}: elapsed_seconds: {}", record.schema, e))?;

        let result = match (record.status, record.data, record.error) {
            (FetchStatus::Success, Some(rows), None) => {
                if let Some(count) = record.row_count {
                    if count != rows.len() {
                        return Err(format!(
                            "schema {}: row_count {} does not match {} data rows",
                            record.schema,
                            count,
                            rows.len()
                        ));
                    }
                }
                FetchResult::Success { rows }
            }
            (FetchStatus::Error, None, Some(message)) => FetchResult::Error(FetchFailure {
                kind: record.error_kind.unwrap_or(FailureKind::Internal),
                message,
            }),
            (status, _, _) => {
                return Err(format!(
                    "schema {}: a {} outcome needs {} and nothing else",
                    record.schema,
                    status,
                    if status.is_success() { "data" } else { "an error" }
                ));
            }
        };

        Ok(Self {
            schema: record.schema,
            elapsed,
            result,
        })
    }
}
