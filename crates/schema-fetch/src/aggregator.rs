//! Result aggregation.
//!
//! Outcomes arrive in completion order from many tasks. The aggregator keeps
//! the running counts and the two outcome sequences behind one mutex so an
//! outcome is always counted and stored together, exactly once.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::outcome::{to_micros, FetchOutcome};

/// Default number of completions between progress log lines.
pub const DEFAULT_LOG_EVERY: usize = 100;

/// Final aggregate of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SummaryRecord")]
pub struct Summary {
    /// Number of schemas processed.
    pub total_schemas: usize,

    /// Schemas that returned rows.
    pub successful: usize,

    /// Schemas that failed.
    pub failed: usize,

    /// Wall-clock duration of the run.
    #[serde(rename = "duration_seconds", with = "duration_secs")]
    pub duration: Duration,

    /// Successful outcomes, in completion order.
    pub results: Vec<FetchOutcome>,

    /// Failed outcomes, in completion order.
    pub errors: Vec<FetchOutcome>,
}

impl Summary {
    /// Summary of a run that had nothing to do.
    pub fn empty(duration: Duration) -> Self {
        Self {
            total_schemas: 0,
            successful: 0,
            failed: 0,
            duration: to_micros(duration),
            results: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// All outcomes, successes first.
    pub fn outcomes(&self) -> impl Iterator<Item = &FetchOutcome> {
        self.results.iter().chain(self.errors.iter())
    }

    /// Rows captured across all successful schemas.
    pub fn total_rows(&self) -> usize {
        self.results.iter().filter_map(FetchOutcome::row_count).sum()
    }

    /// Schema names across results and errors, sorted.
    pub fn schema_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.outcomes().map(|o| o.schema.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Check the count invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.total_schemas != self.successful + self.failed {
            return Err(format!(
                "total_schemas {} != successful {} + failed {}",
                self.total_schemas, self.successful, self.failed
            ));
        }
        if self.successful != self.results.len() || self.failed != self.errors.len() {
            return Err(format!(
                "counts ({} successful, {} failed) do not match {} results and {} errors",
                self.successful,
                self.failed,
                self.results.len(),
                self.errors.len()
            ));
        }
        if let Some(bad) = self.results.iter().find(|o| !o.is_success()) {
            return Err(format!("schema {} is in results but failed", bad.schema));
        }
        if let Some(bad) = self.errors.iter().find(|o| o.is_success()) {
            return Err(format!("schema {} is in errors but succeeded", bad.schema));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct SummaryRecord {
    total_schemas: usize,
    successful: usize,
    failed: usize,
    #[serde(with = "duration_secs")]
    duration_seconds: Duration,
    #[serde(default)]
    results: Vec<FetchOutcome>,
    #[serde(default)]
    errors: Vec<FetchOutcome>,
}

impl TryFrom<SummaryRecord> for Summary {
    type Error = String;

    fn try_from(record: SummaryRecord) -> Result<Self, Self::Error> {
        let summary = Summary {
            total_schemas: record.total_schemas,
            successful: record.successful,
            failed: record.failed,
            duration: record.duration_seconds,
            results: record.results,
            errors: record.errors,
        };
        summary.validate()?;
        Ok(summary)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    use crate::outcome::duration_from_secs;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        duration_from_secs(secs).map_err(serde::de::Error::custom)
    }
}

#[derive(Default)]
struct AggregateState {
    successful: usize,
    failed: usize,
    results: Vec<FetchOutcome>,
    errors: Vec<FetchOutcome>,
}

/// Thread-safe accumulator of fetch outcomes.
pub struct ResultAggregator {
    state: Mutex<AggregateState>,
    expected: usize,
    log_every: usize,
}

impl ResultAggregator {
    /// Create an aggregator expecting `expected` outcomes.
    pub fn new(expected: usize) -> Self {
        Self {
            state: Mutex::new(AggregateState::default()),
            expected,
            log_every: DEFAULT_LOG_EVERY,
        }
    }

    /// Log progress every `n` completions (0 disables).
    pub fn with_log_every(mut self, n: usize) -> Self {
        self.log_every = n;
        self
    }

    fn lock(&self) -> MutexGuard<'_, AggregateState> {
        // Appends are the only mutation, so a poisoned state is still whole.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one outcome.
    pub fn record(&self, outcome: FetchOutcome) {
        let mut state = self.lock();
        if outcome.is_success() {
            state.successful += 1;
            state.results.push(outcome);
        } else {
            state.failed += 1;
            state.errors.push(outcome);
        }

        let completed = state.successful + state.failed;
        if self.log_every > 0 && completed % self.log_every == 0 {
            tracing::info!(
                completed,
                total = self.expected,
                successful = state.successful,
                failed = state.failed,
                "Fetch progress"
            );
        }
    }

    /// Outcomes recorded so far.
    pub fn completed(&self) -> usize {
        let state = self.lock();
        state.successful + state.failed
    }

    /// Freeze the aggregate into a summary.
    pub fn finish(self, duration: Duration) -> Summary {
        let state = self
            .state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let total = state.successful + state.failed;

        if total != self.expected {
            tracing::warn!(
                expected = self.expected,
                recorded = total,
                "Outcome count differs from scheduled schema count"
            );
        }

        let duplicates = duplicate_names(&state.results, &state.errors);
        if !duplicates.is_empty() {
            tracing::warn!(schemas = ?duplicates, "Schemas reported more than once");
        }

        Summary {
            total_schemas: total,
            successful: state.successful,
            failed: state.failed,
            duration: to_micros(duration),
            results: state.results,
            errors: state.errors,
        }
    }
}

fn duplicate_names<'a>(results: &'a [FetchOutcome], errors: &'a [FetchOutcome]) -> Vec<&'a str> {
    let mut seen = BTreeSet::new();
    let mut dups = BTreeSet::new();
    for outcome in results.iter().chain(errors) {
        if !seen.insert(outcome.schema.as_str()) {
            dups.insert(outcome.schema.as_str());
        }
    }
    dups.into_iter().collect()
}
