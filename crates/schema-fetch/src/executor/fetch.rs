//! Fetch executor.

use std::sync::Arc;

use schema_drivers::{DriverError, DriverRegistry, Row, SchemaCredential};
use tokio::time::Instant;

use crate::outcome::{FetchFailure, FetchOutcome};
use crate::progress::{ActiveTask, ProgressTracker, TaskState};

/// Runs the fixed query against one schema at a time.
///
/// Shared by every task of a run; all per-call state lives on the stack.
pub struct FetchExecutor {
    /// Connection factory.
    registry: Arc<DriverRegistry>,

    /// Query executed against every schema.
    query: Arc<str>,

    /// Progress registry.
    progress: Arc<ProgressTracker>,
}

impl FetchExecutor {
    /// Create a new fetch executor.
    pub fn new(
        registry: Arc<DriverRegistry>,
        query: impl Into<Arc<str>>,
        progress: Arc<ProgressTracker>,
    ) -> Self {
        Self {
            registry,
            query: query.into(),
            progress,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    /// Fetch one schema.
    ///
    /// The caller must hold a worker slot for the duration of the call.
    /// Every failure is folded into the returned outcome.
    pub async fn execute(&self, credential: &SchemaCredential) -> FetchOutcome {
        let start = Instant::now();
        let task = self.progress.start(&credential.schema);

        let result = self.fetch(credential, &task).await;
        task.set(TaskState::Completed);
        let elapsed = start.elapsed();

        match result {
            Ok(rows) => {
                tracing::debug!(
                    schema = %credential.schema,
                    rows = rows.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Schema fetched"
                );
                FetchOutcome::success(&credential.schema, rows, elapsed)
            }
            Err(e) => {
                tracing::warn!(
                    schema = %credential.schema,
                    host = %credential.host,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %e,
                    "Schema fetch failed"
                );
                FetchOutcome::failure(&credential.schema, FetchFailure::from(e), elapsed)
            }
        }
    }

    async fn fetch(
        &self,
        credential: &SchemaCredential,
        task: &ActiveTask,
    ) -> Result<Vec<Row>, DriverError> {
        let mut conn = self.registry.connect(credential).await?;

        task.set(TaskState::Querying);
        let result = conn.fetch_rows(&self.query).await;

        // Release on every path; a close failure does not change the outcome.
        if let Err(e) = conn.close().await {
            tracing::debug!(schema = %credential.schema, error = %e, "Close failed");
        }

        result
    }
}
