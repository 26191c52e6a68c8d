//! Bounded fan-out over schemas.

use std::sync::Arc;
use std::time::Duration;

use schema_drivers::SchemaCredential;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::aggregator::{ResultAggregator, Summary, DEFAULT_LOG_EVERY};
use crate::executor::FetchExecutor;
use crate::outcome::{FailureKind, FetchFailure, FetchOutcome};

/// Runs one fetch task per schema with at most `max_workers` in flight.
pub struct FetchPool {
    /// Per-schema executor shared by all tasks.
    executor: Arc<FetchExecutor>,

    /// Concurrency limit.
    max_workers: usize,

    /// Optional limit on the whole run.
    deadline: Option<Duration>,

    /// Aggregator progress log interval.
    log_every: usize,
}

impl FetchPool {
    /// Create a pool. `max_workers` is clamped to at least one.
    pub fn new(executor: FetchExecutor, max_workers: usize) -> Self {
        Self {
            executor: Arc::new(executor),
            max_workers: max_workers.max(1),
            deadline: None,
            log_every: DEFAULT_LOG_EVERY,
        }
    }

    /// Stop scheduling and cancel outstanding schemas once `deadline` has
    /// elapsed since the start of [`run`](Self::run).
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_log_every(mut self, log_every: usize) -> Self {
        self.log_every = log_every;
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Fetch every schema and aggregate the outcomes.
    ///
    /// Exactly one outcome is produced per credential, whatever happens to
    /// the task that handles it.
    pub async fn run(&self, credentials: Vec<SchemaCredential>) -> Summary {
        let start = Instant::now();
        let total = credentials.len();
        let aggregator = ResultAggregator::new(total).with_log_every(self.log_every);

        if total == 0 {
            tracing::info!("No schemas to fetch");
            return aggregator.finish(start.elapsed());
        }

        tracing::info!(
            schemas = total,
            workers = self.max_workers,
            deadline_secs = self.deadline.map(|d| d.as_secs_f64()),
            "Starting fetch"
        );

        let names: Vec<String> = credentials.iter().map(|c| c.schema.clone()).collect();
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, FetchOutcome)>();
        let mut tasks = JoinSet::new();

        for (index, credential) in credentials.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let executor = self.executor.clone();
            let tx = tx.clone();

            tasks.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    // Slot is held until the outcome is built.
                    Ok(_permit) => executor.execute(&credential).await,
                    Err(e) => FetchOutcome::failure(
                        &credential.schema,
                        FetchFailure::new(FailureKind::Internal, format!("worker slot unavailable: {e}")),
                        Duration::ZERO,
                    ),
                };

                if tx.send((index, outcome)).is_err() {
                    tracing::debug!(schema = %credential.schema, "Coordinator gone, outcome dropped");
                }
            });
        }
        drop(tx);

        let mut reported = vec![false; total];
        // A deadline past what the clock can represent never fires.
        let expired = match self.deadline.and_then(|limit| start.checked_add(limit)) {
            Some(deadline) => {
                tokio::time::timeout_at(deadline, collect(&mut rx, &aggregator, &mut reported))
                    .await
                    .is_err()
            }
            None => {
                collect(&mut rx, &aggregator, &mut reported).await;
                false
            }
        };

        if expired {
            tracing::warn!(
                completed = aggregator.completed(),
                total,
                "Run deadline exceeded, cancelling remaining schemas"
            );
            tasks.abort_all();
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    tracing::error!(error = %e, "Fetch task panicked");
                }
            }
        }

        // Every sender is gone now; pick up anything sent before the tasks ended.
        collect(&mut rx, &aggregator, &mut reported).await;

        let (kind, message) = if expired {
            (FailureKind::Cancelled, "run deadline exceeded")
        } else {
            (FailureKind::Internal, "fetch task terminated without producing an outcome")
        };
        for (index, done) in reported.iter().enumerate() {
            if !done {
                aggregator.record(FetchOutcome::failure(
                    &names[index],
                    FetchFailure::new(kind, message),
                    Duration::ZERO,
                ));
            }
        }

        let summary = aggregator.finish(start.elapsed());
        tracing::info!(
            total = summary.total_schemas,
            successful = summary.successful,
            failed = summary.failed,
            elapsed_ms = summary.duration.as_millis() as u64,
            "Fetch complete"
        );
        summary
    }
}

async fn collect(
    rx: &mut mpsc::UnboundedReceiver<(usize, FetchOutcome)>,
    aggregator: &ResultAggregator,
    reported: &mut [bool],
) {
    while let Some((index, outcome)) = rx.recv().await {
        reported[index] = true;
        aggregator.record(outcome);
    }
}
