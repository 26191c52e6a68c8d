//! Live progress tracking.
//!
//! Fetch tasks register themselves while they hold a worker slot. A
//! background ticker periodically dumps the registry to a JSON snapshot so an
//! operator can see which schemas are in flight and for how long.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::RunResult;
use crate::report::write_atomic;

/// Default snapshot file name.
pub const DEFAULT_PROGRESS_FILE: &str = "thread_progress.json";

/// Default interval between snapshots.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Lifecycle of a fetch task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Connecting,
    Querying,
    Completed,
}

/// One in-flight task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEntry {
    pub state: TaskState,
    pub started_at: DateTime<Utc>,
}

/// Point-in-time view of the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub timestamp: DateTime<Utc>,
    pub active_tasks: usize,
    pub peak_active: usize,
    pub completed: usize,
    pub tasks: BTreeMap<String, TaskEntry>,
}

#[derive(Default)]
struct TrackerState {
    tasks: BTreeMap<String, TaskEntry>,
    peak_active: usize,
    completed: usize,
}

/// Shared registry of active fetch tasks.
#[derive(Default)]
pub struct ProgressTracker {
    state: Mutex<TrackerState>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `schema` as connecting. The task is marked completed when the
    /// returned handle is dropped, including on panic or abort.
    pub fn start(self: &Arc<Self>, schema: &str) -> ActiveTask {
        let mut state = self.lock();
        state.tasks.insert(
            schema.to_string(),
            TaskEntry {
                state: TaskState::Connecting,
                started_at: Utc::now(),
            },
        );
        state.peak_active = state.peak_active.max(state.tasks.len());
        drop(state);

        ActiveTask {
            tracker: Arc::clone(self),
            schema: schema.to_string(),
        }
    }

    fn set_state(&self, schema: &str, task_state: TaskState) {
        let mut state = self.lock();
        if task_state == TaskState::Completed {
            if state.tasks.remove(schema).is_some() {
                state.completed += 1;
            }
        } else if let Some(entry) = state.tasks.get_mut(schema) {
            entry.state = task_state;
        }
    }

    /// Tasks currently holding a slot.
    pub fn active(&self) -> usize {
        self.lock().tasks.len()
    }

    /// Highest number of simultaneously active tasks seen.
    pub fn peak_active(&self) -> usize {
        self.lock().peak_active
    }

    /// Tasks that reached the completed state.
    pub fn completed(&self) -> usize {
        self.lock().completed
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.lock();
        ProgressSnapshot {
            timestamp: Utc::now(),
            active_tasks: state.tasks.len(),
            peak_active: state.peak_active,
            completed: state.completed,
            tasks: state.tasks.clone(),
        }
    }

    /// Write a snapshot to `path`.
    pub fn write_snapshot(&self, path: &Path) -> RunResult<()> {
        let body = serde_json::to_vec_pretty(&self.snapshot())?;
        write_atomic(path, |w| w.write_all(&body))?;
        Ok(())
    }

    /// Start the periodic snapshot writer.
    pub fn start_ticker(self: &Arc<Self>, path: PathBuf, interval: Duration) -> JoinHandle<()> {
        let tracker = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // Skip first immediate tick

            loop {
                ticker.tick().await;

                if let Err(e) = tracker.write_snapshot(&path) {
                    tracing::warn!(path = %path.display(), error = %e, "Progress snapshot failed");
                } else {
                    tracing::trace!(active = tracker.active(), "Progress snapshot written");
                }
            }
        })
    }
}

/// Registration of one running task.
pub struct ActiveTask {
    tracker: Arc<ProgressTracker>,
    schema: String,
}

impl ActiveTask {
    /// Move the task to `state`.
    pub fn set(&self, state: TaskState) {
        self.tracker.set_state(&self.schema, state);
    }
}

impl Drop for ActiveTask {
    fn drop(&mut self) {
        self.tracker.set_state(&self.schema, TaskState::Completed);
    }
}
