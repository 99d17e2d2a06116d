//! Worker: the poll loop that claims jobs from one queue and runs them.
//!
//! A worker processes strictly one job at a time. Run more workers (in this
//! process or others) against the same database for parallelism; they
//! coordinate only through the store's conditional updates.

mod execute;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use opentelemetry::KeyValue;
use serde::Deserialize;
use tokio::sync::Notify;
use tracing::{Instrument, Span, error, info, warn};

use crate::codec::{self, Failure, FailureKind};
use crate::config::DEFAULT_POLL_INTERVAL;
use crate::db::Db;
use crate::error::{Error, Result};
use crate::model::{JobId, Status};
use crate::registry::Registry;
use crate::telemetry::job::{record_state_transition, start_job_span};
use crate::telemetry::metrics;

use execute::Execution;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for a worker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Name used in logs.
    pub worker_id: String,
    /// Idle wait after a poll that found nothing.
    pub poll_interval_ms: u64,
    /// Stop `run` after this many consecutive failed polls. `None` keeps
    /// retrying forever.
    pub max_consecutive_errors: Option<u32>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", std::process::id()),
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            max_consecutive_errors: None,
        }
    }
}

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct WorkerFile {
    #[serde(default)]
    worker: WorkerConfig,
}

impl WorkerConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Load from a TOML file with a `[worker]` table. Missing keys keep
    /// their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read worker config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("bad worker config {}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let file: WorkerFile =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        Ok(file.worker)
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Claims and executes jobs from a single queue.
///
/// Cloning yields a handle to the same worker; `shutdown` on any clone stops
/// the loop.
#[derive(Clone)]
pub struct Worker {
    db: Arc<Db>,
    queue: String,
    registry: Arc<Registry>,
    config: WorkerConfig,
    stopping: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl Worker {
    pub fn new(
        db: Arc<Db>,
        queue: impl Into<String>,
        registry: Arc<Registry>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            db,
            queue: queue.into(),
            registry,
            config,
            stopping: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Ask the loop to stop. Takes effect between iterations; a job already
    /// executing runs to completion.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Run the poll loop until [`shutdown`](Self::shutdown).
    ///
    /// Per-job failures never end the loop. Store errors are logged and the
    /// next poll is attempted after the usual interval, unless
    /// `max_consecutive_errors` is set and reached.
    pub async fn run(&self) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            queue = %self.queue,
            functions = ?self.registry.names(),
            "worker started"
        );

        let mut consecutive_errors: u32 = 0;
        while !self.is_stopping() {
            match self.run_once().await {
                // Busy queue: go straight back for the next job.
                Ok(Some(_)) => {
                    consecutive_errors = 0;
                    continue;
                }
                Ok(None) => consecutive_errors = 0,
                Err(e) => {
                    consecutive_errors += 1;
                    metrics::poll_errors().add(1, &[KeyValue::new("queue", self.queue.clone())]);
                    error!(
                        worker_id = %self.config.worker_id,
                        queue = %self.queue,
                        consecutive_errors,
                        "poll failed: {e}"
                    );
                    if self
                        .config
                        .max_consecutive_errors
                        .is_some_and(|max| consecutive_errors >= max)
                    {
                        return Err(e);
                    }
                }
            }

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }

        info!(worker_id = %self.config.worker_id, queue = %self.queue, "worker stopped");
        Ok(())
    }

    /// One loop iteration: claim a job and, if there was one, process it.
    pub async fn run_once(&self) -> Result<Option<(JobId, Status)>> {
        let Some(id) = self.claim_next().await? else {
            return Ok(None);
        };
        let status = self.process(id).await?;
        Ok(Some((id, status)))
    }

    /// Claim the oldest pending job in this worker's queue.
    pub async fn claim_next(&self) -> Result<Option<JobId>> {
        self.db.claim_next(&self.queue).await
    }

    /// Execute a claimed (running) job and record its terminal status.
    ///
    /// Returns the terminal status written. An `Err` means the store could
    /// not be read or written; job-level failures are recorded as `Failed`.
    pub async fn process(&self, id: JobId) -> Result<Status> {
        let span = start_job_span(&self.queue, &id);
        self.process_in_span(id, &span)
            .instrument(span.clone())
            .await
    }

    async fn process_in_span(&self, id: JobId, span: &Span) -> Result<Status> {
        let job = self.db.get_job(id).await?;
        if job.status != Status::Running {
            return Err(Error::InvalidTransition {
                from: job.status.to_string(),
                to: "completed|failed".to_string(),
            });
        }
        record_state_transition(span, Status::Pending, Status::Running);

        let execution = execute::execute(&self.registry, &job.payload, span).await;
        self.finalize(id, execution, span).await
    }

    /// Write the terminal status for an execution.
    async fn finalize(&self, id: JobId, execution: Execution, span: &Span) -> Result<Status> {
        let duration_ms = execution.duration_ms();
        let function = execution.function.unwrap_or_default();

        let outcome = execution
            .outcome
            .and_then(|value| codec::encode(&value).map_err(|e| Failure::from(&e)));

        let status = match outcome {
            Ok(bytes) => match self.db.complete_job(id, &bytes).await {
                Ok(_) => {
                    info!(function = %function, duration_ms, "job completed");
                    Status::Completed
                }
                Err(e) => {
                    // Don't leave the job running if the result write alone failed.
                    warn!(function = %function, "could not record result: {e}");
                    let failure =
                        Failure::new(FailureKind::Store, format!("could not record result: {e}"));
                    self.db.fail_job(id, &codec::encode(&failure)?).await.map_err(|_| e)?;
                    Status::Failed
                }
            },
            Err(failure) => {
                warn!(
                    function = %function,
                    kind = %failure.kind,
                    duration_ms,
                    "job failed: {}",
                    failure.message
                );
                self.db.fail_job(id, &codec::encode(&failure)?).await?;
                Status::Failed
            }
        };

        record_state_transition(span, Status::Running, status);
        metrics::job_duration_ms().record(
            duration_ms as f64,
            &[
                KeyValue::new("function", function),
                KeyValue::new("status", status.to_string()),
            ],
        );
        Ok(status)
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("queue", &self.queue)
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("stopping", &self.is_stopping())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::codec::Arguments;
    use crate::model::JobResult;
    use serde_json::json;

    async fn test_db() -> Arc<Db> {
        let db = Db::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        Arc::new(db)
    }

    #[tokio::test]
    async fn rejected_result_write_falls_back_to_failed() {
        let db = test_db().await;
        sqlx::query(
            "CREATE TRIGGER reject_completed BEFORE UPDATE OF status ON jobs \
             WHEN NEW.status = 'completed' \
             BEGIN SELECT RAISE(ABORT, 'disk full'); END",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let client = Client::new(Arc::clone(&db), "default");
        let id = client
            .enqueue("add", Arguments::new().arg(1).arg(2))
            .await
            .unwrap();

        let registry = Registry::new().register("add", |args: Arguments| {
            Ok(json!(args.get::<i64>(0)? + args.get::<i64>(1)?))
        });
        let worker = Worker::new(
            Arc::clone(&db),
            "default",
            Arc::new(registry),
            WorkerConfig::default(),
        );

        assert_eq!(worker.run_once().await.unwrap(), Some((id, Status::Failed)));
        match client.get_result(id).await.unwrap() {
            JobResult::Failed(failure) => {
                assert_eq!(failure.kind, FailureKind::Store);
                assert!(failure.message.contains("could not record result"));
                assert!(failure.message.contains("disk full"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn worker_config_reads_toml_table() {
        let config = WorkerConfig::from_toml(
            r#"
            [worker]
            worker_id = "w-1"
            poll_interval_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.worker_id, "w-1");
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.max_consecutive_errors, None);
    }

    #[test]
    fn worker_config_defaults_missing_keys() {
        let config = WorkerConfig::from_toml("").unwrap();
        assert_eq!(config.poll_interval(), DEFAULT_POLL_INTERVAL);
        assert!(config.worker_id.starts_with("worker-"));
    }

    #[test]
    fn worker_config_rejects_bad_types() {
        let err = WorkerConfig::from_toml("[worker]\npoll_interval_ms = \"fast\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
