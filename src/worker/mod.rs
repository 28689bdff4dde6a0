//! The worker control loop.
//!
//! One job at a time, strictly in this order:
//! 1. Ask the coordinator for work
//! 2. Run the job through the [`ExecutionEngine`]
//! 3. Record the result in the local [`ResultStore`]
//! 4. Post the result back to the coordinator
//!
//! Recording happens before posting so that a crash or a lost submission
//! still leaves a local copy keyed by `(worker_id, job_uuid)`.
//!
//! # Backoff
//!
//! - Empty queue: sleep the short idle interval, then poll again
//! - Coordinator unreachable: log a warning, sleep the full poll interval
//!
//! Any other failure (malformed response, engine error, store error) ends
//! [`Worker::run`] with an error.

pub mod executor;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{SubmissionPolicy, WorkerConfig};
use crate::coordinator::{Coordinator, HttpCoordinator};
use crate::error::Result;
use crate::protocol::{Job, WorkResult, WorkerId};
use crate::store::{ResultStore, SqliteStore};

pub use executor::{CommandEngine, ExecutionEngine};

/// What a single poll ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A job ran and was recorded. `submitted` is false if every post attempt failed.
    Completed { job_uuid: String, submitted: bool },
    Idle,
    Unreachable,
}

/// Counters returned when the loop stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub jobs_completed: u64,
    pub idle_polls: u64,
    pub unreachable: u64,
    pub submission_failures: u64,
}

pub struct Worker {
    id: WorkerId,
    poll_interval: Duration,
    idle_interval: Duration,
    submission: SubmissionPolicy,
    coordinator: Arc<dyn Coordinator>,
    engine: Arc<dyn ExecutionEngine>,
    store: Arc<dyn ResultStore>,
}

impl Worker {
    /// Create a worker with a fresh identity. Performs no I/O.
    pub fn new(
        config: &WorkerConfig,
        coordinator: Arc<dyn Coordinator>,
        engine: Arc<dyn ExecutionEngine>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            id: WorkerId::generate(),
            poll_interval: config.poll_interval(),
            idle_interval: config.idle_interval(),
            submission: config.submission.clone(),
            coordinator,
            engine,
            store,
        }
    }

    /// Wire the HTTPS coordinator, the external scan engine and the SQLite
    /// store described by `config`.
    pub async fn from_config(config: &WorkerConfig) -> Result<Self> {
        config.validate()?;
        let coordinator = HttpCoordinator::new(config).await?;
        let engine = CommandEngine::new(config.engine.clone());
        let db_path = config.db_path.clone();
        let store = tokio::task::spawn_blocking(move || SqliteStore::open(&db_path)).await??;
        Ok(Self::new(
            config,
            Arc::new(coordinator),
            Arc::new(engine),
            Arc::new(store),
        ))
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Run one retrieve / execute / record / submit cycle without sleeping.
    pub async fn poll_once(&self) -> Result<Outcome> {
        let response = match self.coordinator.retrieve_work(&self.id).await {
            Ok(response) => response,
            Err(e) if e.is_recoverable() => {
                tracing::warn!(
                    worker_id = %self.id,
                    error = %e,
                    retry_in_secs = self.poll_interval.as_secs(),
                    "Cannot reach coordinator"
                );
                return Ok(Outcome::Unreachable);
            }
            Err(e) => return Err(e),
        };

        let Some(job) = response.work else {
            return Ok(Outcome::Idle);
        };

        let result = self.perform_work(&job).await?;
        let body = result.to_json();

        self.record(job.uuid(), &body).await?;
        let submitted = self.post_results(job.uuid(), &body).await;

        Ok(Outcome::Completed {
            job_uuid: job.uuid().to_string(),
            submitted,
        })
    }

    async fn perform_work(&self, job: &Job) -> Result<WorkResult> {
        tracing::info!(worker_id = %self.id, job_uuid = job.uuid(), "Started job");
        let result = self.engine.execute(job).await?;
        tracing::info!(worker_id = %self.id, job_uuid = job.uuid(), "Finished job");
        Ok(result)
    }

    /// Store calls may wait on the database lock, so they run off the runtime.
    async fn record(&self, job_uuid: &str, body: &str) -> Result<()> {
        let store = Arc::clone(&self.store);
        let worker_id = self.id;
        let job_uuid = job_uuid.to_string();
        let body = body.to_string();
        tokio::task::spawn_blocking(move || store.record(&worker_id, &job_uuid, &body)).await?
    }

    /// Post a recorded result, retrying per the submission policy.
    ///
    /// Never fails the iteration: the local record already exists.
    async fn post_results(&self, job_uuid: &str, body: &str) -> bool {
        let max_attempts = self.submission.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self
                .coordinator
                .submit_results(&self.id, job_uuid, body)
                .await
            {
                Ok(status) if (200..300).contains(&status) => {
                    tracing::info!(worker_id = %self.id, job_uuid, status, "Posted results");
                    return true;
                }
                Ok(status) => {
                    tracing::warn!(
                        worker_id = %self.id,
                        job_uuid,
                        status,
                        attempt,
                        "Coordinator rejected results"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        worker_id = %self.id,
                        job_uuid,
                        error = %e,
                        attempt,
                        "Failed to post results"
                    );
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.submission.retry_delay()).await;
            }
        }

        tracing::warn!(
            worker_id = %self.id,
            job_uuid,
            attempts = max_attempts,
            "Giving up on result submission; result kept in local store"
        );
        false
    }

    /// Poll until `shutdown` is cancelled.
    ///
    /// Cancellation is checked between iterations and during backoff sleeps; a
    /// job that has started is always executed, recorded and posted first.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<LoopStats> {
        let mut stats = LoopStats::default();
        tracing::info!(worker_id = %self.id, "Worker started");

        while !shutdown.is_cancelled() {
            let backoff = match self.poll_once().await? {
                Outcome::Completed { submitted, .. } => {
                    stats.jobs_completed += 1;
                    if !submitted {
                        stats.submission_failures += 1;
                    }
                    None
                }
                Outcome::Idle => {
                    stats.idle_polls += 1;
                    Some(self.idle_interval)
                }
                Outcome::Unreachable => {
                    stats.unreachable += 1;
                    Some(self.poll_interval)
                }
            };

            if let Some(delay) = backoff {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        tracing::info!(
            worker_id = %self.id,
            jobs_completed = stats.jobs_completed,
            submission_failures = stats.submission_failures,
            "Worker stopped"
        );
        Ok(stats)
    }
}
