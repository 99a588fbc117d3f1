//! Queue worker: claim, calibrate, terminate.
//!
//! Workers are stateless and coordinate only through the store's atomic
//! renames, so any number of them can run in parallel processes against
//! the same queue. The processing boundary is per job: a calibration
//! failure (or any other error while handling one job) moves that job to
//! `error/` and the loop continues; a single bad job never ends a
//! worker.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::calibration::{Calibrator, ModelTransport};
use crate::store::{Job, JobOutcome, JobStore, StoreError};

/// Outcome counts of one batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// Jobs that completed calibration.
    pub succeeded: usize,
    /// Jobs that terminated in `error/`.
    pub failed: usize,
    /// Total jobs handled.
    pub total: usize,
    /// Wall-clock duration of the batch.
    #[serde(skip)]
    pub elapsed: Duration,
}

/// A single queue worker over a calibrator.
pub struct Consumer<T: ModelTransport> {
    store: JobStore,
    calibrator: Calibrator<T>,
    worker_id: String,
}

impl<T: ModelTransport> Consumer<T> {
    /// Creates a worker identified by its process id.
    pub fn new(store: JobStore, calibrator: Calibrator<T>) -> Self {
        Self {
            store,
            calibrator,
            worker_id: format!("worker-{}", std::process::id()),
        }
    }

    /// Overrides the worker identifier (useful when several workers run
    /// in one process).
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    /// Returns the worker identifier.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Claims the next available job, oldest first.
    ///
    /// Returns `Ok(None)` when the queue is empty from this worker's
    /// view; lost claim races are skipped silently inside the store.
    pub fn acquire(&self) -> Result<Option<Job>, StoreError> {
        self.store.claim_next()
    }

    /// Runs one claimed job through the calibration pipeline and
    /// terminates it.
    ///
    /// Calibration failures of any kind are contained here: the job moves
    /// to `error/` with its retry counter bumped, and the outcome is
    /// reported. Only store-level IO failures propagate.
    pub async fn process(&self, job: &mut Job) -> Result<JobOutcome, StoreError> {
        info!(
            worker_id = %self.worker_id,
            job = %job.name,
            topic = %job.metadata.topic,
            style = %job.metadata.style,
            "Processing job"
        );

        match self.calibrator.calibrate(&job.content).await {
            Ok(mut result) => {
                result.worker_id = Some(self.worker_id.clone());
                let response = result.response.clone();
                let score = result.score.total;
                job.metadata.calibration = Some(result);

                self.store.complete(job)?;
                self.store.write_response(&job.name, &response)?;

                info!(
                    worker_id = %self.worker_id,
                    job = %job.name,
                    score,
                    "Job completed"
                );
                Ok(JobOutcome::Processed)
            }
            Err(e) => {
                warn!(
                    worker_id = %self.worker_id,
                    job = %job.name,
                    error = %e,
                    "Calibration failed, moving job to error"
                );
                self.store.fail(job, &e.to_string())?;
                Ok(JobOutcome::Failed)
            }
        }
    }

    /// Repeats acquire and process until `max_jobs` jobs were handled or
    /// the queue is empty.
    pub async fn run_batch(&self, max_jobs: usize) -> Result<BatchReport, StoreError> {
        let start = Instant::now();
        let mut report = BatchReport {
            succeeded: 0,
            failed: 0,
            total: 0,
            elapsed: Duration::ZERO,
        };

        info!(worker_id = %self.worker_id, max_jobs, "Starting batch");

        for _ in 0..max_jobs {
            let Some(mut job) = self.acquire()? else {
                info!(
                    worker_id = %self.worker_id,
                    handled = report.total,
                    "Queue empty"
                );
                break;
            };

            report.total += 1;
            match self.process(&mut job).await {
                Ok(JobOutcome::Processed) => report.succeeded += 1,
                Ok(JobOutcome::Failed) => report.failed += 1,
                Err(e) => {
                    // Store-level failure: the job files may be stranded in
                    // processing/. Surface it and stop the batch.
                    error!(
                        worker_id = %self.worker_id,
                        job = %job.name,
                        error = %e,
                        "Store failure while terminating job"
                    );
                    return Err(e);
                }
            }
        }

        report.elapsed = start.elapsed();
        info!(
            worker_id = %self.worker_id,
            succeeded = report.succeeded,
            failed = report.failed,
            total = report.total,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Batch complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{ModelRequest, TransportError};
    use crate::config::CalibrationConfig;
    use crate::store::{JobMetadata, JobState};
    use async_trait::async_trait;
    use tempfile::tempdir;

    const GOOD_RESPONSE: &str = "\
1. DRIFT: Toward authority.
2. BACKGROUND PATTERN: Repetition.
3. PRESSURE FACTORS: Urgency.
4. DEPTH: Two layers.
5. IMPACT: Hardened positions.
6. PLAIN TEXT: Urgency over evidence.";

    struct FixedTransport {
        reply: Option<String>,
    }

    #[async_trait]
    impl ModelTransport for FixedTransport {
        async fn send(&self, _request: &ModelRequest) -> Result<String, TransportError> {
            match &self.reply {
                Some(text) => Ok(text.clone()),
                None => Err(TransportError::Client {
                    code: 400,
                    message: "rejected".to_string(),
                }),
            }
        }
    }

    fn test_consumer(
        root: &std::path::Path,
        reply: Option<&str>,
    ) -> (JobStore, Consumer<FixedTransport>) {
        let store = JobStore::open(root.join("queue")).expect("store");
        std::fs::write(root.join("queue/wrapper_standard.txt"), "FRAME:\n").expect("wrapper");

        let mut config = CalibrationConfig::default();
        config.wrapper_dir = root.join("queue");

        let transport = FixedTransport {
            reply: reply.map(String::from),
        };
        let calibrator = Calibrator::new(config, transport).expect("calibrator");
        let consumer = Consumer::new(store.clone(), calibrator).with_worker_id("worker-test");
        (store, consumer)
    }

    fn publish(store: &JobStore, topic: &str) {
        store
            .publish("Prompt content.", &JobMetadata::new(topic, "casual", "test"))
            .expect("publish");
    }

    #[tokio::test]
    async fn test_acquire_empty_queue() {
        let dir = tempdir().expect("tempdir");
        let (_store, consumer) = test_consumer(dir.path(), Some(GOOD_RESPONSE));

        assert!(consumer.acquire().expect("acquire").is_none());
    }

    #[tokio::test]
    async fn test_process_success_path() {
        let dir = tempdir().expect("tempdir");
        let (store, consumer) = test_consumer(dir.path(), Some(GOOD_RESPONSE));
        publish(&store, "success");

        let mut job = consumer.acquire().expect("acquire").expect("job");
        let outcome = consumer.process(&mut job).await.expect("process");

        assert_eq!(outcome, JobOutcome::Processed);
        assert_eq!(store.count(JobState::Processed).expect("count"), 1);
        assert_eq!(store.count(JobState::Error).expect("count"), 0);

        let result = job.metadata.calibration.as_ref().expect("calibration");
        assert_eq!(result.worker_id.as_deref(), Some("worker-test"));

        // The response artifact sits next to the processed job.
        let response_path = store
            .dir(JobState::Processed)
            .join(format!("{}_response.txt", job.name));
        assert_eq!(
            std::fs::read_to_string(response_path).expect("response"),
            GOOD_RESPONSE
        );
    }

    #[tokio::test]
    async fn test_process_failure_moves_to_error() {
        let dir = tempdir().expect("tempdir");
        let (store, consumer) = test_consumer(dir.path(), None);
        publish(&store, "failure");

        let mut job = consumer.acquire().expect("acquire").expect("job");
        let outcome = consumer.process(&mut job).await.expect("process");

        assert_eq!(outcome, JobOutcome::Failed);
        assert_eq!(store.count(JobState::Error).expect("count"), 1);
        assert!(job.name.ends_with("__retry1"));
        assert_eq!(job.metadata.retry_count, 1);
        assert!(job.metadata.last_error.is_some());
    }

    #[tokio::test]
    async fn test_run_batch_drains_queue() {
        let dir = tempdir().expect("tempdir");
        let (store, consumer) = test_consumer(dir.path(), Some(GOOD_RESPONSE));
        for i in 0..3 {
            publish(&store, &format!("job-{i}"));
        }

        let report = consumer.run_batch(10).await.expect("run_batch");

        assert_eq!(report.total, 3);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(store.count(JobState::Incoming).expect("count"), 0);
    }

    #[tokio::test]
    async fn test_run_batch_respects_max_jobs() {
        let dir = tempdir().expect("tempdir");
        let (store, consumer) = test_consumer(dir.path(), Some(GOOD_RESPONSE));
        for i in 0..5 {
            publish(&store, &format!("job-{i}"));
        }

        let report = consumer.run_batch(2).await.expect("run_batch");

        assert_eq!(report.total, 2);
        assert_eq!(store.count(JobState::Incoming).expect("count"), 3);
    }

    #[tokio::test]
    async fn test_run_batch_continues_after_bad_job() {
        let dir = tempdir().expect("tempdir");
        // Missing wrapper makes every calibration fail terminally, which
        // must not end the loop early.
        let store = JobStore::open(dir.path().join("queue")).expect("store");
        let mut config = CalibrationConfig::default();
        config.wrapper_dir = dir.path().join("queue");
        config.wrapper_name = "absent".to_string();
        let calibrator = Calibrator::new(
            config,
            FixedTransport {
                reply: Some(GOOD_RESPONSE.to_string()),
            },
        )
        .expect("calibrator");
        let consumer = Consumer::new(store.clone(), calibrator);

        for i in 0..3 {
            publish(&store, &format!("job-{i}"));
        }

        let report = consumer.run_batch(10).await.expect("run_batch");

        assert_eq!(report.total, 3);
        assert_eq!(report.failed, 3);
        assert_eq!(store.count(JobState::Error).expect("count"), 3);
    }
}
