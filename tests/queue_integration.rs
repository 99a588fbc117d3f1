//! Integration tests for the queue's concurrency guarantees and the
//! end-to-end job lifecycle.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::tempdir;

use fieldforge::calibration::{
    Calibrator, ModelRequest, ModelTransport, TransportError,
};
use fieldforge::config::CalibrationConfig;
use fieldforge::queue::Consumer;
use fieldforge::store::{JobMetadata, JobState, JobStore};

const GOOD_RESPONSE: &str = "\
1. DRIFT: Toward authority.
2. BACKGROUND PATTERN: Repetition of appeals.
3. PRESSURE FACTORS: Urgency framing.
4. DEPTH: Two layers.
5. IMPACT: Positions harden.
6. PLAIN TEXT: Urgency over evidence.";

/// Exactly-once acquisition: with K jobs and M concurrent claimers racing
/// until the queue drains, every job is claimed exactly once across all
/// claimers: no duplicates, no omissions.
#[test]
fn exactly_once_acquisition_under_contention() {
    const JOBS: usize = 40;
    const WORKERS: usize = 4;

    let dir = tempdir().expect("tempdir");
    let store = JobStore::open(dir.path().join("queue")).expect("store");

    let mut published = HashSet::new();
    for i in 0..JOBS {
        let name = store
            .publish(
                &format!("content {i}"),
                &JobMetadata::new(format!("topic-{i:02}"), "casual", "test"),
            )
            .expect("publish");
        published.insert(name);
    }

    let claimed: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for _ in 0..WORKERS {
        let store = store.clone();
        let claimed = Arc::clone(&claimed);
        handles.push(std::thread::spawn(move || {
            while let Some(job) = store.claim_next().expect("claim_next") {
                claimed.lock().expect("claimed lock").push(job.name);
            }
        }));
    }
    for handle in handles {
        handle.join().expect("worker thread");
    }

    let claimed = claimed.lock().expect("claimed lock");
    assert_eq!(claimed.len(), JOBS, "every job claimed exactly once");

    let unique: HashSet<&String> = claimed.iter().collect();
    assert_eq!(unique.len(), JOBS, "no job claimed twice");
    assert_eq!(
        unique.iter().map(|n| n.as_str()).collect::<HashSet<_>>(),
        published.iter().map(|n| n.as_str()).collect::<HashSet<_>>(),
        "claimed set equals published set"
    );

    assert_eq!(store.count(JobState::Incoming).expect("count"), 0);
    assert_eq!(store.count(JobState::Processing).expect("count"), JOBS);
}

/// Transport that times out a fixed number of times, then succeeds.
struct FlakyTransport {
    failures: u32,
    calls: AtomicU32,
}

impl FlakyTransport {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ModelTransport for FlakyTransport {
    async fn send(&self, _request: &ModelRequest) -> Result<String, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(TransportError::Timeout("read timed out".to_string()))
        } else {
            Ok(GOOD_RESPONSE.to_string())
        }
    }
}

fn calibration_config(wrapper_dir: &std::path::Path) -> CalibrationConfig {
    std::fs::write(wrapper_dir.join("wrapper_standard.txt"), "FRAME:\n\n")
        .expect("write wrapper");
    let mut config = CalibrationConfig::default();
    config.wrapper_dir = wrapper_dir.to_path_buf();
    config
}

/// End-to-end: publish one job, let a single worker claim it, have the
/// remote call time out twice and succeed on the third attempt. The job
/// must land in `processed/` with both retries recorded, never in
/// `error/`.
#[tokio::test(start_paused = true)]
async fn end_to_end_transient_failures_recover() {
    let dir = tempdir().expect("tempdir");
    let store = JobStore::open(dir.path().join("queue")).expect("store");
    let config = calibration_config(store.root());

    store
        .publish(
            "What pulls this argument?",
            &JobMetadata::new("argument drift", "technical", "society"),
        )
        .expect("publish");

    let calibrator = Calibrator::new(config, FlakyTransport::new(2)).expect("calibrator");
    let consumer = Consumer::new(store.clone(), calibrator).with_worker_id("worker-e2e");

    let report = consumer.run_batch(1).await.expect("run_batch");
    assert_eq!(report.total, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 0);

    assert_eq!(store.count(JobState::Processed).expect("count"), 1);
    assert_eq!(store.count(JobState::Error).expect("count"), 0);

    let records = store.processed_metadata().expect("metadata");
    assert_eq!(records.len(), 1);
    let (name, metadata) = &records[0];
    let calibration = metadata.calibration.as_ref().expect("calibration result");

    assert_eq!(calibration.transport_retries, 2);
    assert_eq!(calibration.refusal_attempts, 0);
    assert!(calibration.success);
    assert_eq!(calibration.worker_id.as_deref(), Some("worker-e2e"));
    assert_eq!(metadata.retry_count, 0, "no error-state retries recorded");

    // Response artifact sits alongside the processed job.
    let response_path = store
        .dir(JobState::Processed)
        .join(format!("{name}_response.txt"));
    assert!(response_path.exists());
}

/// A mixed batch: persistent transport failure sends a job to `error/`
/// with a retry suffix, while the remaining jobs keep flowing.
#[tokio::test(start_paused = true)]
async fn end_to_end_persistent_failure_lands_in_error() {
    let dir = tempdir().expect("tempdir");
    let store = JobStore::open(dir.path().join("queue")).expect("store");
    let config = calibration_config(store.root());

    store
        .publish("doomed", &JobMetadata::new("doomed topic", "casual", "test"))
        .expect("publish");

    // More failures than the attempt budget: every call times out.
    let calibrator = Calibrator::new(config, FlakyTransport::new(10)).expect("calibrator");
    let consumer = Consumer::new(store.clone(), calibrator);

    let report = consumer.run_batch(1).await.expect("run_batch");
    assert_eq!(report.failed, 1);

    assert_eq!(store.count(JobState::Error).expect("count"), 1);
    let error_files = std::fs::read_dir(store.dir(JobState::Error))
        .expect("read error dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect::<Vec<_>>();
    assert!(
        error_files.iter().any(|f| f.contains("__retry1")),
        "error files carry the retry suffix: {error_files:?}"
    );
}
