//! Directory-backed job store with atomic move primitives.
//!
//! The store represents job state purely as directory membership:
//!
//! - `incoming/`: published jobs waiting to be claimed
//! - `processing/`: jobs claimed by exactly one worker
//! - `processed/`: jobs that completed calibration successfully
//! - `error/`: jobs that failed, with a `__retryN` filename suffix
//! - `archive/`: jobs the learning loop has already read
//! - `.tmp/`: private scratch area for two-phase publishes
//!
//! # Locking
//!
//! The filesystem's atomic rename is the only synchronization primitive.
//! A worker claims a job by renaming its content file from `incoming/` to
//! `processing/`; a rename that fails with `NotFound` means another worker
//! won the race. No lock files, no database rows, no shared memory.
//!
//! # Publish visibility
//!
//! Publishing writes both files into `.tmp/` first and then renames them
//! into `incoming/` (content, then metadata). A consumer can in principle
//! observe the content without its metadata for a vanishing window; the
//! claim path tolerates this by synthesizing empty metadata.

pub mod job;

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::warn;

pub use job::{job_name, retry_name, strip_retry_suffix, Job, JobMetadata, JobOutcome};

/// Suffix of response artifacts written next to processed jobs. Files with
/// this suffix are never counted or claimed as jobs.
const RESPONSE_SUFFIX: &str = "_response";

/// Extension of job content files.
const CONTENT_EXT: &str = "txt";

/// Extension of job metadata files.
const META_EXT: &str = "json";

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata serialization failed.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A path did not carry a usable file name.
    #[error("Invalid job path: {0}")]
    InvalidPath(String),
}

/// Queue states a job can be in, one directory each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Published, waiting to be claimed.
    Incoming,
    /// Claimed by a worker.
    Processing,
    /// Calibrated successfully.
    Processed,
    /// Failed calibration.
    Error,
    /// Read by the learning loop.
    Archive,
}

impl JobState {
    /// Directory name for this state.
    pub fn dir_name(&self) -> &'static str {
        match self {
            JobState::Incoming => "incoming",
            JobState::Processing => "processing",
            JobState::Processed => "processed",
            JobState::Error => "error",
            JobState::Archive => "archive",
        }
    }

    /// All states, in lifecycle order.
    pub fn all() -> [JobState; 5] {
        [
            JobState::Incoming,
            JobState::Processing,
            JobState::Processed,
            JobState::Error,
            JobState::Archive,
        ]
    }
}

/// Directory-backed job store.
///
/// The store itself is stateless: every operation goes straight to the
/// filesystem, so any number of store instances (in any number of
/// processes) can operate on the same root concurrently.
#[derive(Debug, Clone)]
pub struct JobStore {
    root: PathBuf,
}

impl JobStore {
    /// Creates a store rooted at the given queue directory.
    ///
    /// Call [`JobStore::ensure_layout`] before first use to create the
    /// state directories.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates a store and its directory layout in one step.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self::new(root);
        store.ensure_layout()?;
        Ok(store)
    }

    /// Returns the store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory for a job state.
    pub fn dir(&self, state: JobState) -> PathBuf {
        self.root.join(state.dir_name())
    }

    /// Returns the private scratch directory used for two-phase writes.
    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join(".tmp")
    }

    /// Creates all state directories and the scratch area.
    pub fn ensure_layout(&self) -> Result<(), StoreError> {
        for state in JobState::all() {
            fs::create_dir_all(self.dir(state))?;
        }
        fs::create_dir_all(self.scratch_dir())?;
        Ok(())
    }

    /// Publishes a new job into `incoming/` with a two-phase atomic write.
    ///
    /// Content and metadata are first written to the scratch area, then
    /// renamed into `incoming/` (content first). Returns the job name.
    pub fn publish(&self, content: &str, metadata: &JobMetadata) -> Result<String, StoreError> {
        let name = job_name(&metadata.topic, &metadata.style);

        let scratch_content = self.scratch_dir().join(format!("{name}.{CONTENT_EXT}"));
        let scratch_meta = self.scratch_dir().join(format!("{name}.{META_EXT}"));
        fs::write(&scratch_content, content)?;
        fs::write(&scratch_meta, serde_json::to_string_pretty(metadata)?)?;

        let incoming = self.dir(JobState::Incoming);
        fs::rename(&scratch_content, incoming.join(format!("{name}.{CONTENT_EXT}")))?;
        fs::rename(&scratch_meta, incoming.join(format!("{name}.{META_EXT}")))?;

        Ok(name)
    }

    /// Lists claimable content files in `incoming/`, oldest first.
    ///
    /// The timestamp prefix in job names makes lexicographic order
    /// chronological, giving approximate FIFO fairness.
    pub fn pending(&self) -> Result<Vec<PathBuf>, StoreError> {
        self.content_files(JobState::Incoming)
    }

    /// Attempts to claim a specific pending job by atomic rename.
    ///
    /// Returns `Ok(None)` if another worker claimed it first (the rename
    /// raced and lost); this is expected under contention, not an error.
    /// If the metadata file is missing after the content rename succeeds
    /// (a publish raced ahead of its metadata rename), empty metadata is
    /// synthesized and the anomaly is logged rather than failing the job.
    pub fn claim(&self, content_path: &Path) -> Result<Option<Job>, StoreError> {
        let name = job_stem(content_path)?;
        let processing = self.dir(JobState::Processing);
        let claimed_content = processing.join(format!("{name}.{CONTENT_EXT}"));

        // The sole acquisition signal: either this rename succeeds and the
        // job is ours, or NotFound says another worker was faster.
        match fs::rename(content_path, &claimed_content) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let incoming_meta = content_path.with_extension(META_EXT);
        let claimed_meta = processing.join(format!("{name}.{META_EXT}"));
        let metadata = match fs::rename(&incoming_meta, &claimed_meta) {
            Ok(()) => read_metadata(&claimed_meta)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(job = %name, "Claimed job has no metadata file, synthesizing empty record");
                let metadata = JobMetadata::default();
                fs::write(&claimed_meta, serde_json::to_string_pretty(&metadata)?)?;
                metadata
            }
            Err(e) => return Err(e.into()),
        };

        let content = fs::read_to_string(&claimed_content)?;
        Ok(Some(Job {
            name,
            content_path: claimed_content,
            meta_path: claimed_meta,
            content,
            metadata,
        }))
    }

    /// Claims the oldest available job, racing other workers candidate by
    /// candidate. Returns `Ok(None)` when the queue is empty from this
    /// worker's view.
    pub fn claim_next(&self) -> Result<Option<Job>, StoreError> {
        for candidate in self.pending()? {
            if let Some(job) = self.claim(&candidate)? {
                return Ok(Some(job));
            }
            // Lost the race for this candidate, try the next one.
        }
        Ok(None)
    }

    /// Terminates a claimed job into `processed/`.
    ///
    /// Stamps the completion time, rewrites the metadata (the files are
    /// owned by this worker while in `processing/`), then renames both
    /// into their final location.
    pub fn complete(&self, job: &mut Job) -> Result<PathBuf, StoreError> {
        job.metadata.processed_at = Some(Utc::now());
        fs::write(&job.meta_path, serde_json::to_string_pretty(&job.metadata)?)?;

        let processed = self.dir(JobState::Processed);
        let target_content = processed.join(format!("{}.{CONTENT_EXT}", job.name));
        let target_meta = processed.join(format!("{}.{META_EXT}", job.name));
        fs::rename(&job.content_path, &target_content)?;
        fs::rename(&job.meta_path, &target_meta)?;

        job.content_path = target_content.clone();
        job.meta_path = target_meta;
        Ok(target_content)
    }

    /// Terminates a claimed job into `error/`.
    ///
    /// Increments the retry counter, records the error, and renames both
    /// files under a name carrying the `__retryN` suffix.
    pub fn fail(&self, job: &mut Job, error: &str) -> Result<PathBuf, StoreError> {
        job.metadata.retry_count += 1;
        job.metadata.failed_at = Some(Utc::now());
        job.metadata.last_error = Some(error.to_string());
        fs::write(&job.meta_path, serde_json::to_string_pretty(&job.metadata)?)?;

        let failed_name = retry_name(&job.name, job.metadata.retry_count);
        let error_dir = self.dir(JobState::Error);
        let target_content = error_dir.join(format!("{failed_name}.{CONTENT_EXT}"));
        let target_meta = error_dir.join(format!("{failed_name}.{META_EXT}"));
        fs::rename(&job.content_path, &target_content)?;
        fs::rename(&job.meta_path, &target_meta)?;

        job.name = failed_name;
        job.content_path = target_content.clone();
        job.meta_path = target_meta;
        Ok(target_content)
    }

    /// Writes the raw model response next to a processed job.
    pub fn write_response(&self, job_name: &str, response: &str) -> Result<PathBuf, StoreError> {
        let path = self
            .dir(JobState::Processed)
            .join(format!("{job_name}{RESPONSE_SUFFIX}.{CONTENT_EXT}"));
        fs::write(&path, response)?;
        Ok(path)
    }

    /// Moves a processed job (content, metadata, and response artifact if
    /// present) into `archive/`. Used by the learning loop after a job has
    /// been read for pattern mining.
    pub fn archive(&self, job_name: &str) -> Result<(), StoreError> {
        let processed = self.dir(JobState::Processed);
        let archive = self.dir(JobState::Archive);

        for file in [
            format!("{job_name}.{CONTENT_EXT}"),
            format!("{job_name}.{META_EXT}"),
            format!("{job_name}{RESPONSE_SUFFIX}.{CONTENT_EXT}"),
        ] {
            let source = processed.join(&file);
            match fs::rename(&source, archive.join(&file)) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Counts job content files in a state directory.
    pub fn count(&self, state: JobState) -> Result<usize, StoreError> {
        Ok(self.content_files(state)?.len())
    }

    /// Reads the metadata of every processed job, skipping unreadable
    /// records with a warning.
    pub fn processed_metadata(&self) -> Result<Vec<(String, JobMetadata)>, StoreError> {
        let mut records = Vec::new();
        for path in self.files_with_ext(JobState::Processed, META_EXT)? {
            match read_metadata(&path) {
                Ok(metadata) => records.push((job_stem(&path)?, metadata)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable job metadata");
                }
            }
        }
        Ok(records)
    }

    /// Lists job content files in a state directory, sorted by name.
    fn content_files(&self, state: JobState) -> Result<Vec<PathBuf>, StoreError> {
        let mut files: Vec<PathBuf> = self
            .files_with_ext(state, CONTENT_EXT)?
            .into_iter()
            .filter(|p| {
                p.file_stem()
                    .and_then(|s| s.to_str())
                    .map(|s| !s.ends_with(RESPONSE_SUFFIX))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(files)
    }

    fn files_with_ext(&self, state: JobState, ext: &str) -> Result<Vec<PathBuf>, StoreError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(self.dir(state))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ext) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Reads and parses a metadata file.
fn read_metadata(path: &Path) -> Result<JobMetadata, StoreError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Extracts the job name (file stem) from a path.
fn job_stem(path: &Path) -> Result<String, StoreError> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .ok_or_else(|| StoreError::InvalidPath(path.display().to_string()))
}
