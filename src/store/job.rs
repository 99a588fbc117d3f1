//! Job definitions for the calibration queue.
//!
//! This module defines the core job types used by the queue:
//!
//! - `Job`: A unit of work claimed from the store
//! - `JobMetadata`: The metadata record stored next to the job content
//! - `JobOutcome`: Terminal outcome of a processed job
//!
//! A job is identified by a timestamp-prefixed name that encodes creation
//! time, topic, and style. The name is the base of both on-disk files:
//! `<name>.txt` (content) and `<name>.json` (metadata).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::calibration::CalibrationResult;

/// Maximum length of the topic slug embedded in a job name.
const MAX_TOPIC_SLUG_LEN: usize = 30;

/// Suffix marker carried by failed jobs, followed by the 1-based retry count.
const RETRY_MARKER: &str = "__retry";

/// Metadata record stored alongside a job's content file.
///
/// The record never carries the job's queue state: state is represented
/// purely by which directory holds the job's files, so it cannot
/// desynchronize from the filesystem.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobMetadata {
    /// Topic the prompt was generated for.
    pub topic: String,
    /// Style the prompt was generated in (e.g. "technical", "casual").
    pub style: String,
    /// Category of the topic (e.g. "society", "science").
    pub category: String,
    /// Language of the prompt content.
    #[serde(default = "default_language")]
    pub language: String,
    /// Quality score reported by the upstream generator, if any.
    #[serde(default)]
    pub generator_quality: Option<f64>,
    /// Cost in dollars reported by the upstream generator, if any.
    #[serde(default)]
    pub generator_cost: Option<f64>,
    /// Number of times this job has failed processing.
    #[serde(default)]
    pub retry_count: u32,
    /// When the job was created by the producer.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// When the job finished processing successfully.
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    /// When the job last failed processing.
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    /// Message of the last processing failure.
    #[serde(default)]
    pub last_error: Option<String>,
    /// Final calibration result, attached once on success and immutable
    /// thereafter.
    #[serde(default)]
    pub calibration: Option<CalibrationResult>,
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for JobMetadata {
    fn default() -> Self {
        Self {
            topic: "unknown".to_string(),
            style: "unknown".to_string(),
            category: "unknown".to_string(),
            language: default_language(),
            generator_quality: None,
            generator_cost: None,
            retry_count: 0,
            created_at: None,
            processed_at: None,
            failed_at: None,
            last_error: None,
            calibration: None,
        }
    }
}

impl JobMetadata {
    /// Creates metadata for a freshly generated prompt.
    pub fn new(
        topic: impl Into<String>,
        style: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            style: style.into(),
            category: category.into(),
            created_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Sets the upstream generator quality score.
    pub fn with_generator_quality(mut self, quality: f64) -> Self {
        self.generator_quality = Some(quality);
        self
    }

    /// Sets the upstream generator cost.
    pub fn with_generator_cost(mut self, cost: f64) -> Self {
        self.generator_cost = Some(cost);
        self
    }

    /// Sets the content language.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }
}

/// A job claimed from the store, owned by exactly one worker.
#[derive(Debug, Clone)]
pub struct Job {
    /// Base name shared by the content and metadata files.
    pub name: String,
    /// Path to the content file in `processing/`.
    pub content_path: PathBuf,
    /// Path to the metadata file in `processing/`.
    pub meta_path: PathBuf,
    /// The prompt text to calibrate.
    pub content: String,
    /// The job's metadata record.
    pub metadata: JobMetadata,
}

/// Terminal outcome of a processed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Calibration succeeded; the job moved to `processed/`.
    Processed,
    /// Calibration failed; the job moved to `error/`.
    Failed,
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOutcome::Processed => write!(f, "processed"),
            JobOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Builds a unique job name from creation time, topic, and style.
///
/// Format: `YYYYMMDD_HHMMSS_micros__topic_<slug>__style_<style>`. The
/// microsecond timestamp keeps names unique within a producer run; the slug
/// keeps them filesystem-safe.
pub fn job_name(topic: &str, style: &str) -> String {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
    format!("{}__topic_{}__style_{}", stamp, slugify(topic), slugify(style))
}

/// Appends the retry suffix for the given 1-based retry count.
///
/// Any existing retry suffix is stripped first, so repeated failures carry
/// `__retry1`, `__retry2`, `__retry3` in order rather than stacking.
pub fn retry_name(name: &str, retry_count: u32) -> String {
    format!("{}{}{}", strip_retry_suffix(name), RETRY_MARKER, retry_count)
}

/// Removes a trailing `__retryN` suffix, if present.
pub fn strip_retry_suffix(name: &str) -> &str {
    if let Some(pos) = name.rfind(RETRY_MARKER) {
        let tail = &name[pos + RETRY_MARKER.len()..];
        if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) {
            return &name[..pos];
        }
    }
    name
}

/// Normalizes free text into a filesystem-safe slug.
///
/// Lowercases, folds common non-ASCII letters, maps separators to
/// underscores, drops everything else, and truncates.
fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.to_lowercase().chars() {
        match c {
            'ä' => slug.push_str("ae"),
            'ö' => slug.push_str("oe"),
            'ü' => slug.push_str("ue"),
            'ß' => slug.push_str("ss"),
            ' ' | '-' => slug.push('_'),
            'a'..='z' | '0'..='9' | '_' => slug.push(c),
            _ => {}
        }
    }
    slug.truncate(MAX_TOPIC_SLUG_LEN);
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_new() {
        let meta = JobMetadata::new("quantum computing", "technical", "science");

        assert_eq!(meta.topic, "quantum computing");
        assert_eq!(meta.style, "technical");
        assert_eq!(meta.category, "science");
        assert_eq!(meta.language, "en");
        assert_eq!(meta.retry_count, 0);
        assert!(meta.created_at.is_some());
        assert!(meta.calibration.is_none());
    }

    #[test]
    fn test_metadata_builder() {
        let meta = JobMetadata::new("topic", "casual", "society")
            .with_generator_quality(8.5)
            .with_generator_cost(0.0013)
            .with_language("de");

        assert_eq!(meta.generator_quality, Some(8.5));
        assert_eq!(meta.generator_cost, Some(0.0013));
        assert_eq!(meta.language, "de");
    }

    #[test]
    fn test_metadata_deserializes_with_missing_fields() {
        let meta: JobMetadata = serde_json::from_str(
            r#"{"topic":"t","style":"s","category":"c"}"#,
        )
        .expect("minimal metadata should deserialize");

        assert_eq!(meta.language, "en");
        assert_eq!(meta.retry_count, 0);
        assert!(meta.last_error.is_none());
    }

    #[test]
    fn test_job_name_shape() {
        let name = job_name("Quantum Computing", "technical");

        assert!(name.contains("__topic_quantum_computing"));
        assert!(name.ends_with("__style_technical"));
        // Timestamp prefix: 8 date digits, underscore, 6 time digits.
        assert_eq!(&name[8..9], "_");
    }

    #[test]
    fn test_slugify_folds_and_filters() {
        assert_eq!(slugify("Überraschung!"), "ueberraschung");
        assert_eq!(slugify("a b-c"), "a_b_c");
        let long = "x".repeat(80);
        assert_eq!(slugify(&long).len(), MAX_TOPIC_SLUG_LEN);
    }

    #[test]
    fn test_retry_name_sequence() {
        let base = "20251127_120000_000001__topic_ai__style_casual";

        let first = retry_name(base, 1);
        assert_eq!(first, format!("{base}__retry1"));

        let second = retry_name(&first, 2);
        assert_eq!(second, format!("{base}__retry2"));

        let third = retry_name(&second, 3);
        assert_eq!(third, format!("{base}__retry3"));
    }

    #[test]
    fn test_strip_retry_suffix_ignores_non_numeric() {
        assert_eq!(strip_retry_suffix("job__retryX"), "job__retryX");
        assert_eq!(strip_retry_suffix("job__retry12"), "job");
        assert_eq!(strip_retry_suffix("job"), "job");
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(format!("{}", JobOutcome::Processed), "processed");
        assert_eq!(format!("{}", JobOutcome::Failed), "failed");
    }
}
