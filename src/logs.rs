//! Append-only newline-delimited JSON logs.
//!
//! Two record streams use this: cost events (one per upstream generation)
//! and generation records (one per learning-loop round). Entries are only
//! ever appended; readers of these logs never mutate them.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during log operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// IO operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record serialization failed.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// An append-only JSONL file.
#[derive(Debug, Clone)]
pub struct JsonlLog {
    path: PathBuf,
}

impl JsonlLog {
    /// Creates a log handle for the given path. The file is created on
    /// first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record as a JSON line.
    pub fn append<T: Serialize>(&self, record: &T) -> Result<(), LogError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Reads all records, skipping lines that no longer parse.
    pub fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>, LogError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        Ok(text
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    /// Reads the last record, if any.
    pub fn read_last<T: DeserializeOwned>(&self) -> Result<Option<T>, LogError> {
        Ok(self.read_all()?.into_iter().last())
    }
}

/// One cost event, appended per upstream generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEvent {
    /// When the cost was incurred.
    pub timestamp: DateTime<Utc>,
    /// Topic the generation was for.
    pub topic: String,
    /// Style the generation used.
    pub style: String,
    /// Model that served the generation, if reported.
    #[serde(default)]
    pub model: Option<String>,
    /// Cost in dollars.
    pub cost: f64,
}

impl CostEvent {
    /// Creates a cost event stamped with the current time.
    pub fn new(topic: impl Into<String>, style: impl Into<String>, cost: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            topic: topic.into(),
            style: style.into(),
            model: None,
            cost,
        }
    }

    /// Sets the model that served the generation.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Aggregate view over a cost log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostSummary {
    /// Total cost across all events, in dollars.
    pub total_cost: f64,
    /// Number of recorded events.
    pub total_events: usize,
    /// Average cost per event, in dollars.
    pub avg_cost: f64,
}

impl CostSummary {
    /// Computes the summary of a cost log.
    pub fn from_log(log: &JsonlLog) -> Result<Self, LogError> {
        let events: Vec<CostEvent> = log.read_all()?;
        let total_cost: f64 = events.iter().map(|e| e.cost).sum();
        let total_events = events.len();
        let avg_cost = if total_events > 0 {
            total_cost / total_events as f64
        } else {
            0.0
        };
        Ok(Self {
            total_cost,
            total_events,
            avg_cost,
        })
    }
}
