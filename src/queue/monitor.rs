//! Stateless queue monitoring.
//!
//! The monitor counts job files in each state directory and classifies
//! the backlog pressure. Nothing is cached between calls: every snapshot
//! is a pure function of the filesystem at call time, so staleness can
//! never corrupt the admission-control decision. Read-only, safe to call
//! from any number of processes concurrently.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::{JobState, JobStore, StoreError};

/// Backlog pressure of the queue, derived from the incoming count alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    /// No work at all; the producer must activate immediately.
    Starving,
    /// Nearly empty; the producer should top up soon.
    Low,
    /// Enough work, not too much; gentle refills are fine.
    Balanced,
    /// Plenty of work; the producer can pause.
    High,
    /// Consumers are not keeping up; production must stop.
    Overflow,
}

impl HealthState {
    /// Classifies an incoming count against the configured thresholds.
    pub fn classify(incoming: usize, min_threshold: usize, max_threshold: usize) -> Self {
        if incoming == 0 {
            HealthState::Starving
        } else if incoming < min_threshold {
            HealthState::Low
        } else if incoming < max_threshold / 2 {
            HealthState::Balanced
        } else if incoming < max_threshold {
            HealthState::High
        } else {
            HealthState::Overflow
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Starving => write!(f, "STARVING"),
            HealthState::Low => write!(f, "LOW"),
            HealthState::Balanced => write!(f, "BALANCED"),
            HealthState::High => write!(f, "HIGH"),
            HealthState::Overflow => write!(f, "OVERFLOW"),
        }
    }
}

/// Point-in-time census of the queue. Never persisted, never reused.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
    /// Jobs waiting to be claimed.
    pub incoming: usize,
    /// Jobs currently claimed by workers.
    pub processing: usize,
    /// Jobs that completed successfully.
    pub processed: usize,
    /// Jobs that failed.
    pub error: usize,
    /// Backlog classification derived from the incoming count.
    pub health: HealthState,
}

/// Read-only monitor over a job store.
#[derive(Debug, Clone)]
pub struct QueueMonitor {
    store: JobStore,
    min_threshold: usize,
    max_threshold: usize,
}

impl QueueMonitor {
    /// Creates a monitor with the given thresholds.
    pub fn new(store: JobStore, min_threshold: usize, max_threshold: usize) -> Self {
        Self {
            store,
            min_threshold,
            max_threshold,
        }
    }

    /// Takes a fresh census of the queue.
    ///
    /// O(n) in directory sizes; counts content files only, so response
    /// artifacts and metadata files are never mistaken for jobs.
    pub fn snapshot(&self) -> Result<QueueSnapshot, StoreError> {
        let incoming = self.store.count(JobState::Incoming)?;
        Ok(QueueSnapshot {
            taken_at: Utc::now(),
            incoming,
            processing: self.store.count(JobState::Processing)?,
            processed: self.store.count(JobState::Processed)?,
            error: self.store.count(JobState::Error)?,
            health: HealthState::classify(incoming, self.min_threshold, self.max_threshold),
        })
    }
}
