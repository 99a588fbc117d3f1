//! Admission control for the producer.
//!
//! The manager is a pure decision function: given a queue snapshot it
//! answers "should the producer run, and with what batch size". It never
//! touches the filesystem and holds no state beyond its configuration,
//! so decisions are reproducible from the snapshot alone.

use serde::Serialize;

use super::monitor::{HealthState, QueueSnapshot};

/// Production directive handed to the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Directive {
    /// Whether the producer should run at all.
    pub should_produce: bool,
    /// How many prompts to generate.
    pub batch_size: usize,
}

impl Directive {
    /// A directive that skips production entirely.
    pub fn skip() -> Self {
        Self {
            should_produce: false,
            batch_size: 0,
        }
    }
}

/// Advisory system health for operators. Never gates production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemHealth {
    Ok,
    Warning,
    Critical,
}

impl std::fmt::Display for SystemHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SystemHealth::Ok => write!(f, "OK"),
            SystemHealth::Warning => write!(f, "WARNING"),
            SystemHealth::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Pure admission-control logic over queue snapshots.
#[derive(Debug, Clone)]
pub struct QueueManager {
    base_batch_size: usize,
    error_warning_ceiling: usize,
}

impl QueueManager {
    /// Creates a manager with the given base batch size and error
    /// ceiling.
    pub fn new(base_batch_size: usize, error_warning_ceiling: usize) -> Self {
        Self {
            base_batch_size,
            error_warning_ceiling,
        }
    }

    /// Returns the configured base batch size.
    pub fn base_batch_size(&self) -> usize {
        self.base_batch_size
    }

    /// Maps a snapshot's backlog classification to a production
    /// directive.
    ///
    /// Starving gets the full base batch, Low three quarters, Balanced
    /// half (integer-truncated); High and Overflow produce nothing.
    pub fn decide(&self, snapshot: &QueueSnapshot) -> Directive {
        match snapshot.health {
            HealthState::Starving => Directive {
                should_produce: true,
                batch_size: self.base_batch_size,
            },
            HealthState::Low => Directive {
                should_produce: true,
                batch_size: (self.base_batch_size as f64 * 0.75) as usize,
            },
            HealthState::Balanced => Directive {
                should_produce: true,
                batch_size: (self.base_batch_size as f64 * 0.5) as usize,
            },
            HealthState::High | HealthState::Overflow => Directive::skip(),
        }
    }

    /// Advisory health for dashboards and operators.
    ///
    /// Overflow is critical; a high backlog or an error count above the
    /// configured ceiling is a warning; everything else is fine.
    pub fn health(&self, snapshot: &QueueSnapshot) -> SystemHealth {
        if snapshot.health == HealthState::Overflow {
            return SystemHealth::Critical;
        }
        if snapshot.error > self.error_warning_ceiling || snapshot.health == HealthState::High {
            return SystemHealth::Warning;
        }
        SystemHealth::Ok
    }
}
