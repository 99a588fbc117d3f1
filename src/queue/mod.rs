//! The filesystem-backed job queue.
//!
//! Four roles share one [`crate::store::JobStore`]:
//!
//! - [`monitor::QueueMonitor`] takes stateless censuses of the state
//!   directories and classifies backlog pressure
//! - [`manager::QueueManager`] turns a snapshot into a production
//!   directive and an advisory health level
//! - [`producer::Producer`] consumes the directive and publishes new
//!   jobs through the external generator
//! - [`consumer::Consumer`] races other workers for jobs and runs each
//!   claimed one through the calibration pipeline
//!
//! Producer and consumers run as independent processes; only the
//! producer consults queue health. Consumers just loop until no job is
//! claimable.

pub mod consumer;
pub mod manager;
pub mod monitor;
pub mod producer;

pub use consumer::{BatchReport, Consumer};
pub use manager::{Directive, QueueManager, SystemHealth};
pub use monitor::{HealthState, QueueMonitor, QueueSnapshot};
pub use producer::{
    GeneratedPrompt, GenerationBias, GeneratorError, Producer, ProducerReport, PromptGenerator,
    RemotePromptGenerator, TopicPool, TopicSupplier, STYLES,
};
