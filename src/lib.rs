//! fieldforge: Filesystem-backed calibration queue for LLM field
//! extraction.
//!
//! A producer turns topics into candidate prompts via an external
//! generator, independent workers race for jobs using atomic renames,
//! and every claimed job is calibrated against a remote model and scored
//! into six structured fields.

// Core modules
pub mod calibration;
pub mod cli;
pub mod config;
pub mod evolution;
pub mod logs;
pub mod queue;
pub mod store;

// Re-export commonly used error types
pub use calibration::{CalibrationError, ScorerError, TransportError, WrapperError};
pub use config::ConfigError;
pub use evolution::EvolutionError;
pub use logs::LogError;
pub use queue::GeneratorError;
pub use store::StoreError;
