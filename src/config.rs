//! Configuration for the queue, the calibration pipeline, and the
//! learning loop.
//!
//! All settings are externally supplied: defaults match the documented
//! constants, `from_env()` overrides them from environment variables, and
//! the resulting structs are loaded once and passed by value. Nothing here
//! is re-read at runtime.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for the directory-backed queue and its admission control.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Root directory holding the state directories.
    pub root: PathBuf,
    /// Below this incoming count the queue is considered low.
    pub min_threshold: usize,
    /// At or above this incoming count the queue is in overflow.
    pub max_threshold: usize,
    /// Base batch size the producer scales from.
    pub base_batch_size: usize,
    /// Error count above which system health degrades to a warning.
    pub error_warning_ceiling: usize,
    /// Append-only cost event log.
    pub cost_log: PathBuf,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("queue"),
            min_threshold: 5,
            max_threshold: 50,
            base_batch_size: 20,
            error_warning_ceiling: 10,
            cost_log: PathBuf::from("logs/costs.jsonl"),
        }
    }
}

impl QueueConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `FIELDFORGE_QUEUE_ROOT`: Queue root directory (default: queue)
    /// - `FIELDFORGE_MIN_THRESHOLD`: Low-water mark (default: 5)
    /// - `FIELDFORGE_MAX_THRESHOLD`: High-water mark (default: 50)
    /// - `FIELDFORGE_BATCH_SIZE`: Base producer batch size (default: 20)
    /// - `FIELDFORGE_ERROR_CEILING`: Error warning ceiling (default: 10)
    /// - `FIELDFORGE_COST_LOG`: Cost log path (default: logs/costs.jsonl)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(root) = std::env::var("FIELDFORGE_QUEUE_ROOT") {
            config.root = PathBuf::from(root);
        }
        if let Some(min) = parse_env("FIELDFORGE_MIN_THRESHOLD")? {
            config.min_threshold = min;
        }
        if let Some(max) = parse_env("FIELDFORGE_MAX_THRESHOLD")? {
            config.max_threshold = max;
        }
        if let Some(batch) = parse_env("FIELDFORGE_BATCH_SIZE")? {
            config.base_batch_size = batch;
        }
        if let Some(ceiling) = parse_env("FIELDFORGE_ERROR_CEILING")? {
            config.error_warning_ceiling = ceiling;
        }
        if let Ok(path) = std::env::var("FIELDFORGE_COST_LOG") {
            config.cost_log = PathBuf::from(path);
        }

        Ok(config)
    }

    /// Sets the queue root directory.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Sets the thresholds.
    pub fn with_thresholds(mut self, min: usize, max: usize) -> Self {
        self.min_threshold = min;
        self.max_threshold = max;
        self
    }

    /// Sets the base batch size.
    pub fn with_base_batch_size(mut self, size: usize) -> Self {
        self.base_batch_size = size;
        self
    }
}

/// Configuration for the calibration pipeline.
#[derive(Debug, Clone)]
pub struct CalibrationConfig {
    /// Remote model endpoint accepting the JSON generation payload.
    pub endpoint: String,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// Full request timeout (covers reading the response).
    pub request_timeout: Duration,
    /// Total transport attempts per remote call.
    pub max_attempts: u32,
    /// Fixed backoff schedule between transport attempts.
    pub retry_delays: Vec<Duration>,
    /// Rephrase attempts after a content-policy refusal, independent of
    /// the transport budget.
    pub max_refusal_attempts: u32,
    /// Directory holding `wrapper_<name>.txt` template files.
    pub wrapper_dir: PathBuf,
    /// Name of the wrapper template to frame job content with.
    pub wrapper_name: String,
    /// Maximum tokens the model may generate.
    pub max_new_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
    /// Nucleus sampling cutoff.
    pub top_p: f64,
    /// Whether the model should sample at all.
    pub do_sample: bool,
    /// Optional YAML file of per-field reference descriptions. Without it
    /// the scorer falls back to the legacy structural mode.
    pub references_path: Option<PathBuf>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/api/chat".to_string(),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(1800),
            max_attempts: 3,
            retry_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(7),
            ],
            max_refusal_attempts: 3,
            wrapper_dir: PathBuf::from("wrappers"),
            wrapper_name: "standard".to_string(),
            max_new_tokens: 1024,
            temperature: 0.3,
            top_p: 0.85,
            do_sample: true,
            references_path: None,
        }
    }
}

impl CalibrationConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `FIELDFORGE_ENDPOINT`: Remote model endpoint (required for `work`)
    /// - `FIELDFORGE_CONNECT_TIMEOUT_SECS`: Connect timeout (default: 30)
    /// - `FIELDFORGE_REQUEST_TIMEOUT_SECS`: Request timeout (default: 1800)
    /// - `FIELDFORGE_MAX_ATTEMPTS`: Transport attempts (default: 3)
    /// - `FIELDFORGE_REFUSAL_ATTEMPTS`: Rephrase attempts (default: 3)
    /// - `FIELDFORGE_WRAPPER_DIR`: Wrapper directory (default: wrappers)
    /// - `FIELDFORGE_WRAPPER`: Wrapper name (default: standard)
    /// - `FIELDFORGE_REFERENCES`: Field reference YAML path (optional)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(endpoint) = std::env::var("FIELDFORGE_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Some(secs) = parse_env::<u64>("FIELDFORGE_CONNECT_TIMEOUT_SECS")? {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env::<u64>("FIELDFORGE_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = parse_env("FIELDFORGE_MAX_ATTEMPTS")? {
            config.max_attempts = attempts;
        }
        if let Some(attempts) = parse_env("FIELDFORGE_REFUSAL_ATTEMPTS")? {
            config.max_refusal_attempts = attempts;
        }
        if let Ok(dir) = std::env::var("FIELDFORGE_WRAPPER_DIR") {
            config.wrapper_dir = PathBuf::from(dir);
        }
        if let Ok(name) = std::env::var("FIELDFORGE_WRAPPER") {
            config.wrapper_name = name;
        }
        if let Ok(path) = std::env::var("FIELDFORGE_REFERENCES") {
            config.references_path = Some(PathBuf::from(path));
        }

        Ok(config)
    }

    /// Sets the remote endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the wrapper template name.
    pub fn with_wrapper(mut self, name: impl Into<String>) -> Self {
        self.wrapper_name = name.into();
        self
    }
}

/// Configuration for the learning loop.
#[derive(Debug, Clone)]
pub struct EvolutionConfig {
    /// Maximum processed jobs to learn from per round.
    pub max_samples: usize,
    /// Minimum total score a job needs to be learned from.
    pub min_score: u32,
    /// Whether sampled jobs are archived after being read.
    pub archive_after_read: bool,
    /// Append-only generation record log.
    pub log_path: PathBuf,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            max_samples: 50,
            min_score: 90,
            archive_after_read: true,
            log_path: PathBuf::from("logs/evolution.jsonl"),
        }
    }
}

impl EvolutionConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `FIELDFORGE_EVO_MAX_SAMPLES`: Sample cap (default: 50)
    /// - `FIELDFORGE_EVO_MIN_SCORE`: Score floor (default: 90)
    /// - `FIELDFORGE_EVO_LOG`: Generation log path (default: logs/evolution.jsonl)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(samples) = parse_env("FIELDFORGE_EVO_MAX_SAMPLES")? {
            config.max_samples = samples;
        }
        if let Some(score) = parse_env("FIELDFORGE_EVO_MIN_SCORE")? {
            config.min_score = score;
        }
        if let Ok(path) = std::env::var("FIELDFORGE_EVO_LOG") {
            config.log_path = PathBuf::from(path);
        }

        Ok(config)
    }
}

/// Parses an optional environment variable into the target type.
fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("could not parse '{value}'"),
            }),
        Err(_) => Ok(None),
    }
}
