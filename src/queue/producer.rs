//! Queue-aware producer.
//!
//! The producer never generates blindly: it asks the manager whether the
//! queue needs work and how much, then turns topics into candidate
//! prompts through the external generator and publishes each success
//! atomically into `incoming/`. Generator failures drop the candidate and
//! are counted; the producer adds no retries of its own around the
//! upstream call.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::calibration::{is_refusal, ModelClient, ModelRequest, ModelTransport};
use crate::config::CalibrationConfig;
use crate::logs::{CostEvent, JsonlLog};
use crate::store::{JobMetadata, JobStore, StoreError};

use super::manager::{Directive, QueueManager};
use super::monitor::QueueMonitor;

/// Prompt styles the producer samples from when no learned bias is
/// available.
pub const STYLES: [&str; 4] = ["technical", "creative", "academic", "casual"];

/// Errors reported by the external prompt generator.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// The upstream call failed; the candidate is dropped.
    #[error("Upstream generation failed: {0}")]
    Upstream(String),

    /// The generator refused the request.
    #[error("Upstream generator refused the request")]
    Refused,

    /// The generator returned no usable text.
    #[error("Generator returned empty text")]
    Empty,
}

/// A candidate prompt produced by the external generator.
#[derive(Debug, Clone)]
pub struct GeneratedPrompt {
    /// The prompt text to publish as job content.
    pub text: String,
    /// Quality score the generator assigned to its own output, if any.
    pub quality_score: Option<f64>,
    /// Cost of the generation in dollars, if reported.
    pub cost: Option<f64>,
    /// Model that served the generation, if reported.
    pub model: Option<String>,
}

/// External text-generation collaborator.
///
/// Treated as an opaque, possibly-expensive, possibly-failing call. The
/// producer drops failed candidates instead of retrying.
#[async_trait]
pub trait PromptGenerator: Send + Sync {
    /// Generates one candidate prompt for a topic.
    async fn generate(
        &self,
        topic: &str,
        style: &str,
        category: &str,
    ) -> Result<GeneratedPrompt, GeneratorError>;
}

/// External topic supplier: yields `(category, topic)` pairs.
pub trait TopicSupplier: Send + Sync {
    /// Picks the next `n` topics to generate for.
    fn next_topics(&self, n: usize) -> Vec<(String, String)>;
}

/// Built-in topic pool sampling uniformly from a fixed list.
#[derive(Debug, Clone)]
pub struct TopicPool {
    topics: Vec<(String, String)>,
}

impl Default for TopicPool {
    fn default() -> Self {
        let entries: &[(&str, &str)] = &[
            ("society", "trust in public institutions"),
            ("society", "urban loneliness"),
            ("society", "generational wealth gaps"),
            ("science", "quantum computing"),
            ("science", "gut microbiome research"),
            ("science", "fusion energy timelines"),
            ("technology", "recommendation algorithms"),
            ("technology", "open source maintenance"),
            ("technology", "digital identity systems"),
            ("education", "spaced repetition learning"),
            ("education", "assessment without grades"),
            ("culture", "remix culture and ownership"),
            ("culture", "the attention economy"),
        ];
        Self {
            topics: entries
                .iter()
                .map(|(c, t)| (c.to_string(), t.to_string()))
                .collect(),
        }
    }
}

impl TopicPool {
    /// Creates a pool from explicit `(category, topic)` pairs.
    pub fn new(topics: Vec<(String, String)>) -> Self {
        Self { topics }
    }
}

impl TopicSupplier for TopicPool {
    fn next_topics(&self, n: usize) -> Vec<(String, String)> {
        let mut rng = rand::rng();
        (0..n)
            .filter_map(|_| self.topics.choose(&mut rng).cloned())
            .collect()
    }
}

/// Learned preferences the learning loop feeds back into production.
#[derive(Debug, Clone, Default)]
pub struct GenerationBias {
    /// Styles that performed best in the learned-from sample.
    pub preferred_styles: Vec<String>,
    /// Categories that performed best in the learned-from sample.
    pub preferred_categories: Vec<String>,
    /// Instruction text prepended to the topic when generating.
    pub instruction_prefix: Option<String>,
}

/// Outcome of one producer run.
#[derive(Debug, Clone, Serialize)]
pub struct ProducerReport {
    /// Whether the directive allowed production.
    pub should_produce: bool,
    /// Prompts the directive asked for.
    pub requested: usize,
    /// Prompts generated and published.
    pub produced: usize,
    /// Candidates dropped because generation or publish failed.
    pub failed: usize,
    /// Whether the run was a no-op.
    pub skipped: bool,
    /// Why the run was skipped, if it was.
    pub reason: Option<String>,
    /// Wall-clock duration of the run.
    #[serde(skip)]
    pub elapsed: Duration,
}

impl ProducerReport {
    fn skipped(reason: &str) -> Self {
        Self {
            should_produce: false,
            requested: 0,
            produced: 0,
            failed: 0,
            skipped: true,
            reason: Some(reason.to_string()),
            elapsed: Duration::ZERO,
        }
    }
}

/// Directive-driven producer over a job store.
pub struct Producer {
    store: JobStore,
    monitor: QueueMonitor,
    manager: QueueManager,
    cost_log: Option<JsonlLog>,
}

impl Producer {
    /// Creates a producer.
    pub fn new(store: JobStore, monitor: QueueMonitor, manager: QueueManager) -> Self {
        Self {
            store,
            monitor,
            manager,
            cost_log: None,
        }
    }

    /// Enables append-only cost logging for upstream generations.
    pub fn with_cost_log(mut self, log: JsonlLog) -> Self {
        self.cost_log = Some(log);
        self
    }

    /// Checks the queue and produces what the directive allows.
    ///
    /// With `force` the queue check is bypassed and the base batch is
    /// produced regardless of backlog.
    pub async fn run(
        &self,
        generator: &dyn PromptGenerator,
        topics: &dyn TopicSupplier,
        bias: Option<&GenerationBias>,
        force: bool,
    ) -> Result<ProducerReport, StoreError> {
        let directive = if force {
            Directive {
                should_produce: true,
                batch_size: self.manager.base_batch_size(),
            }
        } else {
            self.manager.decide(&self.monitor.snapshot()?)
        };

        if !directive.should_produce {
            info!("Queue has enough work, skipping production");
            return Ok(ProducerReport::skipped("queue sufficient"));
        }

        let start = Instant::now();
        let requested = directive.batch_size;
        info!(requested, "Producer activated");

        let mut produced = 0;
        let mut failed = 0;

        for (category, topic) in topics.next_topics(requested) {
            let style = pick_style(bias);
            let request_text = match bias.and_then(|b| b.instruction_prefix.as_deref()) {
                Some(prefix) => format!("{prefix}\n\nTopic: \"{topic}\""),
                None => topic.clone(),
            };

            match generator.generate(&request_text, &style, &category).await {
                Ok(prompt) => {
                    let mut metadata = JobMetadata::new(&topic, &style, &category);
                    metadata.generator_quality = prompt.quality_score;
                    metadata.generator_cost = prompt.cost;

                    let name = self.store.publish(&prompt.text, &metadata)?;
                    info!(job = %name, topic = %topic, style = %style, "Published job");
                    produced += 1;

                    if let (Some(log), Some(cost)) = (&self.cost_log, prompt.cost) {
                        let mut event = CostEvent::new(&topic, &style, cost);
                        if let Some(model) = &prompt.model {
                            event = event.with_model(model);
                        }
                        if let Err(e) = log.append(&event) {
                            warn!(error = %e, "Failed to append cost event");
                        }
                    }
                }
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Generation failed, dropping candidate");
                    failed += 1;
                }
            }
        }

        let elapsed = start.elapsed();
        info!(produced, failed, requested, "Production complete");

        Ok(ProducerReport {
            should_produce: true,
            requested,
            produced,
            failed,
            skipped: false,
            reason: None,
            elapsed,
        })
    }
}

/// Picks a style, preferring the learned ones when a bias is present.
fn pick_style(bias: Option<&GenerationBias>) -> String {
    let mut rng = rand::rng();
    if let Some(bias) = bias {
        if let Some(style) = bias.preferred_styles.choose(&mut rng) {
            return style.clone();
        }
    }
    STYLES
        .choose(&mut rng)
        .map(|s| s.to_string())
        .unwrap_or_else(|| "casual".to_string())
}

/// Prompt generator backed by the same remote model endpoint the
/// calibration pipeline uses.
pub struct RemotePromptGenerator<T: ModelTransport> {
    client: ModelClient<T>,
    config: CalibrationConfig,
}

impl<T: ModelTransport> RemotePromptGenerator<T> {
    /// Creates a generator over a transport.
    pub fn new(config: CalibrationConfig, transport: T) -> Self {
        Self {
            client: ModelClient::from_config(transport, &config),
            config,
        }
    }
}

#[async_trait]
impl<T: ModelTransport> PromptGenerator for RemotePromptGenerator<T> {
    async fn generate(
        &self,
        topic: &str,
        style: &str,
        category: &str,
    ) -> Result<GeneratedPrompt, GeneratorError> {
        let instruction = format!(
            "Write one self-contained prompt in a {style} voice about the topic \
             \"{topic}\" (category: {category}). Return only the prompt text."
        );
        let request = ModelRequest::from_config(instruction, &self.config);
        let reply = self
            .client
            .send(&request)
            .await
            .map_err(|e| GeneratorError::Upstream(e.to_string()))?;

        if is_refusal(&reply.text) {
            return Err(GeneratorError::Refused);
        }
        let text = reply.text.trim().to_string();
        if text.is_empty() {
            return Err(GeneratorError::Empty);
        }

        Ok(GeneratedPrompt {
            text,
            quality_score: None,
            cost: None,
            model: None,
        })
    }
}
