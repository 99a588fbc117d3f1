//! The learning loop: mine high-scoring past jobs to bias future
//! production.
//!
//! One round: select the top processed jobs above the score floor,
//! condense them into pattern statistics, run the producer with the
//! derived bias, archive the sampled jobs so they are never learned from
//! twice, and append one generation record. With no qualifying jobs the
//! round degrades gracefully to unbiased production and appends nothing.

pub mod analyzer;
pub mod learner;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::EvolutionConfig;
use crate::logs::{JsonlLog, LogError};
use crate::queue::{Producer, PromptGenerator, TopicSupplier};
use crate::store::{JobStore, StoreError};

pub use analyzer::{LearnedJob, PatternAnalysis, ResultAnalyzer};
pub use learner::{bias_from, compose_instruction, GenerationRecord};

/// Errors that can occur during a learning round.
#[derive(Debug, Error)]
pub enum EvolutionError {
    /// Store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Generation log could not be read or appended.
    #[error("Log error: {0}")]
    Log(#[from] LogError),
}

/// Outcome of one learning round.
#[derive(Debug, Clone, Serialize)]
pub struct EvolutionReport {
    /// Generation number of this round.
    pub generation: u32,
    /// Jobs the round learned from.
    pub learned_from: usize,
    /// Mean score of the learned-from sample.
    pub avg_score: f64,
    /// New jobs produced.
    pub produced: usize,
    /// Candidates dropped by the producer.
    pub failed: usize,
    /// Sampled jobs moved to `archive/`.
    pub archived: usize,
    /// True when no qualifying jobs existed and production ran unbiased.
    pub unbiased: bool,
}

/// Orchestrates learning rounds over a store and its generation log.
pub struct EvolutionLoop {
    store: JobStore,
    config: EvolutionConfig,
    log: JsonlLog,
}

impl EvolutionLoop {
    /// Creates a loop over a store with the given configuration.
    pub fn new(store: JobStore, config: EvolutionConfig) -> Self {
        let log = JsonlLog::new(config.log_path.clone());
        Self { store, config, log }
    }

    /// Next generation number, continuing from the last appended record.
    pub fn next_generation(&self) -> Result<u32, EvolutionError> {
        Ok(self
            .log
            .read_last::<GenerationRecord>()?
            .map(|record| record.generation + 1)
            .unwrap_or(1))
    }

    /// Runs one learning round.
    pub async fn run(
        &self,
        producer: &Producer,
        generator: &dyn PromptGenerator,
        topics: &dyn TopicSupplier,
    ) -> Result<EvolutionReport, EvolutionError> {
        let generation = self.next_generation()?;
        let analyzer = ResultAnalyzer::new(self.store.clone());

        let jobs = analyzer.top_jobs(self.config.max_samples, self.config.min_score)?;
        let analysis = analyzer.analyze(&jobs);
        let bias = bias_from(&analysis);

        if jobs.is_empty() {
            info!(
                generation,
                min_score = self.config.min_score,
                "No qualifying jobs, producing without learning"
            );
        } else {
            info!(
                generation,
                learned_from = jobs.len(),
                avg_score = analysis.avg_score,
                "Learning from processed jobs"
            );
        }

        let report = producer
            .run(generator, topics, bias.as_ref(), false)
            .await?;

        let mut archived = 0;
        if self.config.archive_after_read {
            for job in &jobs {
                self.store.archive(&job.name)?;
                archived += 1;
            }
        }

        let unbiased = jobs.is_empty();
        if !unbiased {
            self.log
                .append(&GenerationRecord::new(generation, &analysis, report.produced))?;
        }

        info!(
            generation,
            produced = report.produced,
            archived,
            "Learning round complete"
        );

        Ok(EvolutionReport {
            generation,
            learned_from: jobs.len(),
            avg_score: analysis.avg_score,
            produced: report.produced,
            failed: report.failed,
            archived,
            unbiased,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CalibrationResult, FieldParser, QualityScorer};
    use crate::queue::{GeneratedPrompt, GeneratorError, QueueManager, QueueMonitor, TopicPool};
    use crate::store::{JobMetadata, JobState};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    const COMPLETE_RESPONSE: &str = "\
1. DRIFT: a
2. BACKGROUND PATTERN: b
3. PRESSURE FACTORS: c
4. DEPTH: d
5. IMPACT: e
6. PLAIN TEXT: f";

    struct OkGenerator;

    #[async_trait]
    impl crate::queue::PromptGenerator for OkGenerator {
        async fn generate(
            &self,
            topic: &str,
            _style: &str,
            _category: &str,
        ) -> Result<GeneratedPrompt, GeneratorError> {
            Ok(GeneratedPrompt {
                text: format!("prompt about {topic}"),
                quality_score: None,
                cost: None,
                model: None,
            })
        }
    }

    fn seed_processed_job(store: &JobStore, topic: &str, style: &str) {
        store
            .publish("content", &JobMetadata::new(topic, style, "test"))
            .expect("publish");
        let mut job = store.claim_next().expect("claim").expect("job");
        let parser = FieldParser::new();
        let fields = parser.parse(COMPLETE_RESPONSE);
        job.metadata.calibration = Some(CalibrationResult {
            success: true,
            response: COMPLETE_RESPONSE.to_string(),
            terminology: fields.terminology,
            fields: BTreeMap::new(),
            score: QualityScorer::legacy().score(&fields, COMPLETE_RESPONSE),
            duration_ms: 5,
            transport_retries: 0,
            refusal_attempts: 0,
            session_id: "testsess".to_string(),
            worker_id: None,
        });
        store.complete(&mut job).expect("complete");
    }

    fn test_loop(root: &std::path::Path) -> (JobStore, Producer, EvolutionLoop) {
        let store = JobStore::open(root.join("queue")).expect("store");
        let monitor = QueueMonitor::new(store.clone(), 5, 50);
        let manager = QueueManager::new(4, 10);
        let producer = Producer::new(store.clone(), monitor, manager);
        let config = EvolutionConfig {
            log_path: root.join("logs/evolution.jsonl"),
            ..EvolutionConfig::default()
        };
        let evolution = EvolutionLoop::new(store.clone(), config);
        (store, producer, evolution)
    }

    #[tokio::test]
    async fn test_run_without_qualifying_jobs_is_unbiased() {
        let dir = tempdir().expect("tempdir");
        let (_store, producer, evolution) = test_loop(dir.path());

        let report = evolution
            .run(&producer, &OkGenerator, &TopicPool::default())
            .await
            .expect("run");

        assert!(report.unbiased);
        assert_eq!(report.learned_from, 0);
        assert_eq!(report.archived, 0);
        // Production still ran, the queue was starving.
        assert_eq!(report.produced, 4);
        // No record appended without learning.
        assert_eq!(evolution.next_generation().expect("generation"), 1);
    }

    #[tokio::test]
    async fn test_run_learns_archives_and_records() {
        let dir = tempdir().expect("tempdir");
        let (store, producer, evolution) = test_loop(dir.path());

        seed_processed_job(&store, "topic-a", "casual");
        seed_processed_job(&store, "topic-b", "casual");

        let report = evolution
            .run(&producer, &OkGenerator, &TopicPool::default())
            .await
            .expect("run");

        assert!(!report.unbiased);
        assert_eq!(report.learned_from, 2);
        assert_eq!(report.archived, 2);
        assert!((report.avg_score - 100.0).abs() < f64::EPSILON);
        assert_eq!(report.generation, 1);

        // Sampled jobs left processed/ for archive/.
        assert_eq!(store.count(JobState::Processed).expect("count"), 0);
        assert_eq!(store.count(JobState::Archive).expect("count"), 2);

        // The next round continues the numbering.
        assert_eq!(evolution.next_generation().expect("generation"), 2);
    }

    #[tokio::test]
    async fn test_generation_numbering_continues() {
        let dir = tempdir().expect("tempdir");
        let (store, producer, evolution) = test_loop(dir.path());

        for round in 0..2 {
            seed_processed_job(&store, &format!("topic-{round}"), "casual");
            evolution
                .run(&producer, &OkGenerator, &TopicPool::default())
                .await
                .expect("run");
            // Drain the incoming jobs the round produced so the next
            // round's queue check still allows production.
            while let Some(mut job) = store.claim_next().expect("claim") {
                store.fail(&mut job, "drained by test").expect("fail");
            }
        }

        assert_eq!(evolution.next_generation().expect("generation"), 3);
    }
}
