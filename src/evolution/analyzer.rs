//! Pattern analysis over processed jobs.
//!
//! The analyzer selects the best-scoring processed jobs and condenses
//! them into aggregate statistics: score averages, category and style
//! usage, and per-field detection rates. The learner turns those
//! statistics into a generation bias for the next producer batch.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::{JobStore, StoreError};

/// One processed job selected for learning.
#[derive(Debug, Clone)]
pub struct LearnedJob {
    /// Job name in `processed/`.
    pub name: String,
    /// Total calibration score (0-100).
    pub score: u32,
    /// Topic the job was generated for.
    pub topic: String,
    /// Style the job used.
    pub style: String,
    /// Category of the topic.
    pub category: String,
    /// Per-field presence, keyed by canonical field name.
    pub field_presence: BTreeMap<String, bool>,
}

/// Aggregate statistics over a learning sample.
#[derive(Debug, Clone, Serialize)]
pub struct PatternAnalysis {
    /// Number of jobs in the sample.
    pub sample_count: usize,
    /// Mean total score of the sample.
    pub avg_score: f64,
    /// Lowest and highest score in the sample.
    pub score_range: (u32, u32),
    /// Category usage counts.
    pub categories: BTreeMap<String, usize>,
    /// Style usage counts.
    pub styles: BTreeMap<String, usize>,
    /// Per-field detection rate across the sample (0-1).
    pub field_detection: BTreeMap<String, f64>,
    /// When the analysis ran.
    pub analyzed_at: DateTime<Utc>,
}

impl PatternAnalysis {
    /// Analysis of an empty sample.
    pub fn empty() -> Self {
        Self {
            sample_count: 0,
            avg_score: 0.0,
            score_range: (0, 0),
            categories: BTreeMap::new(),
            styles: BTreeMap::new(),
            field_detection: BTreeMap::new(),
            analyzed_at: Utc::now(),
        }
    }

    /// Top categories by usage, most frequent first.
    pub fn top_categories(&self, n: usize) -> Vec<String> {
        top_n(&self.categories, n)
    }

    /// Top styles by usage, most frequent first.
    pub fn top_styles(&self, n: usize) -> Vec<String> {
        top_n(&self.styles, n)
    }
}

fn top_n(counts: &BTreeMap<String, usize>, n: usize) -> Vec<String> {
    let mut entries: Vec<(&String, &usize)> = counts.iter().collect();
    // Stable order for equal counts via the name tiebreak.
    entries.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    entries.into_iter().take(n).map(|(k, _)| k.clone()).collect()
}

/// Selects and condenses high-scoring processed jobs.
#[derive(Debug, Clone)]
pub struct ResultAnalyzer {
    store: JobStore,
}

impl ResultAnalyzer {
    /// Creates an analyzer over a store.
    pub fn new(store: JobStore) -> Self {
        Self { store }
    }

    /// Returns up to `max_samples` processed jobs with a score at or
    /// above `min_score`, best first. Jobs without a calibration result
    /// are skipped.
    pub fn top_jobs(
        &self,
        max_samples: usize,
        min_score: u32,
    ) -> Result<Vec<LearnedJob>, StoreError> {
        let mut jobs = Vec::new();

        for (name, metadata) in self.store.processed_metadata()? {
            let Some(calibration) = &metadata.calibration else {
                continue;
            };
            if calibration.score.total < min_score {
                continue;
            }

            let field_presence = calibration
                .score
                .fields
                .iter()
                .map(|(field, score)| (field.clone(), score.presence > 0.0))
                .collect();

            jobs.push(LearnedJob {
                name,
                score: calibration.score.total,
                topic: metadata.topic.clone(),
                style: metadata.style.clone(),
                category: metadata.category.clone(),
                field_presence,
            });
        }

        jobs.sort_by(|a, b| b.score.cmp(&a.score).then(a.name.cmp(&b.name)));
        jobs.truncate(max_samples);
        Ok(jobs)
    }

    /// Condenses a sample into aggregate statistics.
    pub fn analyze(&self, jobs: &[LearnedJob]) -> PatternAnalysis {
        if jobs.is_empty() {
            return PatternAnalysis::empty();
        }

        let scores: Vec<u32> = jobs.iter().map(|j| j.score).collect();
        let avg_score = scores.iter().sum::<u32>() as f64 / scores.len() as f64;

        let mut categories: BTreeMap<String, usize> = BTreeMap::new();
        let mut styles: BTreeMap<String, usize> = BTreeMap::new();
        let mut detections: BTreeMap<String, usize> = BTreeMap::new();

        for job in jobs {
            *categories.entry(job.category.clone()).or_insert(0) += 1;
            *styles.entry(job.style.clone()).or_insert(0) += 1;
            for (field, present) in &job.field_presence {
                if *present {
                    *detections.entry(field.clone()).or_insert(0) += 1;
                }
            }
        }

        let field_detection = detections
            .into_iter()
            .map(|(field, count)| (field, count as f64 / jobs.len() as f64))
            .collect();

        PatternAnalysis {
            sample_count: jobs.len(),
            avg_score: (avg_score * 100.0).round() / 100.0,
            score_range: (
                *scores.iter().min().unwrap_or(&0),
                *scores.iter().max().unwrap_or(&0),
            ),
            categories,
            styles,
            field_detection,
            analyzed_at: Utc::now(),
        }
    }
}
