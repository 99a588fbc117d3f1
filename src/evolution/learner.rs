//! Turning pattern analysis into a generation bias.
//!
//! The learner composes a short natural-language summary of what worked
//! in the learned-from sample and packages it, together with the
//! best-performing styles and categories, as a bias for the next
//! producer batch. Each learning round is recorded as an append-only
//! generation record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::queue::GenerationBias;

use super::analyzer::PatternAnalysis;

/// How many top categories/styles feed into the bias.
const TOP_PATTERNS: usize = 3;

/// One append-only record of a learning-loop round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    /// When the round ran.
    pub timestamp: DateTime<Utc>,
    /// 1-based generation number, continuing from the last record.
    pub generation: u32,
    /// Jobs the round learned from.
    pub sample_count: usize,
    /// Mean score of the learned-from sample.
    pub avg_score: f64,
    /// Most frequent categories in the sample.
    pub top_categories: Vec<String>,
    /// Most frequent styles in the sample.
    pub top_styles: Vec<String>,
    /// Per-field detection rate across the sample (0-1).
    pub field_detection: BTreeMap<String, f64>,
    /// New jobs produced as a result of this round.
    pub prompts_produced: usize,
}

impl GenerationRecord {
    /// Builds a record from an analysis and the production outcome.
    pub fn new(generation: u32, analysis: &PatternAnalysis, prompts_produced: usize) -> Self {
        Self {
            timestamp: Utc::now(),
            generation,
            sample_count: analysis.sample_count,
            avg_score: analysis.avg_score,
            top_categories: analysis.top_categories(TOP_PATTERNS),
            top_styles: analysis.top_styles(TOP_PATTERNS),
            field_detection: analysis.field_detection.clone(),
            prompts_produced,
        }
    }
}

/// Derives a generation bias from an analysis.
///
/// Returns `None` for an empty sample, in which case the producer falls
/// back to unbiased topic and style selection.
pub fn bias_from(analysis: &PatternAnalysis) -> Option<GenerationBias> {
    if analysis.sample_count == 0 {
        return None;
    }
    Some(GenerationBias {
        preferred_styles: analysis.top_styles(TOP_PATTERNS),
        preferred_categories: analysis.top_categories(TOP_PATTERNS),
        instruction_prefix: Some(compose_instruction(analysis)),
    })
}

/// Composes the augmented generation instruction sent ahead of each
/// topic.
pub fn compose_instruction(analysis: &PatternAnalysis) -> String {
    let top_categories = analysis.top_categories(TOP_PATTERNS).join(", ");
    let top_styles = analysis.top_styles(TOP_PATTERNS).join(", ");
    let best_style = analysis
        .top_styles(1)
        .into_iter()
        .next()
        .unwrap_or_else(|| "casual".to_string());

    let weakest_field = analysis
        .field_detection
        .iter()
        .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(field, rate)| format!("{field} ({:.0}% detected)", rate * 100.0));

    let mut instruction = format!(
        "Based on successful prompt patterns (avg score {:.0}/100):\n\
         - top-performing categories: {top_categories}\n\
         - top-performing styles: {top_styles}\n\n\
         Write the prompt in a {best_style} voice, using approaches that \
         worked in earlier prompts, and aim for all six analysis fields to \
         be extractable from the eventual response.",
        analysis.avg_score
    );
    if let Some(weakest) = weakest_field {
        instruction.push_str(&format!(
            "\nPay particular attention to triggering the weakest field: {weakest}."
        ));
    }
    instruction
}
