//! Weighted quality scoring for parsed field maps.
//!
//! Each of the six fields is scored on five components:
//!
//! - presence (20%): the field exists and is non-empty
//! - similarity (35%): lexical similarity to the configured reference
//!   description for that field
//! - coherence (25%): a single global score shared by all fields,
//!   measuring how well the extracted texts relate to each other
//! - depth (15%): length relative to configured minimum/ideal lengths
//!   plus keyword coverage
//! - structure (5%): formatting markers, paragraph breaks, punctuation
//!
//! The job's total is the mean of the six per-field totals, scaled to
//! 0-100. With no reference descriptions configured the scorer falls back
//! to the legacy structural mode (presence and numbered-structure
//! adherence only). Both modes are pure functions of their inputs.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use strsim::sorensen_dice;
use thiserror::Error;

use super::parser::{FieldKind, FieldMap, FIELD_COUNT};

/// Component weights of the semantic scoring mode.
const PRESENCE_WEIGHT: f64 = 0.20;
const SIMILARITY_WEIGHT: f64 = 0.35;
const COHERENCE_WEIGHT: f64 = 0.25;
const DEPTH_WEIGHT: f64 = 0.15;
const STRUCTURE_WEIGHT: f64 = 0.05;

/// Share of the legacy total carried by field presence vs structure.
const LEGACY_PRESENCE_SHARE: f64 = 0.7;
const LEGACY_STRUCTURE_SHARE: f64 = 0.3;

/// Similarity granted when a field has no reference to compare against.
const NEUTRAL_SIMILARITY: f64 = 0.5;

/// Errors that can occur while loading scoring references.
#[derive(Debug, Error)]
pub enum ScorerError {
    /// IO error while reading the reference file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The reference file was not valid YAML.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Reference definition for one field, used by the similarity and depth
/// components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldReference {
    /// What a good extraction of this field talks about.
    pub description: String,
    /// Keywords a deep extraction is expected to cover.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Below this length the content is considered thin.
    #[serde(default = "default_min_length")]
    pub min_length: usize,
    /// At or above this length the content gets full length credit.
    #[serde(default = "default_ideal_length")]
    pub ideal_length: usize,
}

fn default_min_length() -> usize {
    50
}

fn default_ideal_length() -> usize {
    200
}

/// Reference definitions keyed by canonical field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceLibrary {
    entries: BTreeMap<String, FieldReference>,
}

impl ReferenceLibrary {
    /// Creates an empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads references from a YAML file mapping canonical field names to
    /// reference definitions.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ScorerError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// Adds or replaces a field's reference.
    pub fn insert(&mut self, kind: FieldKind, reference: FieldReference) {
        self.entries.insert(kind.canonical().to_string(), reference);
    }

    /// Returns a field's reference, if configured.
    pub fn get(&self, kind: FieldKind) -> Option<&FieldReference> {
        self.entries.get(kind.canonical())
    }

    /// Whether the library has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Qualitative bucket of a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreStatus {
    Excellent,
    Ok,
    Unstable,
    Failed,
}

impl ScoreStatus {
    fn for_score(score: f64) -> Self {
        if score >= 0.85 {
            ScoreStatus::Excellent
        } else if score >= 0.60 {
            ScoreStatus::Ok
        } else if score >= 0.40 {
            ScoreStatus::Unstable
        } else {
            ScoreStatus::Failed
        }
    }
}

/// Which scoring mode produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreMode {
    /// Full weighted scoring against reference descriptions.
    Semantic,
    /// Presence and structure only; no references configured.
    Legacy,
}

/// Component breakdown for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldScore {
    pub presence: f64,
    pub similarity: f64,
    pub coherence: f64,
    pub depth: f64,
    pub structure: f64,
    pub total: f64,
    pub status: ScoreStatus,
}

/// Total quality score for a calibrated response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    /// Total score, 0-100.
    pub total: u32,
    /// Qualitative bucket of the total.
    pub status: ScoreStatus,
    /// Mode that produced this score.
    pub mode: ScoreMode,
    /// Global cross-field coherence (0-1).
    pub coherence: f64,
    /// Per-field component breakdown, keyed by canonical name.
    pub fields: BTreeMap<String, FieldScore>,
    /// Human-readable quality warnings.
    pub warnings: Vec<String>,
}

impl QualityScore {
    /// Fraction of fields that were present (0-1).
    pub fn field_presence_rate(&self) -> f64 {
        if self.fields.is_empty() {
            return 0.0;
        }
        let present = self
            .fields
            .values()
            .filter(|f| f.presence > 0.0)
            .count();
        present as f64 / self.fields.len() as f64
    }
}

/// Scorer over an optional reference library.
#[derive(Debug, Clone, Default)]
pub struct QualityScorer {
    references: Option<ReferenceLibrary>,
}

impl QualityScorer {
    /// Creates a scorer in semantic mode with the given references.
    pub fn with_references(references: ReferenceLibrary) -> Self {
        Self {
            references: Some(references),
        }
    }

    /// Creates a scorer in legacy structural mode.
    pub fn legacy() -> Self {
        Self { references: None }
    }

    /// Returns the active scoring mode.
    pub fn mode(&self) -> ScoreMode {
        match &self.references {
            Some(refs) if !refs.is_empty() => ScoreMode::Semantic,
            _ => ScoreMode::Legacy,
        }
    }

    /// Scores a parsed field map against the raw response text.
    ///
    /// Deterministic: scoring the same inputs twice yields identical
    /// results.
    pub fn score(&self, fields: &FieldMap, response: &str) -> QualityScore {
        match &self.references {
            Some(references) if !references.is_empty() => {
                semantic_score(references, fields)
            }
            _ => legacy_score(fields, response),
        }
    }
}

/// Full weighted scoring against the reference library.
fn semantic_score(references: &ReferenceLibrary, fields: &FieldMap) -> QualityScore {
    let coherence = coherence_score(fields);

    let mut field_scores = BTreeMap::new();
    let mut warnings = Vec::new();
    let mut total_sum = 0.0;

    for (kind, value) in fields.iter() {
        let value = value.unwrap_or("");
        let reference = references.get(kind);

        let presence = if value.is_empty() { 0.0 } else { 1.0 };
        let similarity = score_similarity(value, reference);
        let depth = score_depth(value, reference);
        let structure = score_structure(value);

        let total = presence * PRESENCE_WEIGHT
            + similarity * SIMILARITY_WEIGHT
            + coherence * COHERENCE_WEIGHT
            + depth * DEPTH_WEIGHT
            + structure * STRUCTURE_WEIGHT;

        if presence == 0.0 {
            warnings.push(format!("Field '{kind}' is empty"));
        } else if similarity < 0.3 {
            warnings.push(format!("Field '{kind}' has low similarity to its reference"));
        }

        total_sum += total;
        field_scores.insert(
            kind.canonical().to_string(),
            FieldScore {
                presence,
                similarity: round3(similarity),
                coherence: round3(coherence),
                depth: round3(depth),
                structure: round3(structure),
                total: round3(total),
                status: ScoreStatus::for_score(total),
            },
        );
    }

    let overall = total_sum / FIELD_COUNT as f64;
    if coherence < 0.3 {
        warnings.push("Low cross-field coherence".to_string());
    }
    if overall < 0.4 {
        warnings.push("Overall quality below threshold".to_string());
    }

    QualityScore {
        total: (overall * 100.0).round() as u32,
        status: ScoreStatus::for_score(overall),
        mode: ScoreMode::Semantic,
        coherence: round3(coherence),
        fields: field_scores,
        warnings,
    }
}

/// Legacy structural scoring: weighted field presence plus adherence to
/// the numbered section structure. Used when no references are
/// configured.
fn legacy_score(fields: &FieldMap, response: &str) -> QualityScore {
    let mut field_scores = BTreeMap::new();
    let mut presence_total = 0u32;

    let markers_found = (1..=FIELD_COUNT)
        .filter(|n| response.contains(&format!("{n}.")))
        .count();
    let structure = markers_found as f64 / FIELD_COUNT as f64;

    for (kind, value) in fields.iter() {
        let present = value.is_some();
        if present {
            presence_total += legacy_weight(kind);
        }
        let presence = if present { 1.0 } else { 0.0 };
        field_scores.insert(
            kind.canonical().to_string(),
            FieldScore {
                presence,
                similarity: 0.0,
                coherence: 0.0,
                depth: 0.0,
                structure: round3(structure),
                total: presence,
                status: ScoreStatus::for_score(presence),
            },
        );
    }

    let overall =
        presence_total as f64 / 100.0 * LEGACY_PRESENCE_SHARE + structure * LEGACY_STRUCTURE_SHARE;

    let mut warnings = Vec::new();
    if presence_total < 100 {
        warnings.push("Not all fields were extracted".to_string());
    }

    QualityScore {
        total: (overall * 100.0).round() as u32,
        status: ScoreStatus::for_score(overall),
        mode: ScoreMode::Legacy,
        coherence: 0.0,
        fields: field_scores,
        warnings,
    }
}

/// Presence weight of each field in the legacy mode (sums to 100).
fn legacy_weight(kind: FieldKind) -> u32 {
    match kind {
        FieldKind::Drift => 15,
        FieldKind::Pattern => 20,
        FieldKind::Pressure => 15,
        FieldKind::Depth => 20,
        FieldKind::Impact => 20,
        FieldKind::Summary => 10,
    }
}

/// Lexical similarity of the field content to its reference description.
fn score_similarity(value: &str, reference: Option<&FieldReference>) -> f64 {
    if value.is_empty() {
        return 0.0;
    }
    match reference {
        Some(reference) if !reference.description.is_empty() => {
            sorensen_dice(&normalize(value), &normalize(&reference.description))
        }
        _ => NEUTRAL_SIMILARITY,
    }
}

/// Content depth: length relative to the configured minimum/ideal lengths
/// (up to half the score) plus keyword coverage (the other half).
fn score_depth(value: &str, reference: Option<&FieldReference>) -> f64 {
    if value.is_empty() {
        return 0.0;
    }
    let (min_len, ideal_len, keywords) = match reference {
        Some(r) => (r.min_length, r.ideal_length.max(r.min_length + 1), &r.keywords[..]),
        None => (default_min_length(), default_ideal_length(), &[][..]),
    };

    let len = value.trim().len();
    let len_score = if len >= ideal_len {
        0.5
    } else if len >= min_len {
        0.3 + 0.2 * (len - min_len) as f64 / (ideal_len - min_len) as f64
    } else {
        0.3 * len as f64 / min_len as f64
    };

    let keyword_score = if keywords.is_empty() {
        0.25
    } else {
        keyword_coverage(value, keywords) * 0.5
    };

    (len_score + keyword_score).min(1.0)
}

/// Structural quality: formatting markers, paragraph breaks, punctuation.
fn score_structure(value: &str) -> f64 {
    if value.is_empty() {
        return 0.0;
    }
    let mut score: f64 = 0.5;
    if value.contains("###") || value.contains("**") {
        score += 0.2;
    }
    if value.contains("\n\n") || value.lines().count() > 2 {
        score += 0.15;
    }
    if value.contains(':') || value.contains('-') {
        score += 0.15;
    }
    score.min(1.0)
}

/// Global cross-field coherence: mean pairwise word overlap of all
/// present fields. One global value is shared by every field's breakdown.
fn coherence_score(fields: &FieldMap) -> f64 {
    let present: Vec<&str> = fields.iter().filter_map(|(_, v)| v).collect();
    if present.len() < 2 {
        return 0.0;
    }

    let mut sum = 0.0;
    let mut pairs = 0usize;
    for i in 0..present.len() {
        for j in (i + 1)..present.len() {
            sum += word_overlap(present[i], present[j]);
            pairs += 1;
        }
    }
    sum / pairs as f64
}

/// Fraction of keywords that appear in the content (case-insensitive).
fn keyword_coverage(value: &str, keywords: &[String]) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let haystack = value.to_lowercase();
    let hits = keywords
        .iter()
        .filter(|k| haystack.contains(&k.to_lowercase()))
        .count();
    hits as f64 / keywords.len() as f64
}

/// Jaccard overlap of the two texts' word sets.
fn word_overlap(a: &str, b: &str) -> f64 {
    let words_a: std::collections::BTreeSet<String> =
        a.to_lowercase().split_whitespace().map(String::from).collect();
    let words_b: std::collections::BTreeSet<String> =
        b.to_lowercase().split_whitespace().map(String::from).collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f64 / union as f64
}

/// Lowercases and collapses whitespace for similarity comparison.
fn normalize(text: &str) -> String {
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::parser::FieldParser;

    const COMPLETE_RESPONSE: &str = "\
1. DRIFT: The argument drifts toward institutional authority and trust in experts.
2. BACKGROUND PATTERN: The same claim-evidence-appeal pattern repeats across the argument.
3. PRESSURE FACTORS: Urgency and deadline pressure compress the space of options in the argument.
4. DEPTH: The argument has three layers, from surface claim down to a buried premise about trust.
5. IMPACT: Both sides of the argument harden their positions and trust erodes.
6. PLAIN TEXT: The argument leans on urgency and authority instead of evidence.";

    fn complete_fields() -> FieldMap {
        FieldParser::new().parse(COMPLETE_RESPONSE)
    }

    fn test_references() -> ReferenceLibrary {
        let mut library = ReferenceLibrary::new();
        for kind in FieldKind::ALL {
            library.insert(
                kind,
                FieldReference {
                    description: format!(
                        "the argument and its {} as it appears in the text",
                        kind.canonical()
                    ),
                    keywords: vec!["argument".to_string()],
                    min_length: 20,
                    ideal_length: 60,
                },
            );
        }
        library
    }

    #[test]
    fn test_semantic_score_is_deterministic() {
        let scorer = QualityScorer::with_references(test_references());
        let fields = complete_fields();

        let first = scorer.score(&fields, COMPLETE_RESPONSE);
        let second = scorer.score(&fields, COMPLETE_RESPONSE);

        assert_eq!(first, second);
    }

    #[test]
    fn test_semantic_score_complete_response() {
        let scorer = QualityScorer::with_references(test_references());
        let score = scorer.score(&complete_fields(), COMPLETE_RESPONSE);

        assert_eq!(score.mode, ScoreMode::Semantic);
        assert_eq!(score.fields.len(), FIELD_COUNT);
        assert!(score.total > 40, "total was {}", score.total);
        assert!((score.field_presence_rate() - 1.0).abs() < f64::EPSILON);
        for field in score.fields.values() {
            assert!(field.presence > 0.0);
        }
    }

    #[test]
    fn test_semantic_score_empty_fields_scores_low() {
        let scorer = QualityScorer::with_references(test_references());
        let fields = FieldParser::new().parse("");
        let score = scorer.score(&fields, "");

        assert!(score.total < 20);
        assert_eq!(score.status, ScoreStatus::Failed);
        assert!(score
            .warnings
            .iter()
            .any(|w| w.contains("Overall quality below threshold")));
    }

    #[test]
    fn test_legacy_mode_without_references() {
        let scorer = QualityScorer::legacy();
        assert_eq!(scorer.mode(), ScoreMode::Legacy);

        let score = scorer.score(&complete_fields(), COMPLETE_RESPONSE);
        assert_eq!(score.mode, ScoreMode::Legacy);
        // All six fields present and all six numbered markers found.
        assert_eq!(score.total, 100);
        assert_eq!(score.status, ScoreStatus::Excellent);
    }

    #[test]
    fn test_legacy_mode_partial_fields() {
        let scorer = QualityScorer::legacy();
        let response = "1. DRIFT: something short";
        let fields = FieldParser::new().parse(response);
        let score = scorer.score(&fields, response);

        // Only drift (weight 15) present, one of six markers.
        let expected = ((15.0_f64 / 100.0 * 0.7 + (1.0 / 6.0) * 0.3) * 100.0).round() as u32;
        assert_eq!(score.total, expected);
        assert!(score.warnings.iter().any(|w| w.contains("Not all fields")));
    }

    #[test]
    fn test_coherence_shared_across_fields() {
        let scorer = QualityScorer::with_references(test_references());
        let score = scorer.score(&complete_fields(), COMPLETE_RESPONSE);

        let coherences: Vec<f64> = score.fields.values().map(|f| f.coherence).collect();
        assert!(coherences.windows(2).all(|w| (w[0] - w[1]).abs() < 1e-9));
        assert!(score.coherence > 0.0);
    }

    #[test]
    fn test_score_depth_length_bands() {
        let reference = FieldReference {
            description: "d".to_string(),
            keywords: vec![],
            min_length: 10,
            ideal_length: 20,
        };

        assert_eq!(score_depth("", Some(&reference)), 0.0);
        // Below minimum: partial length credit plus the neutral keyword share.
        let thin = score_depth("short", Some(&reference));
        assert!(thin < 0.5);
        // At or past ideal: full length credit plus neutral keyword share.
        let deep = score_depth(&"x".repeat(25), Some(&reference));
        assert!((deep - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_keyword_coverage() {
        let keywords = vec!["drift".to_string(), "pressure".to_string()];
        assert!((keyword_coverage("The drift is clear", &keywords) - 0.5).abs() < 1e-9);
        assert!((keyword_coverage("drift under PRESSURE", &keywords) - 1.0).abs() < 1e-9);
        assert_eq!(keyword_coverage("nothing relevant", &keywords), 0.0);
    }

    #[test]
    fn test_score_structure_components() {
        assert_eq!(score_structure(""), 0.0);
        assert!((score_structure("plain words only") - 0.5).abs() < 1e-9);
        assert!(score_structure("**bold** text: with\n\nparagraphs") > 0.9);
    }

    #[test]
    fn test_reference_library_yaml_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("references.yaml");
        std::fs::write(
            &path,
            "drift:\n  description: directional reading of the text\n  keywords: [drift, direction]\n",
        )
        .expect("write yaml");

        let library = ReferenceLibrary::from_yaml_file(&path).expect("load yaml");
        let reference = library.get(FieldKind::Drift).expect("drift reference");
        assert_eq!(reference.description, "directional reading of the text");
        assert_eq!(reference.keywords.len(), 2);
        assert_eq!(reference.min_length, default_min_length());
        assert!(library.get(FieldKind::Impact).is_none());
    }
}
