//! Structured-field extraction from model responses.
//!
//! A calibrated response carries six numbered sections (`1.` through
//! `6.`). Three parallel terminology sets name the same six concepts:
//!
//! - **Plain**: DRIFT, BACKGROUND PATTERN, PRESSURE FACTORS, DEPTH,
//!   IMPACT, PLAIN TEXT
//! - **Technical**: DRIFT BODY, SUBPROTOCOL, CALIBRATION FIELD,
//!   TIER ANALYSIS, RESONANCE SPLIT, PLAIN TEXT
//! - **Symbolic**: SIGMA-DRIFT, SIGMA-PATTERN, SIGMA-PRESSURE,
//!   SIGMA-TIER, SIGMA-SPLIT, SIGMA-TEXT
//!
//! The terminology is picked once per response by a single discriminator
//! check (the symbolic marker first, then the technical headers, plain
//! otherwise); the matching header patterns for that set are then applied
//! in order. Unmatched sections are left empty rather than raising; a
//! partially structured response still completes, it just scores low.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Marker string that distinguishes the symbolic terminology.
const SYMBOLIC_MARKER: &str = "SIGMA-";

/// Headers whose presence distinguishes the technical terminology from
/// the plain one.
const TECHNICAL_DISCRIMINATORS: &[&str] = &["DRIFT BODY", "SUBPROTOCOL", "CALIBRATION FIELD"];

/// Number of structured fields in a calibrated response.
pub const FIELD_COUNT: usize = 6;

/// The six field concepts, independent of terminology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Primary directional reading of the content.
    Drift,
    /// Recurring structure behind the surface content.
    Pattern,
    /// Forces acting on the content.
    Pressure,
    /// Layered depth analysis.
    Depth,
    /// Effect on both sides of the exchange.
    Impact,
    /// Plain-language summary.
    Summary,
}

impl FieldKind {
    /// All fields in response order.
    pub const ALL: [FieldKind; FIELD_COUNT] = [
        FieldKind::Drift,
        FieldKind::Pattern,
        FieldKind::Pressure,
        FieldKind::Depth,
        FieldKind::Impact,
        FieldKind::Summary,
    ];

    /// Canonical (terminology-independent) name used in metadata and
    /// reference configuration.
    pub fn canonical(&self) -> &'static str {
        match self {
            FieldKind::Drift => "drift",
            FieldKind::Pattern => "pattern",
            FieldKind::Pressure => "pressure",
            FieldKind::Depth => "depth",
            FieldKind::Impact => "impact",
            FieldKind::Summary => "summary",
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// Which of the three naming sets a response uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminology {
    /// Human-facing naming.
    Plain,
    /// Technical naming.
    Technical,
    /// Symbolic naming, flagged by the `SIGMA-` marker.
    Symbolic,
}

impl Terminology {
    /// Section headers for this terminology, in response order.
    pub fn headers(&self) -> [&'static str; FIELD_COUNT] {
        match self {
            Terminology::Plain => [
                "DRIFT",
                "BACKGROUND PATTERN",
                "PRESSURE FACTORS",
                "DEPTH",
                "IMPACT",
                "PLAIN TEXT",
            ],
            Terminology::Technical => [
                "DRIFT BODY",
                "SUBPROTOCOL",
                "CALIBRATION FIELD",
                "TIER ANALYSIS",
                "RESONANCE SPLIT",
                "PLAIN TEXT",
            ],
            Terminology::Symbolic => [
                "SIGMA-DRIFT",
                "SIGMA-PATTERN",
                "SIGMA-PRESSURE",
                "SIGMA-TIER",
                "SIGMA-SPLIT",
                "SIGMA-TEXT",
            ],
        }
    }

    /// Picks the terminology a response uses with a single discriminator
    /// pass: the symbolic marker wins, then the technical headers, and
    /// everything else parses as plain.
    pub fn detect(response: &str) -> Terminology {
        let upper = response.to_uppercase();
        if upper.contains(SYMBOLIC_MARKER) {
            return Terminology::Symbolic;
        }
        if TECHNICAL_DISCRIMINATORS.iter().any(|h| upper.contains(h)) {
            return Terminology::Technical;
        }
        Terminology::Plain
    }
}

impl std::fmt::Display for Terminology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Terminology::Plain => write!(f, "plain"),
            Terminology::Technical => write!(f, "technical"),
            Terminology::Symbolic => write!(f, "symbolic"),
        }
    }
}

/// The six extracted field values, tagged with the terminology they were
/// parsed under.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMap {
    /// Terminology the response used.
    pub terminology: Terminology,
    values: [Option<String>; FIELD_COUNT],
}

impl FieldMap {
    /// Creates an empty field map for a terminology.
    pub fn empty(terminology: Terminology) -> Self {
        Self {
            terminology,
            values: Default::default(),
        }
    }

    /// Returns a field's extracted text, if it was matched.
    pub fn get(&self, kind: FieldKind) -> Option<&str> {
        self.values[index_of(kind)].as_deref()
    }

    /// Iterates `(kind, value)` pairs in response order.
    pub fn iter(&self) -> impl Iterator<Item = (FieldKind, Option<&str>)> + '_ {
        FieldKind::ALL
            .iter()
            .map(move |kind| (*kind, self.get(*kind)))
    }

    /// Number of fields that were matched with non-empty content.
    pub fn present_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    /// Canonical names of the fields that are missing or empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        FieldKind::ALL
            .iter()
            .filter(|kind| self.get(**kind).is_none())
            .map(|kind| kind.canonical())
            .collect()
    }

    /// Whether all six fields were matched.
    pub fn is_complete(&self) -> bool {
        self.present_count() == FIELD_COUNT
    }

    fn set(&mut self, kind: FieldKind, value: String) {
        if !value.is_empty() {
            self.values[index_of(kind)] = Some(value);
        }
    }
}

fn index_of(kind: FieldKind) -> usize {
    match kind {
        FieldKind::Drift => 0,
        FieldKind::Pattern => 1,
        FieldKind::Pressure => 2,
        FieldKind::Depth => 3,
        FieldKind::Impact => 4,
        FieldKind::Summary => 5,
    }
}

/// Parser for the six numbered sections, with one compiled pattern set per
/// terminology.
pub struct FieldParser {
    plain: [Regex; FIELD_COUNT],
    technical: [Regex; FIELD_COUNT],
    symbolic: [Regex; FIELD_COUNT],
}

impl Default for FieldParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldParser {
    /// Compiles the pattern sets for all three terminologies.
    pub fn new() -> Self {
        Self {
            plain: compile_patterns(Terminology::Plain),
            technical: compile_patterns(Terminology::Technical),
            symbolic: compile_patterns(Terminology::Symbolic),
        }
    }

    /// Parses a response into a field map.
    ///
    /// Detects the terminology once, then applies that set's patterns.
    /// Sections that do not match are left empty.
    pub fn parse(&self, response: &str) -> FieldMap {
        let terminology = Terminology::detect(response);
        let patterns = match terminology {
            Terminology::Plain => &self.plain,
            Terminology::Technical => &self.technical,
            Terminology::Symbolic => &self.symbolic,
        };

        let mut fields = FieldMap::empty(terminology);
        for (kind, pattern) in FieldKind::ALL.iter().zip(patterns.iter()) {
            if let Some(captures) = pattern.captures(response) {
                if let Some(value) = captures.get(1) {
                    fields.set(*kind, value.as_str().trim().to_string());
                }
            }
        }
        fields
    }
}

/// Compiles the six section patterns for a terminology.
///
/// Each pattern anchors on the section number and header, captures
/// non-greedily up to the next section number (or end of text), and
/// tolerates spaces or hyphens between header words.
fn compile_patterns(terminology: Terminology) -> [Regex; FIELD_COUNT] {
    let headers = terminology.headers();
    std::array::from_fn(|i| {
        let number = i + 1;
        let header = header_pattern(headers[i]);
        let source = if number < FIELD_COUNT {
            format!(
                r"(?is){number}\.\s*{header}\s*:?\s*(.*?)\s*(?:\n\s*{}\.|\z)",
                number + 1
            )
        } else {
            format!(r"(?is){number}\.\s*{header}\s*:?\s*(.*?)\s*\z")
        };
        Regex::new(&source).expect("Invalid regex for section header")
    })
}

/// Turns a header like `BACKGROUND PATTERN` into a pattern tolerating
/// spaces or hyphens between its words.
fn header_pattern(header: &str) -> String {
    header
        .split([' ', '-'])
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"[\s-]+")
}
