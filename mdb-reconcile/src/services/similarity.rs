//! Similarity scoring between a baseline value and an incoming value
//!
//! # Scoring rules
//! - Numbers match when `|a-b| <= atol + rtol*max(|a|,|b|)` (similarity 1.0).
//!   Otherwise similarity falls linearly with the deviation relative to the
//!   baseline magnitude and reaches 0 at `span` (0.4 = 40% off).
//! - Text matches only on exact equality; otherwise normalized Levenshtein over
//!   the trimmed strings.
//! - Categories match on exact equality. Case-only differences score 0.95, a
//!   path that is a segment prefix of the other scores `shared / max` segments,
//!   anything else falls back to normalized Levenshtein.
//! - Mixed kinds never match and score 0, so a kind change always goes to
//!   conflict resolution.

use crate::config::ReconcileConfig;
use crate::models::parameter::category_segments;
use crate::models::ParameterValue;

/// Score for case-insensitive category equality
pub const CASE_ONLY_SIMILARITY: f64 = 0.95;

/// Result of scoring one value pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    /// Values are equal (within numeric tolerance)
    pub matched: bool,
    /// Similarity in [0, 1]
    pub score: f64,
}

impl Similarity {
    fn matched() -> Self {
        Self {
            matched: true,
            score: 1.0,
        }
    }

    fn partial(score: f64) -> Self {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        Self {
            matched: false,
            score,
        }
    }
}

/// Pure, stateless scorer; safe to share across worker threads
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityScorer {
    atol: f64,
    rtol: f64,
    span: f64,
}

impl Default for SimilarityScorer {
    fn default() -> Self {
        Self::from_config(&ReconcileConfig::default())
    }
}

impl SimilarityScorer {
    pub fn new(atol: f64, rtol: f64, span: f64) -> Self {
        Self { atol, rtol, span }
    }

    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self::new(
            config.numeric_atol,
            config.numeric_rtol,
            config.numeric_similarity_span,
        )
    }

    /// Score `incoming` against `baseline`
    pub fn score(&self, baseline: &ParameterValue, incoming: &ParameterValue) -> Similarity {
        match (baseline, incoming) {
            (ParameterValue::Number(old), ParameterValue::Number(new)) => {
                self.score_numbers(old.value, new.value)
            }
            (ParameterValue::Text(old), ParameterValue::Text(new)) => score_text(old, new),
            (ParameterValue::Category(old), ParameterValue::Category(new)) => {
                score_categories(old, new)
            }
            _ => Similarity::partial(0.0),
        }
    }

    /// Tolerance test used to decide a numeric match
    pub fn within_tolerance(&self, a: f64, b: f64) -> bool {
        (a - b).abs() <= self.atol + self.rtol * a.abs().max(b.abs())
    }

    fn score_numbers(&self, old: f64, new: f64) -> Similarity {
        if self.within_tolerance(old, new) {
            return Similarity::matched();
        }
        let reference = if old != 0.0 {
            old.abs()
        } else {
            old.abs().max(new.abs())
        };
        if reference == 0.0 {
            return Similarity::partial(0.0);
        }
        let deviation = (old - new).abs() / reference;
        Similarity::partial(1.0 - deviation / self.span)
    }
}

fn score_text(old: &str, new: &str) -> Similarity {
    if old == new {
        return Similarity::matched();
    }
    Similarity::partial(levenshtein(old.trim(), new.trim()))
}

fn score_categories(old: &str, new: &str) -> Similarity {
    if old == new {
        return Similarity::matched();
    }
    if old.to_lowercase() == new.to_lowercase() {
        return Similarity::partial(CASE_ONLY_SIMILARITY);
    }

    let old_segments = category_segments(old);
    let new_segments = category_segments(new);
    let (shorter, longer) = if old_segments.len() <= new_segments.len() {
        (&old_segments, &new_segments)
    } else {
        (&new_segments, &old_segments)
    };
    if !shorter.is_empty() && longer.starts_with(shorter) {
        return Similarity::partial(shorter.len() as f64 / longer.len() as f64);
    }

    Similarity::partial(levenshtein(old.trim(), new.trim()))
}

fn levenshtein(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}
