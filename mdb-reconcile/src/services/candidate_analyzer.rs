//! Candidate classification
//!
//! # Policy
//! - `New` → candidate, auto-acceptable, incoming value
//! - `Match` → candidate, auto-acceptable, baseline value (affirmation, the
//!   stored record is left untouched at commit)
//! - `Conflict` with `similarity >= threshold` → candidate, auto-acceptable,
//!   incoming value (treated as a refinement)
//! - `Conflict` below the threshold → conflict record awaiting resolution
//! - incomplete incoming record → candidate that is never auto-acceptable
//!
//! Duplicate keys: the record with the highest `sequence_index` wins, the
//! others are rejected as superseded. Input position breaks equal indexes.
//!
//! The refinement rule can overwrite a baseline value with a value 20% off at
//! the default threshold. Audit requirements may call for a stricter setting.

use crate::models::{
    Candidate, Classification, ComparedPair, ConflictRecord, OutcomeKind, RecordKey,
    RejectReason, RejectedOutcome,
};
use std::collections::HashMap;
use tracing::{info, warn};

pub struct CandidateAnalyzer {
    /// Similarity at or above which a conflict is accepted as a refinement
    threshold: f64,
}

impl Default for CandidateAnalyzer {
    fn default() -> Self {
        Self { threshold: 0.80 }
    }
}

impl CandidateAnalyzer {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Classify compared pairs; output keeps input order
    pub fn classify(&self, pairs: Vec<ComparedPair>) -> Classification {
        // Winner per key: highest sequence_index, then latest position
        let mut winners: HashMap<RecordKey, (u64, usize)> = HashMap::new();
        for pair in &pairs {
            let rank = (pair.record.sequence_index, pair.position);
            winners
                .entry(pair.outcome.key.clone())
                .and_modify(|best| {
                    if rank > *best {
                        *best = rank;
                    }
                })
                .or_insert(rank);
        }

        let mut classification = Classification::default();

        for pair in pairs {
            let (winning_index, winning_position) = winners[&pair.outcome.key];
            if pair.position != winning_position {
                classification.rejected.push(RejectedOutcome {
                    outcome: pair.outcome,
                    record: pair.record,
                    reason: RejectReason::Superseded {
                        by_sequence_index: winning_index,
                    },
                });
                continue;
            }

            let ComparedPair {
                record,
                baseline,
                outcome,
                ..
            } = pair;

            if outcome.incomplete {
                classification.candidates.push(Candidate {
                    outcome,
                    record,
                    baseline,
                    value: None,
                    confidence: 0.0,
                    auto_acceptable: false,
                });
                continue;
            }

            match outcome.kind {
                OutcomeKind::New => {
                    let value = outcome.new_value.clone();
                    classification.candidates.push(Candidate {
                        outcome,
                        record,
                        baseline,
                        value,
                        confidence: 1.0,
                        auto_acceptable: true,
                    });
                }
                OutcomeKind::Match => {
                    let value = outcome.old_value.clone().or_else(|| outcome.new_value.clone());
                    let confidence = outcome.similarity;
                    classification.candidates.push(Candidate {
                        outcome,
                        record,
                        baseline,
                        value,
                        confidence,
                        auto_acceptable: true,
                    });
                }
                OutcomeKind::Conflict if outcome.similarity >= self.threshold => {
                    let value = outcome.new_value.clone();
                    let confidence = outcome.similarity;
                    classification.candidates.push(Candidate {
                        outcome,
                        record,
                        baseline,
                        value,
                        confidence,
                        auto_acceptable: true,
                    });
                }
                OutcomeKind::Conflict => {
                    classification
                        .conflicts
                        .push(ConflictRecord::pending(outcome, record, baseline));
                }
            }
        }

        if !classification.rejected.is_empty() {
            warn!(
                superseded = classification.rejected.len(),
                "Duplicate parameters in incoming set, later records kept"
            );
        }
        info!(
            "Candidate analysis: threshold={:.2}, candidates={}, conflicts={}, rejected={}",
            self.threshold,
            classification.candidates.len(),
            classification.conflicts.len(),
            classification.rejected.len()
        );

        classification
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ComparisonOutcome, ParameterRecord, ParameterValue, Resolution};

    fn pair(
        position: usize,
        name: &str,
        kind: OutcomeKind,
        similarity: f64,
        sequence_index: u64,
    ) -> ComparedPair {
        ComparedPair {
            position,
            record: ParameterRecord::new("E1", name, Some(ParameterValue::number(12.0)))
                .with_source("a.json", sequence_index),
            baseline: Some(ParameterRecord::new(
                "E1",
                name,
                Some(ParameterValue::number(10.0)),
            )),
            outcome: ComparisonOutcome {
                key: RecordKey::new("E1", name),
                kind,
                similarity,
                old_value: Some(ParameterValue::number(10.0)),
                new_value: Some(ParameterValue::number(12.0)),
                incomplete: false,
            },
        }
    }

    #[test]
    fn test_threshold_boundary_inclusive() {
        let analyzer = CandidateAnalyzer::default();
        let result = analyzer.classify(vec![
            pair(0, "P1", OutcomeKind::Conflict, 0.80, 0),
            pair(1, "P2", OutcomeKind::Conflict, 0.79, 1),
        ]);

        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0].key().parameter_name, "P1");
        assert!(result.candidates[0].auto_acceptable);
        assert_eq!(result.candidates[0].value, Some(ParameterValue::number(12.0)));

        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].key().parameter_name, "P2");
        assert_eq!(result.conflicts[0].resolution, Resolution::Pending);
    }

    #[test]
    fn test_new_and_match_are_auto_acceptable() {
        let analyzer = CandidateAnalyzer::default();
        let result = analyzer.classify(vec![
            pair(0, "P1", OutcomeKind::New, 1.0, 0),
            pair(1, "P2", OutcomeKind::Match, 1.0, 1),
        ]);
        assert_eq!(result.candidates.len(), 2);
        assert!(result.candidates.iter().all(|c| c.auto_acceptable));
        // Match affirms the baseline value and writes nothing
        assert_eq!(result.candidates[1].value, Some(ParameterValue::number(10.0)));
        assert!(result.candidates[1].is_affirmation());
        assert!(result.candidates[1].commit_record().is_none());
        assert!(result.candidates[0].commit_record().is_some());
    }

    #[test]
    fn test_later_sequence_index_wins() {
        let analyzer = CandidateAnalyzer::default();
        let result = analyzer.classify(vec![
            pair(0, "P1", OutcomeKind::New, 1.0, 5),
            pair(1, "P1", OutcomeKind::New, 1.0, 9),
            pair(2, "P2", OutcomeKind::New, 1.0, 3),
        ]);

        assert_eq!(result.candidates.len(), 2);
        assert_eq!(result.candidates[0].record.sequence_index, 9);
        assert_eq!(result.rejected.len(), 1);
        assert_eq!(
            result.rejected[0].reason,
            RejectReason::Superseded {
                by_sequence_index: 9
            }
        );
    }

    #[test]
    fn test_incomplete_never_auto_acceptable() {
        let analyzer = CandidateAnalyzer::default();
        let mut incomplete = pair(0, "P1", OutcomeKind::New, 0.0, 0);
        incomplete.outcome.incomplete = true;
        incomplete.outcome.new_value = None;

        let result = analyzer.classify(vec![incomplete]);
        assert_eq!(result.candidates.len(), 1);
        assert!(!result.candidates[0].auto_acceptable);
        assert!(result.candidates[0].commit_record().is_none());
    }

    #[test]
    fn test_custom_threshold() {
        let analyzer = CandidateAnalyzer::new(0.4);
        let result = analyzer.classify(vec![pair(0, "P1", OutcomeKind::Conflict, 0.5, 0)]);
        assert_eq!(result.candidates.len(), 1);
        assert!(result.conflicts.is_empty());
    }
}
