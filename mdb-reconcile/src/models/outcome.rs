//! Comparison outcomes and their classification
//!
//! Produced by the comparison engine, classified by the candidate analyzer and
//! resolved by the conflict resolver. Only `ConflictRecord::resolution` (and the
//! resolved value/reason) is ever mutated after creation.

use super::parameter::{ParameterRecord, ParameterValue, RecordKey};
use super::qc::{QcFinding, QcSummary};
use serde::{Deserialize, Serialize};

/// Result class of one record pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Key absent from the baseline (or incomplete incoming record)
    New,
    /// Values agree within tolerance
    Match,
    /// Values differ
    Conflict,
}

/// Diff of one incoming record against its baseline counterpart
///
/// A pure function of its fingerprint inputs, so safe to cache and share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonOutcome {
    pub key: RecordKey,
    pub kind: OutcomeKind,
    /// Similarity in [0, 1]
    pub similarity: f64,
    pub old_value: Option<ParameterValue>,
    pub new_value: Option<ParameterValue>,
    /// Incoming record had no value
    #[serde(default)]
    pub incomplete: bool,
}

/// Outcome tied back to its input position and incoming record
#[derive(Debug, Clone, PartialEq)]
pub struct ComparedPair {
    /// Index in the incoming set
    pub position: usize,
    pub record: ParameterRecord,
    /// Stored record with the same key, if any
    pub baseline: Option<ParameterRecord>,
    pub outcome: ComparisonOutcome,
}

/// Difference summary for one comparison run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonStats {
    pub total: usize,
    pub new: usize,
    pub matched: usize,
    pub conflicting: usize,
    pub incomplete: usize,
    pub chunks: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub elapsed_ms: u64,
}

impl ComparisonStats {
    /// Count outcome kinds; timing and cache fields are left for the caller
    pub fn tally(pairs: &[ComparedPair]) -> Self {
        let mut stats = Self {
            total: pairs.len(),
            ..Default::default()
        };
        for pair in pairs {
            match pair.outcome.kind {
                OutcomeKind::New => stats.new += 1,
                OutcomeKind::Match => stats.matched += 1,
                OutcomeKind::Conflict => stats.conflicting += 1,
            }
            if pair.outcome.incomplete {
                stats.incomplete += 1;
            }
        }
        stats
    }
}

/// Outcome confident enough to commit without review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub outcome: ComparisonOutcome,
    /// Incoming record the candidate came from
    pub record: ParameterRecord,
    /// Stored record with the same key, if any
    #[serde(default)]
    pub baseline: Option<ParameterRecord>,
    /// Value that would be committed (baseline for matches, incoming otherwise)
    pub value: Option<ParameterValue>,
    pub confidence: f64,
    pub auto_acceptable: bool,
}

impl Candidate {
    pub fn key(&self) -> &RecordKey {
        &self.outcome.key
    }

    /// Accepted match: the stored record stands as is
    pub fn is_affirmation(&self) -> bool {
        self.auto_acceptable && self.outcome.kind == OutcomeKind::Match
    }

    /// Record to write at commit, if there is anything to write
    ///
    /// Affirmations write nothing.
    pub fn commit_record(&self) -> Option<ParameterRecord> {
        if !self.auto_acceptable || self.is_affirmation() {
            return None;
        }
        let value = self.value.clone()?;
        Some(written_record(
            &self.record,
            self.baseline.as_ref(),
            value,
            self.confidence,
        ))
    }
}

/// Incoming record carrying the accepted value
///
/// Unit and spec range the incoming file left out are kept from the baseline.
fn written_record(
    incoming: &ParameterRecord,
    baseline: Option<&ParameterRecord>,
    value: ParameterValue,
    confidence: f64,
) -> ParameterRecord {
    let mut record = incoming.with_value(value).with_confidence(confidence);
    if let Some(stored) = baseline {
        if record.unit.is_none() {
            record.unit = stored.unit.clone();
        }
        if record.spec_range.is_none() {
            record.spec_range = stored.spec_range;
        }
    }
    record
}

/// Resolution status of a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Pending,
    AutoResolved,
    ManualRequired,
}

/// Conflict below the similarity threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub outcome: ComparisonOutcome,
    pub record: ParameterRecord,
    /// Stored record with the same key, if any
    #[serde(default)]
    pub baseline: Option<ParameterRecord>,
    pub resolution: Resolution,
    pub resolved_value: Option<ParameterValue>,
    /// Audit trail for the decision
    pub reason: Option<String>,
}

impl ConflictRecord {
    pub fn pending(
        outcome: ComparisonOutcome,
        record: ParameterRecord,
        baseline: Option<ParameterRecord>,
    ) -> Self {
        Self {
            outcome,
            record,
            baseline,
            resolution: Resolution::Pending,
            resolved_value: None,
            reason: None,
        }
    }

    pub fn key(&self) -> &RecordKey {
        &self.outcome.key
    }

    /// Auto-resolved in favour of the stored value
    pub fn keeps_baseline(&self) -> bool {
        self.resolution == Resolution::AutoResolved
            && self.outcome.old_value.is_some()
            && self.resolved_value == self.outcome.old_value
    }

    /// Record to write at commit, only for auto-resolved conflicts that
    /// replace the stored value
    pub fn commit_record(&self) -> Option<ParameterRecord> {
        if self.resolution != Resolution::AutoResolved || self.keeps_baseline() {
            return None;
        }
        let value = self.resolved_value.clone()?;
        Some(written_record(
            &self.record,
            self.baseline.as_ref(),
            value,
            self.outcome.similarity,
        ))
    }
}

/// Why an outcome was set aside
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// A later record with the same key replaced this one
    Superseded { by_sequence_index: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedOutcome {
    pub outcome: ComparisonOutcome,
    pub record: ParameterRecord,
    pub reason: RejectReason,
}

/// Candidate analyzer output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub candidates: Vec<Candidate>,
    pub conflicts: Vec<ConflictRecord>,
    pub rejected: Vec<RejectedOutcome>,
}

/// Everything `analyze` produced for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub candidates: Vec<Candidate>,
    pub conflicts: Vec<ConflictRecord>,
    pub rejected: Vec<RejectedOutcome>,
    pub qc_findings: Vec<QcFinding>,
    pub qc_summary: QcSummary,
    pub stats: ComparisonStats,
}

impl AnalysisReport {
    /// Records a commit would write, in candidate order then conflict order
    pub fn commit_records(&self) -> Vec<ParameterRecord> {
        self.candidates
            .iter()
            .filter_map(Candidate::commit_record)
            .chain(self.conflicts.iter().filter_map(ConflictRecord::commit_record))
            .collect()
    }

    /// Keys accepted without a write: matches and conflicts resolved to the
    /// stored value
    pub fn affirmed(&self) -> Vec<RecordKey> {
        self.candidates
            .iter()
            .filter(|c| c.is_affirmation())
            .map(|c| c.key().clone())
            .chain(
                self.conflicts
                    .iter()
                    .filter(|c| c.keeps_baseline())
                    .map(|c| c.key().clone()),
            )
            .collect()
    }

    pub fn manual_review(&self) -> Vec<RecordKey> {
        self.conflicts
            .iter()
            .filter(|c| c.resolution == Resolution::ManualRequired)
            .map(|c| c.key().clone())
            .collect()
    }

    pub fn incomplete_count(&self) -> usize {
        self.candidates.iter().filter(|c| c.outcome.incomplete).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::parameter::SpecRange;

    fn outcome(kind: OutcomeKind, similarity: f64) -> ComparisonOutcome {
        ComparisonOutcome {
            key: RecordKey::new("E1", "P1"),
            kind,
            similarity,
            old_value: Some(ParameterValue::number(10.0)),
            new_value: Some(ParameterValue::number(12.0)),
            incomplete: false,
        }
    }

    fn record() -> ParameterRecord {
        ParameterRecord::new("E1", "P1", Some(ParameterValue::number(12.0)))
    }

    fn stored() -> ParameterRecord {
        ParameterRecord::new("E1", "P1", Some(ParameterValue::number(10.0)))
            .with_unit("bar")
            .with_spec_range(0.0, 20.0)
            .with_confidence(0.95)
            .with_source("base.json", 0)
    }

    #[test]
    fn test_refinement_commit_uses_candidate_value() {
        let candidate = Candidate {
            outcome: outcome(OutcomeKind::Conflict, 0.9),
            record: record(),
            baseline: None,
            value: Some(ParameterValue::number(12.0)),
            confidence: 0.9,
            auto_acceptable: true,
        };
        let committed = candidate.commit_record().unwrap();
        assert_eq!(committed.numeric_value(), Some(12.0));
        assert_eq!(committed.confidence, Some(0.9));
    }

    #[test]
    fn test_match_writes_nothing() {
        let candidate = Candidate {
            outcome: outcome(OutcomeKind::Match, 1.0),
            record: record(),
            baseline: Some(stored()),
            value: Some(ParameterValue::number(10.0)),
            confidence: 1.0,
            auto_acceptable: true,
        };
        assert!(candidate.is_affirmation());
        assert!(candidate.commit_record().is_none());
    }

    #[test]
    fn test_refinement_keeps_stored_unit_and_spec_range() {
        let candidate = Candidate {
            outcome: outcome(OutcomeKind::Conflict, 0.9),
            record: record().with_source("run1.json", 3),
            baseline: Some(stored()),
            value: Some(ParameterValue::number(12.0)),
            confidence: 0.9,
            auto_acceptable: true,
        };
        let committed = candidate.commit_record().unwrap();
        assert_eq!(committed.unit.as_deref(), Some("bar"));
        assert_eq!(committed.spec_range, Some(SpecRange { min: 0.0, max: 20.0 }));
        assert_eq!(committed.source_file, "run1.json");

        // Incoming metadata wins when present
        let mut with_unit = candidate.clone();
        with_unit.record = with_unit.record.with_unit("psi");
        assert_eq!(with_unit.commit_record().unwrap().unit.as_deref(), Some("psi"));
    }

    #[test]
    fn test_non_acceptable_candidate_not_committed() {
        let candidate = Candidate {
            outcome: outcome(OutcomeKind::New, 1.0),
            record: record(),
            baseline: None,
            value: None,
            confidence: 0.0,
            auto_acceptable: false,
        };
        assert!(candidate.commit_record().is_none());
    }

    #[test]
    fn test_only_auto_resolved_conflicts_commit() {
        let mut conflict = ConflictRecord::pending(
            outcome(OutcomeKind::Conflict, 0.5),
            record(),
            Some(stored()),
        );
        assert!(conflict.commit_record().is_none());

        conflict.resolution = Resolution::AutoResolved;
        conflict.resolved_value = Some(ParameterValue::number(12.0));
        let committed = conflict.commit_record().unwrap();
        assert_eq!(committed.confidence, Some(0.5));
        assert_eq!(committed.unit.as_deref(), Some("bar"));

        conflict.resolution = Resolution::ManualRequired;
        assert!(conflict.commit_record().is_none());
    }

    #[test]
    fn test_conflict_resolved_to_stored_value_writes_nothing() {
        let mut conflict = ConflictRecord::pending(
            outcome(OutcomeKind::Conflict, 0.5),
            record(),
            Some(stored()),
        );
        conflict.resolution = Resolution::AutoResolved;
        conflict.resolved_value = Some(ParameterValue::number(10.0));

        assert!(conflict.keeps_baseline());
        assert!(conflict.commit_record().is_none());
    }

    #[test]
    fn test_stats_tally() {
        let pairs = vec![
            ComparedPair {
                position: 0,
                record: record(),
                baseline: None,
                outcome: outcome(OutcomeKind::New, 1.0),
            },
            ComparedPair {
                position: 1,
                record: record(),
                baseline: None,
                outcome: outcome(OutcomeKind::Conflict, 0.5),
            },
        ];
        let stats = ComparisonStats::tally(&pairs);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.new, 1);
        assert_eq!(stats.conflicting, 1);
        assert_eq!(stats.matched, 0);
    }
}
