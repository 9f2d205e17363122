//! Results handed back to callers (CLI, UI, tests)

use super::parameter::{ParameterRecord, RecordKey};
use super::qc::QcFinding;
use super::session::SessionState;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Confidence at or above which a stored value counts as high confidence
pub const HIGH_CONFIDENCE: f64 = 0.8;
/// Confidence below which a stored value counts as low confidence
pub const LOW_CONFIDENCE: f64 = 0.5;

/// Health of the stored Mother DB for one equipment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotherDbStatus {
    pub equipment_id: String,
    pub version: u64,
    pub total_parameters: usize,
    pub high_confidence_count: usize,
    pub low_confidence_count: usize,
    /// Mean over records that carry a confidence
    pub average_confidence: Option<f64>,
}

impl MotherDbStatus {
    pub fn from_records(equipment_id: &str, version: u64, records: &[ParameterRecord]) -> Self {
        let confidences: Vec<f64> = records.iter().filter_map(|r| r.confidence).collect();
        let average_confidence = if confidences.is_empty() {
            None
        } else {
            Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
        };

        Self {
            equipment_id: equipment_id.to_string(),
            version,
            total_parameters: records.len(),
            high_confidence_count: confidences.iter().filter(|&&c| c >= HIGH_CONFIDENCE).count(),
            low_confidence_count: confidences.iter().filter(|&&c| c < LOW_CONFIDENCE).count(),
            average_confidence,
        }
    }
}

/// One record the store refused
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitFailure {
    pub key: RecordKey,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitSummary {
    /// Written keys followed by affirmed keys that needed no write
    pub saved: Vec<RecordKey>,
    pub failed: Vec<CommitFailure>,
    /// Store version after the commit (None when nothing was written)
    pub version: Option<u64>,
    /// `Committed` when nothing failed, otherwise still `Analyzed`
    pub state: SessionState,
}

impl CommitSummary {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of a one-call quick setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickSetupResult {
    pub session_id: Uuid,
    pub state: SessionState,
    /// Keys saved: written records plus affirmed matches left as stored
    pub saved_count: usize,
    /// Conflicts below the similarity threshold
    pub conflict_count: usize,
    /// Warning plus Critical QC findings
    pub qc_warnings: usize,
    /// Conflicts left for manual handling
    pub manual_review: Vec<RecordKey>,
    pub failed: Vec<CommitFailure>,
    /// Incoming records without a value, reported but not written
    pub incomplete_count: usize,
    pub findings: Vec<QcFinding>,
    pub version: Option<u64>,
}
