//! Quality control findings
//!
//! Findings are advisory. Nothing in this module blocks a commit.

use serde::{Deserialize, Serialize};

/// QC mode selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QcMode {
    /// Advanced above `qc_advanced_min_records`, basic otherwise
    Auto,
    /// Z-score screening
    Basic,
    /// Z-score plus IQR and correlation checks
    Advanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Check that raised a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QcCheck {
    ZScore,
    Iqr,
    Correlation,
    SpecRange,
    MissingValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcFinding {
    pub parameter_name: String,
    pub check: QcCheck,
    /// Value of the test statistic (|z|, fence distance, residual, ...)
    pub statistic: f64,
    /// Limit the statistic was compared against
    pub threshold: f64,
    pub severity: Severity,
    pub source_file: Option<String>,
    pub value: Option<f64>,
    pub message: String,
}

/// Aggregated QC result for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcSummary {
    /// Mode actually run (never `Auto`)
    pub mode: QcMode,
    pub total_records: usize,
    pub findings: usize,
    pub info: usize,
    pub warning: usize,
    pub critical: usize,
    /// Distinct parameter names with a Warning or Critical finding
    pub flagged_parameters: usize,
    /// Share of records without a Warning or Critical finding
    pub pass_rate: f64,
}

impl QcSummary {
    pub fn empty(mode: QcMode) -> Self {
        Self {
            mode,
            total_records: 0,
            findings: 0,
            info: 0,
            warning: 0,
            critical: 0,
            flagged_parameters: 0,
            pass_rate: 1.0,
        }
    }

    /// Warning plus Critical count
    pub fn actionable(&self) -> usize {
        self.warning + self.critical
    }
}
