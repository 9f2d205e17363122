//! Configuration for mdb-reconcile
//!
//! Two layers:
//! 1. **TOML bootstrap** ([`TomlConfig`]): database path, logging, and the
//!    `[reconcile]` table.
//! 2. **Reconcile options** ([`ReconcileConfig`]): every option has a built-in
//!    default; missing keys fall back to it.
//!
//! Validation happens once, when a manager is built. A session never sees an
//! invalid configuration.

use crate::error::{ReconcileError, ReconcileResult};
use crate::models::QcMode;
use crate::services::ConflictPolicy;
use mdb_common::config::{read_toml_config, LoggingConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Upper bound on worker threads for one comparison
pub const MAX_WORKER_COUNT: usize = 256;

/// Expected relationship between two parameters for the correlation check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRule {
    /// Predictor parameter name
    pub x: String,
    /// Dependent parameter name
    pub y: String,
    /// Largest tolerated |residual| from the fitted line
    pub max_residual: f64,
    /// Minimum |pearson r| expected for the pair (optional)
    #[serde(default)]
    pub min_correlation: Option<f64>,
}

/// Reconciliation options (`[reconcile]` table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Similarity at or above which a conflicting value is auto-accepted
    pub similarity_threshold: f64,
    /// Aligned pairs per comparison chunk
    pub chunk_size: usize,
    /// Worker threads for chunk comparison
    pub worker_count: usize,
    /// Policy for conflicts below the threshold
    pub conflict_policy: ConflictPolicy,
    /// QC mode (auto picks by record count)
    pub qc_mode: QcMode,
    /// Minimum samples per parameter name for statistical QC
    pub qc_min_sample: usize,
    /// Absolute tolerance for numeric match
    pub numeric_atol: f64,
    /// Relative tolerance for numeric match
    pub numeric_rtol: f64,
    /// Relative deviation (from the baseline) at which numeric similarity reaches 0
    pub numeric_similarity_span: f64,
    /// Maximum cached comparison outcomes
    pub cache_capacity: usize,
    /// Record count above which auto QC runs in advanced mode
    pub qc_advanced_min_records: usize,
    /// |z| above which a value is a warning
    pub qc_z_warning: f64,
    /// |z| above which a value is critical
    pub qc_z_critical: f64,
    /// Tukey fence multiplier for the IQR check
    pub qc_iqr_factor: f64,
    /// Parameter pairs expected to move together
    pub correlation_rules: Vec<CorrelationRule>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.80,
            chunk_size: 500,
            worker_count: 4,
            conflict_policy: ConflictPolicy::PreferHigherPrecision,
            qc_mode: QcMode::Auto,
            qc_min_sample: 5,
            numeric_atol: 1e-9,
            numeric_rtol: 1e-9,
            numeric_similarity_span: 0.4,
            cache_capacity: 100_000,
            qc_advanced_min_records: 100,
            qc_z_warning: 2.0,
            qc_z_critical: 3.0,
            qc_iqr_factor: 1.5,
            correlation_rules: Vec::new(),
        }
    }
}

impl ReconcileConfig {
    /// Check every option; the first invalid value is reported
    pub fn validate(&self) -> ReconcileResult<()> {
        let threshold = self.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(config_error(format!(
                "similarity_threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        if self.chunk_size == 0 {
            return Err(config_error("chunk_size must be at least 1"));
        }
        if self.worker_count == 0 || self.worker_count > MAX_WORKER_COUNT {
            return Err(config_error(format!(
                "worker_count must be within 1..={}, got {}",
                MAX_WORKER_COUNT, self.worker_count
            )));
        }
        if !(self.numeric_atol >= 0.0) || !(self.numeric_rtol >= 0.0) {
            return Err(config_error("numeric tolerances must be non-negative"));
        }
        if !(self.numeric_similarity_span > 0.0) {
            return Err(config_error("numeric_similarity_span must be positive"));
        }
        if self.qc_min_sample < 2 {
            return Err(config_error("qc_min_sample must be at least 2"));
        }
        if !(self.qc_z_warning > 0.0 && self.qc_z_warning <= self.qc_z_critical) {
            return Err(config_error(format!(
                "qc z thresholds must satisfy 0 < warning <= critical, got {} / {}",
                self.qc_z_warning, self.qc_z_critical
            )));
        }
        if !(self.qc_iqr_factor > 0.0) {
            return Err(config_error("qc_iqr_factor must be positive"));
        }
        for rule in &self.correlation_rules {
            if rule.x.trim().is_empty() || rule.y.trim().is_empty() || rule.x == rule.y {
                return Err(config_error(format!(
                    "correlation rule needs two distinct parameter names, got '{}' / '{}'",
                    rule.x, rule.y
                )));
            }
            if !(rule.max_residual > 0.0) {
                return Err(config_error(format!(
                    "correlation rule {} ~ {} needs a positive max_residual",
                    rule.x, rule.y
                )));
            }
            if let Some(r) = rule.min_correlation {
                if !(0.0..=1.0).contains(&r) {
                    return Err(config_error(format!(
                        "correlation rule {} ~ {} min_correlation must be within [0, 1]",
                        rule.x, rule.y
                    )));
                }
            }
        }
        Ok(())
    }
}

fn config_error(msg: impl Into<String>) -> ReconcileError {
    ReconcileError::Config(msg.into())
}

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Path to the SQLite Mother DB file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Reconciliation options (optional)
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            logging: LoggingConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

fn default_database_path() -> PathBuf {
    mdb_common::config::default_data_dir().join("mother_db.sqlite")
}

impl TomlConfig {
    /// Load from `path`, or built-in defaults when no file was resolved
    pub fn load(path: Option<&Path>) -> ReconcileResult<Self> {
        let config = match path {
            Some(path) => {
                let config: TomlConfig = read_toml_config(path)?;
                info!(path = %path.display(), "Loaded configuration file");
                config
            }
            None => {
                info!("No configuration file found, using built-in defaults");
                TomlConfig::default()
            }
        };
        config.reconcile.validate()?;
        Ok(config)
    }
}
