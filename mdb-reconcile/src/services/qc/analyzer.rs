//! Statistical quality control over a resolved parameter set
//!
//! # Checks
//! Both modes:
//! - missing value → `Info`
//! - value outside the record's spec range → `Critical`
//! - z-score per parameter name: `|z| > warning` → `Warning`,
//!   `|z| > critical` → `Critical`
//!
//! Advanced mode adds:
//! - Tukey fences: outside `Q1 - k*IQR` / `Q3 + k*IQR` → `Warning`, outside the
//!   `3k` fences → `Critical`
//! - correlation rules: instances paired by source file, residual from the
//!   least-squares line against `max_residual` (`Warning`) and twice that
//!   (`Critical`); weak correlation → `Info`
//!
//! Statistical checks need `min_sample` values per parameter name (or value
//! pairs per rule). Smaller groups are skipped, not reported.

use super::statistics::{linear_fit, mean, quartiles, sample_std_dev};
use crate::config::{CorrelationRule, ReconcileConfig};
use crate::models::{ParameterRecord, QcCheck, QcFinding, QcMode, QcSummary, Severity};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

pub struct QualityControlAnalyzer {
    mode: QcMode,
    min_sample: usize,
    advanced_min_records: usize,
    z_warning: f64,
    z_critical: f64,
    iqr_factor: f64,
    correlation_rules: Vec<CorrelationRule>,
}

impl Default for QualityControlAnalyzer {
    fn default() -> Self {
        Self::from_config(&ReconcileConfig::default())
    }
}

/// One numeric value with its origin
struct Sample<'a> {
    value: f64,
    source_file: &'a str,
}

impl QualityControlAnalyzer {
    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self {
            mode: config.qc_mode,
            min_sample: config.qc_min_sample,
            advanced_min_records: config.qc_advanced_min_records,
            z_warning: config.qc_z_warning,
            z_critical: config.qc_z_critical,
            iqr_factor: config.qc_iqr_factor,
            correlation_rules: config.correlation_rules.clone(),
        }
    }

    /// Mode that will run for `record_count` records
    pub fn effective_mode(&self, record_count: usize) -> QcMode {
        match self.mode {
            QcMode::Auto if record_count > self.advanced_min_records => QcMode::Advanced,
            QcMode::Auto => QcMode::Basic,
            explicit => explicit,
        }
    }

    /// Run QC in the configured mode
    pub fn analyze(&self, records: &[ParameterRecord]) -> (Vec<QcFinding>, QcSummary) {
        self.analyze_with_mode(records, self.effective_mode(records.len()))
    }

    /// Run QC in `mode` (`Auto` is resolved by record count)
    pub fn analyze_with_mode(
        &self,
        records: &[ParameterRecord],
        mode: QcMode,
    ) -> (Vec<QcFinding>, QcSummary) {
        let mode = match mode {
            QcMode::Auto => self.effective_mode(records.len()),
            explicit => explicit,
        };

        let mut by_name: BTreeMap<&str, Vec<&ParameterRecord>> = BTreeMap::new();
        for record in records {
            by_name.entry(record.parameter_name.as_str()).or_default().push(record);
        }

        let mut findings = Vec::new();
        for (name, group) in &by_name {
            self.check_missing(name, group, &mut findings);
            self.check_spec_range(name, group, &mut findings);

            let samples: Vec<Sample<'_>> = group
                .iter()
                .filter_map(|r| {
                    r.numeric_value().map(|value| Sample {
                        value,
                        source_file: &r.source_file,
                    })
                })
                .collect();
            if samples.len() < self.min_sample {
                debug!(
                    parameter = name,
                    samples = samples.len(),
                    min_sample = self.min_sample,
                    "Too few samples for statistical QC"
                );
                continue;
            }

            self.check_z_scores(name, &samples, &mut findings);
            if mode == QcMode::Advanced {
                self.check_iqr(name, &samples, &mut findings);
            }
        }

        if mode == QcMode::Advanced {
            for rule in &self.correlation_rules {
                self.check_correlation(rule, records, &mut findings);
            }
        }

        let summary = summarize(mode, records, &findings);
        info!(
            "Quality control: mode={:?}, records={}, findings={}, warning={}, critical={}, pass_rate={:.3}",
            summary.mode,
            summary.total_records,
            summary.findings,
            summary.warning,
            summary.critical,
            summary.pass_rate
        );
        (findings, summary)
    }

    fn check_missing(&self, name: &str, group: &[&ParameterRecord], findings: &mut Vec<QcFinding>) {
        for record in group.iter().filter(|r| r.is_incomplete()) {
            findings.push(QcFinding {
                parameter_name: name.to_string(),
                check: QcCheck::MissingValue,
                statistic: 0.0,
                threshold: 0.0,
                severity: Severity::Info,
                source_file: Some(record.source_file.clone()),
                value: None,
                message: format!("{} has no value in '{}'", name, record.source_file),
            });
        }
    }

    fn check_spec_range(
        &self,
        name: &str,
        group: &[&ParameterRecord],
        findings: &mut Vec<QcFinding>,
    ) {
        for record in group {
            let (Some(range), Some(value)) = (record.spec_range, record.numeric_value()) else {
                continue;
            };
            if range.contains(value) {
                continue;
            }
            let threshold = if value < range.min { range.min } else { range.max };
            findings.push(QcFinding {
                parameter_name: name.to_string(),
                check: QcCheck::SpecRange,
                statistic: value,
                threshold,
                severity: Severity::Critical,
                source_file: Some(record.source_file.clone()),
                value: Some(value),
                message: format!(
                    "{} = {} outside spec range [{}, {}]",
                    name, value, range.min, range.max
                ),
            });
        }
    }

    fn check_z_scores(&self, name: &str, samples: &[Sample<'_>], findings: &mut Vec<QcFinding>) {
        let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        let (Some(m), Some(sd)) = (mean(&values), sample_std_dev(&values)) else {
            return;
        };
        if sd == 0.0 {
            return;
        }

        for sample in samples {
            let z = ((sample.value - m) / sd).abs();
            let (severity, threshold) = if z > self.z_critical {
                (Severity::Critical, self.z_critical)
            } else if z > self.z_warning {
                (Severity::Warning, self.z_warning)
            } else {
                continue;
            };
            findings.push(QcFinding {
                parameter_name: name.to_string(),
                check: QcCheck::ZScore,
                statistic: z,
                threshold,
                severity,
                source_file: Some(sample.source_file.to_string()),
                value: Some(sample.value),
                message: format!(
                    "{} = {} is {:.2} standard deviations from mean {:.4}",
                    name, sample.value, z, m
                ),
            });
        }
    }

    fn check_iqr(&self, name: &str, samples: &[Sample<'_>], findings: &mut Vec<QcFinding>) {
        let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        let Some((q1, q3)) = quartiles(&values) else {
            return;
        };
        let iqr = q3 - q1;
        // Zero spread makes every deviation an outlier; z-scores cover it
        if iqr <= 0.0 {
            return;
        }

        let k = self.iqr_factor;
        for sample in samples {
            let v = sample.value;
            let (severity, fence) = if v < q1 - 3.0 * k * iqr {
                (Severity::Critical, q1 - 3.0 * k * iqr)
            } else if v > q3 + 3.0 * k * iqr {
                (Severity::Critical, q3 + 3.0 * k * iqr)
            } else if v < q1 - k * iqr {
                (Severity::Warning, q1 - k * iqr)
            } else if v > q3 + k * iqr {
                (Severity::Warning, q3 + k * iqr)
            } else {
                continue;
            };
            findings.push(QcFinding {
                parameter_name: name.to_string(),
                check: QcCheck::Iqr,
                statistic: v,
                threshold: fence,
                severity,
                source_file: Some(sample.source_file.to_string()),
                value: Some(v),
                message: format!(
                    "{} = {} outside IQR fence {:.4} (Q1={:.4}, Q3={:.4})",
                    name, v, fence, q1, q3
                ),
            });
        }
    }

    fn check_correlation(
        &self,
        rule: &CorrelationRule,
        records: &[ParameterRecord],
        findings: &mut Vec<QcFinding>,
    ) {
        // Last value per source file for each side
        let mut xs: HashMap<&str, f64> = HashMap::new();
        let mut ys: HashMap<&str, f64> = HashMap::new();
        for record in records {
            let Some(value) = record.numeric_value() else {
                continue;
            };
            if record.parameter_name == rule.x {
                xs.insert(record.source_file.as_str(), value);
            } else if record.parameter_name == rule.y {
                ys.insert(record.source_file.as_str(), value);
            }
        }

        let mut paired: Vec<(&str, f64, f64)> = xs
            .iter()
            .filter_map(|(file, &x)| ys.get(file).map(|&y| (*file, x, y)))
            .collect();
        paired.sort_by(|a, b| a.0.cmp(b.0));

        let pair_name = format!("{}~{}", rule.x, rule.y);
        if paired.len() < self.min_sample {
            debug!(rule = %pair_name, pairs = paired.len(), "Too few pairs for correlation check");
            return;
        }

        let points: Vec<(f64, f64)> = paired.iter().map(|&(_, x, y)| (x, y)).collect();
        let Some(fit) = linear_fit(&points) else {
            return;
        };

        for &(file, x, y) in &paired {
            let residual = y - fit.predict(x);
            let magnitude = residual.abs();
            let (severity, threshold) = if magnitude > 2.0 * rule.max_residual {
                (Severity::Critical, 2.0 * rule.max_residual)
            } else if magnitude > rule.max_residual {
                (Severity::Warning, rule.max_residual)
            } else {
                continue;
            };
            findings.push(QcFinding {
                parameter_name: rule.y.clone(),
                check: QcCheck::Correlation,
                statistic: magnitude,
                threshold,
                severity,
                source_file: Some(file.to_string()),
                value: Some(y),
                message: format!(
                    "{} = {} deviates {:.4} from {:.4} + {:.4} * {} ({} = {})",
                    rule.y, y, residual, fit.intercept, fit.slope, rule.x, rule.x, x
                ),
            });
        }

        if let (Some(min_r), Some(r)) = (rule.min_correlation, fit.r) {
            if r.abs() < min_r {
                findings.push(QcFinding {
                    parameter_name: pair_name.clone(),
                    check: QcCheck::Correlation,
                    statistic: r.abs(),
                    threshold: min_r,
                    severity: Severity::Info,
                    source_file: None,
                    value: None,
                    message: format!(
                        "{} correlation |r| = {:.3} below expected {:.3}",
                        pair_name,
                        r.abs(),
                        min_r
                    ),
                });
            }
        }
    }
}

fn summarize(mode: QcMode, records: &[ParameterRecord], findings: &[QcFinding]) -> QcSummary {
    let mut summary = QcSummary::empty(mode);
    summary.total_records = records.len();
    summary.findings = findings.len();

    let mut flagged_parameters: HashSet<&str> = HashSet::new();
    let mut flagged_records: HashSet<(&str, Option<&str>)> = HashSet::new();
    for finding in findings {
        match finding.severity {
            Severity::Info => summary.info += 1,
            Severity::Warning => summary.warning += 1,
            Severity::Critical => summary.critical += 1,
        }
        if finding.severity >= Severity::Warning {
            flagged_parameters.insert(finding.parameter_name.as_str());
            flagged_records.insert((finding.parameter_name.as_str(), finding.source_file.as_deref()));
        }
    }
    summary.flagged_parameters = flagged_parameters.len();
    if !records.is_empty() {
        let passed = records.len().saturating_sub(flagged_records.len());
        summary.pass_rate = passed as f64 / records.len() as f64;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParameterValue;

    fn records(name: &str, values: &[f64]) -> Vec<ParameterRecord> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                ParameterRecord::new("E1", name, Some(ParameterValue::number(v)))
                    .with_source(format!("f{}.json", i), i as u64)
            })
            .collect()
    }

    fn analyzer(mode: QcMode) -> QualityControlAnalyzer {
        QualityControlAnalyzer::from_config(&ReconcileConfig {
            qc_mode: mode,
            ..Default::default()
        })
    }

    #[test]
    fn test_below_min_sample_no_findings() {
        let (findings, _) = analyzer(QcMode::Basic).analyze(&records("P1", &[1.0, 1.0, 1.0, 50.0]));
        assert!(findings.is_empty());
    }

    #[test]
    fn test_z_score_warning() {
        let mut values = vec![10.0; 9];
        values.push(20.0);
        let (findings, summary) = analyzer(QcMode::Basic).analyze(&records("P1", &values));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert_eq!(findings[0].check, QcCheck::ZScore);
        assert_eq!(findings[0].source_file.as_deref(), Some("f9.json"));
        assert_eq!(summary.warning, 1);
        assert!((summary.pass_rate - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_z_score_critical() {
        let mut values = vec![10.0; 11];
        values.push(50.0);
        let (findings, _) = analyzer(QcMode::Basic).analyze(&records("P1", &values));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert!(findings[0].statistic > 3.0);
    }

    #[test]
    fn test_advanced_adds_iqr() {
        let values = [10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0, 17.0, 18.0, 100.0];

        let (basic, _) = analyzer(QcMode::Basic).analyze(&records("P1", &values));
        assert!(basic.iter().all(|f| f.check == QcCheck::ZScore));

        let (advanced, summary) = analyzer(QcMode::Advanced).analyze(&records("P1", &values));
        let iqr: Vec<&QcFinding> = advanced.iter().filter(|f| f.check == QcCheck::Iqr).collect();
        assert_eq!(iqr.len(), 1);
        assert_eq!(iqr[0].severity, Severity::Critical);
        assert_eq!(iqr[0].value, Some(100.0));
        assert_eq!(summary.mode, QcMode::Advanced);
    }

    #[test]
    fn test_auto_mode_by_size() {
        let analyzer = QualityControlAnalyzer::default();
        assert_eq!(analyzer.effective_mode(100), QcMode::Basic);
        assert_eq!(analyzer.effective_mode(101), QcMode::Advanced);
        assert_eq!(
            QualityControlAnalyzer::from_config(&ReconcileConfig {
                qc_mode: QcMode::Basic,
                ..Default::default()
            })
            .effective_mode(10_000),
            QcMode::Basic
        );
    }

    #[test]
    fn test_spec_range_and_missing_value() {
        let records = vec![
            ParameterRecord::new("E1", "P1", Some(ParameterValue::number(12.0)))
                .with_source("a.json", 0)
                .with_spec_range(0.0, 10.0),
            ParameterRecord::new("E1", "P2", None).with_source("a.json", 1),
        ];
        let (findings, summary) = analyzer(QcMode::Basic).analyze(&records);
        assert_eq!(findings.len(), 2);
        let spec = findings.iter().find(|f| f.check == QcCheck::SpecRange).unwrap();
        assert_eq!(spec.severity, Severity::Critical);
        assert_eq!(spec.threshold, 10.0);
        let missing = findings.iter().find(|f| f.check == QcCheck::MissingValue).unwrap();
        assert_eq!(missing.severity, Severity::Info);
        assert_eq!(summary.critical, 1);
        assert_eq!(summary.info, 1);
        assert_eq!(summary.flagged_parameters, 1);
    }

    fn paired_records(xs: &[f64], ys: &[f64]) -> Vec<ParameterRecord> {
        let mut out = Vec::new();
        for (i, (&x, &y)) in xs.iter().zip(ys).enumerate() {
            let file = format!("f{:02}.json", i);
            out.push(
                ParameterRecord::new("E1", "flow", Some(ParameterValue::number(x)))
                    .with_source(file.clone(), 2 * i as u64),
            );
            out.push(
                ParameterRecord::new("E1", "speed", Some(ParameterValue::number(y)))
                    .with_source(file, 2 * i as u64 + 1),
            );
        }
        out
    }

    fn correlation_analyzer(max_residual: f64, min_correlation: Option<f64>) -> QualityControlAnalyzer {
        QualityControlAnalyzer::from_config(&ReconcileConfig {
            qc_mode: QcMode::Advanced,
            // Keep per-parameter checks quiet so only the rule reports
            qc_min_sample: 5,
            qc_z_warning: 50.0,
            qc_z_critical: 60.0,
            qc_iqr_factor: 50.0,
            correlation_rules: vec![CorrelationRule {
                x: "flow".to_string(),
                y: "speed".to_string(),
                max_residual,
                min_correlation,
            }],
            ..Default::default()
        })
    }

    #[test]
    fn test_correlation_residual_flagged() {
        let xs: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        let mut ys: Vec<f64> = xs.iter().map(|x| 2.0 * x).collect();
        ys[4] = 30.0;

        let (findings, _) = correlation_analyzer(5.0, None).analyze(&paired_records(&xs, &ys));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].check, QcCheck::Correlation);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[0].parameter_name, "speed");
        assert_eq!(findings[0].source_file.as_deref(), Some("f04.json"));
    }

    #[test]
    fn test_weak_correlation_is_info() {
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let ys = [5.0, 1.0, 5.0, 1.0, 5.0, 1.0];
        let (findings, summary) =
            correlation_analyzer(100.0, Some(0.9)).analyze(&paired_records(&xs, &ys));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Info);
        assert_eq!(findings[0].parameter_name, "flow~speed");
        assert_eq!(summary.actionable(), 0);
    }

    #[test]
    fn test_correlation_needs_min_pairs() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        let ys = [2.0, 4.0, 6.0, 80.0];
        let (findings, _) = correlation_analyzer(1.0, Some(0.99)).analyze(&paired_records(&xs, &ys));
        assert!(findings.iter().all(|f| f.check != QcCheck::Correlation));
    }
}
