//! Parameter records and parameter sets
//!
//! A [`ParameterRecord`] is one measured equipment parameter as delivered by the
//! parsing collaborator. Identity is `(equipment_id, parameter_name)`; records are
//! never mutated, committed values are new records built with
//! [`ParameterRecord::with_value`] / [`ParameterRecord::with_confidence`].

use crate::error::{ReconcileError, ReconcileResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Record identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub equipment_id: String,
    pub parameter_name: String,
}

impl RecordKey {
    pub fn new(equipment_id: impl Into<String>, parameter_name: impl Into<String>) -> Self {
        Self {
            equipment_id: equipment_id.into(),
            parameter_name: parameter_name.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.equipment_id, self.parameter_name)
    }
}

/// Numeric measurement with its precision
///
/// Serialized as its canonical decimal string so trailing zeros (and thus the
/// significant digit count) survive storage. Deserializes from either a JSON
/// number or a string.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNumber", into = "String")]
pub struct NumericValue {
    pub value: f64,
    pub significant_digits: u32,
}

impl NumericValue {
    pub fn new(value: f64, significant_digits: u32) -> Self {
        Self {
            value,
            significant_digits,
        }
    }

    /// Parse a decimal literal, counting significant digits
    ///
    /// Leading zeros are not significant, trailing zeros are. The exponent of a
    /// scientific literal does not contribute digits. An all-zero literal counts
    /// its fractional digits plus one (`"0.00"` has 3).
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let value: f64 = text.parse().ok()?;
        if !value.is_finite() {
            return None;
        }

        let unsigned = text.trim_start_matches(['+', '-']);
        let mantissa = unsigned
            .split(['e', 'E'])
            .next()
            .unwrap_or(unsigned);
        let digits: String = mantissa.chars().filter(|c| c.is_ascii_digit()).collect();
        let significant = digits.trim_start_matches('0');

        let significant_digits = if significant.is_empty() {
            let fractional = mantissa
                .split_once('.')
                .map(|(_, frac)| frac.len())
                .unwrap_or(0);
            fractional as u32 + 1
        } else {
            significant.len() as u32
        };

        Some(Self::new(value, significant_digits))
    }

    /// Precision taken from the shortest round-trip representation
    pub fn from_f64(value: f64) -> Self {
        Self::parse(&value.to_string()).unwrap_or(Self::new(value, 0))
    }

    /// Decimal string carrying exactly `significant_digits`
    pub fn canonical_string(&self) -> String {
        if !self.value.is_finite() || self.significant_digits == 0 {
            return self.value.to_string();
        }
        let digits = self.significant_digits as usize;
        // Exponent after rounding, so 9.96 at 2 digits is "10" and not "10.0"
        let exponent = format!("{:.*e}", digits - 1, self.value)
            .rsplit_once('e')
            .and_then(|(_, exp)| exp.parse::<i32>().ok())
            .unwrap_or(0);
        let decimals = digits as i32 - 1 - exponent;
        format!("{:.*}", decimals.max(0) as usize, self.value)
    }
}

impl fmt::Display for NumericValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

impl From<NumericValue> for String {
    fn from(value: NumericValue) -> Self {
        value.canonical_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Number(f64),
    Text(String),
}

impl TryFrom<RawNumber> for NumericValue {
    type Error = String;

    fn try_from(raw: RawNumber) -> Result<Self, Self::Error> {
        match raw {
            RawNumber::Number(value) if value.is_finite() => Ok(NumericValue::from_f64(value)),
            RawNumber::Number(value) => Err(format!("non-finite number {}", value)),
            RawNumber::Text(text) => {
                NumericValue::parse(&text).ok_or_else(|| format!("invalid number '{}'", text))
            }
        }
    }
}

/// Typed parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParameterValue {
    Number(NumericValue),
    Text(String),
    /// Hierarchical category such as `"sensor/pressure/absolute"`
    Category(String),
}

/// Separators that split a category into segments
pub const CATEGORY_SEPARATORS: [char; 3] = ['/', '.', ':'];

impl ParameterValue {
    pub fn number(value: f64) -> Self {
        ParameterValue::Number(NumericValue::from_f64(value))
    }

    pub fn text(value: impl Into<String>) -> Self {
        ParameterValue::Text(value.into())
    }

    pub fn category(value: impl Into<String>) -> Self {
        ParameterValue::Category(value.into())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParameterValue::Number(n) => Some(n.value),
            _ => None,
        }
    }

    /// Specificity used by the higher-precision policy
    ///
    /// Numbers: significant digits. Categories: non-empty segments.
    /// Text: trimmed character count.
    pub fn precision(&self) -> usize {
        match self {
            ParameterValue::Number(n) => n.significant_digits as usize,
            ParameterValue::Category(c) => category_segments(c).len(),
            ParameterValue::Text(t) => t.trim().chars().count(),
        }
    }

    /// Unit of [`ParameterValue::precision`], for audit messages
    pub fn precision_unit(&self) -> &'static str {
        match self {
            ParameterValue::Number(_) => "significant digits",
            ParameterValue::Category(_) => "category segments",
            ParameterValue::Text(_) => "characters",
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ParameterValue::Number(_) => "number",
            ParameterValue::Text(_) => "text",
            ParameterValue::Category(_) => "category",
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Number(n) => write!(f, "{}", n),
            ParameterValue::Text(t) => f.write_str(t),
            ParameterValue::Category(c) => f.write_str(c),
        }
    }
}

/// Non-empty segments of a category path
pub fn category_segments(category: &str) -> Vec<&str> {
    category
        .split(CATEGORY_SEPARATORS)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Manufacturer specification limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpecRange {
    pub min: f64,
    pub max: f64,
}

impl SpecRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// One equipment parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRecord {
    pub equipment_id: String,
    pub parameter_name: String,

    /// `None` marks an incomplete record
    #[serde(default)]
    pub value: Option<ParameterValue>,

    #[serde(default)]
    pub unit: Option<String>,

    /// File the record was parsed from
    #[serde(default)]
    pub source_file: String,

    /// Position in the loaded set; later wins on duplicate keys
    #[serde(default)]
    pub sequence_index: u64,

    #[serde(default)]
    pub spec_range: Option<SpecRange>,

    /// Confidence stored with a committed value
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl ParameterRecord {
    pub fn new(
        equipment_id: impl Into<String>,
        parameter_name: impl Into<String>,
        value: Option<ParameterValue>,
    ) -> Self {
        Self {
            equipment_id: equipment_id.into(),
            parameter_name: parameter_name.into(),
            value,
            unit: None,
            source_file: String::new(),
            sequence_index: 0,
            spec_range: None,
            confidence: None,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.equipment_id.clone(), self.parameter_name.clone())
    }

    pub fn is_incomplete(&self) -> bool {
        self.value.is_none()
    }

    pub fn numeric_value(&self) -> Option<f64> {
        self.value.as_ref().and_then(ParameterValue::as_f64)
    }

    pub fn with_value(&self, value: ParameterValue) -> Self {
        Self {
            value: Some(value),
            ..self.clone()
        }
    }

    pub fn with_confidence(self, confidence: f64) -> Self {
        Self {
            confidence: Some(confidence.clamp(0.0, 1.0)),
            ..self
        }
    }

    pub fn with_unit(self, unit: impl Into<String>) -> Self {
        Self {
            unit: Some(unit.into()),
            ..self
        }
    }

    pub fn with_source(self, source_file: impl Into<String>, sequence_index: u64) -> Self {
        Self {
            source_file: source_file.into(),
            sequence_index,
            ..self
        }
    }

    pub fn with_spec_range(self, min: f64, max: f64) -> Self {
        Self {
            spec_range: Some(SpecRange { min, max }),
            ..self
        }
    }
}

/// Records loaded for one equipment, in insertion order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub equipment_id: String,
    records: Vec<ParameterRecord>,
}

impl ParameterSet {
    pub fn new(equipment_id: impl Into<String>) -> Self {
        Self {
            equipment_id: equipment_id.into(),
            records: Vec::new(),
        }
    }

    /// Build a set, rejecting records that belong to another equipment
    pub fn from_records(
        equipment_id: impl Into<String>,
        records: Vec<ParameterRecord>,
    ) -> ReconcileResult<Self> {
        let mut set = Self::new(equipment_id);
        for record in records {
            set.push(record)?;
        }
        Ok(set)
    }

    pub fn push(&mut self, record: ParameterRecord) -> ReconcileResult<()> {
        if record.equipment_id != self.equipment_id {
            return Err(ReconcileError::Data(format!(
                "record {} belongs to equipment '{}', expected '{}'",
                record.parameter_name, record.equipment_id, self.equipment_id
            )));
        }
        if record.parameter_name.trim().is_empty() {
            return Err(ReconcileError::Data(format!(
                "record #{} from '{}' has an empty parameter name",
                record.sequence_index, record.source_file
            )));
        }
        self.records.push(record);
        Ok(())
    }

    /// Keep only records from the named source files (empty list keeps all)
    pub fn retain_files(&mut self, file_names: &[String]) {
        if file_names.is_empty() {
            return;
        }
        self.records
            .retain(|r| file_names.iter().any(|name| name == &r.source_file));
    }

    /// Distinct source files in first-seen order
    pub fn source_files(&self) -> Vec<&str> {
        let mut files: Vec<&str> = Vec::new();
        for record in &self.records {
            if !files.contains(&record.source_file.as_str()) {
                files.push(&record.source_file);
            }
        }
        files
    }

    pub fn records(&self) -> &[ParameterRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ParameterRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_counts_significant_digits() {
        assert_eq!(NumericValue::parse("10.050").unwrap().significant_digits, 5);
        assert_eq!(NumericValue::parse("0.0012").unwrap().significant_digits, 2);
        assert_eq!(NumericValue::parse("1200").unwrap().significant_digits, 4);
        assert_eq!(NumericValue::parse("-3.40e2").unwrap().significant_digits, 3);
        assert_eq!(NumericValue::parse("0.00").unwrap().significant_digits, 3);
        assert!(NumericValue::parse("abc").is_none());
        assert!(NumericValue::parse("inf").is_none());
    }

    #[test]
    fn test_from_f64_uses_shortest_repr() {
        assert_eq!(NumericValue::from_f64(10.0).significant_digits, 2);
        assert_eq!(NumericValue::from_f64(10.05).significant_digits, 4);
        assert_eq!(NumericValue::from_f64(0.5).significant_digits, 1);
    }

    #[test]
    fn test_canonical_string_keeps_trailing_zeros() {
        let n = NumericValue::parse("10.050").unwrap();
        assert_eq!(n.canonical_string(), "10.050");
        assert_eq!(NumericValue::parse("1200").unwrap().canonical_string(), "1200");
        assert_eq!(NumericValue::parse("0.00").unwrap().canonical_string(), "0.00");
    }

    #[test]
    fn test_canonical_string_near_power_of_ten() {
        let n = NumericValue::from_f64(999.9999999999999);
        assert_eq!(n.significant_digits, 16);
        let text = n.canonical_string();
        assert_eq!(text, "999.9999999999999");
        let reparsed = NumericValue::parse(&text).unwrap();
        assert_eq!(reparsed.value, n.value);
        assert_eq!(reparsed.significant_digits, 16);

        // Rounding up crosses a power of ten
        assert_eq!(NumericValue::new(9.96, 2).canonical_string(), "10");
        assert_eq!(NumericValue::new(0.0996, 2).canonical_string(), "0.10");
    }

    #[test]
    fn test_value_json_shape() {
        let value = ParameterValue::Number(NumericValue::parse("2.50").unwrap());
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["type"], "number");
        assert_eq!(json["value"], "2.50");

        let parsed: ParameterValue =
            serde_json::from_str(r#"{"type":"number","value":12.5}"#).unwrap();
        assert_eq!(parsed.as_f64(), Some(12.5));

        let parsed: ParameterValue =
            serde_json::from_str(r#"{"type":"category","value":"sensor/pressure"}"#).unwrap();
        assert_eq!(parsed.precision(), 2);
    }

    #[test]
    fn test_precision_by_kind() {
        assert_eq!(ParameterValue::category("a/b.c:d").precision(), 4);
        assert_eq!(ParameterValue::text("  abc ").precision(), 3);
        assert_eq!(ParameterValue::number(1.25).precision(), 3);
    }

    #[test]
    fn test_set_rejects_foreign_equipment() {
        let result = ParameterSet::from_records(
            "E1",
            vec![
                ParameterRecord::new("E1", "P1", Some(ParameterValue::number(1.0))),
                ParameterRecord::new("E2", "P1", Some(ParameterValue::number(1.0))),
            ],
        );
        assert!(matches!(result, Err(ReconcileError::Data(_))));
    }

    #[test]
    fn test_retain_files() {
        let mut set = ParameterSet::from_records(
            "E1",
            vec![
                ParameterRecord::new("E1", "P1", None).with_source("a.json", 0),
                ParameterRecord::new("E1", "P2", None).with_source("b.json", 1),
            ],
        )
        .unwrap();
        assert_eq!(set.source_files(), vec!["a.json", "b.json"]);

        set.retain_files(&[]);
        assert_eq!(set.len(), 2);

        set.retain_files(&["b.json".to_string()]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.records()[0].parameter_name, "P2");
    }

    #[test]
    fn test_with_value_keeps_identity() {
        let record = ParameterRecord::new("E1", "P1", Some(ParameterValue::number(1.0)))
            .with_unit("bar")
            .with_source("a.json", 7);
        let updated = record.with_value(ParameterValue::number(2.0)).with_confidence(1.5);
        assert_eq!(updated.key(), record.key());
        assert_eq!(updated.unit.as_deref(), Some("bar"));
        assert_eq!(updated.confidence, Some(1.0));
        assert_eq!(updated.numeric_value(), Some(2.0));
    }
}
