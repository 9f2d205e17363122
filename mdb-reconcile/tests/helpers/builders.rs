//! Record and manager builders

use mdb_reconcile::config::ReconcileConfig;
use mdb_reconcile::models::{ParameterRecord, ParameterSet, ParameterValue};
use mdb_reconcile::{MotherDbManager, MotherDbStore};
use std::sync::Arc;

pub const EQUIPMENT: &str = "EQ-01";

/// Numeric record from `file` at `index`
pub fn number(name: &str, value: f64, file: &str, index: u64) -> ParameterRecord {
    ParameterRecord::new(EQUIPMENT, name, Some(ParameterValue::number(value))).with_source(file, index)
}

/// Numeric record keeping the written digits, e.g. "10.050"
pub fn number_text(name: &str, value: &str, file: &str, index: u64) -> ParameterRecord {
    let parsed: ParameterValue = serde_json::from_value(serde_json::json!({
        "type": "number",
        "value": value,
    }))
    .expect("valid numeric literal");
    ParameterRecord::new(EQUIPMENT, name, Some(parsed)).with_source(file, index)
}

pub fn text(name: &str, value: &str, file: &str, index: u64) -> ParameterRecord {
    ParameterRecord::new(EQUIPMENT, name, Some(ParameterValue::text(value))).with_source(file, index)
}

pub fn category(name: &str, value: &str, file: &str, index: u64) -> ParameterRecord {
    ParameterRecord::new(EQUIPMENT, name, Some(ParameterValue::category(value)))
        .with_source(file, index)
}

pub fn set_of(records: Vec<ParameterRecord>) -> ParameterSet {
    ParameterSet::from_records(EQUIPMENT, records).expect("records belong to EQUIPMENT")
}

pub fn manager_with(config: ReconcileConfig, store: Arc<dyn MotherDbStore>) -> MotherDbManager {
    MotherDbManager::new(config, store).expect("valid test configuration")
}
