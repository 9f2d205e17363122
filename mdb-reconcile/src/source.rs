//! Parameter sources
//!
//! Parsing raw equipment file formats happens outside this crate. A
//! [`ParameterSource`] hands the core already-typed records; malformed files are
//! rejected here, before a session starts.

use crate::error::{ReconcileError, ReconcileResult};
use crate::models::{ParameterRecord, ParameterSet, ParameterValue, SpecRange};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Produces a validated [`ParameterSet`] from files
pub trait ParameterSource: Send + Sync {
    fn load(&self, paths: &[PathBuf], equipment_id: &str) -> ReconcileResult<ParameterSet>;
}

/// One record as written in a JSON parameter file
#[derive(Debug, Deserialize)]
struct FileRecord {
    #[serde(default)]
    equipment_id: Option<String>,
    parameter_name: String,
    #[serde(default)]
    value: Option<ParameterValue>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    source_file: Option<String>,
    #[serde(default)]
    spec_range: Option<SpecRange>,
}

/// Reads JSON arrays of typed records
///
/// `equipment_id` may be omitted per record and defaults to the requested
/// equipment. `source_file` defaults to the file name. Sequence indexes are
/// assigned across all files in load order.
#[derive(Debug, Default, Clone)]
pub struct JsonParameterSource;

impl JsonParameterSource {
    pub fn new() -> Self {
        Self
    }

    fn read_file(path: &Path) -> ReconcileResult<Vec<FileRecord>> {
        let contents = std::fs::read_to_string(path).map_err(mdb_common::Error::from)?;
        serde_json::from_str(&contents).map_err(|e| {
            ReconcileError::Data(format!("{}: {}", path.display(), e))
        })
    }
}

impl ParameterSource for JsonParameterSource {
    fn load(&self, paths: &[PathBuf], equipment_id: &str) -> ReconcileResult<ParameterSet> {
        let mut set = ParameterSet::new(equipment_id);
        let mut sequence_index = 0u64;

        for path in paths {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let records = Self::read_file(path)?;
            debug!(file = %path.display(), records = records.len(), "Parameter file parsed");

            for raw in records {
                let record = ParameterRecord {
                    equipment_id: raw.equipment_id.unwrap_or_else(|| equipment_id.to_string()),
                    parameter_name: raw.parameter_name,
                    value: raw.value,
                    unit: raw.unit,
                    source_file: raw.source_file.unwrap_or_else(|| file_name.clone()),
                    sequence_index,
                    spec_range: raw.spec_range,
                    confidence: None,
                };
                set.push(record)?;
                sequence_index += 1;
            }
        }

        info!(
            equipment_id,
            files = paths.len(),
            records = set.len(),
            "Parameter files loaded"
        );
        Ok(set)
    }
}
