//! In-memory Mother DB store
//!
//! Versioned per equipment. Keys registered with [`InMemoryStore::reject_key`]
//! fail at commit time, which lets callers exercise partial commits.

use super::{validate_for_commit, CommitResult, MotherDbSnapshot, MotherDbStore, RecordCommitStatus};
use crate::error::{ReconcileError, ReconcileResult};
use crate::models::{ParameterRecord, RecordKey};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct EquipmentData {
    version: u64,
    records: BTreeMap<RecordKey, ParameterRecord>,
}

#[derive(Debug, Default)]
struct StoreState {
    equipment: HashMap<String, EquipmentData>,
    rejected_keys: HashSet<RecordKey>,
    /// Reject every commit as a whole
    offline: bool,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `records` as version 1
    pub fn with_records(records: Vec<ParameterRecord>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.lock();
            for record in records {
                let data = state.equipment.entry(record.equipment_id.clone()).or_default();
                data.version = 1;
                data.records.insert(record.key(), record);
            }
        }
        store
    }

    /// Make every future write of `key` fail
    pub fn reject_key(&self, key: RecordKey) {
        self.state.lock().rejected_keys.insert(key);
    }

    pub fn clear_rejections(&self) {
        self.state.lock().rejected_keys.clear();
    }

    /// Reject whole commits until switched back
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    pub fn get(&self, key: &RecordKey) -> Option<ParameterRecord> {
        self.state
            .lock()
            .equipment
            .get(&key.equipment_id)
            .and_then(|data| data.records.get(key).cloned())
    }

    pub fn version(&self, equipment_id: &str) -> u64 {
        self.state
            .lock()
            .equipment
            .get(equipment_id)
            .map(|data| data.version)
            .unwrap_or(0)
    }
}

#[async_trait]
impl MotherDbStore for InMemoryStore {
    async fn current_snapshot(&self, equipment_id: &str) -> ReconcileResult<MotherDbSnapshot> {
        let state = self.state.lock();
        let snapshot = match state.equipment.get(equipment_id) {
            Some(data) => {
                MotherDbSnapshot::new(equipment_id, data.version, data.records.values().cloned())
            }
            None => MotherDbSnapshot::empty(equipment_id),
        };
        Ok(snapshot)
    }

    async fn commit(
        &self,
        equipment_id: &str,
        records: Vec<ParameterRecord>,
    ) -> ReconcileResult<CommitResult> {
        let mut state = self.state.lock();
        if state.offline {
            return Err(ReconcileError::Persistence(
                "in-memory store is offline".to_string(),
            ));
        }

        let mut statuses = Vec::with_capacity(records.len());
        let mut accepted = Vec::new();
        for record in records {
            let key = record.key();
            if state.rejected_keys.contains(&key) {
                warn!(key = %key, "Write rejected by store");
                statuses.push(RecordCommitStatus::failed(key, "write rejected by store"));
                continue;
            }
            match validate_for_commit(equipment_id, &record) {
                Ok(()) => {
                    statuses.push(RecordCommitStatus::ok(key));
                    accepted.push(record);
                }
                Err(error) => statuses.push(RecordCommitStatus::failed(key, error)),
            }
        }

        let version = if accepted.is_empty() {
            None
        } else {
            let data = state.equipment.entry(equipment_id.to_string()).or_default();
            data.version += 1;
            for record in accepted {
                data.records.insert(record.key(), record);
            }
            Some(data.version)
        };

        debug!(equipment_id, ?version, records = statuses.len(), "In-memory commit");
        Ok(CommitResult { version, statuses })
    }
}
