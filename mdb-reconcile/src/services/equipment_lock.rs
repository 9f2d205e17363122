//! Per-equipment advisory locks
//!
//! At most one live session per equipment id. The lock is held by an RAII
//! guard; dropping the guard (or ending the session) releases it.

use crate::error::{ReconcileError, ReconcileResult};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Registry of equipment ids with an active session
///
/// Cloning shares the registry.
#[derive(Clone, Default)]
pub struct EquipmentLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl EquipmentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `equipment_id`, failing fast if it is held
    pub fn acquire(&self, equipment_id: &str) -> ReconcileResult<EquipmentLockGuard> {
        let mut held = self.held.lock();
        if !held.insert(equipment_id.to_string()) {
            return Err(ReconcileError::EquipmentBusy(equipment_id.to_string()));
        }
        debug!(equipment_id, "Equipment lock acquired");
        Ok(EquipmentLockGuard {
            equipment_id: equipment_id.to_string(),
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_locked(&self, equipment_id: &str) -> bool {
        self.held.lock().contains(equipment_id)
    }

    pub fn active_count(&self) -> usize {
        self.held.lock().len()
    }
}

impl fmt::Debug for EquipmentLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EquipmentLocks")
            .field("active", &self.active_count())
            .finish()
    }
}

/// Releases its equipment id when dropped
pub struct EquipmentLockGuard {
    equipment_id: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl EquipmentLockGuard {
    pub fn equipment_id(&self) -> &str {
        &self.equipment_id
    }
}

impl Drop for EquipmentLockGuard {
    fn drop(&mut self) {
        self.held.lock().remove(&self.equipment_id);
        debug!(equipment_id = %self.equipment_id, "Equipment lock released");
    }
}

impl fmt::Debug for EquipmentLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EquipmentLockGuard")
            .field("equipment_id", &self.equipment_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_busy() {
        let locks = EquipmentLocks::new();
        let _guard = locks.acquire("E1").unwrap();
        assert!(matches!(
            locks.acquire("E1"),
            Err(ReconcileError::EquipmentBusy(id)) if id == "E1"
        ));
        // Other equipment is independent
        assert!(locks.acquire("E2").is_ok());
    }

    #[test]
    fn test_drop_releases() {
        let locks = EquipmentLocks::new();
        {
            let guard = locks.acquire("E1").unwrap();
            assert_eq!(guard.equipment_id(), "E1");
            assert!(locks.is_locked("E1"));
        }
        assert!(!locks.is_locked("E1"));
        assert!(locks.acquire("E1").is_ok());
    }

    #[test]
    fn test_clones_share_registry() {
        let locks = EquipmentLocks::new();
        let other = locks.clone();
        let _guard = locks.acquire("E1").unwrap();
        assert!(other.is_locked("E1"));
        assert_eq!(other.active_count(), 1);
    }
}
