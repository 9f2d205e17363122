//! Reconciliation session state machine
//!
//! `Idle → Loaded → Analyzed → Committed`, with `Aborted` reachable from every
//! non-terminal state. `Analyzed → Analyzed` is a re-analysis against the same
//! frozen snapshot. Committed and Aborted are terminal; entering one releases
//! the per-equipment lock.

use super::outcome::AnalysisReport;
use super::parameter::ParameterSet;
use crate::db::MotherDbSnapshot;
use crate::error::{ReconcileError, ReconcileResult};
use crate::services::equipment_lock::EquipmentLockGuard;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Loaded,
    Analyzed,
    /// Every write succeeded (terminal)
    Committed,
    /// Ended without a write (terminal)
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Committed | SessionState::Aborted)
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle, Loaded) => true,
            (Loaded, Analyzed) | (Analyzed, Analyzed) => true,
            (Analyzed, Committed) => true,
            (from, Aborted) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// State transition record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub session_id: Uuid,
    pub old_state: SessionState,
    pub new_state: SessionState,
    pub transitioned_at: DateTime<Utc>,
}

/// Explicit context for one reconciliation of one equipment
///
/// Owns the incoming set and the frozen baseline. Components receive what they
/// need from it by reference; nothing here is global.
#[derive(Debug)]
pub struct ReconcileSession {
    pub session_id: Uuid,
    pub equipment_id: String,
    state: SessionState,
    incoming: ParameterSet,
    snapshot: Arc<MotherDbSnapshot>,
    report: Option<AnalysisReport>,
    cancel: CancellationToken,
    lock: Option<EquipmentLockGuard>,
    transitions: Vec<StateTransition>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ReconcileSession {
    /// New session in `Idle`, holding the equipment lock
    pub fn new(
        incoming: ParameterSet,
        snapshot: Arc<MotherDbSnapshot>,
        lock: EquipmentLockGuard,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            equipment_id: incoming.equipment_id.clone(),
            state: SessionState::Idle,
            incoming,
            snapshot,
            report: None,
            cancel: CancellationToken::new(),
            lock: Some(lock),
            transitions: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn incoming(&self) -> &ParameterSet {
        &self.incoming
    }

    pub fn snapshot(&self) -> &Arc<MotherDbSnapshot> {
        &self.snapshot
    }

    pub fn report(&self) -> Option<&AnalysisReport> {
        self.report.as_ref()
    }

    pub(crate) fn set_report(&mut self, report: AnalysisReport) {
        self.report = Some(report);
    }

    /// Token observed by the comparison workers
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cancellation; takes effect at the next chunk boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn holds_lock(&self) -> bool {
        self.lock.is_some()
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    /// Fail unless the session is in one of `allowed`
    pub fn require_state(
        &self,
        allowed: &[SessionState],
        operation: &'static str,
    ) -> ReconcileResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ReconcileError::InvalidState {
                from: self.state,
                operation,
            })
        }
    }

    /// Transition to new state
    pub fn transition_to(
        &mut self,
        new_state: SessionState,
        operation: &'static str,
    ) -> ReconcileResult<StateTransition> {
        if !self.state.can_transition_to(new_state) {
            return Err(ReconcileError::InvalidState {
                from: self.state,
                operation,
            });
        }

        let transition = StateTransition {
            session_id: self.session_id,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };
        self.state = new_state;

        if new_state.is_terminal() {
            self.ended_at = Some(transition.transitioned_at);
            // Dropping the guard releases the equipment
            self.lock = None;
        }

        self.transitions.push(transition.clone());
        Ok(transition)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::equipment_lock::EquipmentLocks;

    fn session(locks: &EquipmentLocks) -> ReconcileSession {
        let snapshot = Arc::new(MotherDbSnapshot::empty("E1"));
        let guard = locks.acquire("E1").unwrap();
        ReconcileSession::new(ParameterSet::new("E1"), snapshot, guard)
    }

    #[test]
    fn test_happy_path_transitions() {
        let locks = EquipmentLocks::new();
        let mut session = session(&locks);
        assert_eq!(session.state(), SessionState::Idle);

        session.transition_to(SessionState::Loaded, "load").unwrap();
        session.transition_to(SessionState::Analyzed, "analyze").unwrap();
        session.transition_to(SessionState::Analyzed, "analyze").unwrap();
        let last = session.transition_to(SessionState::Committed, "commit").unwrap();

        assert_eq!(last.old_state, SessionState::Analyzed);
        assert!(session.is_terminal());
        assert!(session.ended_at.is_some());
        assert_eq!(session.transitions().len(), 4);
    }

    #[test]
    fn test_commit_from_loaded_rejected() {
        let locks = EquipmentLocks::new();
        let mut session = session(&locks);
        session.transition_to(SessionState::Loaded, "load").unwrap();

        let err = session
            .transition_to(SessionState::Committed, "commit")
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::InvalidState {
                from: SessionState::Loaded,
                operation: "commit"
            }
        ));
        assert_eq!(session.state(), SessionState::Loaded);
    }

    #[test]
    fn test_terminal_state_releases_lock() {
        let locks = EquipmentLocks::new();
        let mut session = session(&locks);
        assert!(locks.is_locked("E1"));

        session.transition_to(SessionState::Aborted, "abort").unwrap();
        assert!(!session.holds_lock());
        assert!(!locks.is_locked("E1"));

        assert!(session.transition_to(SessionState::Aborted, "abort").is_err());
    }

    #[test]
    fn test_cancel_flag() {
        let locks = EquipmentLocks::new();
        let session = session(&locks);
        let token = session.cancellation_token();
        assert!(!token.is_cancelled());
        session.cancel();
        assert!(token.is_cancelled());
        assert!(session.is_cancelled());
    }
}
