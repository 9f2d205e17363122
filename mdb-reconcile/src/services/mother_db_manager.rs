//! Session orchestration: load → analyze → commit
//!
//! The manager owns the collaborators (store, engine, analyzers) and the
//! per-equipment lock registry. All per-session state lives in the
//! [`ReconcileSession`] passed to each call.
//!
//! # Failure handling
//! - cancellation or a worker pool failure during analysis aborts the session
//! - a whole-batch store error leaves the session `Analyzed`
//! - per-record store failures leave the session `Analyzed` and are reported;
//!   only a fully successful commit reaches `Committed`

use crate::config::ReconcileConfig;
use crate::db::{MotherDbSnapshot, MotherDbStore};
use crate::error::{ReconcileError, ReconcileResult};
use crate::models::{
    AnalysisReport, Candidate, CommitFailure, CommitSummary, ConflictRecord, MotherDbStatus,
    ParameterRecord, ParameterSet, QuickSetupResult, ReconcileSession, RejectedOutcome, Resolution, SessionState,
    StateTransition,
};
use crate::services::candidate_analyzer::CandidateAnalyzer;
use crate::services::comparison_engine::ChunkedComparisonEngine;
use crate::services::conflict_resolver::ConflictResolver;
use crate::services::equipment_lock::EquipmentLocks;
use crate::services::qc::QualityControlAnalyzer;
use crate::source::ParameterSource;
use chrono::Utc;
use mdb_common::{EventBus, ReconcileEvent};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

pub struct MotherDbManager {
    config: ReconcileConfig,
    store: Arc<dyn MotherDbStore>,
    engine: ChunkedComparisonEngine,
    candidate_analyzer: CandidateAnalyzer,
    conflict_resolver: ConflictResolver,
    qc_analyzer: QualityControlAnalyzer,
    locks: EquipmentLocks,
    event_bus: Option<EventBus>,
}

impl MotherDbManager {
    /// Build a manager; the configuration is validated here and never again
    pub fn new(config: ReconcileConfig, store: Arc<dyn MotherDbStore>) -> ReconcileResult<Self> {
        config.validate()?;
        Ok(Self {
            engine: ChunkedComparisonEngine::from_config(&config),
            candidate_analyzer: CandidateAnalyzer::new(config.similarity_threshold),
            conflict_resolver: ConflictResolver::new(config.conflict_policy),
            qc_analyzer: QualityControlAnalyzer::from_config(&config),
            config,
            store,
            locks: EquipmentLocks::new(),
            event_bus: None,
        })
    }

    /// Publish session lifecycle events on `bus`
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn locks(&self) -> &EquipmentLocks {
        &self.locks
    }

    pub fn engine(&self) -> &ChunkedComparisonEngine {
        &self.engine
    }

    fn emit(&self, event: ReconcileEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(event);
        }
    }

    /// Start a session: lock the equipment and freeze its baseline
    pub async fn load(&self, incoming: ParameterSet) -> ReconcileResult<ReconcileSession> {
        let equipment_id = incoming.equipment_id.clone();
        let guard = self.locks.acquire(&equipment_id)?;

        let snapshot = self.store.current_snapshot(&equipment_id).await?;
        if snapshot.equipment_id != equipment_id {
            return Err(ReconcileError::Persistence(format!(
                "store returned snapshot for '{}' when asked for '{}'",
                snapshot.equipment_id, equipment_id
            )));
        }
        let snapshot: Arc<MotherDbSnapshot> = Arc::new(snapshot);

        let mut session = ReconcileSession::new(incoming, Arc::clone(&snapshot), guard);
        session.transition_to(SessionState::Loaded, "load")?;

        info!(
            session_id = %session.session_id,
            equipment_id = %equipment_id,
            incoming = session.incoming().len(),
            baseline = snapshot.len(),
            baseline_version = snapshot.version,
            "Session loaded"
        );
        self.emit(ReconcileEvent::SessionLoaded {
            session_id: session.session_id,
            equipment_id,
            incoming_count: session.incoming().len(),
            baseline_count: snapshot.len(),
            baseline_version: snapshot.version,
            timestamp: Utc::now(),
        });

        Ok(session)
    }

    /// Parse `paths` with `source`, then [`MotherDbManager::load`]
    pub async fn load_from(
        &self,
        source: &dyn ParameterSource,
        paths: &[PathBuf],
        equipment_id: &str,
    ) -> ReconcileResult<ReconcileSession> {
        let incoming = source.load(paths, equipment_id)?;
        self.load(incoming).await
    }

    /// Compare, classify, resolve and run QC against the frozen baseline
    ///
    /// Re-running on an analyzed session recomputes the same report.
    pub async fn analyze(&self, session: &mut ReconcileSession) -> ReconcileResult<AnalysisReport> {
        session.require_state(&[SessionState::Loaded, SessionState::Analyzed], "analyze")?;
        let start = Instant::now();

        if session.is_cancelled() {
            self.abort(session, "cancelled before analysis").await?;
            return Err(ReconcileError::Cancelled);
        }

        let engine = self.engine.clone();
        let incoming = session.incoming().clone();
        let snapshot = Arc::clone(session.snapshot());
        let token = session.cancellation_token();
        let chunk_size = self.config.chunk_size;
        let worker_count = self.config.worker_count;

        let compared = tokio::task::spawn_blocking(move || {
            engine.compare(&incoming, &snapshot, chunk_size, worker_count, &token)
        })
        .await
        .map_err(ReconcileError::from)
        .and_then(|result| result);

        let (pairs, stats) = match compared {
            Ok(output) => output,
            Err(ReconcileError::Cancelled) => {
                self.abort(session, "cancelled during comparison").await?;
                return Err(ReconcileError::Cancelled);
            }
            Err(ReconcileError::Concurrency(msg)) => {
                error!(session_id = %session.session_id, error = %msg, "Comparison failed");
                self.abort(session, &format!("worker pool failure: {}", msg))
                    .await?;
                return Err(ReconcileError::Concurrency(msg));
            }
            Err(e) => return Err(e),
        };

        if session.is_cancelled() {
            self.abort(session, "cancelled during comparison").await?;
            return Err(ReconcileError::Cancelled);
        }

        let classification = self.candidate_analyzer.classify(pairs);
        let conflicts = self.conflict_resolver.resolve(classification.conflicts);
        let qc_input = qc_records(&classification.candidates, &conflicts, &classification.rejected);
        let (qc_findings, qc_summary) = self.qc_analyzer.analyze(&qc_input);

        let report = AnalysisReport {
            candidates: classification.candidates,
            conflicts,
            rejected: classification.rejected,
            qc_findings,
            qc_summary,
            stats,
        };

        session.set_report(report.clone());
        session.transition_to(SessionState::Analyzed, "analyze")?;

        let manual_review_count = report.manual_review().len();
        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            session_id = %session.session_id,
            candidates = report.candidates.len(),
            conflicts = report.conflicts.len(),
            manual_review = manual_review_count,
            qc_findings = report.qc_findings.len(),
            elapsed_ms,
            "Session analyzed"
        );
        self.emit(ReconcileEvent::AnalysisCompleted {
            session_id: session.session_id,
            candidate_count: report.candidates.len(),
            conflict_count: report.conflicts.len(),
            manual_review_count,
            qc_finding_count: report.qc_findings.len(),
            elapsed_ms,
            timestamp: Utc::now(),
        });

        Ok(report)
    }

    /// Write every auto-acceptable candidate and auto-resolved conflict
    ///
    /// Manual-review conflicts and incomplete records are never written.
    /// Affirmed keys count as saved without touching the store.
    pub async fn commit(&self, session: &mut ReconcileSession) -> ReconcileResult<CommitSummary> {
        session.require_state(&[SessionState::Analyzed], "commit")?;
        let (records, affirmed) = match session.report() {
            Some(report) => (report.commit_records(), report.affirmed()),
            None => {
                return Err(ReconcileError::InvalidState {
                    from: session.state(),
                    operation: "commit",
                })
            }
        };

        if records.is_empty() {
            session.transition_to(SessionState::Committed, "commit")?;
            info!(
                session_id = %session.session_id,
                affirmed = affirmed.len(),
                "Nothing to write"
            );
            self.emit_commit(session, affirmed.len(), 0, None);
            return Ok(CommitSummary {
                saved: affirmed,
                failed: Vec::new(),
                version: None,
                state: session.state(),
            });
        }

        let submitted = records.len();
        let result = match self.store.commit(&session.equipment_id, records).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    session_id = %session.session_id,
                    error = %e,
                    "Commit rejected by store, session stays analyzed"
                );
                return Err(match e {
                    ReconcileError::Persistence(_) => e,
                    other => ReconcileError::Persistence(other.to_string()),
                });
            }
        };

        let mut saved = Vec::new();
        let mut failed = Vec::new();
        let written_count = result.statuses.len();
        for status in result.statuses {
            match status.error {
                None => saved.push(status.key),
                Some(error) => failed.push(CommitFailure {
                    key: status.key,
                    error,
                }),
            }
        }
        if written_count != submitted {
            warn!(
                session_id = %session.session_id,
                submitted,
                reported = written_count,
                "Store reported a different number of records than submitted"
            );
        }
        saved.extend(affirmed);

        if failed.is_empty() {
            session.transition_to(SessionState::Committed, "commit")?;
            info!(
                session_id = %session.session_id,
                saved = saved.len(),
                version = ?result.version,
                "Session committed"
            );
        } else {
            warn!(
                session_id = %session.session_id,
                saved = saved.len(),
                failed = failed.len(),
                "Partial commit, session stays analyzed"
            );
        }
        self.emit_commit(session, saved.len(), failed.len(), result.version);

        Ok(CommitSummary {
            saved,
            failed,
            version: result.version,
            state: session.state(),
        })
    }

    fn emit_commit(
        &self,
        session: &ReconcileSession,
        saved_count: usize,
        failed_count: usize,
        version: Option<u64>,
    ) {
        self.emit(ReconcileEvent::CommitCompleted {
            session_id: session.session_id,
            saved_count,
            failed_count,
            version,
            timestamp: Utc::now(),
        });
    }

    /// End the session without writing
    pub async fn abort(
        &self,
        session: &mut ReconcileSession,
        reason: &str,
    ) -> ReconcileResult<StateTransition> {
        let transition = session.transition_to(SessionState::Aborted, "abort")?;
        warn!(session_id = %session.session_id, reason, "Session aborted");
        self.emit(ReconcileEvent::SessionAborted {
            session_id: session.session_id,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        Ok(transition)
    }

    /// Load, analyze and commit in one call
    ///
    /// `file_names` selects which source files of `comparison_data` take part;
    /// an empty list uses all of them.
    pub async fn quick_setup_mother_db(
        &self,
        comparison_data: ParameterSet,
        file_names: &[String],
        equipment_id: &str,
    ) -> ReconcileResult<QuickSetupResult> {
        if comparison_data.equipment_id != equipment_id {
            return Err(ReconcileError::Data(format!(
                "comparison data is for equipment '{}', expected '{}'",
                comparison_data.equipment_id, equipment_id
            )));
        }

        let unknown: Vec<&str> = {
            let present = comparison_data.source_files();
            file_names
                .iter()
                .map(String::as_str)
                .filter(|name| !present.contains(name))
                .collect()
        };
        if !unknown.is_empty() {
            return Err(ReconcileError::Data(format!(
                "no records from file(s) {:?} in comparison data",
                unknown
            )));
        }

        let mut incoming = comparison_data;
        incoming.retain_files(file_names);

        let mut session = self.load(incoming).await?;
        let report = self.analyze(&mut session).await?;
        let summary = self.commit(&mut session).await?;

        let result = QuickSetupResult {
            session_id: session.session_id,
            state: session.state(),
            saved_count: summary.saved.len(),
            conflict_count: report.conflicts.len(),
            qc_warnings: report.qc_summary.actionable(),
            manual_review: report.manual_review(),
            failed: summary.failed,
            incomplete_count: report.incomplete_count(),
            findings: report.qc_findings,
            version: summary.version,
        };

        info!(
            session_id = %result.session_id,
            equipment_id,
            saved = result.saved_count,
            conflicts = result.conflict_count,
            qc_warnings = result.qc_warnings,
            manual_review = result.manual_review.len(),
            failed = result.failed.len(),
            "Quick setup finished"
        );
        Ok(result)
    }

    /// Health of the stored values for `equipment_id`
    pub async fn status(&self, equipment_id: &str) -> ReconcileResult<MotherDbStatus> {
        self.store.status(equipment_id).await
    }
}

/// Every measured instance in the session, as seen by QC
///
/// Winners carry their resolved value. Superseded records stay as measured so
/// each source file still contributes a sample per parameter name.
fn qc_records(
    candidates: &[Candidate],
    conflicts: &[ConflictRecord],
    rejected: &[RejectedOutcome],
) -> Vec<ParameterRecord> {
    let from_candidates = candidates.iter().map(|c| match &c.value {
        Some(value) => c.record.with_value(value.clone()),
        None => c.record.clone(),
    });
    let from_conflicts = conflicts.iter().map(|c| match (&c.resolution, &c.resolved_value) {
        (Resolution::AutoResolved, Some(value)) => c.record.with_value(value.clone()),
        _ => c.record.clone(),
    });
    let superseded = rejected.iter().map(|r| r.record.clone());
    from_candidates.chain(from_conflicts).chain(superseded).collect()
}
