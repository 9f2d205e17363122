//! Reconciliation services
//!
//! Leaf-first: similarity scoring, the chunk worker pool and comparison
//! engine, candidate classification, conflict resolution, quality control,
//! and the manager that runs them as one session.

pub mod candidate_analyzer;
pub mod comparison_engine;
pub mod conflict_resolver;
pub mod equipment_lock;
pub mod mother_db_manager;
pub mod qc;
pub mod similarity;
pub mod worker_pool;

pub use candidate_analyzer::CandidateAnalyzer;
pub use comparison_engine::{ChunkedComparisonEngine, Fingerprint, OutcomeCache};
pub use conflict_resolver::{ConflictPolicy, ConflictResolver, PolicyDecision};
pub use equipment_lock::{EquipmentLockGuard, EquipmentLocks};
pub use mother_db_manager::MotherDbManager;
pub use qc::QualityControlAnalyzer;
pub use similarity::{Similarity, SimilarityScorer};
