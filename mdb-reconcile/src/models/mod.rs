//! Data models for mdb-reconcile

pub mod outcome;
pub mod parameter;
pub mod qc;
pub mod session;
pub mod status;

pub use outcome::{
    AnalysisReport, Candidate, Classification, ComparedPair, ComparisonOutcome, ComparisonStats,
    ConflictRecord, OutcomeKind, RejectReason, RejectedOutcome, Resolution,
};
pub use parameter::{
    NumericValue, ParameterRecord, ParameterSet, ParameterValue, RecordKey, SpecRange,
};
pub use qc::{QcCheck, QcFinding, QcMode, QcSummary, Severity};
pub use session::{ReconcileSession, SessionState, StateTransition};
pub use status::{CommitFailure, CommitSummary, MotherDbStatus, QuickSetupResult};
