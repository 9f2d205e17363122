//! Deterministic conflict resolution
//!
//! Policies are a closed enum. Each one is a pure function of the baseline and
//! incoming values returning a [`PolicyDecision`] with an audit reason. Every
//! conflict leaves [`ConflictResolver::resolve`] either `AutoResolved` or
//! `ManualRequired`.

use crate::models::{ConflictRecord, ParameterValue, Resolution};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Resolution policy for conflicts below the similarity threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Incoming value wins
    PreferNewer,
    /// Baseline value wins
    PreferExisting,
    /// More significant digits / more specific category wins; ties go to newer
    PreferHigherPrecision,
    /// Always left for manual review
    Manual,
}

impl ConflictPolicy {
    pub fn name(self) -> &'static str {
        match self {
            ConflictPolicy::PreferNewer => "prefer_newer",
            ConflictPolicy::PreferExisting => "prefer_existing",
            ConflictPolicy::PreferHigherPrecision => "prefer_higher_precision",
            ConflictPolicy::Manual => "manual",
        }
    }

    /// Decide one conflict
    pub fn decide(
        self,
        baseline: Option<&ParameterValue>,
        incoming: Option<&ParameterValue>,
    ) -> PolicyDecision {
        let (old, new) = match (baseline, incoming) {
            (Some(old), Some(new)) => (old, new),
            (None, _) => {
                return PolicyDecision::Manual {
                    reason: format!("{}: baseline value missing", self.name()),
                }
            }
            (_, None) => {
                return PolicyDecision::Manual {
                    reason: format!("{}: incoming value missing", self.name()),
                }
            }
        };

        match self {
            ConflictPolicy::PreferNewer => prefer_newer(old, new),
            ConflictPolicy::PreferExisting => prefer_existing(old, new),
            ConflictPolicy::PreferHigherPrecision => prefer_higher_precision(old, new),
            ConflictPolicy::Manual => PolicyDecision::Manual {
                reason: "manual: policy requires operator review".to_string(),
            },
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Output of a policy for one conflict
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyDecision {
    Resolved {
        value: ParameterValue,
        reason: String,
    },
    Manual {
        reason: String,
    },
}

fn prefer_newer(old: &ParameterValue, new: &ParameterValue) -> PolicyDecision {
    PolicyDecision::Resolved {
        value: new.clone(),
        reason: format!(
            "prefer_newer: incoming value {} replaces baseline {}",
            new, old
        ),
    }
}

fn prefer_existing(old: &ParameterValue, new: &ParameterValue) -> PolicyDecision {
    PolicyDecision::Resolved {
        value: old.clone(),
        reason: format!(
            "prefer_existing: baseline value {} kept over incoming {}",
            old, new
        ),
    }
}

fn prefer_higher_precision(old: &ParameterValue, new: &ParameterValue) -> PolicyDecision {
    if std::mem::discriminant(old) != std::mem::discriminant(new) {
        return PolicyDecision::Resolved {
            value: new.clone(),
            reason: format!(
                "prefer_higher_precision: {} and {} values are not comparable, fell back to prefer_newer",
                old.kind_name(),
                new.kind_name()
            ),
        };
    }

    let unit = new.precision_unit();
    let (old_precision, new_precision) = (old.precision(), new.precision());
    if new_precision > old_precision {
        PolicyDecision::Resolved {
            value: new.clone(),
            reason: format!(
                "prefer_higher_precision: incoming value {} ({} {}) is more precise than baseline {} ({})",
                new, new_precision, unit, old, old_precision
            ),
        }
    } else if old_precision > new_precision {
        PolicyDecision::Resolved {
            value: old.clone(),
            reason: format!(
                "prefer_higher_precision: baseline value {} ({} {}) is more precise than incoming {} ({})",
                old, old_precision, unit, new, new_precision
            ),
        }
    } else {
        PolicyDecision::Resolved {
            value: new.clone(),
            reason: format!(
                "prefer_higher_precision: tie at {} {}, fell back to prefer_newer ({} replaces {})",
                new_precision, unit, new, old
            ),
        }
    }
}

pub struct ConflictResolver {
    policy: ConflictPolicy,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self {
            policy: ConflictPolicy::PreferHigherPrecision,
        }
    }
}

impl ConflictResolver {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Resolve every pending conflict in place and hand the list back
    pub fn resolve(&self, mut conflicts: Vec<ConflictRecord>) -> Vec<ConflictRecord> {
        self.resolve_in_place(&mut conflicts);
        conflicts
    }

    pub fn resolve_in_place(&self, conflicts: &mut [ConflictRecord]) {
        for conflict in conflicts.iter_mut() {
            if conflict.resolution != Resolution::Pending {
                continue;
            }
            let decision = self.policy.decide(
                conflict.outcome.old_value.as_ref(),
                conflict.outcome.new_value.as_ref(),
            );
            match decision {
                PolicyDecision::Resolved { value, reason } => {
                    conflict.resolution = Resolution::AutoResolved;
                    conflict.resolved_value = Some(value);
                    conflict.reason = Some(reason);
                }
                PolicyDecision::Manual { reason } => {
                    conflict.resolution = Resolution::ManualRequired;
                    conflict.resolved_value = None;
                    conflict.reason = Some(reason);
                }
            }
            debug!(
                key = %conflict.outcome.key,
                resolution = ?conflict.resolution,
                reason = conflict.reason.as_deref().unwrap_or_default(),
                "Conflict resolved"
            );
        }

        let (auto, manual, pending) = Self::count_by_resolution(conflicts);
        info!(
            "Conflict resolution: policy={}, auto_resolved={}, manual_required={}, pending={}",
            self.policy, auto, manual, pending
        );
    }

    /// Count conflicts by resolution: (auto_resolved, manual_required, pending)
    pub fn count_by_resolution(conflicts: &[ConflictRecord]) -> (usize, usize, usize) {
        let mut auto = 0;
        let mut manual = 0;
        let mut pending = 0;
        for conflict in conflicts {
            match conflict.resolution {
                Resolution::AutoResolved => auto += 1,
                Resolution::ManualRequired => manual += 1,
                Resolution::Pending => pending += 1,
            }
        }
        (auto, manual, pending)
    }
}
