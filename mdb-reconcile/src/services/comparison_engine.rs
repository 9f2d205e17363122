//! Chunked parallel comparison of an incoming set against a frozen baseline
//!
//! # Algorithm
//! 1. Align every incoming record with the baseline record of the same
//!    `(equipment_id, parameter_name)`; baseline-only keys are ignored
//! 2. Split the aligned pairs into contiguous chunks of `chunk_size`
//! 3. Drain the chunks on the bounded worker pool
//! 4. Reassemble chunk results in input order
//!
//! Outcomes are a pure function of the pair fingerprint and are cached in a
//! lock-free map. Two workers missing on the same fingerprint both compute the
//! same outcome, so the race costs work but never changes a result.

use crate::config::ReconcileConfig;
use crate::db::MotherDbSnapshot;
use crate::error::ReconcileResult;
use crate::models::{
    ComparedPair, ComparisonOutcome, ComparisonStats, OutcomeKind, ParameterRecord, ParameterSet,
    ParameterValue, RecordKey,
};
use crate::services::similarity::SimilarityScorer;
use crate::services::worker_pool::run_chunked;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// SHA-256 over the identity and both values of a record pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(
        key: &RecordKey,
        old_value: Option<&ParameterValue>,
        new_value: Option<&ParameterValue>,
    ) -> Self {
        let mut hasher = Sha256::new();
        write_field(&mut hasher, key.equipment_id.as_bytes());
        write_field(&mut hasher, key.parameter_name.as_bytes());
        write_value(&mut hasher, old_value);
        write_value(&mut hasher, new_value);
        Fingerprint(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

fn write_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn write_value(hasher: &mut Sha256, value: Option<&ParameterValue>) {
    match value {
        None => hasher.update([0u8]),
        Some(ParameterValue::Number(n)) => {
            hasher.update([1u8]);
            hasher.update(n.value.to_bits().to_le_bytes());
            hasher.update(n.significant_digits.to_le_bytes());
        }
        Some(ParameterValue::Text(t)) => {
            hasher.update([2u8]);
            write_field(hasher, t.as_bytes());
        }
        Some(ParameterValue::Category(c)) => {
            hasher.update([3u8]);
            write_field(hasher, c.as_bytes());
        }
    }
}

/// Bounded fingerprint → outcome cache shared by all workers
///
/// Once `capacity` entries are stored, further outcomes are computed but not
/// inserted.
#[derive(Debug)]
pub struct OutcomeCache {
    entries: DashMap<Fingerprint, ComparisonOutcome>,
    capacity: usize,
    len: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    full_logged: AtomicBool,
}

impl OutcomeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            len: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            full_logged: AtomicBool::new(false),
        }
    }

    /// Cached outcome for `fingerprint`, computing it on a miss
    pub fn get_or_compute<F>(&self, fingerprint: Fingerprint, compute: F) -> ComparisonOutcome
    where
        F: FnOnce() -> ComparisonOutcome,
    {
        if let Some(hit) = self.entries.get(&fingerprint) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return hit.value().clone();
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let outcome = compute();
        // Reserve a slot first so concurrent inserts never overshoot capacity
        let reserved = self
            .len
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok();
        if reserved {
            if self.entries.insert(fingerprint, outcome.clone()).is_some() {
                self.len.fetch_sub(1, Ordering::Relaxed);
            }
        } else if !self.full_logged.swap(true, Ordering::Relaxed) {
            warn!(capacity = self.capacity, "Outcome cache full, new outcomes not cached");
        }
        outcome
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<ComparisonOutcome> {
        self.entries.get(fingerprint).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// One incoming record with its baseline counterpart
struct AlignedPair<'a> {
    position: usize,
    record: &'a ParameterRecord,
    baseline: Option<&'a ParameterRecord>,
}

#[derive(Debug, Clone)]
pub struct ChunkedComparisonEngine {
    scorer: SimilarityScorer,
    cache: Arc<OutcomeCache>,
    #[cfg(test)]
    crash_on_chunk: Option<usize>,
}

impl ChunkedComparisonEngine {
    pub fn new(scorer: SimilarityScorer, cache_capacity: usize) -> Self {
        Self {
            scorer,
            cache: Arc::new(OutcomeCache::new(cache_capacity)),
            #[cfg(test)]
            crash_on_chunk: None,
        }
    }

    /// Make the worker that picks up chunk `chunk_index` panic
    #[cfg(test)]
    pub(crate) fn with_crash_on_chunk(mut self, chunk_index: usize) -> Self {
        self.crash_on_chunk = Some(chunk_index);
        self
    }

    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self::new(SimilarityScorer::from_config(config), config.cache_capacity)
    }

    pub fn cache(&self) -> &OutcomeCache {
        &self.cache
    }

    /// Compare `incoming` against `baseline`, output in incoming order
    ///
    /// Blocks until every chunk is done (or cancellation is observed). Call it
    /// from a blocking context.
    pub fn compare(
        &self,
        incoming: &ParameterSet,
        baseline: &MotherDbSnapshot,
        chunk_size: usize,
        worker_count: usize,
        cancel: &CancellationToken,
    ) -> ReconcileResult<(Vec<ComparedPair>, ComparisonStats)> {
        let start = Instant::now();
        let hits_before = self.cache.hits();
        let misses_before = self.cache.misses();

        let aligned: Vec<AlignedPair<'_>> = incoming
            .iter()
            .enumerate()
            .map(|(position, record)| AlignedPair {
                position,
                record,
                baseline: baseline.get(&record.key()),
            })
            .collect();

        let chunks = run_chunked(&aligned, chunk_size, worker_count, cancel, |_chunk_index, chunk| {
            #[cfg(test)]
            if self.crash_on_chunk == Some(_chunk_index) {
                panic!("worker crashed on chunk {}", _chunk_index);
            }
            chunk
                .iter()
                .map(|pair| ComparedPair {
                    position: pair.position,
                    record: pair.record.clone(),
                    baseline: pair.baseline.cloned(),
                    outcome: self.compare_pair(pair.record, pair.baseline),
                })
                .collect()
        })?;

        let chunk_count = chunks.len();
        let pairs: Vec<ComparedPair> = chunks.into_iter().flatten().collect();

        let mut stats = ComparisonStats::tally(&pairs);
        stats.chunks = chunk_count;
        stats.cache_hits = self.cache.hits() - hits_before;
        stats.cache_misses = self.cache.misses() - misses_before;
        stats.elapsed_ms = start.elapsed().as_millis() as u64;

        if stats.incomplete > 0 {
            warn!(
                equipment_id = %incoming.equipment_id,
                incomplete = stats.incomplete,
                "Incoming records without a value flagged incomplete"
            );
        }
        debug!(
            cache_hits = stats.cache_hits,
            cache_misses = stats.cache_misses,
            cache_len = self.cache.len(),
            "Outcome cache statistics"
        );
        info!(
            equipment_id = %incoming.equipment_id,
            total = stats.total,
            new = stats.new,
            matched = stats.matched,
            conflicting = stats.conflicting,
            chunks = stats.chunks,
            worker_count,
            elapsed_ms = stats.elapsed_ms,
            "Comparison complete"
        );

        Ok((pairs, stats))
    }

    /// Outcome for one pair, through the cache
    pub fn compare_pair(
        &self,
        record: &ParameterRecord,
        baseline: Option<&ParameterRecord>,
    ) -> ComparisonOutcome {
        let key = record.key();
        let old_value = baseline.and_then(|b| b.value.as_ref());
        let new_value = record.value.as_ref();
        let fingerprint = Fingerprint::of(&key, old_value, new_value);
        self.cache.get_or_compute(fingerprint, || {
            compute_outcome(&self.scorer, key, old_value, new_value)
        })
    }
}

/// Uncached outcome computation
pub fn compute_outcome(
    scorer: &SimilarityScorer,
    key: RecordKey,
    old_value: Option<&ParameterValue>,
    new_value: Option<&ParameterValue>,
) -> ComparisonOutcome {
    let (kind, similarity, incomplete) = match (old_value, new_value) {
        // Missing incoming value: flagged, never aborts the chunk
        (_, None) => (OutcomeKind::New, 0.0, true),
        (None, Some(_)) => (OutcomeKind::New, 1.0, false),
        (Some(old), Some(new)) => {
            let similarity = scorer.score(old, new);
            if similarity.matched {
                (OutcomeKind::Match, 1.0, false)
            } else {
                (OutcomeKind::Conflict, similarity.score, false)
            }
        }
    };

    ComparisonOutcome {
        key,
        kind,
        similarity,
        old_value: old_value.cloned(),
        new_value: new_value.cloned(),
        incomplete,
    }
}
