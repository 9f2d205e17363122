//! Comparison output must not depend on how the work is split
//!
//! Worker count, chunk size and cache warmth change scheduling only. Every
//! run below must yield the same outcomes in incoming order.

mod helpers;

use helpers::{category, manager_with, number, set_of, text, EQUIPMENT};
use mdb_reconcile::config::ReconcileConfig;
use mdb_reconcile::models::{ComparisonOutcome, OutcomeKind, ParameterRecord, ParameterSet};
use mdb_reconcile::services::{ChunkedComparisonEngine, SimilarityScorer};
use mdb_reconcile::{InMemoryStore, MotherDbSnapshot};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const RECORDS: u64 = 2_000;

/// Mixed-kind incoming set with repeated keys, plus a baseline covering some of them
fn workload() -> (ParameterSet, Vec<ParameterRecord>) {
    let mut incoming = Vec::new();
    let mut baseline = Vec::new();

    for i in 0..RECORDS {
        let name = format!("P{:04}", i % 1_500);
        let file = format!("run{}.json", i % 7);
        let record = match i % 5 {
            0 => text(&name, &format!("Pump model {}", i % 11), &file, i),
            1 => category(&name, "pump/centrifugal/single-stage", &file, i),
            _ => number(&name, 10.0 + (i % 13) as f64 * 0.1, &file, i),
        };
        incoming.push(record);

        if i % 3 == 0 && i < 1_500 {
            let old = match i % 5 {
                0 => text(&name, "Pump model 3", "base.json", 0),
                1 => category(&name, "pump/centrifugal", "base.json", 0),
                _ => number(&name, 10.5, "base.json", 0),
            };
            baseline.push(old);
        }
    }

    (set_of(incoming), baseline)
}

fn run(
    engine: &ChunkedComparisonEngine,
    incoming: &ParameterSet,
    snapshot: &MotherDbSnapshot,
    chunk_size: usize,
    worker_count: usize,
) -> Vec<(usize, ComparisonOutcome)> {
    let (pairs, stats) = engine
        .compare(incoming, snapshot, chunk_size, worker_count, &CancellationToken::new())
        .unwrap();
    assert_eq!(stats.total, incoming.len());
    pairs.into_iter().map(|p| (p.position, p.outcome)).collect()
}

#[test]
fn test_outcomes_identical_across_worker_counts_and_chunk_sizes() {
    let (incoming, baseline) = workload();
    let snapshot = MotherDbSnapshot::new(EQUIPMENT, 1, baseline);

    let reference = run(
        &ChunkedComparisonEngine::new(SimilarityScorer::default(), 100_000),
        &incoming,
        &snapshot,
        500,
        1,
    );
    assert_eq!(reference.len(), RECORDS as usize);
    for (expected, (position, _)) in reference.iter().enumerate() {
        assert_eq!(*position, expected);
    }

    for worker_count in [1, 2, 4, 8] {
        for chunk_size in [1, 7, 64, 500, 5_000] {
            let engine = ChunkedComparisonEngine::new(SimilarityScorer::default(), 100_000);
            let outcomes = run(&engine, &incoming, &snapshot, chunk_size, worker_count);
            assert_eq!(
                outcomes, reference,
                "workers={} chunk_size={}",
                worker_count, chunk_size
            );
        }
    }
}

#[test]
fn test_warm_cache_gives_same_outcomes() {
    let (incoming, baseline) = workload();
    let snapshot = MotherDbSnapshot::new(EQUIPMENT, 1, baseline);
    let engine = ChunkedComparisonEngine::new(SimilarityScorer::default(), 100_000);

    let cold = run(&engine, &incoming, &snapshot, 64, 4);
    let misses_after_cold = engine.cache().misses();
    let warm = run(&engine, &incoming, &snapshot, 64, 4);

    assert_eq!(cold, warm);
    // Second pass is served from the cache entirely
    assert_eq!(engine.cache().misses(), misses_after_cold);
    assert!(engine.cache().hits() >= RECORDS);
}

#[test]
fn test_tiny_cache_still_deterministic() {
    let (incoming, baseline) = workload();
    let snapshot = MotherDbSnapshot::new(EQUIPMENT, 1, baseline);

    let unbounded = run(
        &ChunkedComparisonEngine::new(SimilarityScorer::default(), 100_000),
        &incoming,
        &snapshot,
        100,
        4,
    );
    let tiny = ChunkedComparisonEngine::new(SimilarityScorer::default(), 8);
    let bounded = run(&tiny, &incoming, &snapshot, 100, 4);

    assert_eq!(unbounded, bounded);
    assert!(tiny.cache().len() <= 8);
}

#[test]
fn test_workload_covers_every_outcome_kind() {
    let (incoming, baseline) = workload();
    let snapshot = MotherDbSnapshot::new(EQUIPMENT, 1, baseline);
    let engine = ChunkedComparisonEngine::new(SimilarityScorer::default(), 100_000);

    let outcomes = run(&engine, &incoming, &snapshot, 500, 4);
    let kinds: Vec<OutcomeKind> = outcomes.iter().map(|(_, o)| o.kind).collect();
    assert!(kinds.contains(&OutcomeKind::New));
    assert!(kinds.contains(&OutcomeKind::Match));
    assert!(kinds.contains(&OutcomeKind::Conflict));
}

#[tokio::test]
async fn test_analysis_report_independent_of_worker_count() {
    let (incoming, baseline) = workload();

    let mut reports = Vec::new();
    for (worker_count, chunk_size) in [(1, 500), (8, 3), (4, 64)] {
        let store = Arc::new(InMemoryStore::with_records(baseline.clone()));
        let config = ReconcileConfig {
            worker_count,
            chunk_size,
            ..Default::default()
        };
        let manager = manager_with(config, store);
        let mut session = manager.load(incoming.clone()).await.unwrap();
        let report = manager.analyze(&mut session).await.unwrap();
        reports.push(report);
    }

    for report in &reports[1..] {
        assert_eq!(report.candidates, reports[0].candidates);
        assert_eq!(report.conflicts, reports[0].conflicts);
        assert_eq!(report.rejected, reports[0].rejected);
        assert_eq!(report.qc_findings, reports[0].qc_findings);
        assert_eq!(report.commit_records(), reports[0].commit_records());
    }
}
