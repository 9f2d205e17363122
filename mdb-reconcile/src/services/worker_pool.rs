//! Bounded chunk worker pool
//!
//! A fixed number of scoped worker threads drain a bounded queue of chunk
//! indices. Each finished chunk is sent back as `(chunk_index, results)`;
//! joining every worker is the barrier before results are reassembled in chunk
//! order. Chunk count and thread count are independent.
//!
//! Cancellation is checked by the dispatcher before each chunk is queued and
//! by a worker before it starts a chunk. A chunk that already started always
//! completes.

use crate::error::{ReconcileError, ReconcileResult};
use crossbeam_channel::{bounded, unbounded};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Queue slots per worker
const QUEUE_DEPTH_PER_WORKER: usize = 2;

/// Run `work` over `items` in chunks of `chunk_size` on `worker_count` threads
///
/// Returns one result vector per chunk, in chunk order, regardless of which
/// worker finished first.
///
/// # Errors
/// - `Cancelled` if the token fired before every chunk completed
/// - `Concurrency` if a worker panicked or a chunk result went missing
pub fn run_chunked<T, R, F>(
    items: &[T],
    chunk_size: usize,
    worker_count: usize,
    cancel: &CancellationToken,
    work: F,
) -> ReconcileResult<Vec<Vec<R>>>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &[T]) -> Vec<R> + Sync,
{
    if chunk_size == 0 || worker_count == 0 {
        return Err(ReconcileError::Config(
            "chunk_size and worker_count must be at least 1".to_string(),
        ));
    }
    let chunk_count = items.len().div_ceil(chunk_size);
    if chunk_count == 0 {
        return Ok(Vec::new());
    }
    let workers = worker_count.min(chunk_count);

    let (work_tx, work_rx) = bounded::<usize>(workers * QUEUE_DEPTH_PER_WORKER);
    let (result_tx, result_rx) = unbounded::<(usize, Vec<R>)>();
    let work = &work;

    let panicked = std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            handles.push(scope.spawn(move || {
                while let Ok(chunk_index) = work_rx.recv() {
                    if cancel.is_cancelled() {
                        // Drain without working so the dispatcher never blocks
                        continue;
                    }
                    let start = chunk_index * chunk_size;
                    let end = (start + chunk_size).min(items.len());
                    let results = work(chunk_index, &items[start..end]);
                    debug!(worker_id, chunk_index, pairs = end - start, "Chunk compared");
                    if result_tx.send((chunk_index, results)).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(work_rx);
        drop(result_tx);

        for chunk_index in 0..chunk_count {
            if cancel.is_cancelled() {
                debug!(chunk_index, "Cancellation observed, dispatch stopped");
                break;
            }
            // Fails only when every worker is gone
            if work_tx.send(chunk_index).is_err() {
                break;
            }
        }
        drop(work_tx);

        let mut panicked = 0usize;
        for (worker_id, handle) in handles.into_iter().enumerate() {
            if handle.join().is_err() {
                error!(worker_id, "Comparison worker panicked");
                panicked += 1;
            }
        }
        panicked
    });

    if panicked > 0 {
        return Err(ReconcileError::Concurrency(format!(
            "{} of {} comparison workers panicked",
            panicked, workers
        )));
    }

    let mut slots: Vec<Option<Vec<R>>> = (0..chunk_count).map(|_| None).collect();
    for (chunk_index, results) in result_rx.iter() {
        match slots.get_mut(chunk_index) {
            Some(slot) if slot.is_none() => *slot = Some(results),
            _ => {
                return Err(ReconcileError::Concurrency(format!(
                    "chunk {} reported twice or out of range",
                    chunk_index
                )))
            }
        }
    }

    let completed = slots.iter().filter(|s| s.is_some()).count();
    if completed < chunk_count {
        if cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled);
        }
        return Err(ReconcileError::Concurrency(format!(
            "{} of {} chunks never completed",
            chunk_count - completed,
            chunk_count
        )));
    }

    Ok(slots.into_iter().flatten().collect())
}
