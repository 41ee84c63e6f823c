//! Concurrency-bounded batch runner.
//!
//! Runs a handler over an ordered list of tasks with a fixed number of
//! cooperative workers. Each worker pulls the next unclaimed index from a shared
//! counter, so every task runs exactly once per batch. Handler errors and panics
//! are counted as failures and never abort the batch.

use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::FutureExt;
use futures_util::future::join_all;
use tracing::{debug, warn};

/// Outcome counts of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Run `handler` over `tasks` with at most `limit` in flight.
pub async fn run_batch<T, F, Fut, E>(tasks: Vec<T>, limit: usize, handler: F) -> BatchReport
where
    T: Clone,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let total = tasks.len();
    if total == 0 {
        return BatchReport::default();
    }

    let worker_count = limit.max(1).min(total);
    let next_index = AtomicUsize::new(0);

    let workers = (0..worker_count).map(|worker_id| {
        let tasks = &tasks;
        let next_index = &next_index;
        let handler = &handler;
        async move {
            let mut succeeded = 0usize;
            let mut failed = 0usize;
            loop {
                let index = next_index.fetch_add(1, Ordering::SeqCst);
                let Some(task) = tasks.get(index) else {
                    break;
                };

                match AssertUnwindSafe(handler(task.clone())).catch_unwind().await {
                    Ok(Ok(())) => succeeded += 1,
                    Ok(Err(e)) => {
                        warn!(worker_id, index, error = %e, "batch task failed");
                        failed += 1;
                    }
                    Err(_) => {
                        warn!(worker_id, index, "batch task panicked");
                        failed += 1;
                    }
                }
            }
            (succeeded, failed)
        }
    });

    let (succeeded, failed) = join_all(workers)
        .await
        .into_iter()
        .fold((0, 0), |(s, f), (ws, wf)| (s + ws, f + wf));

    debug!(total, succeeded, failed, worker_count, "batch finished");

    BatchReport {
        total,
        succeeded,
        failed,
    }
}
