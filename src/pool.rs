// src/pool.rs

//! Bounded async worker pool
//!
//! Jobs are fed through a bounded queue to `min(jobs, max_workers)` worker
//! tasks. Every job produces exactly one result on the returned channel,
//! which closes once all workers have drained the queue. Results arrive in
//! completion order, not submission order.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Run `work` over `jobs` on at most `max_workers` concurrent tasks
///
/// A `max_workers` of zero is treated as one. Must be called from within a
/// tokio runtime.
pub fn spawn_workers<J, R, F, Fut>(jobs: Vec<J>, max_workers: usize, work: F) -> mpsc::Receiver<R>
where
    J: Send + 'static,
    R: Send + 'static,
    F: Fn(J) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let workers = jobs.len().min(max_workers.max(1));
    let (result_tx, result_rx) = mpsc::channel(workers.max(1));
    if workers == 0 {
        return result_rx;
    }

    let (job_tx, job_rx) = flume::bounded::<J>(workers);
    tokio::spawn(async move {
        for job in jobs {
            if job_tx.send_async(job).await.is_err() {
                break;
            }
        }
    });

    let work = Arc::new(work);
    for id in 0..workers {
        let job_rx = job_rx.clone();
        let result_tx = result_tx.clone();
        let work = Arc::clone(&work);
        tokio::spawn(async move {
            let mut done = 0usize;
            while let Ok(job) = job_rx.recv_async().await {
                let result = work(job).await;
                done += 1;
                if result_tx.send(result).await.is_err() {
                    break;
                }
            }
            trace!("Worker {} finished after {} jobs", id, done);
        });
    }

    result_rx
}

/// Drain a result channel into a vector
pub async fn collect<R>(mut results: mpsc::Receiver<R>) -> Vec<R> {
    let mut out = Vec::new();
    while let Some(result) = results.recv().await {
        out.push(result);
    }
    out
}
