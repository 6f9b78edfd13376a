//! Bounded media conversion worker pool.
//!
//! A fixed number of workers drain a bounded job queue. Producers wait for
//! queue space up to `queue_wait`, then give up with a retryable error.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::common::error::{MediaError, MediaResult};
use crate::common::messages::MediaFormat;

use super::convert::Transcoder;
use super::plan::ConversionPlan;

/// Lifecycle of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Converting,
    Done,
    Failed,
}

/// One conversion task and its outcome.
#[derive(Debug, Clone)]
pub struct MediaJob {
    pub id: u64,
    pub input: PathBuf,
    pub source_format: MediaFormat,
    pub target_format: MediaFormat,
    pub status: JobStatus,
    /// Converted file, once done.
    pub result: Option<PathBuf>,
}

struct QueuedJob {
    job: MediaJob,
    plan: ConversionPlan,
    output: PathBuf,
    reply: oneshot::Sender<MediaResult<MediaJob>>,
}

/// Fixed-size pool of conversion workers fed by a bounded queue.
pub struct WorkerPool {
    tx: mpsc::Sender<QueuedJob>,
    queue_wait: Duration,
    next_id: AtomicU64,
    stop: CancellationToken,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `workers` workers sharing a queue of `queue_capacity` jobs.
    pub fn new(
        transcoder: Arc<dyn Transcoder>,
        workers: usize,
        queue_capacity: usize,
        queue_wait: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let stop = CancellationToken::new();

        let workers = (0..workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let transcoder = transcoder.clone();
                let stop = stop.clone();
                tokio::spawn(async move {
                    run_worker(worker, rx, transcoder, stop).await;
                })
            })
            .collect();

        Self {
            tx,
            queue_wait,
            next_id: AtomicU64::new(1),
            stop,
            workers: std::sync::Mutex::new(workers),
        }
    }

    /// Queue a conversion and wait for its result.
    ///
    /// Fails with `QueueSaturated` if no queue slot frees up within the
    /// configured wait.
    pub async fn submit(
        &self,
        input: PathBuf,
        output: PathBuf,
        plan: ConversionPlan,
    ) -> MediaResult<MediaJob> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let job = MediaJob {
            id,
            input,
            source_format: plan.source.clone(),
            target_format: plan.target.clone(),
            status: JobStatus::Queued,
            result: None,
        };
        let (reply, rx) = oneshot::channel();

        let queued = QueuedJob {
            job,
            plan,
            output,
            reply,
        };

        match tokio::time::timeout(self.queue_wait, self.tx.send(queued)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(MediaError::PoolClosed),
            Err(_) => {
                warn!(job = id, waited_ms = self.queue_wait.as_millis() as u64, "Media queue saturated");
                return Err(MediaError::QueueSaturated {
                    waited: self.queue_wait,
                });
            }
        }

        rx.await.map_err(|_| MediaError::PoolClosed)?
    }

    /// Stop the workers once their current conversion finishes.
    ///
    /// Jobs still queued fail with `PoolClosed`.
    pub async fn shutdown(&self) {
        self.stop.cancel();
        let workers = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for worker in workers {
            let _ = worker.await;
        }
    }
}

async fn run_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
    transcoder: Arc<dyn Transcoder>,
    stop: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = stop.cancelled() => None,
            next = async { rx.lock().await.recv().await } => next,
        };
        let Some(QueuedJob {
            mut job,
            plan,
            output,
            reply,
        }) = next
        else {
            break;
        };

        job.status = JobStatus::Converting;
        debug!(
            worker,
            job = job.id,
            input = %job.input.display(),
            from = job.source_format.extension(),
            to = job.target_format.extension(),
            "Converting"
        );

        let outcome = match transcoder.convert(&job.input, &output, &plan).await {
            Ok(()) => {
                job.status = JobStatus::Done;
                job.result = Some(output);
                debug!(worker, job = job.id, status = ?job.status, "Conversion finished");
                Ok(job)
            }
            Err(e) => {
                job.status = JobStatus::Failed;
                warn!(worker, job = job.id, status = ?job.status, error = %e, "Conversion failed");
                Err(e)
            }
        };

        let _ = reply.send(outcome);
    }
    debug!(worker, "Media worker stopped");
}
