//! Worker pool and dispatcher.
//!
//! The [`Dispatcher`] owns a bounded job queue and a fixed set of workers.
//! A single coordinating task pulls jobs off the queue and hands each one to
//! whichever worker registered as available first, so completion order does
//! not follow submission order. The bounded queue is the only flow control:
//! [`Dispatcher::submit`] waits while it is full.

use std::sync::Arc;

use opentelemetry::KeyValue;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cancel::CancellationController;
use super::job::Task;
use super::worker::{JobSlot, Worker};
use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::telemetry::metrics;

/// Handle to a running worker pool.
pub struct Dispatcher {
    queue: mpsc::Sender<Arc<dyn Task>>,
    cancel: CancellationToken,
    workers: usize,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn the workers and the dispatch loop.
    ///
    /// The pool runs under a private scope derived from `controller`: it
    /// stops when the controller fires, or on its own via [`abort`].
    ///
    /// [`abort`]: Dispatcher::abort
    pub fn start(config: &QueueConfig, controller: &CancellationController) -> Self {
        let workers = config.workers.max(1);
        let (queue_tx, queue_rx) = mpsc::channel(config.job_buffer.max(1));
        let cancel = controller.child();

        let dispatch = DispatchLoop {
            queue: queue_rx,
            cancel: cancel.clone(),
            workers,
        };
        let handle = tokio::spawn(dispatch.run());

        Self {
            queue: queue_tx,
            cancel,
            workers,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Number of workers in the pool.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Enqueue a job, waiting while the queue is full.
    ///
    /// Fails with [`Error::Cancelled`] if the pool stops first; the job is
    /// aborted in that case, so its completion callback still fires.
    pub async fn submit(&self, job: Arc<dyn Task>) -> Result<()> {
        if self.cancel.is_cancelled() {
            job.abort();
            return Err(Error::Cancelled);
        }

        let id = job.id();
        let permit = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            permit = self.queue.reserve() => permit.ok(),
        };

        match permit {
            Some(permit) => {
                permit.send(job);
                metrics::jobs_submitted().add(1, &[KeyValue::new("result", "queued")]);
                debug!(job_id = %id, "job queued");
                Ok(())
            }
            None => {
                job.abort();
                metrics::jobs_submitted().add(1, &[KeyValue::new("result", "cancelled")]);
                Err(Error::Cancelled)
            }
        }
    }

    /// Enqueue a job without waiting.
    pub fn try_submit(&self, job: Arc<dyn Task>) -> Result<()> {
        if self.cancel.is_cancelled() {
            job.abort();
            return Err(Error::Cancelled);
        }

        match self.queue.try_send(job) {
            Ok(()) => {
                metrics::jobs_submitted().add(1, &[KeyValue::new("result", "queued")]);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                job.abort();
                metrics::jobs_submitted().add(1, &[KeyValue::new("result", "full")]);
                Err(Error::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                job.abort();
                Err(Error::Cancelled)
            }
        }
    }

    /// Stop this pool only. The process-wide scope is left alone.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the dispatch loop and every worker to finish, without
    /// stopping them.
    pub async fn join(&self) -> Result<()> {
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| Error::Other(format!("dispatcher task failed: {e}"))),
            None => Ok(()),
        }
    }

    /// Stop the pool and wait until all workers are gone.
    pub async fn shutdown(self) -> Result<()> {
        self.abort();
        self.join().await
    }
}

struct DispatchLoop {
    queue: mpsc::Receiver<Arc<dyn Task>>,
    cancel: CancellationToken,
    workers: usize,
}

impl DispatchLoop {
    async fn run(mut self) {
        debug!(workers = self.workers, "starting queue subsystem");
        let (available_tx, mut available_rx) = mpsc::channel::<JobSlot>(self.workers);

        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            let worker = Worker::new(id, self.cancel.clone(), available_tx.clone());
            workers.spawn(worker.start());
        }
        drop(available_tx);

        debug!("starting queue job loop");
        loop {
            let job = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                job = self.queue.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            if let Err(e) = job.mark_pending() {
                warn!(job_id = %job.id(), "dropping job: {e}");
                continue;
            }

            let slot = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    job.abort();
                    break;
                }
                slot = available_rx.recv() => slot,
            };

            let Some(slot) = slot else {
                job.abort();
                break;
            };

            if let Err(mpsc::error::SendError(job)) = slot.send(job).await {
                debug!(job_id = %job.id(), "worker went away before taking the job");
                job.abort();
            }
        }

        info!("stopping dispatcher");
        self.cancel.cancel();

        // Nothing left in the queue will ever run.
        self.queue.close();
        let mut aborted = 0usize;
        while let Ok(job) = self.queue.try_recv() {
            if job.abort() {
                aborted += 1;
            }
        }
        if aborted > 0 {
            info!(aborted, "aborted queued jobs");
        }

        available_rx.close();
        debug!("waiting for workers to stop");
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!("worker task failed: {e}");
            }
        }
        debug!("workers stopped");
    }
}
