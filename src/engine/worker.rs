//! Worker lifecycle.
//!
//! A worker loops: register its private job channel on the shared
//! availability channel, wait for either a job or cancellation, run the job,
//! repeat. It never runs more than one job at a time.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::job::Task;

/// A worker's private job channel, as published on the availability channel.
pub(crate) type JobSlot = mpsc::Sender<Arc<dyn Task>>;

pub(crate) struct Worker {
    id: usize,
    cancel: CancellationToken,
    available: mpsc::Sender<JobSlot>,
    slot_tx: JobSlot,
    slot_rx: mpsc::Receiver<Arc<dyn Task>>,
}

impl Worker {
    pub(crate) fn new(id: usize, cancel: CancellationToken, available: mpsc::Sender<JobSlot>) -> Self {
        let (slot_tx, slot_rx) = mpsc::channel(1);
        Self {
            id,
            cancel,
            available,
            slot_tx,
            slot_rx,
        }
    }

    /// Run until cancellation is observed, either while idle or right after
    /// finishing the current job.
    pub(crate) async fn start(mut self) {
        debug!(worker = self.id, "worker started");

        loop {
            // Register as available.
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                sent = self.available.send(self.slot_tx.clone()) => {
                    if sent.is_err() {
                        debug!(worker = self.id, "availability channel closed");
                        break;
                    }
                }
            }

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                job = self.slot_rx.recv() => {
                    let Some(job) = job else { break };
                    debug!(worker = self.id, job_id = %job.id(), "worker picked up job");
                    job.run().await;

                    if self.cancel.is_cancelled() {
                        break;
                    }
                }
            }
        }

        // Anything handed over after we stopped listening never runs.
        self.slot_rx.close();
        while let Ok(job) = self.slot_rx.try_recv() {
            job.abort();
        }

        debug!(worker = self.id, "worker stopped");
    }
}
