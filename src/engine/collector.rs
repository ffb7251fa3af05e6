//! Fan-in: gather the jobs of one logical operation and fold their payloads
//! into a single aggregate.
//!
//! Jobs push themselves into the collector after their result slot has been
//! written. The collector keeps accepting jobs until every
//! [`CollectorHandle`] is dropped (the owner "closes" it) or the cancellation
//! scope fires, then drains all result slots concurrently.

use std::sync::Arc;

use futures::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use opentelemetry::KeyValue;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::cancel::CancellationController;
use super::job::Job;
use crate::model::{JobId, JobResult};
use crate::telemetry::metrics;

/// Sending side of a collector. Jobs hold a clone until they report in.
pub struct CollectorHandle<T> {
    tx: mpsc::Sender<Arc<Job<T>>>,
}

impl<T> Clone for CollectorHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> CollectorHandle<T> {
    /// Hand a finished job to the collector. Returns false if the collector
    /// has stopped listening.
    pub(crate) async fn push(&self, job: Arc<Job<T>>) -> bool {
        self.tx.send(job).await.is_ok()
    }
}

/// What a collector gathered.
#[derive(Debug)]
pub struct Collected<T> {
    /// Payloads of successful jobs, in no particular order.
    pub payloads: Vec<T>,
    /// Jobs whose result was an error (logged and skipped).
    pub failed: usize,
    /// The cancellation scope fired before the collector was closed.
    pub cancelled: bool,
}

impl<T> Default for Collected<T> {
    fn default() -> Self {
        Self {
            payloads: Vec::new(),
            failed: 0,
            cancelled: false,
        }
    }
}

/// Per-operation aggregator. Private to the task that runs [`collect`].
///
/// [`collect`]: Collector::collect
pub struct Collector<T> {
    rx: mpsc::Receiver<Arc<Job<T>>>,
    cancel: CancellationToken,
    label: String,
}

impl<T: Send + 'static> Collector<T> {
    /// Allocate a collector whose inbound buffer holds `capacity` jobs.
    pub fn new(capacity: usize, controller: &CancellationController) -> (CollectorHandle<T>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            CollectorHandle { tx },
            Self {
                rx,
                cancel: controller.token(),
                label: "collector".to_string(),
            },
        )
    }

    /// Name used in logs.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Run until closed or cancelled, then drain every gathered job.
    pub async fn collect(mut self) -> Collected<T> {
        let mut jobs = Vec::new();
        let mut out = Collected::default();

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    out.cancelled = true;
                    break;
                }
                job = self.rx.recv() => match job {
                    Some(job) => jobs.push(job),
                    None => break,
                },
            }
        }

        // Stop intake; anything already buffered is still ours.
        self.rx.close();
        while let Ok(job) = self.rx.try_recv() {
            jobs.push(job);
        }
        debug!(collector = %self.label, jobs = jobs.len(), "collector intake closed");

        let mut pending: FuturesUnordered<_> = jobs
            .into_iter()
            .map(|job| {
                let id = job.id();
                job.wait_result().map(move |result| (id, result))
            })
            .collect();

        if !out.cancelled {
            loop {
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => {
                        out.cancelled = true;
                        break;
                    }
                    next = pending.next() => match next {
                        Some((id, result)) => absorb(&self.label, &mut out, id, result),
                        None => break,
                    },
                }
            }
        }

        if out.cancelled {
            // Best effort: only results that are already there.
            while let Some(Some((id, result))) = pending.next().now_or_never() {
                absorb(&self.label, &mut out, id, result);
            }
        }

        debug!(
            collector = %self.label,
            payloads = out.payloads.len(),
            failed = out.failed,
            cancelled = out.cancelled,
            "collector stopped"
        );
        out
    }
}

/// Fold one result into the aggregate. Errors are logged and skipped, never
/// appended.
fn absorb<T>(label: &str, out: &mut Collected<T>, id: JobId, result: Option<JobResult<T>>) {
    match result {
        Some(Ok(payload)) => out.payloads.push(payload),
        Some(Err(e)) => {
            warn!(collector = label, job_id = %id, error = %e, "job failed, skipping its result");
            out.failed += 1;
            metrics::results_skipped().add(1, &[KeyValue::new("collector", label.to_string())]);
        }
        None => debug!(collector = label, job_id = %id, "job produced no result"),
    }
}
