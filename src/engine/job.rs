//! Jobs: a unit of work, its status, its single-use result slot, and the
//! completion contract.
//!
//! A [`Job`] is shared as `Arc<Job<T>>` between the submitter, the worker
//! that runs it, and the [`Collector`](super::Collector) it reports to. Every
//! single-use piece (the function, the result sender, the collector link, the
//! completion callback) sits behind a lock and is `take()`n exactly once.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, warn};

use super::collector::CollectorHandle;
use crate::error::{Error, Result};
use crate::model::{Args, JobError, JobId, JobResult, JobStatus};
use crate::telemetry::job::{record_state_transition, start_job_span};
use crate::telemetry::metrics;

type JobFn<T> = Box<dyn FnOnce(Args) -> BoxFuture<'static, anyhow::Result<T>> + Send>;
type DoneFn = Box<dyn FnOnce() + Send>;

/// Outcome of a non-blocking look at a job's result slot.
#[derive(Debug)]
pub enum ResultPoll<T> {
    /// The result was there and has been taken.
    Ready(JobResult<T>),
    /// Nothing written yet; ask again later.
    Pending,
    /// The cancellation scope has fired.
    Cancelled,
    /// No result will ever arrive: the job was aborted or the result was
    /// already taken.
    Abandoned,
}

/// Object-safe view of a job, so one dispatcher can carry any payload type.
pub trait Task: Send + Sync {
    fn id(&self) -> JobId;

    fn status(&self) -> JobStatus;

    /// Created → Pending. Called by the dispatcher when it dequeues the job.
    fn mark_pending(&self) -> Result<()>;

    /// Execute the job. Called by exactly one worker.
    fn run(self: Arc<Self>) -> BoxFuture<'static, ()>;

    /// Give up on a job that never started. Returns false if it already
    /// started or finished.
    fn abort(&self) -> bool;
}

/// A unit of submitted work producing a payload of type `T`.
pub struct Job<T> {
    id: JobId,
    kind: String,
    args: Args,
    func: Mutex<Option<JobFn<T>>>,
    status: AtomicU8,
    result_tx: Mutex<Option<oneshot::Sender<JobResult<T>>>>,
    result_rx: Mutex<Option<oneshot::Receiver<JobResult<T>>>>,
    collector: Mutex<Option<CollectorHandle<T>>>,
    done: Mutex<Option<DoneFn>>,
    created_at: DateTime<Utc>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
}

impl<T: Send + 'static> Job<T> {
    /// Wrap `func` and the arguments it will be called with.
    pub fn new<F, Fut>(func: F, args: Args) -> Self
    where
        F: FnOnce(Args) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let boxed: JobFn<T> = Box::new(move |args| func(args).boxed());
        Self {
            id: JobId::new(),
            kind: "job".to_string(),
            args,
            func: Mutex::new(Some(boxed)),
            status: AtomicU8::new(JobStatus::Created as u8),
            result_tx: Mutex::new(Some(tx)),
            result_rx: Mutex::new(Some(rx)),
            collector: Mutex::new(None),
            done: Mutex::new(None),
            created_at: Utc::now(),
            finished_at: Mutex::new(None),
        }
    }

    /// Short label used in spans and logs (e.g. "page").
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Callback fired exactly once when the job reaches a terminal status.
    pub fn on_done(mut self, done: impl FnOnce() + Send + 'static) -> Self {
        self.done = Mutex::new(Some(Box::new(done)));
        self
    }

    /// Report this job to `collector` once it has run.
    pub fn assign_collector(&self, collector: &CollectorHandle<T>) {
        *self.collector.lock() = Some(collector.clone());
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        JobStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        *self.finished_at.lock()
    }

    /// Non-blocking read of the result slot.
    pub fn try_result(&self, cancel: &CancellationToken) -> ResultPoll<T> {
        if cancel.is_cancelled() {
            return ResultPoll::Cancelled;
        }

        let mut slot = self.result_rx.lock();
        let Some(rx) = slot.as_mut() else {
            return ResultPoll::Abandoned;
        };

        match rx.try_recv() {
            Ok(result) => {
                *slot = None;
                ResultPoll::Ready(result)
            }
            Err(TryRecvError::Empty) => ResultPoll::Pending,
            Err(TryRecvError::Closed) => {
                *slot = None;
                ResultPoll::Abandoned
            }
        }
    }

    /// Wait for the result slot to be written.
    ///
    /// Resolves to `None` if the job was aborted or the result was already
    /// taken. The returned future doesn't borrow the job.
    pub fn wait_result(
        &self,
    ) -> impl Future<Output = Option<JobResult<T>>> + Send + 'static + use<T> {
        let rx = self.result_rx.lock().take();
        async move {
            match rx {
                Some(rx) => rx.await.ok(),
                None => None,
            }
        }
    }

    /// Validated forward transition to `to`.
    fn advance(&self, to: JobStatus) -> Result<JobStatus> {
        self.status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                JobStatus::from_u8(raw)
                    .can_transition_to(to)
                    .then_some(to as u8)
            })
            .map(JobStatus::from_u8)
            .map_err(|raw| Error::InvalidTransition {
                from: JobStatus::from_u8(raw),
                to,
            })
    }

    fn complete(&self) {
        let done = self.done.lock().take();
        if let Some(done) = done {
            done();
        }
    }

    async fn execute(self: Arc<Self>) {
        if let Err(e) = self.advance(JobStatus::Working) {
            warn!(job_id = %self.id, "refusing to run job: {e}");
            return;
        }

        let Some(func) = self.func.lock().take() else {
            warn!(job_id = %self.id, "job function already consumed");
            return;
        };

        let span = start_job_span(&self.kind, &self.id.0);
        record_state_transition(&span, "pending", "working");

        let started = Instant::now();
        let args = self.args.clone();
        let outcome = AssertUnwindSafe(async move { func(args).await })
            .catch_unwind()
            .instrument(span.clone())
            .await;

        let result = match outcome {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(e)) => Err(JobError::Failed(e)),
            Err(panic) => Err(JobError::Panicked(panic_message(panic))),
        };

        let status = if result.is_ok() {
            JobStatus::Success
        } else {
            JobStatus::Failure
        };
        if let Err(e) = self.advance(status) {
            warn!(job_id = %self.id, "{e}");
        }
        *self.finished_at.lock() = Some(Utc::now());
        record_state_transition(&span, "working", &status.to_string());

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics::job_duration_ms().record(duration_ms, &[KeyValue::new("kind", self.kind.clone())]);
        metrics::jobs_finished().add(1, &[KeyValue::new("status", status.to_string())]);
        debug!(job_id = %self.id, %status, duration_ms, "job finished");

        // The result slot must be written before the collector hears about
        // the job: the collector reads the slot right after receiving it.
        let tx = self.result_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(result);
        }

        let collector = self.collector.lock().take();
        if let Some(collector) = collector {
            debug!(job_id = %self.id, "pushing job into assigned collector");
            if !collector.push(Arc::clone(&self)).await {
                debug!(job_id = %self.id, "collector already gone");
            }
        }

        self.complete();
    }
}

impl<T: Send + 'static> Task for Job<T> {
    fn id(&self) -> JobId {
        self.id
    }

    fn status(&self) -> JobStatus {
        Job::status(self)
    }

    fn mark_pending(&self) -> Result<()> {
        self.advance(JobStatus::Pending).map(|_| ())
    }

    fn run(self: Arc<Self>) -> BoxFuture<'static, ()> {
        self.execute().boxed()
    }

    fn abort(&self) -> bool {
        let aborted = self
            .status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                matches!(
                    JobStatus::from_u8(raw),
                    JobStatus::Created | JobStatus::Pending
                )
                .then_some(JobStatus::Aborted as u8)
            })
            .is_ok();

        if aborted {
            *self.finished_at.lock() = Some(Utc::now());
            // Dropping the sender tells readers no result is coming.
            self.result_tx.lock().take();
            self.collector.lock().take();
            metrics::jobs_finished().add(1, &[KeyValue::new("status", "aborted")]);
            debug!(job_id = %self.id, "job aborted");
            self.complete();
        }
        aborted
    }
}

impl<T> Drop for Job<T> {
    fn drop(&mut self) {
        // Last reference gone without a terminal status: the completion
        // callback still has to fire exactly once.
        let Some(done) = self.done.get_mut().take() else {
            return;
        };
        let status = JobStatus::from_u8(*self.status.get_mut());
        if !status.is_terminal() {
            *self.status.get_mut() = JobStatus::Aborted as u8;
        }
        done();
    }
}

impl<T> std::fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("status", &JobStatus::from_u8(self.status.load(Ordering::Acquire)))
            .field("args", &self.args)
            .finish()
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
