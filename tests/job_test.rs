//! Integration tests for the job lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use pagefan::engine::{Job, ResultPoll, Task};
use pagefan::model::{Args, JobError, JobStatus};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn args(page: u64) -> Args {
    let mut args = Args::new();
    args.insert("page".to_string(), json!(page));
    args
}

fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    (count, move || {
        c.fetch_add(1, Ordering::SeqCst);
    })
}

async fn run(job: &Arc<Job<u64>>) {
    job.mark_pending().unwrap();
    Arc::clone(job).run().await;
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn new_job_starts_created() {
    let job = Job::new(|_| async { Ok(1_u64) }, args(7));
    assert_eq!(job.status(), JobStatus::Created);
    assert_eq!(job.args()["page"], json!(7));
    assert!(job.finished_at().is_none());
}

#[tokio::test]
async fn successful_job_writes_result_and_fires_done_once() {
    let (done, on_done) = counter();
    let job = Arc::new(
        Job::new(
            |args: Args| async move { Ok(args["page"].as_u64().unwrap() * 10) },
            args(4),
        )
        .on_done(on_done),
    );

    run(&job).await;

    assert_eq!(job.status(), JobStatus::Success);
    assert_eq!(done.load(Ordering::SeqCst), 1);
    assert!(job.finished_at().is_some());

    match job.try_result(&CancellationToken::new()) {
        ResultPoll::Ready(Ok(payload)) => assert_eq!(payload, 40),
        other => panic!("expected Ready(Ok), got {other:?}"),
    }
    // The slot is single-use.
    assert!(matches!(
        job.try_result(&CancellationToken::new()),
        ResultPoll::Abandoned
    ));

    drop(job);
    assert_eq!(done.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failing_job_carries_error_and_no_payload() {
    let job = Arc::new(Job::new(
        |_| async { Err::<u64, _>(anyhow::anyhow!("api said no")) },
        Args::new(),
    ));

    run(&job).await;

    assert_eq!(job.status(), JobStatus::Failure);
    match job.wait_result().await {
        Some(Err(JobError::Failed(e))) => assert!(e.to_string().contains("api said no")),
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[tokio::test]
async fn panicking_job_is_reported_as_failure() {
    let (done, on_done) = counter();
    let job = Arc::new(
        Job::new(
            |_| async {
                if true {
                    panic!("boom");
                }
                Ok(0_u64)
            },
            Args::new(),
        )
        .on_done(on_done),
    );

    run(&job).await;

    assert_eq!(job.status(), JobStatus::Failure);
    assert_eq!(done.load(Ordering::SeqCst), 1);
    match job.wait_result().await {
        Some(Err(JobError::Panicked(msg))) => assert!(msg.contains("boom")),
        other => panic!("expected Panicked, got {other:?}"),
    }
}

#[tokio::test]
async fn job_function_runs_exactly_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let job = Arc::new(Job::new(
        move |_| async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(1_u64)
        },
        Args::new(),
    ));

    run(&job).await;
    Arc::clone(&job).run().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(job.status(), JobStatus::Success);
}

#[tokio::test]
async fn result_future_outlives_the_job() {
    let job = Arc::new(Job::new(|_| async { Ok(9_u64) }, Args::new()));
    run(&job).await;

    let result = job.wait_result();
    drop(job);
    assert!(matches!(result.await, Some(Ok(9))));
}

#[tokio::test]
async fn result_future_can_be_spawned_before_the_job_runs() {
    let job = Arc::new(Job::new(|_| async { Ok(3_u64) }, Args::new()));
    let waiting = tokio::spawn(job.wait_result());

    run(&job).await;
    drop(job);
    assert!(matches!(waiting.await.unwrap(), Some(Ok(3))));
}

// ---------------------------------------------------------------------------
// Status transitions
// ---------------------------------------------------------------------------

#[test]
fn status_moves_forward_only() {
    use JobStatus::*;
    assert!(Created.can_transition_to(Pending));
    assert!(Pending.can_transition_to(Working));
    assert!(Working.can_transition_to(Success));
    assert!(Working.can_transition_to(Failure));
    assert!(Pending.can_transition_to(Aborted));

    assert!(!Success.can_transition_to(Working));
    assert!(!Failure.can_transition_to(Pending));
    assert!(!Aborted.can_transition_to(Pending));
    assert!(!Created.can_transition_to(Working));

    for status in [Success, Failure, Aborted] {
        assert!(status.is_terminal());
    }
    assert_eq!("working".parse::<JobStatus>().unwrap(), Working);
}

#[tokio::test]
async fn mark_pending_twice_is_rejected() {
    let job = Job::new(|_| async { Ok(0_u64) }, Args::new());
    job.mark_pending().unwrap();
    assert!(job.mark_pending().is_err());
}

#[tokio::test]
async fn unqueued_job_refuses_to_run() {
    let job = Arc::new(Job::new(|_| async { Ok(0_u64) }, Args::new()));
    Arc::clone(&job).run().await;
    assert_eq!(job.status(), JobStatus::Created);
}

// ---------------------------------------------------------------------------
// Abort and result slot
// ---------------------------------------------------------------------------

#[tokio::test]
async fn abort_fires_done_and_abandons_result() {
    let (done, on_done) = counter();
    let job = Arc::new(Job::new(|_| async { Ok(0_u64) }, Args::new()).on_done(on_done));

    assert!(job.abort());
    assert_eq!(job.status(), JobStatus::Aborted);
    assert_eq!(done.load(Ordering::SeqCst), 1);
    assert!(matches!(
        job.try_result(&CancellationToken::new()),
        ResultPoll::Abandoned
    ));

    // Second abort and a late run are both no-ops.
    assert!(!job.abort());
    Arc::clone(&job).run().await;
    assert_eq!(job.status(), JobStatus::Aborted);
    assert_eq!(done.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn finished_job_cannot_be_aborted() {
    let job = Arc::new(Job::new(|_| async { Ok(0_u64) }, Args::new()));
    run(&job).await;
    assert!(!job.abort());
    assert_eq!(job.status(), JobStatus::Success);
}

#[tokio::test]
async fn dropping_unfinished_job_fires_done() {
    let (done, on_done) = counter();
    let job = Job::new(|_| async { Ok(0_u64) }, Args::new()).on_done(on_done);
    job.mark_pending().unwrap();
    drop(job);
    assert_eq!(done.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn try_result_reports_pending_then_cancelled() {
    let job = Job::new(|_| async { Ok(0_u64) }, Args::new());
    assert!(matches!(
        job.try_result(&CancellationToken::new()),
        ResultPoll::Pending
    ));

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    assert!(matches!(job.try_result(&cancelled), ResultPoll::Cancelled));
}
