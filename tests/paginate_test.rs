//! Integration tests for the pagination protocol.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pagefan::config::QueueConfig;
use pagefan::engine::{CancellationController, Dispatcher};
use pagefan::error::Error;
use pagefan::paginate::Paginator;
use pagefan::paginate::synthetic::SyntheticSource;

struct Harness {
    controller: CancellationController,
    dispatcher: Arc<Dispatcher>,
    paginator: Paginator,
}

impl Harness {
    fn new(workers: usize) -> Self {
        let controller = CancellationController::new();
        let dispatcher = Arc::new(Dispatcher::start(
            &QueueConfig {
                workers,
                job_buffer: 4,
            },
            &controller,
        ));
        let paginator = Paginator::new(Arc::clone(&dispatcher), controller.clone());
        Self {
            controller,
            dispatcher,
            paginator,
        }
    }

    async fn stop(self) {
        self.dispatcher.abort();
        self.dispatcher.join().await.unwrap();
    }
}

fn ids<I: IntoIterator<Item = pagefan::paginate::synthetic::Record>>(items: I) -> HashSet<u64> {
    items.into_iter().map(|r| r.id).collect()
}

// ---------------------------------------------------------------------------
// Completeness
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fetch_all_returns_every_item_once() {
    let h = Harness::new(2);
    let source = Arc::new(SyntheticSource::new("repos", 3, 2));

    let agg = h.paginator.fetch_all(Arc::clone(&source)).await.unwrap();

    assert_eq!(agg.items.len(), 6);
    assert_eq!(ids(agg.items), (1..=6).collect());
    assert_eq!(agg.pages_fetched, 3);
    assert_eq!(agg.pages_failed, 0);
    assert!(!agg.cancelled);
    // Every page fetched exactly once, probe included.
    assert_eq!(source.fetches(), 3);

    h.stop().await;
}

#[tokio::test]
async fn single_page_needs_no_fan_out() {
    let h = Harness::new(2);
    let source = Arc::new(SyntheticSource::new("tiny", 1, 5));

    let agg = h.paginator.fetch_all(Arc::clone(&source)).await.unwrap();

    assert_eq!(agg.items.len(), 5);
    assert_eq!(agg.pages_fetched, 1);
    assert_eq!(source.fetches(), 1);

    h.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_pages_through_a_small_pool() {
    let h = Harness::new(3);
    let source = Arc::new(SyntheticSource::new("big", 40, 10).latency(Duration::from_millis(2)));

    let agg = h.paginator.fetch_all(Arc::clone(&source)).await.unwrap();

    assert_eq!(agg.items.len(), source.total_records());
    assert_eq!(ids(agg.items).len(), source.total_records());
    assert_eq!(source.fetches(), 40);

    h.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn result_set_ignores_completion_order() {
    let h = Harness::new(4);
    let forward = Arc::new(
        SyntheticSource::new("forward", 5, 3)
            .page_latency(2, Duration::from_millis(10))
            .page_latency(5, Duration::from_millis(60)),
    );
    let reversed = Arc::new(
        SyntheticSource::new("reversed", 5, 3)
            .page_latency(2, Duration::from_millis(60))
            .page_latency(5, Duration::from_millis(10)),
    );

    let a = h.paginator.fetch_all(forward).await.unwrap();
    let b = h.paginator.fetch_all(reversed).await.unwrap();

    assert_eq!(ids(a.items), ids(b.items));

    h.stop().await;
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_page_is_left_out() {
    let h = Harness::new(2);
    let source = Arc::new(SyntheticSource::new("flaky", 4, 2).fail_page(3));

    let agg = h.paginator.fetch_all(source).await.unwrap();

    assert_eq!(ids(agg.items), HashSet::from([1, 2, 3, 4, 7, 8]));
    assert_eq!(agg.pages_fetched, 3);
    assert_eq!(agg.pages_failed, 1);
    assert!(!agg.cancelled);

    h.stop().await;
}

#[tokio::test]
async fn failed_probe_fails_the_fetch() {
    let h = Harness::new(2);
    let source = Arc::new(SyntheticSource::new("down", 3, 2).fail_page(1));

    let err = h.paginator.fetch_all(Arc::clone(&source)).await.unwrap_err();

    match err {
        Error::Probe { source_label, .. } => assert_eq!(source_label, "down"),
        other => panic!("expected probe error, got {other}"),
    }
    assert_eq!(source.fetches(), 1);

    h.stop().await;
}

// ---------------------------------------------------------------------------
// Unknown extent
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hidden_total_walks_pages_in_order() {
    let h = Harness::new(2);
    let source = Arc::new(SyntheticSource::new("stream", 4, 2).hide_total());

    let agg = h.paginator.fetch_all(Arc::clone(&source)).await.unwrap();

    let pages: Vec<u32> = agg.items.iter().map(|r| r.page).collect();
    assert_eq!(pages, vec![1, 1, 2, 2, 3, 3, 4, 4]);
    assert_eq!(agg.pages_fetched, 4);
    assert_eq!(source.fetches(), 4);

    h.stop().await;
}

#[tokio::test]
async fn hidden_total_stops_at_first_failure() {
    let h = Harness::new(2);
    let source = Arc::new(SyntheticSource::new("stream", 5, 1).hide_total().fail_page(3));

    let agg = h.paginator.fetch_all(Arc::clone(&source)).await.unwrap();

    assert_eq!(ids(agg.items), HashSet::from([1, 2]));
    assert_eq!(agg.pages_failed, 1);
    assert_eq!(source.fetches(), 3);

    h.stop().await;
}

// ---------------------------------------------------------------------------
// Multiple sources
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fetch_each_merges_sources_into_one_aggregate() {
    let h = Harness::new(3);
    let sources = vec![
        Arc::new(SyntheticSource::new("group-a", 3, 2).first_id(1)),
        Arc::new(SyntheticSource::new("group-b", 2, 2).first_id(100)),
        Arc::new(SyntheticSource::new("group-c", 1, 2).first_id(200)),
    ];

    let agg = h.paginator.fetch_each(sources).await.unwrap();

    assert_eq!(agg.items.len(), 12);
    assert_eq!(
        ids(agg.items),
        HashSet::from([1, 2, 3, 4, 5, 6, 100, 101, 102, 103, 200, 201])
    );
    assert_eq!(agg.pages_fetched, 6);

    h.stop().await;
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_returns_partial_aggregate_promptly() {
    let h = Harness::new(2);
    let source = Arc::new(SyntheticSource::new("slow", 30, 1).latency(Duration::from_millis(50)));

    let controller = h.controller.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(180)).await;
        controller.abort("test");
    });

    let started = Instant::now();
    let agg = tokio::time::timeout(Duration::from_secs(2), h.paginator.fetch_all(source))
        .await
        .expect("fetch hung after cancellation")
        .unwrap();

    assert!(agg.cancelled);
    assert!(agg.items.len() < 30, "got {} items", agg.items.len());
    // The probe page always makes it.
    assert!(!agg.items.is_empty());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(ids(agg.items.clone()).len(), agg.items.len());

    h.stop().await;
}

#[tokio::test]
async fn fetch_after_cancel_returns_empty() {
    let h = Harness::new(2);
    h.controller.abort("test");
    let source = Arc::new(SyntheticSource::new("never", 3, 2));

    let agg = h.paginator.fetch_all(Arc::clone(&source)).await.unwrap();

    assert!(agg.cancelled);
    assert!(agg.items.is_empty());
    assert_eq!(source.fetches(), 0);

    h.stop().await;
}
