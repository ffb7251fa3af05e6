//! Pagination fan-out.
//!
//! A [`Paginator`] enumerates a paginated resource: one synchronous probe
//! call discovers the extent and yields the first page, then every remaining
//! page becomes a [`Job`] on the [`Dispatcher`] and a shared [`Collector`]
//! folds the results back into one [`Aggregate`].
//!
//! Only a failed probe fails the fetch. Failed pages are logged and left out;
//! cancellation yields a partial aggregate, never an error.

pub mod synthetic;

use std::future::Future;
use std::sync::Arc;

use anyhow::Context as _;
use opentelemetry::KeyValue;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{
    CancellationController, Collected, Collector, CollectorHandle, Dispatcher, Job, WaitGroup,
};
use crate::error::{Error, Result};
use crate::model::{Args, Page};
use crate::telemetry::metrics;

/// Page number used for the probe call.
pub const FIRST_PAGE: u32 = 1;

/// A paginated resource, as seen by the paginator.
pub trait PageSource: Send + Sync + 'static {
    type Item: Send + 'static;

    /// Name used in logs and job arguments.
    fn label(&self) -> &str;

    /// Fetch one page. Page numbers start at [`FIRST_PAGE`].
    fn fetch_page(&self, page: u32) -> impl Future<Output = anyhow::Result<Page<Self::Item>>> + Send;
}

/// Everything a fetch produced.
#[derive(Debug)]
pub struct Aggregate<T> {
    /// Items from the probe pages and every successful page job. Unordered.
    pub items: Vec<T>,
    pub pages_fetched: usize,
    /// Pages whose fetch failed and were left out.
    pub pages_failed: usize,
    /// Cancellation cut the fetch short; `items` is partial.
    pub cancelled: bool,
}

impl<T> Default for Aggregate<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            pages_fetched: 0,
            pages_failed: 0,
            cancelled: false,
        }
    }
}

type PageCollector<T> = (CollectorHandle<Vec<T>>, JoinHandle<Collected<Vec<T>>>);

/// Drives paginated fetches through a shared dispatcher.
pub struct Paginator {
    dispatcher: Arc<Dispatcher>,
    controller: CancellationController,
}

impl Paginator {
    pub fn new(dispatcher: Arc<Dispatcher>, controller: CancellationController) -> Self {
        Self {
            dispatcher,
            controller,
        }
    }

    /// Fetch every page of one resource.
    pub async fn fetch_all<S: PageSource>(&self, source: Arc<S>) -> Result<Aggregate<S::Item>> {
        self.fetch_each([source]).await
    }

    /// Fetch every page of several resources into one aggregate.
    ///
    /// Sources are probed one after another; the remaining pages of all of
    /// them fan out into a single collector. A failed probe on any source
    /// fails the whole fetch.
    pub async fn fetch_each<S, I>(&self, sources: I) -> Result<Aggregate<S::Item>>
    where
        S: PageSource,
        I: IntoIterator<Item = Arc<S>>,
    {
        let sources: Vec<Arc<S>> = sources.into_iter().collect();
        let pending = WaitGroup::new();
        let mut collector: Option<PageCollector<S::Item>> = None;
        let mut agg = Aggregate::default();

        for (i, source) in sources.iter().enumerate() {
            debug!(
                source = source.label(),
                "{} sources waiting for scanning; scan #{i}",
                sources.len()
            );
            if self.controller.is_cancelled() {
                agg.cancelled = true;
                break;
            }

            let probe = tokio::select! {
                biased;
                () = self.controller.cancelled() => {
                    agg.cancelled = true;
                    break;
                }
                page = source.fetch_page(FIRST_PAGE) => page,
            };
            let probe = probe.map_err(|error| Error::Probe {
                source_label: source.label().to_string(),
                error,
            })?;
            count_page(source.label(), "probe");

            agg.pages_fetched += 1;
            agg.items.extend(probe.items);
            debug!(
                source = source.label(),
                next_page = ?probe.next_page,
                total_pages = ?probe.total_pages,
                "probe finished"
            );

            match (probe.next_page, probe.total_pages) {
                (None, _) => {}
                (Some(next), Some(total)) => {
                    let (handle, _) = collector.get_or_insert_with(|| {
                        let capacity = self.dispatcher.workers() + 1;
                        let (handle, collector) =
                            Collector::new(capacity, &self.controller);
                        (handle, tokio::spawn(collector.label("pages").collect()))
                    });

                    for page in next..=total {
                        let job = Arc::new(page_job(Arc::clone(source), page, pending.clone()));
                        job.assign_collector(handle);

                        pending.add(1);
                        if let Err(e) = self.dispatcher.submit(job).await {
                            // The rejected job was aborted, which already
                            // released its pending count.
                            debug!(source = source.label(), page, "stopped submitting: {e}");
                            agg.cancelled = true;
                            break;
                        }
                    }
                }
                (Some(next), None) => {
                    self.walk_sequential(source.as_ref(), next, &mut agg).await;
                }
            }

            if agg.cancelled {
                break;
            }
        }

        debug!("all jobs were spawned, waiting");
        pending.wait().await;

        if let Some((handle, collecting)) = collector {
            debug!("all jobs are executed, closing collector");
            drop(handle);
            let collected = collecting
                .await
                .map_err(|e| Error::Other(format!("collector task failed: {e}")))?;

            agg.pages_fetched += collected.payloads.len();
            agg.pages_failed += collected.failed;
            agg.cancelled |= collected.cancelled;
            for items in collected.payloads {
                agg.items.extend(items);
            }
        }

        agg.cancelled |= self.controller.is_cancelled();
        info!(
            items = agg.items.len(),
            pages = agg.pages_fetched,
            failed = agg.pages_failed,
            cancelled = agg.cancelled,
            "fetch finished"
        );
        Ok(agg)
    }

    /// Follow `next_page` links one at a time when the extent is unknown.
    async fn walk_sequential<S: PageSource>(
        &self,
        source: &S,
        first: u32,
        agg: &mut Aggregate<S::Item>,
    ) {
        let mut next = Some(first);
        while let Some(page) = next {
            let fetched = tokio::select! {
                biased;
                () = self.controller.cancelled() => {
                    agg.cancelled = true;
                    return;
                }
                fetched = source.fetch_page(page) => fetched,
            };

            match fetched {
                Ok(fetched) => {
                    count_page(source.label(), "sequential");
                    agg.pages_fetched += 1;
                    agg.items.extend(fetched.items);
                    next = match fetched.next_page {
                        Some(n) if n <= page => {
                            warn!(source = source.label(), page, next = n, "next page does not advance, stopping");
                            None
                        }
                        other => other,
                    };
                }
                Err(e) => {
                    warn!(source = source.label(), page, "page fetch failed, stopping walk: {e:#}");
                    agg.pages_failed += 1;
                    return;
                }
            }
        }
    }
}

/// Build the job fetching one page of `source`.
fn page_job<S: PageSource>(source: Arc<S>, page: u32, pending: WaitGroup) -> Job<Vec<S::Item>> {
    let mut args = Args::new();
    args.insert("page".to_string(), json!(page));
    args.insert("source".to_string(), json!(source.label()));

    Job::new(
        move |args: Args| async move {
            let page = args
                .get("page")
                .and_then(Value::as_u64)
                .and_then(|p| u32::try_from(p).ok())
                .context("job arguments carry no page number")?;
            debug!(source = source.label(), page, "fetching page");

            let fetched = source
                .fetch_page(page)
                .await
                .with_context(|| format!("fetching page {page} of {}", source.label()))?;
            count_page(source.label(), "fanout");
            Ok::<_, anyhow::Error>(fetched.items)
        },
        args,
    )
    .kind("page")
    .on_done(move || pending.done())
}

fn count_page(source: &str, mode: &'static str) {
    metrics::pages_fetched().add(
        1,
        &[
            KeyValue::new("source", source.to_string()),
            KeyValue::new("mode", mode),
        ],
    );
}
