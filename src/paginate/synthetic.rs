//! In-process page source with configurable shape, latency and failures.
//!
//! Stands in for a remote API in the CLI's `fetch` command and in tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::bail;
use serde::Serialize;

use super::{FIRST_PAGE, PageSource};
use crate::model::Page;

/// One item served by a [`SyntheticSource`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Record {
    pub id: u64,
    pub source: String,
    pub page: u32,
}

#[derive(Debug, Clone)]
pub struct SyntheticSource {
    label: String,
    pages: u32,
    per_page: usize,
    first_id: u64,
    latency: Duration,
    page_latency: HashMap<u32, Duration>,
    failing: HashSet<u32>,
    report_total: bool,
    fetches: Arc<AtomicUsize>,
}

impl SyntheticSource {
    /// A source with `pages` pages of `per_page` records each.
    pub fn new(label: impl Into<String>, pages: u32, per_page: usize) -> Self {
        Self {
            label: label.into(),
            pages: pages.max(1),
            per_page,
            first_id: 1,
            latency: Duration::ZERO,
            page_latency: HashMap::new(),
            failing: HashSet::new(),
            report_total: true,
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Id of the first record; later records count up from it.
    pub fn first_id(mut self, id: u64) -> Self {
        self.first_id = id;
        self
    }

    /// Delay applied to every page fetch.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Delay for one specific page, overriding [`latency`](Self::latency).
    pub fn page_latency(mut self, page: u32, latency: Duration) -> Self {
        self.page_latency.insert(page, latency);
        self
    }

    /// Make fetches of `page` fail.
    pub fn fail_page(mut self, page: u32) -> Self {
        self.failing.insert(page);
        self
    }

    /// Omit the total page count, as APIs do for very large collections.
    pub fn hide_total(mut self) -> Self {
        self.report_total = false;
        self
    }

    pub fn pages(&self) -> u32 {
        self.pages
    }

    /// Number of records served when every page succeeds.
    pub fn total_records(&self) -> usize {
        self.pages as usize * self.per_page
    }

    /// How many times `fetch_page` has been called.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    fn records(&self, page: u32) -> Vec<Record> {
        let base = self.first_id + u64::from(page - FIRST_PAGE) * self.per_page as u64;
        (0..self.per_page as u64)
            .map(|i| Record {
                id: base + i,
                source: self.label.clone(),
                page,
            })
            .collect()
    }
}

impl PageSource for SyntheticSource {
    type Item = Record;

    fn label(&self) -> &str {
        &self.label
    }

    async fn fetch_page(&self, page: u32) -> anyhow::Result<Page<Record>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);

        let delay = self.page_latency.get(&page).copied().unwrap_or(self.latency);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if page < FIRST_PAGE || page > self.pages {
            bail!("{}: page {page} out of range 1..={}", self.label, self.pages);
        }
        if self.failing.contains(&page) {
            bail!("{}: synthetic failure on page {page}", self.label);
        }

        Ok(Page {
            items: self.records(page),
            next_page: (page < self.pages).then_some(page + 1),
            total_pages: self.report_total.then_some(self.pages),
        })
    }
}
