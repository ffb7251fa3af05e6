//! Pending-count synchronization.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Counts outstanding jobs; [`WaitGroup::wait`] resolves once it hits zero.
#[derive(Debug, Clone, Default)]
pub struct WaitGroup {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    count: AtomicUsize,
    zero: Notify,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `n` more outstanding units.
    pub fn add(&self, n: usize) {
        self.inner.count.fetch_add(n, Ordering::AcqRel);
    }

    /// Mark one unit finished.
    pub fn done(&self) {
        let prev = self
            .inner
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1));
        match prev {
            Ok(1) => self.inner.zero.notify_waiters(),
            Ok(_) => {}
            Err(_) => tracing::warn!("wait group done() called more times than add()"),
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Wait until every registered unit is done.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.zero.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent done() can't slip between.
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_immediately_when_empty() {
        let wg = WaitGroup::new();
        tokio::time::timeout(Duration::from_millis(50), wg.wait())
            .await
            .expect("empty wait group should not block");
    }

    #[tokio::test]
    async fn wait_unblocks_after_last_done() {
        let wg = WaitGroup::new();
        wg.add(3);

        for _ in 0..3 {
            let wg = wg.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                wg.done();
            });
        }

        tokio::time::timeout(Duration::from_secs(2), wg.wait())
            .await
            .expect("wait group should reach zero");
        assert_eq!(wg.pending(), 0);
    }

    #[test]
    fn extra_done_does_not_underflow() {
        let wg = WaitGroup::new();
        wg.done();
        assert_eq!(wg.pending(), 0);
    }
}
