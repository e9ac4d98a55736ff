//! Countdown latch over a watch channel

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Opens once `count_down` has been called as many times as the initial
/// count. Clones share the same counter.
#[derive(Debug, Clone)]
pub struct CountdownLatch {
    remaining: Arc<watch::Sender<usize>>,
}

impl CountdownLatch {
    pub fn new(count: usize) -> Self {
        let (tx, _) = watch::channel(count);
        Self {
            remaining: Arc::new(tx),
        }
    }

    pub fn count_down(&self) {
        self.remaining.send_modify(|n| *n = n.saturating_sub(1));
    }

    pub fn count(&self) -> usize {
        *self.remaining.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.count() == 0
    }

    /// Waits for the latch to open. Returns false if `timeout` passed first.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut rx = self.remaining.subscribe();
        let opened = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|n| *n == 0)).await,
            Ok(Ok(_))
        );
        opened
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_opens_after_count() {
        let latch = CountdownLatch::new(2);
        let other = latch.clone();
        let waiter = tokio::spawn(async move { other.wait(Duration::from_secs(5)).await });

        latch.count_down();
        assert!(!latch.is_open());
        latch.count_down();
        latch.count_down();
        assert!(waiter.await.unwrap());
        assert_eq!(latch.count(), 0);
    }

    #[tokio::test]
    async fn test_times_out() {
        let latch = CountdownLatch::new(1);
        assert!(!latch.wait(Duration::from_millis(10)).await);
        assert!(CountdownLatch::new(0).wait(Duration::from_millis(1)).await);
    }
}
