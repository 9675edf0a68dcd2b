//! Request pacing shared by all phases of one source instance.
//!
//! Every outbound fetch acquires a permit first; permits are spaced at
//! least `interval` apart, so a site is never hit faster than its
//! configured rate no matter how many subjects or episodes are being
//! processed concurrently.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum interval between grants.
///
/// The last-grant timestamp is the only mutable state shared across
/// concurrent operations of a source instance. The mutex is held across
/// the sleep, which serializes grants: under N concurrent callers the
/// k-th grant still happens no earlier than (k−1) × interval after the
/// first.
pub struct RequestPacer {
    interval: Duration,
    last_grant: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_grant: Mutex::new(None),
        }
    }

    /// Suspend until at least `interval` has elapsed since the previous
    /// grant, then record the new grant time.
    pub async fn acquire(&self) {
        let mut last = self.last_grant.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.interval {
                let wait = self.interval - elapsed;
                tracing::trace!(wait_ms = %wait.as_millis(), "pacing request");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}
