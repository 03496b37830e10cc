//! Shared rate gate in front of the query client.
//!
//! The remote service throttles callers regardless of our concurrency, so
//! every leaf query passes through one pacer: a semaphore bounds in-flight
//! queries and a minimum-interval gate spaces out dispatches. The pacer is
//! shared via `Arc` and safe for concurrent use; it is never a global.

use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Default spacing between dispatched queries.
const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Default bound on simultaneous in-flight queries.
const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// Minimum-interval pacing plus an in-flight bound.
#[derive(Debug)]
pub struct RatePacer {
    min_interval: Duration,
    last_dispatch: Mutex<Option<Instant>>,
    in_flight: std::sync::Arc<Semaphore>,
}

impl Default for RatePacer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL, DEFAULT_MAX_IN_FLIGHT)
    }
}

impl RatePacer {
    /// Create a pacer with the given dispatch spacing and in-flight bound.
    #[must_use]
    pub fn new(min_interval: Duration, max_in_flight: usize) -> Self {
        Self {
            min_interval,
            last_dispatch: Mutex::new(None),
            in_flight: std::sync::Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Wait for an in-flight slot and for the minimum interval since the
    /// previous dispatch, then claim this dispatch slot.
    ///
    /// The returned guard releases the in-flight slot when dropped.
    pub async fn acquire(&self) -> PacerGuard {
        // The semaphore is never closed, so acquisition only fails after
        // an explicit close; treat that as an open gate.
        let permit = self.in_flight.clone().acquire_owned().await.ok();

        let mut last = self.last_dispatch.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
        drop(last);

        PacerGuard { _permit: permit }
    }
}

/// Releases the pacer's in-flight slot on drop.
#[derive(Debug)]
pub struct PacerGuard {
    _permit: Option<OwnedSemaphorePermit>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn dispatches_are_spaced_by_the_minimum_interval() {
        let pacer = RatePacer::new(Duration::from_millis(500), 2);

        let start = Instant::now();
        drop(pacer.acquire().await);
        let first = start.elapsed();
        drop(pacer.acquire().await);
        let second = start.elapsed();

        assert!(first < Duration::from_millis(500));
        assert!(
            second >= Duration::from_millis(500),
            "second dispatch after {second:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_bound_blocks_extra_queries() {
        let pacer = std::sync::Arc::new(RatePacer::new(Duration::ZERO, 1));

        let held = pacer.acquire().await;
        let contender = {
            let pacer = std::sync::Arc::clone(&pacer);
            tokio::spawn(async move {
                drop(pacer.acquire().await);
            })
        };

        // Give the contender a chance to run; it must stay blocked.
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        drop(held);
        contender.await.expect("contender should finish");
    }
}
