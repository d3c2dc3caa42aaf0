//! `BlockTask` (§4.4, §9 "Coroutines / async hooks"): one async task per `compute()` invocation
//! of a block-parallel module, capped at `max(1, concurrency)` concurrent tasks. Unlike the
//! original's `addDependency` chaining, tasks here are independent once spawned -- the only
//! ordering guarantee is the semaphore bound on how many run at once, plus [`Self::wait_all`]
//! as the join point before the next collective phase.
//!
//! Modeled as a semaphore-gated `tokio` task pool rather than the original's raw thread-pool
//! futures, matching the qsim crate's reach for `tokio::sync` primitives
//! (`src/simulation/messaging/sim_communication/message_broker.rs` uses `tokio::sync::mpsc`)
//! instead of hand-rolled thread pools.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

/// Bounds how many `BlockTask`s run at once. Defaults to half the available parallelism,
/// floored at 1 (§4.4: `concurrency` defaults to `hardware_concurrency/2`).
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism().map(|n| n.get() / 2).unwrap_or(1).max(1)
}

/// Runs block computations with a bounded number in flight. Tasks are not chained to one
/// another; [`Self::wait_all`] is the only synchronization point.
pub struct BlockTaskPool {
    semaphore: Arc<Semaphore>,
    in_flight: Vec<JoinHandle<()>>,
}

impl BlockTaskPool {
    pub fn new(concurrency: usize) -> Self {
        BlockTaskPool {
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            in_flight: Vec::new(),
        }
    }

    /// Spawns `compute` once a permit is free. The task does not start running its body until
    /// the semaphore grants it, so at most `concurrency` computations execute concurrently.
    pub fn spawn<F>(&mut self, compute: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        let handle = tokio::spawn(async move {
            let _permit: OwnedSemaphorePermit = semaphore.acquire_owned().await.expect("semaphore never closed");
            compute.await;
        });
        self.in_flight.push(handle);
    }

    /// `waitAllTasks` (§4.4): called before `prepare` and before `reduce` so no block compute is
    /// still running when a collective phase begins.
    pub async fn wait_all(&mut self) {
        for handle in self.in_flight.drain(..) {
            let _ = handle.await;
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn wait_all_drains_every_spawned_task() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pool = BlockTaskPool::new(2);
        for _ in 0..5 {
            let counter = counter.clone();
            pool.spawn(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait_all().await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(pool.in_flight_count(), 0);
    }

    #[test]
    fn default_concurrency_is_never_zero() {
        assert!(default_concurrency() >= 1);
    }
}
