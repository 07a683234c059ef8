use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencySnapshot {
    pub limit: usize,
    pub in_flight: usize,
    pub waiters: usize,
}

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    waiters: AtomicUsize,
}

/// Bounds how many units are in the retrieval → reasoning stage at once,
/// which in turn bounds concurrent oracle calls.
#[derive(Debug, Clone)]
pub struct UnitLimiter {
    limit: usize,
    semaphore: Arc<Semaphore>,
    counters: Arc<Counters>,
}

impl UnitLimiter {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            semaphore: Arc::new(Semaphore::new(limit)),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn snapshot(&self) -> ConcurrencySnapshot {
        ConcurrencySnapshot {
            limit: self.limit,
            in_flight: self.counters.in_flight.load(Ordering::Relaxed),
            waiters: self.counters.waiters.load(Ordering::Relaxed),
        }
    }

    /// Wait for a permit; `None` once the limiter is closed.
    pub async fn acquire(&self) -> Option<UnitPermit> {
        let waiter = WaiterGuard::new(self.counters.clone());
        let permit = self.semaphore.clone().acquire_owned().await.ok()?;
        drop(waiter);
        self.counters.in_flight.fetch_add(1, Ordering::Relaxed);
        Some(UnitPermit {
            _permit: permit,
            counters: self.counters.clone(),
        })
    }

    /// Refuse further permits and wake every waiter. Held permits stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

pub struct UnitPermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl Drop for UnitPermit {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

struct WaiterGuard(Arc<Counters>);

impl WaiterGuard {
    fn new(counters: Arc<Counters>) -> Self {
        counters.waiters.fetch_add(1, Ordering::Relaxed);
        Self(counters)
    }
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.0.waiters.fetch_sub(1, Ordering::Relaxed);
    }
}
