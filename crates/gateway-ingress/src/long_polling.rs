//! Long-polling runner (component H) — the alternative ingress path to the
//! webhook front door, used when no public HTTPS endpoint is configured.
//! Deletes any existing webhook once at startup, then loops on `getUpdates`
//! with an acked offset, handing every parsed update to the dispatcher.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use gateway_core::{LONG_POLL_DEFAULT_TIMEOUT_SECS, LONG_POLL_TIMEOUT_MAX_SECS, LONG_POLL_TIMEOUT_MIN_SECS};

use crate::dispatcher::UpdateDispatcher;
use crate::now_ms;
use crate::platform_client::PlatformApi;
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::update::Update;

#[derive(Default)]
pub struct LongPollMetrics {
    pub polls_total: AtomicU64,
    pub updates_received_total: AtomicU64,
    pub poll_errors_total: AtomicU64,
    pub batches_total: AtomicU64,
    pub retries_total: AtomicU64,
    pub cycles_total: AtomicU64,
    pub offset: AtomicI64,
}

pub struct LongPollingConfig {
    pub timeout_secs: u64,
    pub allowed_updates: Vec<String>,
}

impl Default for LongPollingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: LONG_POLL_DEFAULT_TIMEOUT_SECS,
            allowed_updates: vec!["message".into(), "pre_checkout_query".into()],
        }
    }
}

impl LongPollingConfig {
    fn clamped_timeout(&self) -> u64 {
        self.timeout_secs.clamp(LONG_POLL_TIMEOUT_MIN_SECS, LONG_POLL_TIMEOUT_MAX_SECS)
    }
}

/// Drives `getUpdates` on a background task until [`LongPollingRunner::stop`]
/// is called. Stopping is cooperative: the in-flight long poll is allowed to
/// return before the loop observes the stop flag.
pub struct LongPollingRunner {
    platform: Arc<dyn PlatformApi>,
    dispatcher: Arc<UpdateDispatcher>,
    config: LongPollingConfig,
    metrics: Arc<LongPollMetrics>,
    stopped: Arc<AtomicBool>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl LongPollingRunner {
    pub fn new(platform: Arc<dyn PlatformApi>, dispatcher: Arc<UpdateDispatcher>, config: LongPollingConfig) -> Self {
        Self {
            platform,
            dispatcher,
            config,
            metrics: Arc::new(LongPollMetrics::default()),
            stopped: Arc::new(AtomicBool::new(false)),
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn metrics(&self) -> &LongPollMetrics {
        &self.metrics
    }

    /// Deletes any existing webhook (the two ingress modes are mutually
    /// exclusive — see §4.H) then spawns the poll loop. Idempotent.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            warn!("long-polling runner start called more than once, ignoring");
            return;
        }

        if let Err(e) = self.platform.delete_webhook(false).await {
            error!(error = %e, "failed to delete webhook before starting long polling");
        }

        let runner = self.clone();
        *task = Some(tokio::spawn(async move { runner.run_loop().await }));
    }

    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            let _ = handle.await;
        }
    }

    async fn run_loop(self: Arc<Self>) {
        let mut offset: Option<i64> = None;
        let timeout_secs = self.config.clamped_timeout();
        let allowed: Vec<&str> = self.config.allowed_updates.iter().map(String::as_str).collect();
        let retry = RetryPolicy::default();

        info!(timeout_secs, "long-polling runner started");
        while !self.stopped.load(Ordering::Acquire) {
            self.metrics.cycles_total.fetch_add(1, Ordering::Relaxed);
            self.metrics.polls_total.fetch_add(1, Ordering::Relaxed);

            let poll_result = retry
                .run(|attempt| {
                    let allowed = allowed.clone();
                    if attempt > 1 {
                        self.metrics.retries_total.fetch_add(1, Ordering::Relaxed);
                    }
                    async move {
                        self.platform.get_updates(offset, timeout_secs, Some(&allowed)).await.map_err(|e| {
                            if e.is_transient() {
                                RetryOutcome::Transient(e)
                            } else {
                                RetryOutcome::Permanent(e)
                            }
                        })
                    }
                })
                .await;

            let raw_updates = match poll_result {
                Ok(updates) => updates,
                Err(e) => {
                    self.metrics.poll_errors_total.fetch_add(1, Ordering::Relaxed);
                    error!(error = %e, "getUpdates failed after retries");
                    continue;
                }
            };

            if raw_updates.is_empty() {
                continue;
            }
            self.metrics.batches_total.fetch_add(1, Ordering::Relaxed);

            let mut max_update_id = offset.unwrap_or(0);
            for raw in raw_updates {
                match Update::from_value(raw.0) {
                    Ok(update) => {
                        max_update_id = max_update_id.max(update.update_id + 1);
                        self.metrics.updates_received_total.fetch_add(1, Ordering::Relaxed);
                        self.dispatcher.enqueue(update, now_ms()).await;
                    }
                    Err(e) => warn!(error = %e, "dropping malformed update from long poll"),
                }
            }
            offset = Some(max_update_id);
            self.metrics.offset.store(max_update_id, Ordering::Relaxed);
        }
        info!("long-polling runner stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::InMemoryDedupStore;
    use crate::dispatcher::{DispatcherConfig, UpdateHandler};
    use crate::platform_client::{Gift, PlatformError, TelegramUpdate, WebhookInfo};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex as AsyncMutex;

    struct FakePlatform {
        batches: AsyncMutex<Vec<Vec<serde_json::Value>>>,
        deletes: AtomicUsize,
    }

    #[async_trait]
    impl PlatformApi for FakePlatform {
        async fn set_webhook(
            &self,
            _url: &str,
            _secret: &str,
            _allowed_updates: Option<&[&str]>,
            _max_connections: Option<u32>,
            _drop_pending: Option<bool>,
        ) -> Result<bool, PlatformError> {
            Ok(true)
        }
        async fn delete_webhook(&self, _drop_pending: bool) -> Result<bool, PlatformError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
        async fn get_webhook_info(&self) -> Result<WebhookInfo, PlatformError> {
            Ok(WebhookInfo::default())
        }
        async fn create_invoice_link(
            &self,
            _t: &str,
            _d: &str,
            _p: &str,
            _c: &str,
            _a: i64,
        ) -> Result<String, PlatformError> {
            Ok("https://t.me/invoice".into())
        }
        async fn answer_pre_checkout_query(
            &self,
            _id: &str,
            _ok: bool,
            _err: Option<&str>,
        ) -> Result<bool, PlatformError> {
            Ok(true)
        }
        async fn get_updates(
            &self,
            _offset: Option<i64>,
            _timeout_secs: u64,
            _allowed: Option<&[&str]>,
        ) -> Result<Vec<TelegramUpdate>, PlatformError> {
            let mut batches = self.batches.lock().await;
            if batches.is_empty() {
                return Ok(vec![]);
            }
            let batch = batches.remove(0);
            Ok(batch.into_iter().map(TelegramUpdate).collect())
        }
        async fn send_message(&self, _c: i64, _t: &str, _n: bool, _r: Option<i64>) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn send_gift(&self, _u: gateway_core::UserId, _g: &str, _p: bool) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn gift_premium_subscription(
            &self,
            _u: gateway_core::UserId,
            _m: u8,
            _s: i64,
        ) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn refund_star_payment(&self, _u: gateway_core::UserId, _c: &str) -> Result<(), PlatformError> {
            Ok(())
        }
        async fn get_available_gifts(&self) -> Result<Vec<Gift>, PlatformError> {
            Ok(vec![])
        }
    }

    struct NoopHandler;
    #[async_trait]
    impl UpdateHandler for NoopHandler {
        async fn handle(&self, _update: Update) {}
    }

    #[tokio::test]
    async fn deletes_webhook_before_first_poll() {
        let platform = Arc::new(FakePlatform { batches: AsyncMutex::new(vec![]), deletes: AtomicUsize::new(0) });
        let dedup = Arc::new(InMemoryDedupStore::new(1_000));
        let dispatcher = Arc::new(UpdateDispatcher::new(DispatcherConfig::default(), dedup, Arc::new(NoopHandler)));
        dispatcher.start().await;
        let runner = Arc::new(LongPollingRunner::new(platform.clone(), dispatcher.clone(), LongPollingConfig::default()));
        runner.start().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        runner.stop().await;
        dispatcher.close().await;
        assert_eq!(platform.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn advances_offset_past_highest_seen_update_id() {
        let batches = vec![vec![
            serde_json::json!({"update_id": 5, "message": {"chat": {"id": 1}}}),
            serde_json::json!({"update_id": 6, "message": {"chat": {"id": 1}}}),
        ]];
        let platform = Arc::new(FakePlatform { batches: AsyncMutex::new(batches), deletes: AtomicUsize::new(0) });
        let dedup = Arc::new(InMemoryDedupStore::new(1_000));
        let dispatcher = Arc::new(UpdateDispatcher::new(DispatcherConfig::default(), dedup, Arc::new(NoopHandler)));
        dispatcher.start().await;
        let runner = Arc::new(LongPollingRunner::new(platform, dispatcher.clone(), LongPollingConfig::default()));
        runner.start().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        runner.stop().await;
        dispatcher.close().await;
        assert_eq!(runner.metrics().offset.load(Ordering::SeqCst), 7);
        assert_eq!(runner.metrics().updates_received_total.load(Ordering::SeqCst), 2);
        assert_eq!(runner.metrics().batches_total.load(Ordering::SeqCst), 1);
        assert!(runner.metrics().cycles_total.load(Ordering::SeqCst) >= 1);
    }
}
