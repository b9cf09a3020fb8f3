//! At-most-once refund issuance (component P). A refund is retried only
//! from a prior `Failed` state; `InProgress` and `Succeeded` are terminal
//! as far as this service is concerned — a caller that observes either is
//! told to stand down, not to retry.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use gateway_core::{ChargeId, UserId, REFUND_SLA_SECS};
use gateway_ingress::platform_client::{PlatformApi, PlatformError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundReason {
    Validation(String),
    Award(String),
}

impl fmt::Display for RefundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefundReason::Validation(detail) => write!(f, "validation: {detail}"),
            RefundReason::Award(detail) => write!(f, "award: {detail}"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RefundJournalEntry {
    InProgress { reason: RefundReason, attempt: u32 },
    Succeeded { reason: RefundReason, attempt: u32, duration: Duration },
    Failed { reason: RefundReason, attempt: u32, last_error: String },
}

#[derive(Debug, thiserror::Error)]
pub enum RefundError {
    #[error("refund already in progress or completed for this charge")]
    Duplicate,
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
}

#[derive(Default)]
pub struct RefundMetrics {
    pub refund_total: AtomicU64,
    pub refund_fail_total: AtomicU64,
}

pub struct RefundService {
    platform: std::sync::Arc<dyn PlatformApi>,
    journal: Mutex<HashMap<ChargeId, RefundJournalEntry>>,
    pub metrics: RefundMetrics,
}

impl RefundService {
    pub fn new(platform: std::sync::Arc<dyn PlatformApi>) -> Self {
        Self { platform, journal: Mutex::new(HashMap::new()), metrics: RefundMetrics::default() }
    }

    /// Issue a refund for `charge_id`, at most once. Returns `Ok(())` both
    /// when the refund succeeds on this call and when a prior call already
    /// did (or is doing) the work.
    pub async fn refund_star(
        &self,
        user_id: UserId,
        charge_id: ChargeId,
        reason: RefundReason,
    ) -> Result<(), RefundError> {
        let attempt = {
            let mut journal = self.journal.lock().expect("refund journal mutex poisoned");
            match journal.get(&charge_id) {
                None => {
                    journal.insert(charge_id.clone(), RefundJournalEntry::InProgress { reason: reason.clone(), attempt: 1 });
                    1
                }
                Some(RefundJournalEntry::Failed { attempt, .. }) => {
                    let next = attempt + 1;
                    journal.insert(charge_id.clone(), RefundJournalEntry::InProgress { reason: reason.clone(), attempt: next });
                    next
                }
                Some(RefundJournalEntry::InProgress { .. }) | Some(RefundJournalEntry::Succeeded { .. }) => {
                    info!(charge_id = %charge_id, "duplicate refund request, ignoring");
                    return Ok(());
                }
            }
        };

        let started = Instant::now();
        let result = self.platform.refund_star_payment(user_id, charge_id.as_str()).await;
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {
                self.metrics.refund_total.fetch_add(1, Ordering::Relaxed);
                if elapsed > Duration::from_secs(REFUND_SLA_SECS) {
                    warn!(charge_id = %charge_id, elapsed_ms = elapsed.as_millis() as u64, "refund exceeded SLA");
                }
                self.journal
                    .lock()
                    .expect("refund journal mutex poisoned")
                    .insert(charge_id.clone(), RefundJournalEntry::Succeeded { reason, attempt, duration: elapsed });
                info!(charge_id = %charge_id, attempt, "refund succeeded");
                Ok(())
            }
            Err(e) => {
                self.metrics.refund_fail_total.fetch_add(1, Ordering::Relaxed);
                self.journal.lock().expect("refund journal mutex poisoned").insert(
                    charge_id.clone(),
                    RefundJournalEntry::Failed { reason, attempt, last_error: e.to_string() },
                );
                warn!(charge_id = %charge_id, attempt, error = %e, "refund failed");
                Err(RefundError::Platform(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gateway_ingress::platform_client::{Gift, TelegramUpdate, WebhookInfo};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct FlakyPlatform {
        calls: AtomicUsize,
        fail_first_n: usize,
    }

    #[async_trait]
    impl PlatformApi for FlakyPlatform {
        async fn set_webhook(&self, _: &str, _: &str, _: Option<&[&str]>, _: Option<u32>, _: Option<bool>) -> Result<bool, PlatformError> { Ok(true) }
        async fn delete_webhook(&self, _: bool) -> Result<bool, PlatformError> { Ok(true) }
        async fn get_webhook_info(&self) -> Result<WebhookInfo, PlatformError> { Ok(WebhookInfo::default()) }
        async fn create_invoice_link(&self, _: &str, _: &str, _: &str, _: &str, _: i64) -> Result<String, PlatformError> { Ok(String::new()) }
        async fn answer_pre_checkout_query(&self, _: &str, _: bool, _: Option<&str>) -> Result<bool, PlatformError> { Ok(true) }
        async fn get_updates(&self, _: Option<i64>, _: u64, _: Option<&[&str]>) -> Result<Vec<TelegramUpdate>, PlatformError> { Ok(vec![]) }
        async fn send_message(&self, _: i64, _: &str, _: bool, _: Option<i64>) -> Result<(), PlatformError> { Ok(()) }
        async fn send_gift(&self, _: UserId, _: &str, _: bool) -> Result<(), PlatformError> { Ok(()) }
        async fn gift_premium_subscription(&self, _: UserId, _: u8, _: i64) -> Result<(), PlatformError> { Ok(()) }
        async fn refund_star_payment(&self, _: UserId, _: &str) -> Result<(), PlatformError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n { Err(PlatformError::Transient("try again".into())) } else { Ok(()) }
        }
        async fn get_available_gifts(&self) -> Result<Vec<Gift>, PlatformError> { Ok(vec![]) }
    }

    #[tokio::test]
    async fn succeeds_and_records_single_upstream_call() {
        let platform: Arc<dyn PlatformApi> = Arc::new(FlakyPlatform { calls: AtomicUsize::new(0), fail_first_n: 0 });
        let svc = RefundService::new(platform.clone());
        let charge = ChargeId::from_raw("CH-1").unwrap();
        svc.refund_star(42, charge.clone(), RefundReason::Award("gift_not_found".into())).await.unwrap();
        svc.refund_star(42, charge, RefundReason::Award("gift_not_found".into())).await.unwrap();
        assert_eq!(svc.metrics.refund_total.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_from_failed_state() {
        let platform: Arc<dyn PlatformApi> = Arc::new(FlakyPlatform { calls: AtomicUsize::new(0), fail_first_n: 1 });
        let svc = RefundService::new(platform);
        let charge = ChargeId::from_raw("CH-2").unwrap();
        let first = svc.refund_star(42, charge.clone(), RefundReason::Validation("bad amount".into())).await;
        assert!(first.is_err());
        let second = svc.refund_star(42, charge, RefundReason::Validation("bad amount".into())).await;
        assert!(second.is_ok());
        assert_eq!(svc.metrics.refund_fail_total.load(Ordering::SeqCst), 1);
        assert_eq!(svc.metrics.refund_total.load(Ordering::SeqCst), 1);
    }
}
