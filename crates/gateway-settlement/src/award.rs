//! Prize delivery (component O). Dispatches the prize resolved by a draw —
//! a platform gift, a Premium subscription tier, or an internal-only
//! credit — and keeps an idempotent per-charge journal so a retried
//! successful-payment message never double-delivers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use gateway_core::{CaseStore, ChargeId, PrizeKind, Timestamp, UserId, GIFT_CACHE_TTL_SECS, PREMIUM_TIER_STAR_COSTS};
use gateway_fairness::{DrawOutcome, DrawReceipt};
use gateway_ingress::platform_client::{Gift, PlatformApi};

use crate::refund::{RefundReason, RefundService};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwardJournalEntry {
    InProgress,
    Completed { kind: PrizeKind, prize_id: Option<String>, external_id: Option<String> },
}

/// Everything the award service needs to resolve and deliver a prize for one
/// completed payment. Constructed by the successful-payment handler (N)
/// after a fairness draw.
#[derive(Debug, Clone)]
pub struct AwardPlan {
    pub charge_id: ChargeId,
    pub provider_charge_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub user_id: UserId,
    pub case_id: String,
    pub nonce: String,
    pub result_item_id: Option<String>,
    pub rng_record_created_at: Timestamp,
    pub rng_receipt: DrawReceipt,
}

impl AwardPlan {
    pub fn from_draw(
        charge_id: ChargeId,
        provider_charge_id: Option<String>,
        amount: i64,
        currency: String,
        user_id: UserId,
        case_id: String,
        nonce: String,
        draw: &DrawOutcome,
    ) -> Self {
        Self {
            charge_id,
            provider_charge_id,
            amount,
            currency,
            user_id,
            case_id,
            nonce,
            result_item_id: draw.record.result_item_id.clone(),
            rng_record_created_at: draw.record.created_at,
            rng_receipt: draw.receipt.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AwardError {
    #[error("case {0} not found")]
    CaseNotFound(String),
    #[error("prize {0} not found in case {1}")]
    PrizeNotFound(String, String),
    #[error("no gift in catalog matches star cost {0}")]
    GiftNotFound(i64),
    #[error("premium tier for {0} months / {1} stars is not configured")]
    InvalidPremiumTier(u8, i64),
    #[error("platform error: {0}")]
    Platform(#[from] gateway_ingress::platform_client::PlatformError),
    #[error("cancelled")]
    Cancelled,
}

#[derive(Default)]
pub struct AwardMetrics {
    pub award_gift_total: AtomicU64,
    pub award_premium_total: AtomicU64,
    pub award_internal_total: AtomicU64,
    pub award_fail_total: AtomicU64,
}

struct GiftCache {
    gifts: Vec<Gift>,
    fetched_at: Instant,
}

pub struct AwardService {
    platform: std::sync::Arc<dyn PlatformApi>,
    cases: std::sync::Arc<dyn CaseStore>,
    refunds: std::sync::Arc<RefundService>,
    journal: Mutex<HashMap<ChargeId, AwardJournalEntry>>,
    gift_cache: tokio::sync::Mutex<Option<GiftCache>>,
    pub metrics: AwardMetrics,
}

impl AwardService {
    pub fn new(
        platform: std::sync::Arc<dyn PlatformApi>,
        cases: std::sync::Arc<dyn CaseStore>,
        refunds: std::sync::Arc<RefundService>,
    ) -> Self {
        Self {
            platform,
            cases,
            refunds,
            journal: Mutex::new(HashMap::new()),
            gift_cache: tokio::sync::Mutex::new(None),
            metrics: AwardMetrics::default(),
        }
    }

    /// Idempotent per `chargeId`. Resolves and delivers the prize named by
    /// `plan.result_item_id`; reverts `InProgress` and attempts a refund on
    /// any non-cancellation failure.
    pub async fn schedule(&self, plan: &AwardPlan) -> Result<AwardJournalEntry, AwardError> {
        {
            let mut journal = self.journal.lock().expect("award journal mutex poisoned");
            if let Some(existing) = journal.get(&plan.charge_id) {
                if matches!(existing, AwardJournalEntry::Completed { .. }) {
                    debug!(charge_id = %plan.charge_id, "award already completed, idempotent replay");
                    return Ok(existing.clone());
                }
            }
            journal.insert(plan.charge_id.clone(), AwardJournalEntry::InProgress);
        }

        match self.deliver(plan).await {
            Ok(entry) => {
                self.journal.lock().expect("award journal mutex poisoned").insert(plan.charge_id.clone(), entry.clone());
                info!(charge_id = %plan.charge_id, "award completed");
                Ok(entry)
            }
            Err(AwardError::Cancelled) => {
                self.journal.lock().expect("award journal mutex poisoned").remove(&plan.charge_id);
                Err(AwardError::Cancelled)
            }
            Err(e) => {
                self.journal.lock().expect("award journal mutex poisoned").remove(&plan.charge_id);
                self.metrics.award_fail_total.fetch_add(1, Ordering::Relaxed);
                warn!(charge_id = %plan.charge_id, error = %e, "award failed, attempting refund");
                if plan.currency == gateway_core::XTR_CURRENCY {
                    let reason = RefundReason::Award(e.to_string());
                    let _ = self.refunds.refund_star(plan.user_id, plan.charge_id.clone(), reason).await;
                }
                Err(e)
            }
        }
    }

    async fn deliver(&self, plan: &AwardPlan) -> Result<AwardJournalEntry, AwardError> {
        let Some(case) = self.cases.get(&plan.case_id) else {
            return Err(AwardError::CaseNotFound(plan.case_id.clone()));
        };

        let Some(item_id) = &plan.result_item_id else {
            self.metrics.award_internal_total.fetch_add(1, Ordering::Relaxed);
            return Ok(AwardJournalEntry::Completed { kind: PrizeKind::Internal, prize_id: None, external_id: None });
        };

        let Some(item) = case.items.iter().find(|i| &i.id == item_id) else {
            return Err(AwardError::PrizeNotFound(item_id.clone(), plan.case_id.clone()));
        };

        match item.kind {
            PrizeKind::Gift => {
                let star_cost = item.star_cost.unwrap_or(0);
                let gift = self.find_gift(star_cost).await?;
                self.platform.send_gift(plan.user_id, &gift.id, false).await?;
                self.metrics.award_gift_total.fetch_add(1, Ordering::Relaxed);
                Ok(AwardJournalEntry::Completed {
                    kind: PrizeKind::Gift,
                    prize_id: Some(item.id.clone()),
                    external_id: Some(gift.id),
                })
            }
            PrizeKind::Premium3m | PrizeKind::Premium6m | PrizeKind::Premium12m => {
                let star_cost = item.star_cost.unwrap_or(0);
                let month_count = match item.kind {
                    PrizeKind::Premium3m => 3,
                    PrizeKind::Premium6m => 6,
                    PrizeKind::Premium12m => 12,
                    _ => unreachable!(),
                };
                if !PREMIUM_TIER_STAR_COSTS.contains(&(month_count, star_cost)) {
                    return Err(AwardError::InvalidPremiumTier(month_count, star_cost));
                }
                self.platform.gift_premium_subscription(plan.user_id, month_count, star_cost).await?;
                self.metrics.award_premium_total.fetch_add(1, Ordering::Relaxed);
                Ok(AwardJournalEntry::Completed { kind: item.kind, prize_id: Some(item.id.clone()), external_id: None })
            }
            PrizeKind::Internal => {
                self.metrics.award_internal_total.fetch_add(1, Ordering::Relaxed);
                Ok(AwardJournalEntry::Completed { kind: PrizeKind::Internal, prize_id: Some(item.id.clone()), external_id: None })
            }
        }
    }

    /// Look up a gift whose `starCount` matches `star_cost`, refreshing the
    /// cache if stale. Warns (does not fail) on multiple matches.
    async fn find_gift(&self, star_cost: i64) -> Result<Gift, AwardError> {
        let mut cache = self.gift_cache.lock().await;
        let stale = cache.as_ref().map(|c| c.fetched_at.elapsed() > Duration::from_secs(GIFT_CACHE_TTL_SECS)).unwrap_or(true);
        if stale {
            let gifts = self.platform.get_available_gifts().await?;
            *cache = Some(GiftCache { gifts, fetched_at: Instant::now() });
        }

        let gifts = &cache.as_ref().expect("cache populated above").gifts;
        let matches: Vec<&Gift> = gifts.iter().filter(|g| g.star_count == star_cost).collect();
        if matches.len() > 1 {
            warn!(star_cost, count = matches.len(), "multiple gifts match star cost, using first");
        }
        matches.first().map(|g| (*g).clone()).ok_or(AwardError::GiftNotFound(star_cost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gateway_core::{CaseConfig, PrizeItem, StaticCaseStore};
    use gateway_ingress::platform_client::{PlatformError, TelegramUpdate, WebhookInfo};
    use std::sync::Arc;

    struct FakePlatform {
        gifts: Vec<Gift>,
        fail_send_gift: bool,
    }

    #[async_trait]
    impl PlatformApi for FakePlatform {
        async fn set_webhook(&self, _: &str, _: &str, _: Option<&[&str]>, _: Option<u32>, _: Option<bool>) -> Result<bool, PlatformError> { Ok(true) }
        async fn delete_webhook(&self, _: bool) -> Result<bool, PlatformError> { Ok(true) }
        async fn get_webhook_info(&self) -> Result<WebhookInfo, PlatformError> { Ok(WebhookInfo::default()) }
        async fn create_invoice_link(&self, _: &str, _: &str, _: &str, _: &str, _: i64) -> Result<String, PlatformError> { Ok(String::new()) }
        async fn answer_pre_checkout_query(&self, _: &str, _: bool, _: Option<&str>) -> Result<bool, PlatformError> { Ok(true) }
        async fn get_updates(&self, _: Option<i64>, _: u64, _: Option<&[&str]>) -> Result<Vec<TelegramUpdate>, PlatformError> { Ok(vec![]) }
        async fn send_message(&self, _: i64, _: &str, _: bool, _: Option<i64>) -> Result<(), PlatformError> { Ok(()) }
        async fn send_gift(&self, _: UserId, _: &str, _: bool) -> Result<(), PlatformError> {
            if self.fail_send_gift { Err(PlatformError::Permanent("no such gift".into())) } else { Ok(()) }
        }
        async fn gift_premium_subscription(&self, _: UserId, _: u8, _: i64) -> Result<(), PlatformError> { Ok(()) }
        async fn refund_star_payment(&self, _: UserId, _: &str) -> Result<(), PlatformError> { Ok(()) }
        async fn get_available_gifts(&self) -> Result<Vec<Gift>, PlatformError> { Ok(self.gifts.clone()) }
    }

    fn case_with_gift() -> CaseConfig {
        CaseConfig {
            id: "c1".into(),
            title: "Case".into(),
            price_stars: 700,
            items: vec![PrizeItem { id: "p1".into(), kind: PrizeKind::Gift, star_cost: Some(700), probability_ppm: 1_000_000 }],
        }
    }

    fn draw_outcome(result_item_id: Option<&str>) -> DrawOutcome {
        let receipt = DrawReceipt {
            day_utc: "2026-07-26".into(),
            server_seed_hash: "h".into(),
            client_seed: "cs".into(),
            roll_hex: "rh".into(),
            ppm: 1,
        };
        let record = gateway_fairness::journal::RngDrawRecord {
            case_id: "c1".into(),
            user_id: 42,
            nonce: "n".into(),
            server_seed_hash: "h".into(),
            roll_hex: "rh".into(),
            ppm: 1,
            result_item_id: result_item_id.map(String::from),
            created_at: 0,
        };
        DrawOutcome { record, receipt, was_idempotent: false }
    }

    fn plan(result_item_id: Option<&str>) -> AwardPlan {
        AwardPlan::from_draw(
            ChargeId::from_raw("CH-1").unwrap(),
            None,
            700,
            "XTR".into(),
            42,
            "c1".into(),
            "n".into(),
            &draw_outcome(result_item_id),
        )
    }

    fn service(platform: FakePlatform) -> AwardService {
        let cases = Arc::new(StaticCaseStore::new(vec![case_with_gift()]));
        let platform: Arc<dyn PlatformApi> = Arc::new(platform);
        let refunds = Arc::new(RefundService::new(platform.clone()));
        AwardService::new(platform, cases, refunds)
    }

    #[tokio::test]
    async fn delivers_gift_and_records_completion() {
        let svc = service(FakePlatform { gifts: vec![Gift { id: "g1".into(), star_count: 700 }], fail_send_gift: false });
        let entry = svc.schedule(&plan(Some("p1"))).await.unwrap();
        assert!(matches!(entry, AwardJournalEntry::Completed { kind: PrizeKind::Gift, .. }));
        assert_eq!(svc.metrics.award_gift_total.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_schedule_is_idempotent() {
        let svc = service(FakePlatform { gifts: vec![Gift { id: "g1".into(), star_count: 700 }], fail_send_gift: false });
        let p = plan(Some("p1"));
        svc.schedule(&p).await.unwrap();
        svc.schedule(&p).await.unwrap();
        assert_eq!(svc.metrics.award_gift_total.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_gift_fails_and_reverts_journal() {
        let svc = service(FakePlatform { gifts: vec![], fail_send_gift: false });
        let result = svc.schedule(&plan(Some("p1"))).await;
        assert!(result.is_err());
        assert_eq!(svc.metrics.award_fail_total.load(Ordering::SeqCst), 1);
        assert!(svc.journal.lock().unwrap().get(&ChargeId::from_raw("CH-1").unwrap()).is_none());
    }

    #[tokio::test]
    async fn missing_result_item_id_records_internal_prize() {
        let svc = service(FakePlatform { gifts: vec![], fail_send_gift: false });
        let entry = svc.schedule(&plan(None)).await.unwrap();
        assert!(matches!(entry, AwardJournalEntry::Completed { kind: PrizeKind::Internal, prize_id: None, .. }));
    }
}
