//! Successful-payment handling (component N) — the authoritative,
//! refunding variant (see Design Notes' resolution of the two-variant
//! ambiguity in the source). Charge-id keyed, idempotent, draws a prize,
//! schedules its award, and reverts to a refund on any failure after the
//! charge has been accepted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use gateway_core::{CaseStore, ChargeId, GatewayError, PaymentPayload, Timestamp, XTR_CURRENCY};
use gateway_fairness::{FairnessError, RngService};
use gateway_fairness::journal::RngJournal;
use gateway_ingress::platform_client::PlatformApi;
use gateway_ingress::update::{Chat, SuccessfulPayment, TelegramUser};
use gateway_settlement::{AwardError, AwardPlan, AwardService, RefundReason, RefundService};

#[derive(Debug, Clone)]
pub enum ProcessedPaymentState {
    InProgress,
    Completed,
    Refunded(String),
    Failed(String),
}

#[derive(Default)]
pub struct SuccessfulPaymentMetrics {
    pub pay_success_total: AtomicU64,
    pub pay_success_idempotent_total: AtomicU64,
    pub pay_fail_total: AtomicU64,
}

pub struct SuccessfulPaymentHandler<J: RngJournal> {
    rng: Arc<RngService<J>>,
    cases: Arc<dyn CaseStore>,
    award: Arc<AwardService>,
    refunds: Arc<RefundService>,
    platform: Arc<dyn PlatformApi>,
    receipts_enabled: bool,
    journal: Mutex<HashMap<ChargeId, ProcessedPaymentState>>,
    pub metrics: SuccessfulPaymentMetrics,
}

impl<J: RngJournal> SuccessfulPaymentHandler<J> {
    pub fn new(
        rng: Arc<RngService<J>>,
        cases: Arc<dyn CaseStore>,
        award: Arc<AwardService>,
        refunds: Arc<RefundService>,
        platform: Arc<dyn PlatformApi>,
        receipts_enabled: bool,
    ) -> Self {
        Self {
            rng,
            cases,
            award,
            refunds,
            platform,
            receipts_enabled,
            journal: Mutex::new(HashMap::new()),
            metrics: SuccessfulPaymentMetrics::default(),
        }
    }

    pub async fn handle(
        &self,
        chat: &Chat,
        from: Option<&TelegramUser>,
        payment: &SuccessfulPayment,
        now: Timestamp,
    ) -> Result<(), GatewayError> {
        let Some(charge_id) = ChargeId::from_raw(&payment.telegram_payment_charge_id) else {
            self.metrics.pay_fail_total.fetch_add(1, Ordering::Relaxed);
            return Err(GatewayError::ChargeIdBlank);
        };

        {
            let mut journal = self.journal.lock().expect("payment journal mutex poisoned");
            if journal.contains_key(&charge_id) {
                info!(charge_id = %charge_id, "duplicate successful-payment message, idempotent replay");
                self.metrics.pay_success_idempotent_total.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            journal.insert(charge_id.clone(), ProcessedPaymentState::InProgress);
        }

        match self.process(&charge_id, chat, from, payment, now).await {
            Ok(()) => {
                self.set_state(&charge_id, ProcessedPaymentState::Completed);
                self.metrics.pay_success_total.fetch_add(1, Ordering::Relaxed);
                if self.receipts_enabled {
                    let text = format!("Thanks! Your payment ({} stars) is complete.", payment.total_amount);
                    if let Err(e) = self.platform.send_message(chat.id, &text, true, None).await {
                        warn!(charge_id = %charge_id, error = %e, "failed to send payment receipt");
                    }
                }
                Ok(())
            }
            Err(HandleOutcome::Cancelled) => {
                self.journal.lock().expect("payment journal mutex poisoned").remove(&charge_id);
                Err(GatewayError::Cancelled)
            }
            Err(HandleOutcome::Rejected(reason)) => {
                self.metrics.pay_fail_total.fetch_add(1, Ordering::Relaxed);
                let refunded = self.maybe_refund(&charge_id, payment, RefundReason::Validation(reason.to_string())).await;
                self.set_state(&charge_id, refunded_state(refunded, reason.to_string()));
                Err(reason)
            }
            Err(HandleOutcome::DrawFailed(detail)) => {
                self.metrics.pay_fail_total.fetch_add(1, Ordering::Relaxed);
                let refunded = self.maybe_refund(&charge_id, payment, RefundReason::Award(detail.clone())).await;
                self.set_state(&charge_id, refunded_state(refunded, detail.clone()));
                Err(GatewayError::UpstreamTransient(detail))
            }
            Err(HandleOutcome::AwardFailed(detail)) => {
                self.metrics.pay_fail_total.fetch_add(1, Ordering::Relaxed);
                let refunded = self.maybe_refund(&charge_id, payment, RefundReason::Award(detail.clone())).await;
                self.set_state(&charge_id, refunded_state(refunded, detail.clone()));
                Err(GatewayError::UpstreamPermanent(detail))
            }
        }
    }

    async fn process(
        &self,
        charge_id: &ChargeId,
        _chat: &Chat,
        from: Option<&TelegramUser>,
        payment: &SuccessfulPayment,
        now: Timestamp,
    ) -> Result<(), HandleOutcome> {
        let payload = self.validate(from, payment)?;

        let case = self.cases.get(&payload.case_id).ok_or(HandleOutcome::Rejected(GatewayError::CaseNotFound))?;

        let draw = self
            .rng
            .draw(&case, payload.user_id, &payload.nonce, now)
            .await
            .map_err(|e| HandleOutcome::DrawFailed(fairness_error_detail(e)))?;

        let plan = AwardPlan::from_draw(
            charge_id.clone(),
            payment.provider_payment_charge_id.clone(),
            payment.total_amount,
            payment.currency.clone(),
            payload.user_id,
            payload.case_id.clone(),
            payload.nonce.clone(),
            &draw,
        );

        self.award.schedule(&plan).await.map_err(|e| match e {
            AwardError::Cancelled => HandleOutcome::Cancelled,
            other => HandleOutcome::AwardFailed(other.to_string()),
        })?;

        Ok(())
    }

    fn validate(&self, from: Option<&TelegramUser>, payment: &SuccessfulPayment) -> Result<PaymentPayload, HandleOutcome> {
        let payload = PaymentPayload::decode(&payment.invoice_payload)
            .map_err(|_| HandleOutcome::Rejected(GatewayError::InvalidPayload))?;

        if let Some(from) = from {
            if from.id != payload.user_id {
                return Err(HandleOutcome::Rejected(GatewayError::SenderMismatch));
            }
        }
        if payload.nonce.trim().is_empty() {
            return Err(HandleOutcome::Rejected(GatewayError::NonceBlank));
        }
        if payload.case_id.trim().is_empty() {
            return Err(HandleOutcome::Rejected(GatewayError::CaseIdBlank));
        }
        if payment.currency != XTR_CURRENCY {
            return Err(HandleOutcome::Rejected(GatewayError::InvalidCurrency));
        }

        let case = self.cases.get(&payload.case_id).ok_or(HandleOutcome::Rejected(GatewayError::CaseNotFound))?;
        if payment.total_amount != case.price_stars {
            return Err(HandleOutcome::Rejected(GatewayError::InvalidAmount));
        }

        Ok(payload)
    }

    async fn maybe_refund(&self, charge_id: &ChargeId, payment: &SuccessfulPayment, reason: RefundReason) -> bool {
        if payment.currency != XTR_CURRENCY {
            return false;
        }
        let user_id = match PaymentPayload::decode(&payment.invoice_payload) {
            Ok(p) => p.user_id,
            Err(_) => return false,
        };
        self.refunds.refund_star(user_id, charge_id.clone(), reason).await.is_ok()
    }

    fn set_state(&self, charge_id: &ChargeId, state: ProcessedPaymentState) {
        self.journal.lock().expect("payment journal mutex poisoned").insert(charge_id.clone(), state);
    }
}

/// Internal classification of why `process` failed, distinct from the
/// `GatewayError` surfaced to the caller so the handler can decide whether
/// to attempt a refund and which terminal state to record.
enum HandleOutcome {
    Cancelled,
    Rejected(GatewayError),
    DrawFailed(String),
    AwardFailed(String),
}

fn refunded_state(refunded: bool, detail: String) -> ProcessedPaymentState {
    if refunded {
        ProcessedPaymentState::Refunded(detail)
    } else {
        ProcessedPaymentState::Failed(detail)
    }
}

fn fairness_error_detail(e: FairnessError) -> String {
    e.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gateway_core::{CaseConfig, PrizeItem, PrizeKind, StaticCaseStore};
    use gateway_fairness::InMemoryRngJournal;
    use gateway_ingress::platform_client::{Gift, PlatformError, TelegramUpdate, WebhookInfo};

    struct FakePlatform {
        gifts: Vec<Gift>,
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
        async fn send_gift(&self, _: gateway_core::UserId, _: &str, _: bool) -> Result<(), PlatformError> { Ok(()) }
        async fn gift_premium_subscription(&self, _: gateway_core::UserId, _: u8, _: i64) -> Result<(), PlatformError> { Ok(()) }
        async fn refund_star_payment(&self, _: gateway_core::UserId, _: &str) -> Result<(), PlatformError> { Ok(()) }
        async fn get_available_gifts(&self) -> Result<Vec<Gift>, PlatformError> { Ok(self.gifts.clone()) }
    }

    fn case() -> CaseConfig {
        CaseConfig {
            id: "c1".into(),
            title: "Case".into(),
            price_stars: 700,
            items: vec![PrizeItem { id: "p1".into(), kind: PrizeKind::Gift, star_cost: Some(700), probability_ppm: 1_000_000 }],
        }
    }

    fn payment(charge_id: &str, payload: &PaymentPayload) -> SuccessfulPayment {
        SuccessfulPayment {
            currency: "XTR".into(),
            total_amount: 700,
            invoice_payload: payload.encode().unwrap(),
            telegram_payment_charge_id: charge_id.into(),
            provider_payment_charge_id: None,
        }
    }

    fn handler(gifts: Vec<Gift>) -> SuccessfulPaymentHandler<InMemoryRngJournal> {
        let platform: Arc<dyn PlatformApi> = Arc::new(FakePlatform { gifts });
        let cases: Arc<dyn CaseStore> = Arc::new(StaticCaseStore::new(vec![case()]));
        let rng = Arc::new(RngService::new(InMemoryRngJournal::new(), b"test-fairness-key-0123456789abcd".to_vec()));
        let refunds = Arc::new(RefundService::new(platform.clone()));
        let award = Arc::new(AwardService::new(platform.clone(), cases.clone(), refunds.clone()));
        SuccessfulPaymentHandler::new(rng, cases, award, refunds, platform, false)
    }

    #[tokio::test]
    async fn happy_path_completes_and_awards_gift() {
        let h = handler(vec![Gift { id: "g1".into(), star_count: 700 }]);
        let payload = PaymentPayload::new("c1", 42, "n1", 0);
        let chat = Chat { id: 1 };
        let from = TelegramUser { id: 42 };
        let p = payment("CH-1", &payload);
        h.handle(&chat, Some(&from), &p, 1_753_516_800).await.unwrap();
        assert_eq!(h.metrics.pay_success_total.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_charge_is_idempotent() {
        let h = handler(vec![Gift { id: "g1".into(), star_count: 700 }]);
        let payload = PaymentPayload::new("c1", 42, "n1", 0);
        let chat = Chat { id: 1 };
        let from = TelegramUser { id: 42 };
        let p = payment("CH-2", &payload);
        h.handle(&chat, Some(&from), &p, 1_753_516_800).await.unwrap();
        h.handle(&chat, Some(&from), &p, 1_753_516_800).await.unwrap();
        assert_eq!(h.metrics.pay_success_total.load(Ordering::SeqCst), 1);
        assert_eq!(h.metrics.pay_success_idempotent_total.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_gift_triggers_refund_and_failed_or_refunded_state() {
        let h = handler(vec![]);
        let payload = PaymentPayload::new("c1", 42, "n1", 0);
        let chat = Chat { id: 1 };
        let from = TelegramUser { id: 42 };
        let p = payment("CH-3", &payload);
        let err = h.handle(&chat, Some(&from), &p, 1_753_516_800).await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamPermanent(_)));
        assert_eq!(h.metrics.pay_fail_total.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blank_charge_id_is_rejected() {
        let h = handler(vec![]);
        let payload = PaymentPayload::new("c1", 42, "n1", 0);
        let chat = Chat { id: 1 };
        let mut p = payment("  ", &payload);
        p.telegram_payment_charge_id = "   ".into();
        let err = h.handle(&chat, None, &p, 0).await.unwrap_err();
        assert!(matches!(err, GatewayError::ChargeIdBlank));
    }
}
