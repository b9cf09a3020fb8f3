//! Pre-checkout validation (component M). Runs the full payload/amount/
//! currency check and issues exactly one `answerPreCheckoutQuery` call,
//! the whole sequence bounded by a fixed deadline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use gateway_antifraud::{EventType, VelocityAction, VelocityChecker, VelocityEvent};
use gateway_core::{CaseStore, GatewayError, PaymentPayload, PRE_CHECKOUT_DEADLINE_SECS, PAYMENT_REJECTED_MESSAGE, XTR_CURRENCY};
use gateway_ingress::platform_client::PlatformApi;
use gateway_ingress::update::PreCheckoutQuery;

/// Telegram delivers pre-checkout queries server-to-server; there is no
/// end-user network address to key velocity state on, so events from this
/// path share one fixed IP bucket and rely on `subject_id` to discriminate.
const PRE_CHECKOUT_EVENT_IP: &str = "telegram-backend";
const PRE_CHECKOUT_EVENT_PATH: &str = "telegram/pre_checkout_query";

#[derive(Default)]
pub struct PreCheckoutMetrics {
    pub ok_total: AtomicU64,
    pub fail_total: AtomicU64,
}

pub struct PreCheckoutHandler {
    platform: Arc<dyn PlatformApi>,
    cases: Arc<dyn CaseStore>,
    velocity: Arc<VelocityChecker>,
    pub metrics: PreCheckoutMetrics,
}

impl PreCheckoutHandler {
    pub fn new(platform: Arc<dyn PlatformApi>, cases: Arc<dyn CaseStore>, velocity: Arc<VelocityChecker>) -> Self {
        Self { platform, cases, velocity, metrics: PreCheckoutMetrics::default() }
    }

    /// Validate and answer `query` within the fixed deadline. Always calls
    /// `answerPreCheckoutQuery` exactly once, unless the deadline elapses
    /// first (in which case no half-answer is sent and the error is
    /// surfaced instead).
    pub async fn handle(&self, query: &PreCheckoutQuery) -> Result<(), GatewayError> {
        tokio::time::timeout(Duration::from_secs(PRE_CHECKOUT_DEADLINE_SECS), self.validate_and_answer(query))
            .await
            .map_err(|_| GatewayError::UpstreamTransient("pre-checkout deadline exceeded".into()))?
    }

    async fn validate_and_answer(&self, query: &PreCheckoutQuery) -> Result<(), GatewayError> {
        let event = VelocityEvent {
            event_type: EventType::PreCheckout,
            ip: PRE_CHECKOUT_EVENT_IP,
            subject_id: Some(query.from.id),
            path: PRE_CHECKOUT_EVENT_PATH,
            ua: None,
            ts_ms: gateway_ingress::now_ms(),
        };
        let velocity_decision = self.velocity.check_and_record(&event);
        if velocity_decision.action == VelocityAction::HardBlockBeforePayment {
            warn!(query_id = %query.id, score = velocity_decision.score, "pre-checkout hard-blocked by velocity check");
            self.answer(query, false, Some(PAYMENT_REJECTED_MESSAGE)).await?;
            self.metrics.fail_total.fetch_add(1, Ordering::Relaxed);
            return Err(GatewayError::RateLimited { kind: "velocity", retry_after_secs: 5 });
        }

        match self.validate(query) {
            Ok(()) => {
                self.answer(query, true, None).await?;
                self.metrics.ok_total.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(reason) => {
                warn!(reason = reason.reason_code(), query_id = %query.id, "pre-checkout rejected");
                self.answer(query, false, Some(PAYMENT_REJECTED_MESSAGE)).await?;
                self.metrics.fail_total.fetch_add(1, Ordering::Relaxed);
                Err(reason)
            }
        }
    }

    fn validate(&self, query: &PreCheckoutQuery) -> Result<(), GatewayError> {
        let payload = PaymentPayload::decode(&query.invoice_payload).map_err(|_| GatewayError::InvalidPayload)?;

        if payload.user_id != query.from.id {
            return Err(GatewayError::UserMismatch);
        }
        if payload.nonce.trim().is_empty() {
            return Err(GatewayError::NonceBlank);
        }
        if payload.case_id.trim().is_empty() {
            return Err(GatewayError::CaseIdBlank);
        }

        let case = self.cases.get(&payload.case_id).ok_or(GatewayError::CaseNotFound)?;

        if query.currency != XTR_CURRENCY {
            return Err(GatewayError::InvalidCurrency);
        }
        if query.total_amount != case.price_stars {
            return Err(GatewayError::InvalidAmount);
        }
        Ok(())
    }

    async fn answer(&self, query: &PreCheckoutQuery, ok: bool, error_message: Option<&str>) -> Result<(), GatewayError> {
        self.platform
            .answer_pre_checkout_query(&query.id, ok, error_message)
            .await
            .map(|_| ())
            .map_err(|e| {
                if e.is_transient() {
                    GatewayError::UpstreamTransient(e.to_string())
                } else {
                    GatewayError::UpstreamPermanent(e.to_string())
                }
            })
    }
}
