//! Update router (component K). Implements the dispatcher's `UpdateHandler`
//! trait and fans each parsed update out to the pre-checkout or
//! successful-payment handler by variant; everything else is a no-op.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, warn};

use gateway_fairness::journal::RngJournal;
use gateway_ingress::dispatcher::UpdateHandler;
use gateway_ingress::update::{Update, UpdateKind};

use crate::pre_checkout::PreCheckoutHandler;
use crate::successful_payment::SuccessfulPaymentHandler;

pub struct UpdateRouter<J: RngJournal> {
    pre_checkout: Arc<PreCheckoutHandler>,
    successful_payment: Arc<SuccessfulPaymentHandler<J>>,
    now_fn: Box<dyn Fn() -> gateway_core::Timestamp + Send + Sync>,
}

impl<J: RngJournal> UpdateRouter<J> {
    pub fn new(
        pre_checkout: Arc<PreCheckoutHandler>,
        successful_payment: Arc<SuccessfulPaymentHandler<J>>,
        now_fn: impl Fn() -> gateway_core::Timestamp + Send + Sync + 'static,
    ) -> Self {
        Self { pre_checkout, successful_payment, now_fn: Box::new(now_fn) }
    }
}

#[async_trait]
impl<J: RngJournal + 'static> UpdateHandler for UpdateRouter<J> {
    async fn handle(&self, update: Update) {
        match update.kind {
            UpdateKind::PreCheckoutQuery(query) => {
                if let Err(e) = self.pre_checkout.handle(&query).await {
                    warn!(update_id = update.update_id, error = %e, "pre-checkout handling failed");
                }
            }
            UpdateKind::SuccessfulPayment { chat, from, payment } => {
                let now = (self.now_fn)();
                if let Err(e) = self.successful_payment.handle(&chat, from.as_ref(), &payment, now).await {
                    if e.is_cancellation() {
                        error!(update_id = update.update_id, "successful-payment handling cancelled");
                    } else {
                        warn!(update_id = update.update_id, error = %e, "successful-payment handling failed");
                    }
                }
            }
            UpdateKind::Message(_) | UpdateKind::Raw(_) => {
                // No handler registered for plain messages or unrecognized
                // update shapes; they're accepted and dropped silently.
            }
        }
    }
}
