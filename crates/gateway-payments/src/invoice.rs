//! Mini-app invoice issuance (component L). Looks up the requested case,
//! builds a compact, round-trippable payload, and asks the platform for an
//! invoice link.

use std::sync::Arc;

use tracing::info;

use gateway_core::{CaseStore, GatewayError, PaymentPayload, Timestamp, UserId, XTR_CURRENCY};
use gateway_crypto::nonce;
use gateway_ingress::platform_client::PlatformApi;

const NONCE_LEN: usize = 16;

#[derive(Debug, Clone, serde::Serialize)]
pub struct InvoiceResult {
    #[serde(rename = "invoiceLink")]
    pub invoice_link: String,
    pub payload: PaymentPayload,
}

pub struct InvoiceService {
    platform: Arc<dyn PlatformApi>,
    cases: Arc<dyn CaseStore>,
    title_prefix: Option<String>,
}

impl InvoiceService {
    pub fn new(platform: Arc<dyn PlatformApi>, cases: Arc<dyn CaseStore>, title_prefix: Option<String>) -> Self {
        Self { platform, cases, title_prefix }
    }

    pub async fn create_invoice(
        &self,
        case_id: &str,
        user_id: UserId,
        now: Timestamp,
    ) -> Result<InvoiceResult, GatewayError> {
        if case_id.trim().is_empty() {
            return Err(GatewayError::InvalidCaseId);
        }
        let case = self.cases.get(case_id).ok_or(GatewayError::InvalidCaseId)?;

        let payload = PaymentPayload::new(case.id.clone(), user_id, nonce(NONCE_LEN), now);
        let encoded = payload.encode().map_err(|e| GatewayError::Serialization(e.to_string()))?;
        if encoded.len() > PaymentPayload::MAX_ENCODED_BYTES {
            return Err(GatewayError::InvalidPayload);
        }

        let title = match &self.title_prefix {
            Some(prefix) => format!("{prefix}{}", case.title),
            None => case.title.clone(),
        };

        let invoice_link = self
            .platform
            .create_invoice_link(&title, &case.title, &encoded, XTR_CURRENCY, case.price_stars)
            .await
            .map_err(|e| {
                if e.is_transient() {
                    GatewayError::UpstreamTransient(e.to_string())
                } else {
                    GatewayError::UpstreamPermanent(e.to_string())
                }
            })?;

        info!(case_id = %case.id, user_id, "invoice issued");
        Ok(InvoiceResult { invoice_link, payload })
    }
}
