use std::sync::Arc;

use gateway_antifraud::{SuspiciousIpStore, TokenBucketStore, VelocityChecker};
use gateway_antifraud::token_bucket::BucketParams;
use gateway_core::CaseStore;
use gateway_fairness::{RngJournalBackend, RngService};
use gateway_ingress::dispatcher::UpdateDispatcher;
use gateway_ingress::platform_client::PlatformApi;
use gateway_payments::InvoiceService;

/// Everything a handler needs, shared behind one `Arc` per axum convention.
pub struct AppState {
    pub platform: Arc<dyn PlatformApi>,
    pub dispatcher: Arc<UpdateDispatcher>,
    pub invoices: Arc<InvoiceService>,
    pub rng: Arc<RngService<RngJournalBackend>>,
    pub cases: Arc<dyn CaseStore>,

    pub suspicious_ips: Arc<SuspiciousIpStore>,
    pub token_buckets: Arc<TokenBucketStore>,
    pub velocity: Arc<VelocityChecker>,
    pub ip_bucket_params: BucketParams,
    pub subject_bucket_params: BucketParams,
    pub trust_proxy: bool,

    pub bot_token: String,
    pub webhook_secret_token: String,
    pub admin_token: Option<String>,
}
