//! Boots the assembled HTTP router against an in-memory journal and a fake
//! platform client, then drives a couple of real requests through it. Not a
//! substitute for the per-crate unit tests — this only checks that the wiring
//! in `main.rs` produces a router that actually answers.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use gateway_antifraud::{SuspiciousIpStore, TokenBucketStore, VelocityChecker, VelocityConfig};
use gateway_api::AppState;
use gateway_core::{CaseConfig, CaseStore, PrizeItem, PrizeKind, StaticCaseStore};
use gateway_fairness::{InMemoryRngJournal, RngJournalBackend, RngService};
use gateway_ingress::dedup::InMemoryDedupStore;
use gateway_ingress::dispatcher::{DispatcherConfig, UpdateDispatcher};
use gateway_ingress::platform_client::{Gift, PlatformApi, PlatformError, TelegramUpdate, WebhookInfo};
use gateway_payments::{InvoiceService, PreCheckoutHandler, SuccessfulPaymentHandler, UpdateRouter};
use gateway_settlement::{AwardService, RefundService};

struct FakePlatform;

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
        Ok(true)
    }
    async fn get_webhook_info(&self) -> Result<WebhookInfo, PlatformError> {
        Ok(WebhookInfo::default())
    }
    async fn create_invoice_link(&self, _t: &str, _d: &str, _p: &str, _c: &str, _a: i64) -> Result<String, PlatformError> {
        Ok("https://t.me/invoice/test".into())
    }
    async fn answer_pre_checkout_query(&self, _id: &str, _ok: bool, _err: Option<&str>) -> Result<bool, PlatformError> {
        Ok(true)
    }
    async fn get_updates(&self, _offset: Option<i64>, _timeout: u64, _allowed: Option<&[&str]>) -> Result<Vec<TelegramUpdate>, PlatformError> {
        Ok(vec![])
    }
    async fn send_message(&self, _chat: i64, _text: &str, _notify: bool, _reply_to: Option<i64>) -> Result<(), PlatformError> {
        Ok(())
    }
    async fn send_gift(&self, _user: gateway_core::UserId, _gift_id: &str, _pay_for_upgrade: bool) -> Result<(), PlatformError> {
        Ok(())
    }
    async fn gift_premium_subscription(&self, _user: gateway_core::UserId, _months: u8, _stars: i64) -> Result<(), PlatformError> {
        Ok(())
    }
    async fn refund_star_payment(&self, _user: gateway_core::UserId, _charge_id: &str) -> Result<(), PlatformError> {
        Ok(())
    }
    async fn get_available_gifts(&self) -> Result<Vec<Gift>, PlatformError> {
        Ok(vec![])
    }
}

fn sample_case() -> CaseConfig {
    CaseConfig {
        id: "c1".into(),
        title: "Case One".into(),
        price_stars: 700,
        items: vec![PrizeItem { id: "p1".into(), kind: PrizeKind::Gift, star_cost: Some(700), probability_ppm: 1_000_000 }],
    }
}

async fn spawn_test_server() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let cases: Arc<dyn CaseStore> = Arc::new(StaticCaseStore::new(vec![sample_case()]));
    let platform: Arc<dyn PlatformApi> = Arc::new(FakePlatform);
    let rng = Arc::new(RngService::new(
        RngJournalBackend::Memory(InMemoryRngJournal::new()),
        b"test-fairness-key-0123456789abcd".to_vec(),
    ));

    let velocity = Arc::new(VelocityChecker::new(VelocityConfig::default()));
    let invoices = Arc::new(InvoiceService::new(platform.clone(), cases.clone(), None));
    let pre_checkout = Arc::new(PreCheckoutHandler::new(platform.clone(), cases.clone(), velocity.clone()));
    let refunds = Arc::new(RefundService::new(platform.clone()));
    let award = Arc::new(AwardService::new(platform.clone(), cases.clone(), refunds.clone()));
    let successful_payment =
        Arc::new(SuccessfulPaymentHandler::new(rng.clone(), cases.clone(), award, refunds, platform.clone(), false));
    let handler = Arc::new(UpdateRouter::new(pre_checkout, successful_payment, || 0));

    let dispatcher_config = DispatcherConfig::default();
    let dedup = Arc::new(InMemoryDedupStore::new(dispatcher_config.dedup_ttl_ms));
    let dispatcher = Arc::new(UpdateDispatcher::new(dispatcher_config, dedup, handler));
    dispatcher.start().await;

    let state = Arc::new(AppState {
        platform,
        dispatcher,
        invoices,
        rng,
        cases,
        suspicious_ips: Arc::new(SuspiciousIpStore::new()),
        token_buckets: Arc::new(TokenBucketStore::new()),
        velocity,
        ip_bucket_params: gateway_antifraud::BucketParams { capacity: 20.0, refill_per_sec: 1.0, ttl_seconds: 3600 },
        subject_bucket_params: gateway_antifraud::BucketParams { capacity: 10.0, refill_per_sec: 0.5, ttl_seconds: 3600 },
        trust_proxy: false,
        bot_token: "test-bot-token".into(),
        webhook_secret_token: "test-webhook-secret".into(),
        admin_token: Some("test-admin-token".into()),
    });

    let app = gateway_api::router(state, "/webhook");
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await.unwrap();
    });
    (addr, handle)
}

#[tokio::test]
async fn fairness_today_endpoint_responds() {
    let (addr, server) = spawn_test_server().await;
    let resp = reqwest::get(format!("http://{addr}/fairness/today")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body.get("dayUtc").is_some() || body.get("day_utc").is_some());
    server.abort();
}

#[tokio::test]
async fn webhook_rejects_missing_secret() {
    let (addr, server) = spawn_test_server().await;
    let client = reqwest::Client::new();
    let resp = client.post(format!("http://{addr}/webhook")).body("{}").send().await.unwrap();
    assert_eq!(resp.status(), 401);
    server.abort();
}

#[tokio::test]
async fn admin_endpoint_requires_token() {
    let (addr, server) = spawn_test_server().await;
    let resp = reqwest::get(format!("http://{addr}/internal/telegram/webhook/info")).await.unwrap();
    assert_eq!(resp.status(), 401);
    server.abort();
}
