//! Retrying, bounded-jitter HTTP client for the platform's Bot API
//! (component G). Every method sends a JSON request and expects
//! `{ok, result?, description?}`; network/timeout/5xx errors are retried,
//! 4xx and business `ok=false` are surfaced immediately.

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use gateway_core::{UserId, PLATFORM_CLIENT_CONNECT_TIMEOUT_SECS, PLATFORM_CLIENT_REQUEST_TIMEOUT_SECS};

use crate::retry::{RetryOutcome, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("upstream transient error: {0}")]
    Transient(String),
    #[error("upstream permanent error: {0}")]
    Permanent(String),
}

impl PlatformError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Transient(_))
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhookInfo {
    pub url: String,
    #[serde(default)]
    pub pending_update_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gift {
    pub id: String,
    pub star_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GiftList {
    pub gifts: Vec<Gift>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUpdate(pub Value);

/// The platform's Bot-API surface this gateway depends on (§6 "Platform
/// client"). A trait so the payments/award/refund services can be tested
/// against a fake without a network.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn set_webhook(
        &self,
        url: &str,
        secret: &str,
        allowed_updates: Option<&[&str]>,
        max_connections: Option<u32>,
        drop_pending: Option<bool>,
    ) -> Result<bool, PlatformError>;

    async fn delete_webhook(&self, drop_pending: bool) -> Result<bool, PlatformError>;

    async fn get_webhook_info(&self) -> Result<WebhookInfo, PlatformError>;

    async fn create_invoice_link(
        &self,
        title: &str,
        description: &str,
        payload: &str,
        currency: &str,
        price_amount: i64,
    ) -> Result<String, PlatformError>;

    async fn answer_pre_checkout_query(
        &self,
        id: &str,
        ok: bool,
        error_message: Option<&str>,
    ) -> Result<bool, PlatformError>;

    async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
        allowed_updates: Option<&[&str]>,
    ) -> Result<Vec<TelegramUpdate>, PlatformError>;

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        disable_notification: bool,
        reply_to_message_id: Option<i64>,
    ) -> Result<(), PlatformError>;

    async fn send_gift(&self, user_id: UserId, gift_id: &str, pay_for_upgrade: bool) -> Result<(), PlatformError>;

    async fn gift_premium_subscription(
        &self,
        user_id: UserId,
        month_count: u8,
        star_count: i64,
    ) -> Result<(), PlatformError>;

    async fn refund_star_payment(&self, user_id: UserId, charge_id: &str) -> Result<(), PlatformError>;

    async fn get_available_gifts(&self) -> Result<Vec<Gift>, PlatformError>;
}

pub struct PlatformHttpClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl PlatformHttpClient {
    pub fn new(bot_token: &str) -> Self {
        Self::with_retry(bot_token, RetryPolicy::default())
    }

    pub fn with_retry(bot_token: &str, retry: RetryPolicy) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(PLATFORM_CLIENT_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(PLATFORM_CLIENT_CONNECT_TIMEOUT_SECS))
            .build()
            .expect("reqwest client builds with well-formed timeouts");
        Self { http, base_url: format!("https://api.telegram.org/bot{bot_token}"), retry }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T, PlatformError> {
        let url = format!("{}/{method}", self.base_url);
        self.retry
            .run(|attempt| {
                let url = url.clone();
                let body = body.clone();
                async move {
                    debug!(method = %method, attempt, "calling platform api");
                    let response = self.http.post(&url).json(&body).send().await.map_err(|e| {
                        if e.is_timeout() || e.is_connect() {
                            RetryOutcome::Transient(PlatformError::Transient(e.to_string()))
                        } else {
                            RetryOutcome::Permanent(PlatformError::Permanent(e.to_string()))
                        }
                    })?;

                    let status = response.status();
                    if status.is_server_error() {
                        return Err(RetryOutcome::Transient(PlatformError::Transient(format!(
                            "http {status}"
                        ))));
                    }
                    if status.is_client_error() {
                        return Err(RetryOutcome::Permanent(PlatformError::Permanent(format!(
                            "http {status}"
                        ))));
                    }

                    let envelope: Envelope<T> = response
                        .json()
                        .await
                        .map_err(|e| RetryOutcome::Permanent(PlatformError::Permanent(e.to_string())))?;

                    if !envelope.ok {
                        return Err(RetryOutcome::Permanent(PlatformError::Permanent(
                            envelope.description.unwrap_or_else(|| "unknown platform error".into()),
                        )));
                    }

                    envelope
                        .result
                        .ok_or_else(|| RetryOutcome::Permanent(PlatformError::Permanent("missing result".into())))
                }
            })
            .await
    }
}

#[async_trait]
impl PlatformApi for PlatformHttpClient {
    async fn set_webhook(
        &self,
        url: &str,
        secret: &str,
        allowed_updates: Option<&[&str]>,
        max_connections: Option<u32>,
        drop_pending: Option<bool>,
    ) -> Result<bool, PlatformError> {
        self.call(
            "setWebhook",
            serde_json::json!({
                "url": url,
                "secret_token": secret,
                "allowed_updates": allowed_updates,
                "max_connections": max_connections,
                "drop_pending_updates": drop_pending,
            }),
        )
        .await
    }

    async fn delete_webhook(&self, drop_pending: bool) -> Result<bool, PlatformError> {
        self.call("deleteWebhook", serde_json::json!({ "drop_pending_updates": drop_pending })).await
    }

    async fn get_webhook_info(&self) -> Result<WebhookInfo, PlatformError> {
        self.call("getWebhookInfo", serde_json::json!({})).await
    }

    async fn create_invoice_link(
        &self,
        title: &str,
        description: &str,
        payload: &str,
        currency: &str,
        price_amount: i64,
    ) -> Result<String, PlatformError> {
        self.call(
            "createInvoiceLink",
            serde_json::json!({
                "title": title,
                "description": description,
                "payload": payload,
                "currency": currency,
                "prices": [{"label": title, "amount": price_amount}],
            }),
        )
        .await
    }

    async fn answer_pre_checkout_query(
        &self,
        id: &str,
        ok: bool,
        error_message: Option<&str>,
    ) -> Result<bool, PlatformError> {
        self.call(
            "answerPreCheckoutQuery",
            serde_json::json!({
                "pre_checkout_query_id": id,
                "ok": ok,
                "error_message": error_message,
            }),
        )
        .await
    }

    async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
        allowed_updates: Option<&[&str]>,
    ) -> Result<Vec<TelegramUpdate>, PlatformError> {
        self.call(
            "getUpdates",
            serde_json::json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": allowed_updates,
            }),
        )
        .await
    }

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        disable_notification: bool,
        reply_to_message_id: Option<i64>,
    ) -> Result<(), PlatformError> {
        let _: Value = self
            .call(
                "sendMessage",
                serde_json::json!({
                    "chat_id": chat_id,
                    "text": text,
                    "disable_notification": disable_notification,
                    "reply_to_message_id": reply_to_message_id,
                }),
            )
            .await?;
        Ok(())
    }

    async fn send_gift(&self, user_id: UserId, gift_id: &str, pay_for_upgrade: bool) -> Result<(), PlatformError> {
        let _: Value = self
            .call(
                "sendGift",
                serde_json::json!({
                    "user_id": user_id,
                    "gift_id": gift_id,
                    "pay_for_upgrade": pay_for_upgrade,
                }),
            )
            .await?;
        Ok(())
    }

    async fn gift_premium_subscription(
        &self,
        user_id: UserId,
        month_count: u8,
        star_count: i64,
    ) -> Result<(), PlatformError> {
        let _: Value = self
            .call(
                "giftPremiumSubscription",
                serde_json::json!({
                    "user_id": user_id,
                    "month_count": month_count,
                    "star_count": star_count,
                }),
            )
            .await?;
        Ok(())
    }

    async fn refund_star_payment(&self, user_id: UserId, charge_id: &str) -> Result<(), PlatformError> {
        let _: Value = self
            .call(
                "refundStarPayment",
                serde_json::json!({
                    "user_id": user_id,
                    "telegram_payment_charge_id": charge_id,
                }),
            )
            .await?;
        Ok(())
    }

    async fn get_available_gifts(&self) -> Result<Vec<Gift>, PlatformError> {
        let list: GiftList = self.call("getAvailableGifts", serde_json::json!({})).await?;
        Ok(list.gifts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_with_default_timeouts() {
        let _client = PlatformHttpClient::new("123:ABC");
    }
}
