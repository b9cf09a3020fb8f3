//! Platform update variants (component K's dispatch target). The source
//! models these as a sealed hierarchy; here that's a tagged enum built by
//! inspecting which well-known fields are present on the raw JSON object,
//! mirroring how the platform itself only ever sets one top-level field per
//! update.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use gateway_core::UserId;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramUser {
    pub id: UserId,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SuccessfulPayment {
    pub currency: String,
    pub total_amount: i64,
    pub invoice_payload: String,
    pub telegram_payment_charge_id: String,
    #[serde(default)]
    pub provider_payment_charge_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageBody {
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub successful_payment: Option<SuccessfulPayment>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PreCheckoutQuery {
    pub id: String,
    pub from: TelegramUser,
    pub currency: String,
    pub total_amount: i64,
    pub invoice_payload: String,
}

/// One incoming update. Variant selection happens once, at parse time, so
/// the router (`K`) never has to re-inspect the raw JSON.
#[derive(Debug, Clone)]
pub enum UpdateKind {
    PreCheckoutQuery(PreCheckoutQuery),
    SuccessfulPayment { chat: Chat, from: Option<TelegramUser>, payment: SuccessfulPayment },
    Message(MessageBody),
    Raw(Value),
}

#[derive(Debug, Clone)]
pub struct Update {
    pub update_id: i64,
    pub kind: UpdateKind,
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateParseError {
    #[error("missing or non-integer update_id")]
    MissingUpdateId,
    #[error("malformed update body: {0}")]
    Malformed(String),
}

impl Update {
    pub fn from_value(value: Value) -> Result<Self, UpdateParseError> {
        let update_id = value
            .get("update_id")
            .and_then(Value::as_i64)
            .ok_or(UpdateParseError::MissingUpdateId)?;

        if let Some(pcq) = value.get("pre_checkout_query") {
            let pcq: PreCheckoutQuery =
                serde_json::from_value(pcq.clone()).map_err(|e| UpdateParseError::Malformed(e.to_string()))?;
            return Ok(Self { update_id, kind: UpdateKind::PreCheckoutQuery(pcq) });
        }

        if let Some(message) = value.get("message") {
            let message: MessageBody =
                serde_json::from_value(message.clone()).map_err(|e| UpdateParseError::Malformed(e.to_string()))?;
            if let Some(payment) = message.successful_payment.clone() {
                return Ok(Self {
                    update_id,
                    kind: UpdateKind::SuccessfulPayment {
                        chat: message.chat.clone(),
                        from: message.from.clone(),
                        payment,
                    },
                });
            }
            return Ok(Self { update_id, kind: UpdateKind::Message(message) });
        }

        Ok(Self { update_id, kind: UpdateKind::Raw(value) })
    }
}

/// Parse a webhook body into one or more updates — the platform may post
/// either a single update object or a JSON array of updates.
pub fn parse_updates(body: &[u8]) -> Result<Vec<Update>, UpdateParseError> {
    let value: Value = serde_json::from_slice(body).map_err(|e| UpdateParseError::Malformed(e.to_string()))?;
    match value {
        Value::Array(items) => items.into_iter().map(Update::from_value).collect(),
        single => Ok(vec![Update::from_value(single)?]),
    }
}
