//! Mini-app `initData` verification (component Q).
//!
//! The platform signs the mini-app launch payload with
//! `HMAC-SHA256(HMAC-SHA256("WebAppData", botToken), dataCheckString)`. We
//! recompute it and compare in constant time.

use std::collections::BTreeMap;

use crate::ct::ct_eq_str;
use crate::hash::{hmac_sha256, to_hex};

#[derive(Debug, thiserror::Error)]
pub enum InitDataError {
    #[error("missing hash parameter")]
    MissingHash,
    #[error("missing auth_date")]
    MissingAuthDate,
    #[error("missing user.id")]
    MissingUserId,
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("malformed user field: {0}")]
    MalformedUser(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedInitData {
    pub user_id: i64,
    pub auth_date: i64,
    pub chat_type: Option<String>,
}

/// Verify a raw `initData` query-string blob against `bot_token`.
///
/// Parameters are URL-decoded; the `hash` parameter is excluded from the
/// check string, whose remaining `key=value` lines are joined by `\n` in
/// ascending key order (values sorted ascending within a repeated key).
pub fn verify_init_data(raw: &str, bot_token: &str) -> Result<VerifiedInitData, InitDataError> {
    let mut fields: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut hash: Option<String> = None;

    for pair in raw.split('&').filter(|s| !s.is_empty()) {
        let (key, value) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        let key = urlencoding::decode(key).map(|c| c.into_owned()).unwrap_or_else(|_| key.to_string());
        let value = urlencoding::decode(value).map(|c| c.into_owned()).unwrap_or_else(|_| value.to_string());
        if key == "hash" {
            hash = Some(value);
        } else {
            fields.entry(key).or_default().push(value);
        }
    }

    let hash = hash.ok_or(InitDataError::MissingHash)?;

    let mut lines = Vec::new();
    for (key, mut values) in fields {
        values.sort();
        for value in values {
            lines.push(format!("{key}={value}"));
        }
    }
    let data_check_string = lines.join("\n");

    let secret_key = hmac_sha256(b"WebAppData", bot_token.as_bytes());
    let calculated = hmac_sha256(&secret_key, data_check_string.as_bytes());
    let calculated_hex = to_hex(&calculated);

    if !ct_eq_str(&calculated_hex.to_lowercase(), &hash.to_lowercase()) {
        return Err(InitDataError::SignatureMismatch);
    }

    let auth_date = raw_field(raw, "auth_date")
        .ok_or(InitDataError::MissingAuthDate)?
        .parse::<i64>()
        .map_err(|_| InitDataError::MissingAuthDate)?;

    let user_json = raw_field(raw, "user").ok_or(InitDataError::MissingUserId)?;
    let user: serde_json::Value = serde_json::from_str(&user_json)
        .map_err(|e| InitDataError::MalformedUser(e.to_string()))?;
    let user_id = user
        .get("id")
        .and_then(|v| v.as_i64())
        .ok_or(InitDataError::MissingUserId)?;

    let chat_type = raw_field(raw, "chat_type");

    Ok(VerifiedInitData { user_id, auth_date, chat_type })
}

/// Extract and URL-decode a single top-level field from the raw blob without
/// going through the sorted/joined check-string path.
fn raw_field(raw: &str, name: &str) -> Option<String> {
    raw.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        let key = urlencoding::decode(key).ok()?;
        if key == name {
            urlencoding::decode(value).ok().map(|c| c.into_owned())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(bot_token: &str, pairs: &[(&str, &str)]) -> String {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (k, v) in pairs {
            map.entry(k.to_string()).or_default().push(v.to_string());
        }
        let mut lines = Vec::new();
        for (k, mut vs) in map {
            vs.sort();
            for v in vs {
                lines.push(format!("{k}={v}"));
            }
        }
        let check_string = lines.join("\n");
        let secret_key = hmac_sha256(b"WebAppData", bot_token.as_bytes());
        to_hex(&hmac_sha256(&secret_key, check_string.as_bytes()))
    }

    #[test]
    fn accepts_correctly_signed_payload() {
        let bot_token = "123456:ABC-DEF";
        let user = urlencoding::encode(r#"{"id":42}"#).into_owned();
        let pairs = [("auth_date", "1700000000"), ("user", user.as_str())];
        let decoded_pairs = [("auth_date", "1700000000"), ("user", r#"{"id":42}"#)];
        let hash = sign(bot_token, &decoded_pairs);
        let raw = format!("auth_date=1700000000&user={user}&hash={hash}");
        let verified = verify_init_data(&raw, bot_token).unwrap();
        assert_eq!(verified.user_id, 42);
        assert_eq!(verified.auth_date, 1_700_000_000);
        let _ = pairs;
    }

    #[test]
    fn rejects_tampered_payload() {
        let bot_token = "123456:ABC-DEF";
        let decoded_pairs = [("auth_date", "1700000000"), ("user", r#"{"id":42}"#)];
        let hash = sign(bot_token, &decoded_pairs);
        let user = urlencoding::encode(r#"{"id":999}"#).into_owned();
        let raw = format!("auth_date=1700000000&user={user}&hash={hash}");
        assert!(matches!(
            verify_init_data(&raw, bot_token),
            Err(InitDataError::SignatureMismatch)
        ));
    }

    #[test]
    fn rejects_missing_hash() {
        let raw = "auth_date=1700000000&user=%7B%22id%22%3A42%7D";
        assert!(matches!(
            verify_init_data(raw, "token"),
            Err(InitDataError::MissingHash)
        ));
    }
}
