//! Configuration loading (component V): environment variables first, an
//! optional TOML file second, hardcoded defaults last. `GatewayConfig::load`
//! is the single entry point `gateway-node`'s binary calls at startup.

use std::collections::HashMap;
use std::path::Path;

use gateway_antifraud::BucketParams;
use gateway_core::GatewayError;
use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "./gateway.toml";

/// CLI-supplied overrides, layered above env/file (component S's `Args`).
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bind: Option<String>,
    pub data_dir: Option<String>,
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelegramMode {
    Webhook,
    LongPolling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RngStorage {
    Memory,
    File,
    Db,
}

#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub currency: String,
    pub title_prefix: Option<String>,
    pub receipt_enabled: bool,
    pub business_connection_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub mode: TelegramMode,
    pub webhook_path: String,
    pub webhook_secret_token: String,
    pub admin_token: Option<String>,
    pub public_base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub params: BucketParams,
}

#[derive(Debug, Clone)]
pub struct AntifraudConfig {
    pub ip: RateLimitConfig,
    pub subject: RateLimitConfig,
    pub trust_proxy: bool,
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
    pub default_retry_after_seconds: i64,
    pub ban_default_ttl_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct RngConfig {
    pub fairness_key: Vec<u8>,
    pub storage: RngStorage,
    pub data_dir: String,
    pub db_url: Option<String>,
    pub db_user: Option<String>,
    pub db_password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind: String,
    pub data_dir: String,
    pub payments: PaymentsConfig,
    pub telegram: TelegramConfig,
    pub antifraud: AntifraudConfig,
    pub rng: RngConfig,
}

/// Raw shape of the optional TOML config file. Every field is optional so a
/// file may set only the names it cares about; anything unset falls through
/// to env, then to hardcoded defaults.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(flatten)]
    values: HashMap<String, toml::Value>,
}

struct Layers {
    file: FileConfig,
}

impl Layers {
    fn load(path: &Path) -> Self {
        let file = std::fs::read_to_string(path)
            .ok()
            .and_then(|s| toml::from_str::<FileConfig>(&s).ok())
            .unwrap_or_default();
        Self { file }
    }

    fn string(&self, env_key: &str, file_key: &str, default: Option<&str>) -> Option<String> {
        if let Ok(v) = std::env::var(env_key) {
            return Some(v);
        }
        if let Some(v) = self.file.values.get(file_key).and_then(|v| v.as_str()) {
            return Some(v.to_string());
        }
        default.map(str::to_string)
    }

    fn bool(&self, env_key: &str, file_key: &str, default: bool) -> bool {
        if let Ok(v) = std::env::var(env_key) {
            return matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = self.file.values.get(file_key).and_then(|v| v.as_bool()) {
            return v;
        }
        default
    }

    fn f64(&self, env_key: &str, file_key: &str, default: f64) -> f64 {
        if let Ok(v) = std::env::var(env_key) {
            if let Ok(parsed) = v.parse() {
                return parsed;
            }
        }
        if let Some(v) = self.file.values.get(file_key).and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64))) {
            return v;
        }
        default
    }

    fn i64(&self, env_key: &str, file_key: &str, default: i64) -> i64 {
        if let Ok(v) = std::env::var(env_key) {
            if let Ok(parsed) = v.parse() {
                return parsed;
            }
        }
        if let Some(v) = self.file.values.get(file_key).and_then(|v| v.as_integer()) {
            return v;
        }
        default
    }

    fn list(&self, env_key: &str, file_key: &str) -> Vec<String> {
        if let Ok(v) = std::env::var(env_key) {
            return v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect();
        }
        if let Some(arr) = self.file.values.get(file_key).and_then(|v| v.as_array()) {
            return arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
        }
        Vec::new()
    }
}

impl GatewayConfig {
    pub fn load(overrides: CliOverrides) -> Result<Self, GatewayError> {
        let config_path = overrides
            .config_path
            .clone()
            .or_else(|| std::env::var("GATEWAY_CONFIG_FILE").ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
        let layers = Layers::load(Path::new(&config_path));

        let currency = layers.string("CURRENCY", "currency", Some(gateway_core::XTR_CURRENCY)).unwrap();
        if currency != gateway_core::XTR_CURRENCY {
            return Err(GatewayError::Fatal(format!("unsupported currency: {currency}")));
        }

        let payments = PaymentsConfig {
            currency,
            title_prefix: layers.string("TITLE_PREFIX", "title_prefix", None),
            receipt_enabled: layers.bool("RECEIPT_ENABLED", "receipt_enabled", true),
            business_connection_id: layers.string("BUSINESS_CONNECTION_ID", "business_connection_id", None),
        };

        let bot_token = layers
            .string("BOT_TOKEN", "bot_token", None)
            .ok_or_else(|| GatewayError::Fatal("BOT_TOKEN is required".into()))?;
        let mode = match layers.string("MODE", "mode", Some("webhook")).unwrap().as_str() {
            "webhook" => TelegramMode::Webhook,
            "long_polling" => TelegramMode::LongPolling,
            other => return Err(GatewayError::Fatal(format!("unsupported mode: {other}"))),
        };
        let telegram = TelegramConfig {
            bot_token,
            mode,
            webhook_path: layers.string("WEBHOOK_PATH", "webhook_path", Some("/webhook")).unwrap(),
            webhook_secret_token: layers
                .string("WEBHOOK_SECRET_TOKEN", "webhook_secret_token", None)
                .ok_or_else(|| GatewayError::Fatal("WEBHOOK_SECRET_TOKEN is required".into()))?,
            admin_token: layers.string("ADMIN_TOKEN", "admin_token", None),
            public_base_url: layers.string("PUBLIC_BASE_URL", "public_base_url", None),
        };

        let antifraud = AntifraudConfig {
            ip: RateLimitConfig {
                enabled: layers.bool("IP_RATE_ENABLED", "ip_rate_enabled", true),
                params: BucketParams {
                    capacity: layers.f64("IP_RATE_CAPACITY", "ip_rate_capacity", 20.0),
                    refill_per_sec: layers.f64("IP_RATE_RPS", "ip_rate_rps", 1.0),
                    ttl_seconds: layers.i64("IP_RATE_TTL_SECONDS", "ip_rate_ttl_seconds", 3600),
                },
            },
            subject: RateLimitConfig {
                enabled: layers.bool("SUBJECT_RATE_ENABLED", "subject_rate_enabled", true),
                params: BucketParams {
                    capacity: layers.f64("SUBJECT_RATE_CAPACITY", "subject_rate_capacity", 10.0),
                    refill_per_sec: layers.f64("SUBJECT_RATE_RPS", "subject_rate_rps", 0.5),
                    ttl_seconds: layers.i64("SUBJECT_RATE_TTL_SECONDS", "subject_rate_ttl_seconds", 3600),
                },
            },
            trust_proxy: layers.bool("TRUST_PROXY", "trust_proxy", false),
            include_paths: layers.list("INCLUDE_PATHS", "include_paths"),
            exclude_paths: layers.list("EXCLUDE_PATHS", "exclude_paths"),
            default_retry_after_seconds: layers.i64("RETRY_AFTER", "retry_after", 5),
            ban_default_ttl_seconds: layers.i64("BAN_DEFAULT_TTL_SECONDS", "ban_default_ttl_seconds", 86_400),
        };

        let fairness_key_raw = layers
            .string("FAIRNESS_KEY", "fairness_key", None)
            .ok_or_else(|| GatewayError::Fatal("FAIRNESS_KEY is required".into()))?;
        let fairness_key = decode_fairness_key(&fairness_key_raw)?;

        let storage = match layers.string("RNG_STORAGE", "rng_storage", Some("memory")).unwrap().as_str() {
            "memory" => RngStorage::Memory,
            "file" => RngStorage::File,
            "db" => RngStorage::Db,
            other => return Err(GatewayError::Fatal(format!("unsupported RNG_STORAGE: {other}"))),
        };
        let rng = RngConfig {
            fairness_key,
            storage,
            data_dir: overrides
                .data_dir
                .clone()
                .or_else(|| layers.string("RNG_DATA_DIR", "rng_data_dir", Some("./data")))
                .unwrap(),
            db_url: layers.string("RNG_DB_URL", "rng_db_url", None),
            db_user: layers.string("RNG_DB_USER", "rng_db_user", None),
            db_password: layers.string("RNG_DB_PASSWORD", "rng_db_password", None),
        };

        Ok(GatewayConfig {
            bind: overrides.bind.clone().or_else(|| layers.string("BIND", "bind", Some("0.0.0.0:8080"))).unwrap(),
            data_dir: rng.data_dir.clone(),
            payments,
            telegram,
            antifraud,
            rng,
        })
    }
}

/// `FAIRNESS_KEY` auto-detection: try hex, then base64, then raw UTF-8
/// bytes, accepting the first decode whose length lands in `[32, 64]`.
fn decode_fairness_key(raw: &str) -> Result<Vec<u8>, GatewayError> {
    use base64::Engine;

    let candidates: Vec<Vec<u8>> = [
        hex::decode(raw).ok(),
        base64::engine::general_purpose::STANDARD.decode(raw).ok(),
        Some(raw.as_bytes().to_vec()),
    ]
    .into_iter()
    .flatten()
    .collect();

    for candidate in candidates {
        if (gateway_core::FAIRNESS_KEY_MIN_BYTES..=gateway_core::FAIRNESS_KEY_MAX_BYTES).contains(&candidate.len()) {
            return Ok(candidate);
        }
    }

    Err(GatewayError::Fatal(format!(
        "FAIRNESS_KEY must decode (hex, base64, or raw utf-8) to {}-{} bytes",
        gateway_core::FAIRNESS_KEY_MIN_BYTES,
        gateway_core::FAIRNESS_KEY_MAX_BYTES
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fairness_key_accepts_hex() {
        let hex_key = "a".repeat(64); // 32 bytes hex-decoded
        let decoded = decode_fairness_key(&hex_key).unwrap();
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn fairness_key_rejects_short_value() {
        assert!(decode_fairness_key("short").is_err());
    }

    #[test]
    fn fairness_key_falls_back_to_raw_utf8() {
        let raw = "x".repeat(40);
        let decoded = decode_fairness_key(&raw).unwrap();
        assert_eq!(decoded, raw.as_bytes());
    }
}
