use std::collections::HashMap;
use std::sync::Mutex;

use gateway_core::TimestampMs;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpStatus {
    Suspicious,
    TempBanned,
    PermBanned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspiciousIpEntry {
    pub ip: String,
    pub status: IpStatus,
    pub reason: Option<String>,
    #[serde(rename = "createdAtMs")]
    pub created_at_ms: TimestampMs,
    #[serde(rename = "expiresAtMs")]
    pub expires_at_ms: Option<TimestampMs>,
    #[serde(rename = "lastSeenMs")]
    pub last_seen_ms: TimestampMs,
}

impl SuspiciousIpEntry {
    fn expired(&self, now_ms: TimestampMs) -> bool {
        self.status == IpStatus::TempBanned
            && self.expires_at_ms.map(|exp| exp <= now_ms).unwrap_or(false)
    }
}

/// Store of suspicious / banned IPs, keyed by raw IP string.
///
/// Mutations of a single IP are serialized by a per-key lock (see Design
/// Notes — per-key mutual exclusion); a single mutex over the whole map is
/// the systems-language stand-in, matching `TokenBucketStore`'s approach.
pub struct SuspiciousIpStore {
    entries: Mutex<HashMap<String, SuspiciousIpEntry>>,
}

impl SuspiciousIpStore {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    pub fn mark_suspicious(&self, ip: &str, reason: Option<String>, now_ms: TimestampMs) -> SuspiciousIpEntry {
        let mut entries = self.entries.lock().expect("suspicious ip mutex poisoned");
        let entry = entries.entry(ip.to_string()).or_insert_with(|| SuspiciousIpEntry {
            ip: ip.to_string(),
            status: IpStatus::Suspicious,
            reason: None,
            created_at_ms: now_ms,
            expires_at_ms: None,
            last_seen_ms: now_ms,
        });
        if entry.status != IpStatus::TempBanned && entry.status != IpStatus::PermBanned {
            entry.status = IpStatus::Suspicious;
        }
        if reason.is_some() {
            entry.reason = reason;
        }
        entry.last_seen_ms = now_ms;
        entry.clone()
    }

    /// `ttl_seconds = 0` bans permanently.
    pub fn ban(&self, ip: &str, ttl_seconds: i64, reason: Option<String>, now_ms: TimestampMs) -> SuspiciousIpEntry {
        let mut entries = self.entries.lock().expect("suspicious ip mutex poisoned");
        let created_at_ms = entries.get(ip).map(|e| e.created_at_ms).unwrap_or(now_ms);
        let (status, expires_at_ms) = if ttl_seconds <= 0 {
            (IpStatus::PermBanned, None)
        } else {
            (IpStatus::TempBanned, Some(now_ms + ttl_seconds * 1000))
        };
        let entry = SuspiciousIpEntry {
            ip: ip.to_string(),
            status,
            reason,
            created_at_ms,
            expires_at_ms,
            last_seen_ms: now_ms,
        };
        entries.insert(ip.to_string(), entry.clone());
        entry
    }

    pub fn unban(&self, ip: &str) -> bool {
        let mut entries = self.entries.lock().expect("suspicious ip mutex poisoned");
        match entries.get_mut(ip) {
            Some(entry) if entry.status == IpStatus::TempBanned || entry.status == IpStatus::PermBanned => {
                entry.status = IpStatus::Suspicious;
                entry.expires_at_ms = None;
                true
            }
            _ => false,
        }
    }

    /// Returns `(banned, remaining_seconds)`; updates `lastSeenMs` on a hit.
    pub fn is_banned(&self, ip: &str, now_ms: TimestampMs) -> (bool, Option<i64>) {
        let mut entries = self.entries.lock().expect("suspicious ip mutex poisoned");
        let Some(entry) = entries.get_mut(ip) else { return (false, None) };
        if entry.expired(now_ms) {
            entry.status = IpStatus::Suspicious;
            entry.expires_at_ms = None;
            return (false, None);
        }
        entry.last_seen_ms = now_ms;
        match entry.status {
            IpStatus::PermBanned => (true, None),
            IpStatus::TempBanned => {
                let remaining = ((entry.expires_at_ms.unwrap_or(now_ms) - now_ms) as f64 / 1000.0).ceil() as i64;
                (true, Some(remaining.max(0)))
            }
            IpStatus::Suspicious => (false, None),
        }
    }

    /// Recent entries sorted by `createdAtMs` descending, lazily purging
    /// expired temp bans along the way.
    pub fn list_recent(&self, limit: usize, since_ms: Option<TimestampMs>, now_ms: TimestampMs) -> Vec<SuspiciousIpEntry> {
        let mut entries = self.entries.lock().expect("suspicious ip mutex poisoned");
        purge_expired(&mut entries, now_ms);
        let mut list: Vec<SuspiciousIpEntry> = entries
            .values()
            .filter(|e| since_ms.map(|s| e.created_at_ms >= s).unwrap_or(true))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        list.truncate(limit);
        list
    }

    /// Banned entries, temp-first sorted by `expiresAtMs` ascending, then
    /// permanent sorted by `createdAtMs` ascending.
    pub fn list_banned(&self, limit: usize, now_ms: TimestampMs) -> Vec<SuspiciousIpEntry> {
        let mut entries = self.entries.lock().expect("suspicious ip mutex poisoned");
        purge_expired(&mut entries, now_ms);
        let (mut temp, mut perm): (Vec<_>, Vec<_>) = entries
            .values()
            .filter(|e| e.status == IpStatus::TempBanned || e.status == IpStatus::PermBanned)
            .cloned()
            .partition(|e| e.status == IpStatus::TempBanned);
        temp.sort_by_key(|e| e.expires_at_ms.unwrap_or(i64::MAX));
        perm.sort_by_key(|e| e.created_at_ms);
        temp.extend(perm);
        temp.truncate(limit);
        temp
    }
}

fn purge_expired(entries: &mut HashMap<String, SuspiciousIpEntry>, now_ms: TimestampMs) {
    for entry in entries.values_mut() {
        if entry.expired(now_ms) {
            entry.status = IpStatus::Suspicious;
            entry.expires_at_ms = None;
        }
    }
}

impl Default for SuspiciousIpStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ban_then_unban_roundtrip() {
        let store = SuspiciousIpStore::new();
        let entry = store.ban("1.2.3.4", 60, Some("test".into()), 0);
        assert_eq!(entry.status, IpStatus::TempBanned);
        let (banned, remaining) = store.is_banned("1.2.3.4", 1_000);
        assert!(banned);
        assert!(remaining.unwrap() <= 60);
        assert!(store.unban("1.2.3.4"));
        let (banned, _) = store.is_banned("1.2.3.4", 2_000);
        assert!(!banned);
    }

    #[test]
    fn temp_ban_expires_after_ttl() {
        let store = SuspiciousIpStore::new();
        store.ban("9.9.9.9", 10, None, 0);
        let (banned, _) = store.is_banned("9.9.9.9", 5_000);
        assert!(banned);
        let (banned, _) = store.is_banned("9.9.9.9", 11_000);
        assert!(!banned);
        assert!(store.list_banned(10, 11_000).is_empty());
    }

    #[test]
    fn permanent_ban_has_no_expiry() {
        let store = SuspiciousIpStore::new();
        let entry = store.ban("1.1.1.1", 0, None, 0);
        assert_eq!(entry.status, IpStatus::PermBanned);
        assert!(entry.expires_at_ms.is_none());
        let (banned, remaining) = store.is_banned("1.1.1.1", 1_000_000_000);
        assert!(banned);
        assert!(remaining.is_none());
    }

    #[test]
    fn listing_orders_temp_before_perm() {
        let store = SuspiciousIpStore::new();
        store.ban("perm", 0, None, 0);
        store.ban("temp", 100, None, 0);
        let banned = store.list_banned(10, 0);
        assert_eq!(banned[0].ip, "temp");
        assert_eq!(banned[1].ip, "perm");
    }
}
