//! Rolling-window event correlator producing a risk score and action
//! (component C). Two independent windows are tracked per IP and, when a
//! subject id is present, per subject: a short window (fast-repeat / path
//! thrash within seconds) and a long window (sustained abuse over minutes).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use gateway_core::TimestampMs;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Invoice,
    PreCheckout,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VelocityFlag {
    FastRepeatIpShort,
    FastRepeatIpLong,
    PathThrashIp,
    FastRepeatSubjectShort,
    FastRepeatSubjectLong,
    PathThrashSubject,
    UaMismatchRecent,
    UaFlapping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VelocityAction {
    LogOnly,
    SoftCap,
    HardBlockBeforePayment,
}

#[derive(Debug, Clone)]
pub struct VelocityEvent<'a> {
    pub event_type: EventType,
    pub ip: &'a str,
    pub subject_id: Option<i64>,
    pub path: &'a str,
    pub ua: Option<&'a str>,
    pub ts_ms: TimestampMs,
}

#[derive(Debug, Clone)]
pub struct VelocityDecision {
    pub score: u32,
    pub flags: Vec<VelocityFlag>,
    pub action: VelocityAction,
}

#[derive(Debug, Clone, Copy)]
pub struct VelocityConfig {
    pub short_window_ms: i64,
    pub long_window_ms: i64,
    pub ua_ttl_ms: i64,

    pub ip_short_max: usize,
    pub ip_long_max: usize,
    pub ip_path_thrash_max: usize,
    pub subject_short_max: usize,
    pub subject_long_max: usize,
    pub subject_path_thrash_max: usize,
    pub subject_ua_mismatch_max: u32,

    pub global_cap: usize,

    pub weight_fast_repeat_ip_short: u32,
    pub weight_fast_repeat_ip_long: u32,
    pub weight_path_thrash_ip: u32,
    pub weight_fast_repeat_subject_short: u32,
    pub weight_fast_repeat_subject_long: u32,
    pub weight_path_thrash_subject: u32,
    pub weight_ua_mismatch_recent: u32,
    pub weight_ua_flapping: u32,

    pub invoice_boost: u32,
    pub precheckout_boost: u32,

    pub soft_cap: u32,
    pub hard_block: u32,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            short_window_ms: 10_000,
            long_window_ms: 5 * 60_000,
            ua_ttl_ms: 30 * 60_000,
            ip_short_max: 5,
            ip_long_max: 30,
            ip_path_thrash_max: 4,
            subject_short_max: 5,
            subject_long_max: 30,
            subject_path_thrash_max: 4,
            subject_ua_mismatch_max: 3,
            global_cap: 3,
            weight_fast_repeat_ip_short: 20,
            weight_fast_repeat_ip_long: 10,
            weight_path_thrash_ip: 15,
            weight_fast_repeat_subject_short: 25,
            weight_fast_repeat_subject_long: 15,
            weight_path_thrash_subject: 15,
            weight_ua_mismatch_recent: 20,
            weight_ua_flapping: 25,
            invoice_boost: 10,
            precheckout_boost: 15,
            soft_cap: 40,
            hard_block: 55,
        }
    }
}

#[derive(Debug, Default)]
struct WindowState {
    short: VecDeque<TimestampMs>,
    long: VecDeque<TimestampMs>,
    short_paths: HashSet<String>,
    expires_at_ms: TimestampMs,
}

#[derive(Debug, Default)]
struct UaState {
    last_fingerprint: Option<String>,
    mismatch_count: u32,
    set_at_ms: TimestampMs,
}

#[derive(Default)]
struct SubjectState {
    window: WindowState,
    ua: UaState,
    expires_at_ms: TimestampMs,
}

pub struct VelocityChecker {
    config: VelocityConfig,
    ip_state: Mutex<HashMap<String, WindowState>>,
    subject_state: Mutex<HashMap<i64, SubjectState>>,
}

impl VelocityChecker {
    pub fn new(config: VelocityConfig) -> Self {
        Self {
            config,
            ip_state: Mutex::new(HashMap::new()),
            subject_state: Mutex::new(HashMap::new()),
        }
    }

    pub fn check_and_record(&self, event: &VelocityEvent<'_>) -> VelocityDecision {
        let cfg = &self.config;
        let mut flags = Vec::new();

        // ── IP side ──────────────────────────────────────────────────────────
        {
            let mut ip_state = self.ip_state.lock().expect("velocity ip mutex poisoned");
            if ip_state
                .get(event.ip)
                .map(|s| event.ts_ms >= s.expires_at_ms && s.short.is_empty() && s.long.is_empty())
                .unwrap_or(false)
            {
                ip_state.remove(event.ip);
            }
            let state = ip_state.entry(event.ip.to_string()).or_default();
            purge_window(&mut state.short, event.ts_ms, cfg.short_window_ms);
            purge_window(&mut state.long, event.ts_ms, cfg.long_window_ms);
            state.short.push_back(event.ts_ms);
            state.long.push_back(event.ts_ms);
            state.short_paths.insert(event.path.to_string());
            state.expires_at_ms = event.ts_ms + cfg.long_window_ms;

            if state.short.len() > cfg.ip_short_max.max(cfg.global_cap) {
                flags.push(VelocityFlag::FastRepeatIpShort);
            }
            if state.long.len() > cfg.ip_long_max.max(cfg.global_cap) {
                flags.push(VelocityFlag::FastRepeatIpLong);
            }
            if state.short_paths.len() > cfg.ip_path_thrash_max.max(cfg.global_cap) {
                flags.push(VelocityFlag::PathThrashIp);
            }
        }

        // ── Subject side ─────────────────────────────────────────────────────
        if let Some(subject_id) = event.subject_id {
            let mut subject_state = self.subject_state.lock().expect("velocity subject mutex poisoned");
            let state = subject_state.entry(subject_id).or_default();
            purge_window(&mut state.window.short, event.ts_ms, cfg.short_window_ms);
            purge_window(&mut state.window.long, event.ts_ms, cfg.long_window_ms);
            state.window.short.push_back(event.ts_ms);
            state.window.long.push_back(event.ts_ms);
            state.window.short_paths.insert(event.path.to_string());
            state.expires_at_ms = event.ts_ms + cfg.long_window_ms.max(cfg.ua_ttl_ms);

            if event.ts_ms - state.ua.set_at_ms > cfg.ua_ttl_ms {
                state.ua.mismatch_count = 0;
                state.ua.last_fingerprint = None;
            }

            if let Some(ua) = event.ua {
                let fp = fingerprint(ua);
                if let Some(fp) = fp {
                    match &state.ua.last_fingerprint {
                        None => {
                            state.ua.last_fingerprint = Some(fp);
                            state.ua.set_at_ms = event.ts_ms;
                        }
                        Some(prev) if *prev != fp => {
                            state.ua.mismatch_count = if event.ts_ms - state.ua.set_at_ms <= cfg.ua_ttl_ms {
                                state.ua.mismatch_count + 1
                            } else {
                                1
                            };
                            state.ua.last_fingerprint = Some(fp);
                            state.ua.set_at_ms = event.ts_ms;
                        }
                        Some(_) => {}
                    }
                }
            }

            if state.window.short.len() > cfg.subject_short_max.max(cfg.global_cap) {
                flags.push(VelocityFlag::FastRepeatSubjectShort);
            }
            if state.window.long.len() > cfg.subject_long_max.max(cfg.global_cap) {
                flags.push(VelocityFlag::FastRepeatSubjectLong);
            }
            if state.window.short_paths.len() > cfg.subject_path_thrash_max.max(cfg.global_cap) {
                flags.push(VelocityFlag::PathThrashSubject);
            }
            if state.ua.mismatch_count >= cfg.subject_ua_mismatch_max {
                flags.push(VelocityFlag::UaMismatchRecent);
            }
            if state.ua.mismatch_count >= 2 && event.ts_ms - state.ua.set_at_ms <= cfg.short_window_ms {
                flags.push(VelocityFlag::UaFlapping);
            }
        }

        let mut score: u32 = flags.iter().map(|f| weight_of(cfg, *f)).sum();

        let boost_relevant = flags.iter().any(|f| {
            matches!(
                f,
                VelocityFlag::FastRepeatIpShort
                    | VelocityFlag::FastRepeatSubjectShort
                    | VelocityFlag::PathThrashIp
                    | VelocityFlag::PathThrashSubject
            )
        });
        if boost_relevant {
            score += match event.event_type {
                EventType::Invoice => cfg.invoice_boost,
                EventType::PreCheckout => cfg.precheckout_boost,
                EventType::Other => 0,
            };
        }
        let score = score.min(100);

        let action = match event.event_type {
            EventType::Invoice | EventType::PreCheckout => {
                if score >= cfg.hard_block {
                    VelocityAction::HardBlockBeforePayment
                } else if score >= cfg.soft_cap {
                    VelocityAction::SoftCap
                } else {
                    VelocityAction::LogOnly
                }
            }
            EventType::Other => {
                if score >= cfg.soft_cap {
                    VelocityAction::SoftCap
                } else {
                    VelocityAction::LogOnly
                }
            }
        };

        VelocityDecision { score, flags, action }
    }
}

fn weight_of(cfg: &VelocityConfig, flag: VelocityFlag) -> u32 {
    match flag {
        VelocityFlag::FastRepeatIpShort => cfg.weight_fast_repeat_ip_short,
        VelocityFlag::FastRepeatIpLong => cfg.weight_fast_repeat_ip_long,
        VelocityFlag::PathThrashIp => cfg.weight_path_thrash_ip,
        VelocityFlag::FastRepeatSubjectShort => cfg.weight_fast_repeat_subject_short,
        VelocityFlag::FastRepeatSubjectLong => cfg.weight_fast_repeat_subject_long,
        VelocityFlag::PathThrashSubject => cfg.weight_path_thrash_subject,
        VelocityFlag::UaMismatchRecent => cfg.weight_ua_mismatch_recent,
        VelocityFlag::UaFlapping => cfg.weight_ua_flapping,
    }
}

fn purge_window(window: &mut VecDeque<TimestampMs>, now_ms: TimestampMs, window_ms: i64) {
    while let Some(front) = window.front() {
        if now_ms - *front >= window_ms {
            window.pop_front();
        } else {
            break;
        }
    }
}

/// Browser/client fingerprint derived from a User-Agent string (§4.C.1).
/// Returns `None` for an empty UA.
pub fn fingerprint(ua: &str) -> Option<String> {
    if ua.is_empty() {
        return None;
    }
    let lower = ua.to_lowercase();
    if lower.contains("telegram") {
        return Some("tg_webapp".to_string());
    }
    if lower.contains("bot") {
        return Some("bot".to_string());
    }
    if let Some(major) = scan_major(&lower, &["edg/", "edge/"]) {
        return Some(format!("edge_{major}"));
    }
    if let Some(major) = scan_major(&lower, &["chrome/", "crios/", "chromium/"]) {
        return Some(format!("ch_{major}"));
    }
    if let Some(major) = scan_major(&lower, &["firefox/", "fxios/"]) {
        return Some(format!("ff_{major}"));
    }
    if lower.contains("safari") {
        if let Some(major) = scan_major(&lower, &["version/"]) {
            return Some(format!("sf_{major}"));
        }
    }
    Some("unk".to_string())
}

/// Scan for the first occurrence of any marker, skip delimiters
/// `[a-z . _ / space]` between the marker and the first digit run, and
/// parse the major version as the leading digit run. Returns `None` if no
/// marker matches or the delimiter run never reaches a digit.
fn scan_major(lower: &str, markers: &[&str]) -> Option<u32> {
    for marker in markers {
        if let Some(pos) = lower.find(marker) {
            let rest = &lower[pos + marker.len()..];
            let mut chars = rest.chars().peekable();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_digit() {
                    break;
                }
                if matches!(c, 'a'..='z' | '.' | '_' | '/' | ' ') {
                    chars.next();
                } else {
                    break;
                }
            }
            let digits: String = chars.clone().take_while(|c| c.is_ascii_digit()).collect();
            if !digits.is_empty() {
                if let Ok(major) = digits.parse::<u32>() {
                    return Some(major);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_empty_is_none() {
        assert_eq!(fingerprint(""), None);
    }

    #[test]
    fn fingerprint_chrome() {
        assert_eq!(
            fingerprint("Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120.0.6099.110 Safari/537.36"),
            Some("ch_120".to_string())
        );
    }

    #[test]
    fn fingerprint_edge_wins_over_chrome() {
        assert_eq!(
            fingerprint("Mozilla/5.0 Chrome/120.0 Safari/537.36 Edg/121.0.2277.128"),
            Some("edge_121".to_string())
        );
    }

    #[test]
    fn fingerprint_firefox() {
        assert_eq!(fingerprint("Mozilla/5.0 (X11; Linux) Firefox/128.0"), Some("ff_128".to_string()));
    }

    #[test]
    fn fingerprint_telegram_wins_over_bot() {
        assert_eq!(fingerprint("TelegramBot (like TwitterBot)"), Some("tg_webapp".to_string()));
    }

    #[test]
    fn hard_block_on_repeated_invoice_requests() {
        let cfg = VelocityConfig {
            ip_short_max: 1,
            subject_short_max: 1,
            global_cap: 1,
            hard_block: 55,
            invoice_boost: 10,
            ..VelocityConfig::default()
        };
        let checker = VelocityChecker::new(cfg);
        let e1 = VelocityEvent {
            event_type: EventType::Invoice,
            ip: "1.2.3.4",
            subject_id: Some(42),
            path: "/api/miniapp/invoice",
            ua: None,
            ts_ms: 0,
        };
        let d1 = checker.check_and_record(&e1);
        assert_eq!(d1.action, VelocityAction::LogOnly);
        let e2 = VelocityEvent { ts_ms: 100, ..e1 };
        let d2 = checker.check_and_record(&e2);
        assert_eq!(d2.action, VelocityAction::HardBlockBeforePayment);
    }

    #[test]
    fn non_invoice_events_never_hard_block() {
        let cfg = VelocityConfig {
            ip_short_max: 0,
            global_cap: 0,
            hard_block: 1,
            ..VelocityConfig::default()
        };
        let checker = VelocityChecker::new(cfg);
        let e = VelocityEvent {
            event_type: EventType::Other,
            ip: "5.5.5.5",
            subject_id: None,
            path: "/webhook",
            ua: None,
            ts_ms: 0,
        };
        let d = checker.check_and_record(&e);
        assert_ne!(d.action, VelocityAction::HardBlockBeforePayment);
    }
}
