//! Admin authentication and per-IP throttling (spec.md §4.3
//! "Authentication").

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

const MAX_FAILURES: u32 = 5;
const FAILURE_WINDOW: Duration = Duration::from_secs(5 * 60);
const BAN_DURATION: Duration = Duration::from_secs(15 * 60);

struct FailureRecord {
    count: u32,
    window_started_at: Instant,
}

/// Per-IP admin-authentication failure tracking and bans.
#[derive(Default)]
pub struct AuthTable {
    failures: HashMap<IpAddr, FailureRecord>,
    banned_until: HashMap<IpAddr, Instant>,
}

impl AuthTable {
    /// Whether this IP is currently inside an active ban window.
    pub fn is_banned(&self, addr: IpAddr) -> bool {
        self.banned_until
            .get(&addr)
            .is_some_and(|until| Instant::now() < *until)
    }

    /// Record a failed authentication attempt. Returns `true` if this
    /// attempt just triggered a new ban.
    pub fn record_failure(&mut self, addr: IpAddr) -> bool {
        let now = Instant::now();
        let record = self.failures.entry(addr).or_insert_with(|| FailureRecord {
            count: 0,
            window_started_at: now,
        });

        if now.duration_since(record.window_started_at) > FAILURE_WINDOW {
            record.count = 0;
            record.window_started_at = now;
        }
        record.count += 1;

        if record.count >= MAX_FAILURES {
            self.banned_until.insert(addr, now + BAN_DURATION);
            self.failures.remove(&addr);
            true
        } else {
            false
        }
    }

    /// Clear the failure counter for an IP after a successful login.
    pub fn record_success(&mut self, addr: IpAddr) {
        self.failures.remove(&addr);
    }
}

/// Constant-time comparison of two equal-length ASCII tokens. Returns
/// `false` immediately (non-constant-time) if the lengths differ, since
/// an admin token's length is not itself a meaningful secret.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifth_failure_within_window_triggers_ban() {
        let mut table = AuthTable::default();
        let addr: IpAddr = "127.0.0.1".parse().unwrap();
        for _ in 0..4 {
            assert!(!table.record_failure(addr));
        }
        assert!(table.record_failure(addr));
        assert!(table.is_banned(addr));
    }

    #[test]
    fn success_clears_failure_counter() {
        let mut table = AuthTable::default();
        let addr: IpAddr = "127.0.0.1".parse().unwrap();
        table.record_failure(addr);
        table.record_failure(addr);
        table.record_success(addr);
        for _ in 0..4 {
            assert!(!table.record_failure(addr));
        }
    }

    #[test]
    fn constant_time_eq_rejects_mismatched_tokens() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }
}
