//! Per-peer fixed-window rate limiting.
//!
//! A soft cap, enforced before authentication so a noisy peer cannot burn
//! signature checks. Windows are one minute; stale windows are replaced on
//! access rather than swept.

use dashmap::DashMap;

pub struct RateLimiter {
    limit_per_minute: u32,
    windows: DashMap<String, Window>,
}

#[derive(Clone, Copy)]
struct Window {
    minute: i64,
    count: u32,
}

impl RateLimiter {
    pub fn new(limit_per_minute: u32) -> Self {
        Self {
            limit_per_minute,
            windows: DashMap::new(),
        }
    }

    /// Record one request from `peer`. Returns false when the peer is over
    /// its per-minute budget.
    pub fn allow(&self, peer: &str) -> bool {
        self.allow_at(peer, chrono::Utc::now().timestamp())
    }

    fn allow_at(&self, peer: &str, unix_seconds: i64) -> bool {
        let minute = unix_seconds / 60;
        let mut entry = self
            .windows
            .entry(peer.to_string())
            .or_insert(Window { minute, count: 0 });

        if entry.minute != minute {
            entry.minute = minute;
            entry.count = 0;
        }

        entry.count = entry.count.saturating_add(1);
        entry.count <= self.limit_per_minute
    }
}
