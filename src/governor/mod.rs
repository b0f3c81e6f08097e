use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{interval, Duration};
use tracing::debug;

const REQUEST_WINDOW_SECONDS: i64 = 60;
const WEBHOOK_WINDOW_SECONDS: i64 = 60;
const WEBHOOK_MAX_PER_WINDOW: usize = 60;
const PURGE_INTERVAL_SECONDS: u64 = 300;

/// Outcome of a rate check that failed: how long the caller should wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAfter {
    pub seconds: i64,
}

struct FixedWindow {
    started_at: DateTime<Utc>,
    count: usize,
}

/// Process-wide request-rate bookkeeping. API traffic uses a sliding
/// one-minute window per caller identity; inbound webhooks use a fixed
/// one-minute window per bot so a single public endpoint cannot be abused
/// past its cap regardless of the owner's own ceiling.
pub struct RateGovernor {
    request_windows: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
    webhook_windows: DashMap<i32, FixedWindow>,
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new()
    }
}

impl RateGovernor {
    pub fn new() -> Self {
        Self {
            request_windows: Mutex::new(HashMap::new()),
            webhook_windows: DashMap::new(),
        }
    }

    /// Sliding-window check for an API request. `identity` is the user id
    /// for authenticated calls, otherwise the peer address.
    pub async fn check_request(
        &self,
        identity: &str,
        limit: usize,
    ) -> Result<(), RetryAfter> {
        let now = Utc::now();
        let window_start = now - ChronoDuration::seconds(REQUEST_WINDOW_SECONDS);

        let mut windows = self.request_windows.lock().await;
        let entries = windows.entry(identity.to_string()).or_default();
        while matches!(entries.front(), Some(front) if *front < window_start) {
            entries.pop_front();
        }
        if entries.len() >= limit {
            let oldest = entries.front().copied().unwrap_or(now);
            let retry = (oldest + ChronoDuration::seconds(REQUEST_WINDOW_SECONDS) - now)
                .num_seconds()
                .max(1);
            return Err(RetryAfter { seconds: retry });
        }
        entries.push_back(now);
        Ok(())
    }

    /// Fixed-window check for inbound webhook traffic, keyed per bot.
    /// Returns false when the bot's window is saturated.
    pub fn check_webhook(&self, bot_id: i32) -> bool {
        let now = Utc::now();
        let mut entry = self.webhook_windows.entry(bot_id).or_insert(FixedWindow {
            started_at: now,
            count: 0,
        });
        if (now - entry.started_at).num_seconds() >= WEBHOOK_WINDOW_SECONDS {
            entry.started_at = now;
            entry.count = 0;
        }
        if entry.count >= WEBHOOK_MAX_PER_WINDOW {
            return false;
        }
        entry.count += 1;
        true
    }

    /// Drops windows that can no longer affect any decision.
    pub async fn purge_expired(&self) {
        let now = Utc::now();
        let request_cutoff = now - ChronoDuration::seconds(REQUEST_WINDOW_SECONDS);

        let mut windows = self.request_windows.lock().await;
        windows.retain(|_, entries| {
            while matches!(entries.front(), Some(front) if *front < request_cutoff) {
                entries.pop_front();
            }
            !entries.is_empty()
        });
        let remaining = windows.len();
        drop(windows);

        self.webhook_windows
            .retain(|_, w| (now - w.started_at).num_seconds() < WEBHOOK_WINDOW_SECONDS);

        debug!(
            request_windows = remaining,
            webhook_windows = self.webhook_windows.len(),
            "purged expired rate windows"
        );
    }
}

/// Periodic purge so stale identities do not accumulate unbounded.
pub fn spawn_purge_task(governor: Arc<RateGovernor>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(PURGE_INTERVAL_SECONDS));
        loop {
            ticker.tick().await;
            governor.purge_expired().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_limit_then_rejects() {
        let governor = RateGovernor::new();
        for _ in 0..5 {
            governor.check_request("user:1", 5).await.unwrap();
        }
        let rejected = governor.check_request("user:1", 5).await;
        let retry = rejected.unwrap_err();
        assert!(retry.seconds >= 1 && retry.seconds <= 60);
    }

    #[tokio::test]
    async fn identities_are_independent() {
        let governor = RateGovernor::new();
        for _ in 0..3 {
            governor.check_request("user:1", 3).await.unwrap();
        }
        assert!(governor.check_request("user:1", 3).await.is_err());
        assert!(governor.check_request("user:2", 3).await.is_ok());
    }

    #[tokio::test]
    async fn webhook_window_caps_per_bot() {
        let governor = RateGovernor::new();
        for _ in 0..WEBHOOK_MAX_PER_WINDOW {
            assert!(governor.check_webhook(7));
        }
        assert!(!governor.check_webhook(7));
        // Other bots are unaffected.
        assert!(governor.check_webhook(8));
    }

    #[tokio::test]
    async fn purge_drops_empty_windows() {
        let governor = RateGovernor::new();
        governor.check_request("user:1", 10).await.unwrap();
        governor.purge_expired().await;
        // Entry still live inside its window.
        assert_eq!(governor.request_windows.lock().await.len(), 1);
    }
}
