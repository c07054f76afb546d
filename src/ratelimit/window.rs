//! Volatile sliding-window attempt counters

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Counters are kept per client and certificate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttemptKey {
    pub ip: String,
    pub cert_hash: String,
}

impl AttemptKey {
    pub fn new(ip: impl Into<String>, cert_hash: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            cert_hash: cert_hash.into(),
        }
    }
}

/// Key-value store with TTL semantics: an entry lives only as long as it has
/// attempts inside the window.
#[async_trait]
pub trait AttemptWindowStore: Send + Sync {
    /// Append `now`, drop entries older than `window`, return the count in the window.
    async fn record(&self, key: &AttemptKey, now: DateTime<Utc>, window: Duration) -> u32;

    /// Count without recording.
    async fn count(&self, key: &AttemptKey, now: DateTime<Utc>, window: Duration) -> u32;

    /// Forget every counter belonging to `ip`, across all certificates.
    async fn clear_ip(&self, ip: &str);

    /// Drop keys with no attempt inside the window; returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>, window: Duration) -> usize;
}

/// Records between opportunistic purges of idle keys
const PURGE_EVERY: u64 = 256;

#[derive(Debug, Default)]
struct Windows {
    entries: HashMap<AttemptKey, VecDeque<DateTime<Utc>>>,
    records_since_purge: u64,
}

fn trim(attempts: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) {
    let cutoff = now - window;
    while attempts.front().is_some_and(|ts| *ts <= cutoff) {
        attempts.pop_front();
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryAttemptStore {
    windows: Arc<Mutex<Windows>>,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.entries.len()
    }
}

#[async_trait]
impl AttemptWindowStore for MemoryAttemptStore {
    async fn record(&self, key: &AttemptKey, now: DateTime<Utc>, window: Duration) -> u32 {
        let mut windows = self.windows.lock().await;

        windows.records_since_purge += 1;
        if windows.records_since_purge >= PURGE_EVERY {
            let cutoff = now - window;
            windows
                .entries
                .retain(|_, attempts| attempts.back().is_some_and(|ts| *ts > cutoff));
            windows.records_since_purge = 0;
        }

        let attempts = windows.entries.entry(key.clone()).or_default();
        attempts.push_back(now);
        trim(attempts, now, window);
        attempts.len() as u32
    }

    async fn count(&self, key: &AttemptKey, now: DateTime<Utc>, window: Duration) -> u32 {
        let mut windows = self.windows.lock().await;
        match windows.entries.get_mut(key) {
            Some(attempts) => {
                trim(attempts, now, window);
                attempts.len() as u32
            }
            None => 0,
        }
    }

    async fn clear_ip(&self, ip: &str) {
        let mut windows = self.windows.lock().await;
        let before = windows.entries.len();
        windows.entries.retain(|key, _| key.ip != ip);
        debug!("Cleared {} attempt windows for {}", before - windows.entries.len(), ip);
    }

    async fn purge_expired(&self, now: DateTime<Utc>, window: Duration) -> usize {
        let mut windows = self.windows.lock().await;
        let cutoff = now - window;
        let before = windows.entries.len();
        windows
            .entries
            .retain(|_, attempts| attempts.back().is_some_and(|ts| *ts > cutoff));
        windows.records_since_purge = 0;
        before - windows.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_window_slides() {
        let store = MemoryAttemptStore::new();
        let key = AttemptKey::new("10.0.0.1", "0xabc");
        let window = Duration::minutes(15);
        let start = Utc::now();

        assert_eq!(store.record(&key, start, window).await, 1);
        assert_eq!(store.record(&key, start + Duration::minutes(5), window).await, 2);
        // The first attempt has aged out by now.
        assert_eq!(store.record(&key, start + Duration::minutes(16), window).await, 2);
        assert_eq!(store.count(&key, start + Duration::minutes(40), window).await, 0);
    }

    #[tokio::test]
    async fn test_clear_ip_spans_certificates() {
        let store = MemoryAttemptStore::new();
        let window = Duration::minutes(15);
        let now = Utc::now();
        store.record(&AttemptKey::new("10.0.0.1", "0xa"), now, window).await;
        store.record(&AttemptKey::new("10.0.0.1", "0xb"), now, window).await;
        store.record(&AttemptKey::new("10.0.0.2", "0xa"), now, window).await;

        store.clear_ip("10.0.0.1").await;
        assert_eq!(store.tracked_keys().await, 1);
        assert_eq!(
            store.count(&AttemptKey::new("10.0.0.2", "0xa"), now, window).await,
            1
        );
    }

    #[tokio::test]
    async fn test_purge_drops_idle_keys() {
        let store = MemoryAttemptStore::new();
        let window = Duration::minutes(15);
        let now = Utc::now();
        store.record(&AttemptKey::new("10.0.0.1", "0xa"), now, window).await;
        store
            .record(&AttemptKey::new("10.0.0.2", "0xa"), now + Duration::minutes(10), window)
            .await;

        let removed = store.purge_expired(now + Duration::minutes(20), window).await;
        assert_eq!(removed, 1);
        assert_eq!(store.tracked_keys().await, 1);
    }
}
