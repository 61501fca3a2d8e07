use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

/// Short-lived set of tokens the authorization service has accepted
///
/// Expiry is checked on every read; [`TokenCache::spawn_sweeper`] also drops
/// expired entries periodically so the map stays bounded.
#[derive(Debug, Default)]
pub struct TokenCache {
    entries: DashMap<String, Instant>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `token` was validated and has not expired
    pub fn get(&self, token: &str) -> bool {
        let now = Instant::now();
        let Some(valid_until) = self.entries.get(token).map(|entry| *entry) else {
            return false;
        };

        if valid_until > now {
            return true;
        }

        self.entries
            .remove_if(token, |_, valid_until| *valid_until <= now);
        false
    }

    /// Remember `token` as valid for `ttl`
    pub fn set(&self, token: &str, ttl: Duration) {
        self.entries
            .insert(token.to_string(), Instant::now() + ttl);
    }

    /// Drop all expired entries, returning how many were removed
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, valid_until| *valid_until > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sweep on a fixed interval until the handle is aborted
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = cache.sweep();
                if removed > 0 {
                    debug!("Token cache sweep removed {} expired entries", removed);
                }
            }
        })
    }
}
