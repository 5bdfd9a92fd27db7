use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Clone)]
struct CacheEntry<T> {
    data: T,
    expires_at: Instant,
}

/// Longest TTL honoured; larger values are clamped.
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// String-keyed cache with a single TTL. A zero TTL turns every insert into
/// a no-op.
#[derive(Clone)]
pub struct TtlCache<T: Clone> {
    entries: Arc<RwLock<HashMap<String, CacheEntry<T>>>>,
    ttl: Duration,
}

impl<T> TtlCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl: ttl.min(MAX_TTL),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub async fn get(&self, key: &str) -> Option<T> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.data.clone())
    }

    pub async fn insert(&self, key: String, value: T) {
        if !self.is_enabled() {
            return;
        }
        let Some(expires_at) = Instant::now().checked_add(self.ttl) else {
            return;
        };
        let entry = CacheEntry {
            data: value,
            expires_at,
        };
        self.entries.write().await.insert(key, entry);
    }

    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Periodically drops expired entries so keys that are never read again
    /// do not accumulate.
    pub fn spawn_purge(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let purged = cache.purge_expired().await;
                if purged > 0 {
                    tracing::debug!(purged, "expired cache entries purged");
                }
            }
        })
    }
}
