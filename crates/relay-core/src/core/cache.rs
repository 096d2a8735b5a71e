//! Keyed, TTL-bounded in-memory response cache with tenant isolation.

use std::time::{Duration, Instant};

use ahash::HashMap;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub expires_at: Instant,
}

pub struct ResponseCache {
    entries: RwLock<HashMap<String, CachedResponse>>,
    max_size: usize,
}

impl ResponseCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::default()),
            max_size,
        }
    }

    /// Key = SHA-256(backendID ∥ tenantID ∥ method ∥ URL). Tenant isolation
    /// falls directly out of this composition: no entry is reachable
    /// across tenants.
    pub fn cache_key(backend_id: &str, tenant_id: &str, method: &str, url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(backend_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(tenant_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(method.as_bytes());
        hasher.update(b"\0");
        hasher.update(url.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// A hit requires `now < expires_at`; expired entries are invisible
    /// even before the sweeper removes them.
    pub async fn get(&self, key: &str) -> Option<CachedResponse> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| Instant::now() < entry.expires_at)
            .cloned()
    }

    /// Only `GET` + status 200 responses reach this call; callers enforce
    /// that policy before inserting.
    pub async fn insert(&self, key: String, status: u16, headers: Vec<(String, String)>, body: Vec<u8>, ttl: Duration) {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_size && !entries.contains_key(&key) {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, v)| v.expires_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key,
            CachedResponse {
                status,
                headers,
                body,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Removes expired entries. Run on a 5-minute interval by the module.
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, v| v.expires_at > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hit_within_ttl_miss_after_expiry() {
        let cache = ResponseCache::new(10);
        let key = ResponseCache::cache_key("a", "t1", "GET", "/x");
        cache
            .insert(key.clone(), 200, vec![], b"body".to_vec(), Duration::from_millis(30))
            .await;

        assert!(cache.get(&key).await.is_some());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn tenants_do_not_share_entries() {
        let cache = ResponseCache::new(10);
        let key_t1 = ResponseCache::cache_key("a", "t1", "GET", "/x");
        let key_t2 = ResponseCache::cache_key("a", "t2", "GET", "/x");
        assert_ne!(key_t1, key_t2);

        cache
            .insert(key_t1.clone(), 200, vec![], b"t1-body".to_vec(), Duration::from_secs(5))
            .await;
        assert!(cache.get(&key_t2).await.is_none());
    }

    #[tokio::test]
    async fn evicts_oldest_when_over_capacity() {
        let cache = ResponseCache::new(2);
        cache
            .insert("k1".into(), 200, vec![], vec![], Duration::from_secs(1))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache
            .insert("k2".into(), 200, vec![], vec![], Duration::from_secs(5))
            .await;
        cache
            .insert("k3".into(), 200, vec![], vec![], Duration::from_secs(5))
            .await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get("k1").await.is_none());
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_entries() {
        let cache = ResponseCache::new(10);
        cache
            .insert("expired".into(), 200, vec![], vec![], Duration::from_millis(10))
            .await;
        cache
            .insert("fresh".into(), 200, vec![], vec![], Duration::from_secs(5))
            .await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        let removed = cache.sweep().await;
        assert_eq!(removed, 1);
        assert_eq!(cache.len().await, 1);
    }
}
