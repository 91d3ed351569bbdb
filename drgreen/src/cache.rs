// Bounded, TTL-expiring cache of strain detail responses keyed by strain id.
// Shared by reference between the proxy, which fills it, and the catalog
// synchronizer, which invalidates entries it rewrites.
use crate::config::CacheConfig;
use crate::metrics_defs::{STRAIN_CACHE_HIT, STRAIN_CACHE_MISS};
use hyper::body::Bytes;
use moka::sync::Cache;
use shared::counter;
use std::time::Duration;

pub struct StrainCache {
    cache: Cache<String, Bytes>,
}

impl StrainCache {
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(Duration::from_secs(config.ttl_secs))
            .build();

        StrainCache { cache }
    }

    pub fn get(&self, strain_id: &str) -> Option<Bytes> {
        let cached = self.cache.get(strain_id);
        let metric_def = if cached.is_some() {
            STRAIN_CACHE_HIT
        } else {
            STRAIN_CACHE_MISS
        };
        counter!(metric_def).increment(1);
        cached
    }

    pub fn insert(&self, strain_id: &str, body: Bytes) {
        self.cache.insert(strain_id.to_string(), body);
    }

    pub fn invalidate(&self, strain_id: &str) {
        self.cache.invalidate(strain_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_invalidate() {
        let cache = StrainCache::new(&CacheConfig::default());
        assert_eq!(cache.get("s1"), None);

        cache.insert("s1", Bytes::from_static(b"{}"));
        assert_eq!(cache.get("s1"), Some(Bytes::from_static(b"{}")));

        cache.invalidate("s1");
        assert_eq!(cache.get("s1"), None);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = StrainCache::new(&CacheConfig {
            max_capacity: 10,
            ttl_secs: 1,
        });
        cache.insert("s1", Bytes::from_static(b"{}"));
        std::thread::sleep(Duration::from_millis(1_100));
        assert_eq!(cache.get("s1"), None);
    }
}
