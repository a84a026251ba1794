use shared::{AnalysisResult, MediaType};
use std::sync::Arc;
use std::time::Duration;

use super::keys;
use crate::db::kv_store::KeyValueStore;

/// Analysis cache on top of the key-value store. Reads never fail (errors
/// become misses) and writes are best-effort.
#[derive(Clone)]
pub struct CacheService {
    store: Arc<dyn KeyValueStore>,
    default_ttl: Duration,
}

impl CacheService {
    pub fn new(store: Arc<dyn KeyValueStore>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    pub fn key(&self, media_url: &str, media_type: MediaType) -> String {
        keys::analysis_key(media_url, media_type)
    }

    pub async fn get(&self, key: &str) -> Option<AnalysisResult> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                log::debug!("Cache miss: {}", key);
                return None;
            }
            Err(e) => {
                log::warn!("Cache read failed for {}: {}", key, e);
                return None;
            }
        };

        match serde_json::from_str::<AnalysisResult>(&raw) {
            Ok(result) => {
                log::info!("Cache hit: {}", key);
                Some(result)
            }
            Err(e) => {
                log::warn!("Discarding undecodable cache entry {}: {}", key, e);
                None
            }
        }
    }

    pub async fn set(&self, key: &str, result: &AnalysisResult, ttl: Option<Duration>) -> bool {
        let serialized = match serde_json::to_string(result) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("Failed to serialize analysis for {}: {}", key, e);
                return false;
            }
        };

        match self
            .store
            .set(key, &serialized, ttl.unwrap_or(self.default_ttl))
            .await
        {
            Ok(()) => {
                log::debug!("Cached analysis under {}", key);
                true
            }
            Err(e) => {
                log::warn!("Cache write failed for {}: {}", key, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::kv_store::{MemoryStore, StoreError};
    use async_trait::async_trait;

    struct BrokenStore;

    #[async_trait]
    impl KeyValueStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::DynamoDb("unreachable".into()))
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
            Err(StoreError::DynamoDb("unreachable".into()))
        }
    }

    fn cache(store: Arc<dyn KeyValueStore>) -> CacheService {
        CacheService::new(store, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn round_trip_preserves_result() {
        let cache = cache(Arc::new(MemoryStore::new()));
        let result = AnalysisResult::new("道路损坏", "路面出现明显裂缝", 0.4).with_detail("method", "remote");
        let key = cache.key("https://oss.example.com/a.jpg", MediaType::Image);

        assert!(cache.get(&key).await.is_none());
        assert!(cache.set(&key, &result, None).await);

        let cached = cache.get(&key).await.unwrap();
        assert_eq!(cached.category, result.category);
        assert_eq!(cached.description, result.description);
        assert_eq!(cached.confidence, result.confidence);
        assert_eq!(cached, result);
    }

    #[tokio::test]
    async fn corrupt_entries_are_misses() {
        let store = Arc::new(MemoryStore::new());
        store
            .set("ai_analysis:image:deadbeef", "{not json", Duration::from_secs(60))
            .await
            .unwrap();
        let cache = cache(store);
        assert!(cache.get("ai_analysis:image:deadbeef").await.is_none());
    }

    #[tokio::test]
    async fn store_failures_never_surface() {
        let cache = cache(Arc::new(BrokenStore));
        let result = AnalysisResult::new("其他", "", 0.3);
        assert!(cache.get("k").await.is_none());
        assert!(!cache.set("k", &result, Some(Duration::from_secs(1))).await);
    }
}
