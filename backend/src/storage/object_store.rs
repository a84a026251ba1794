use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::s3_service::ObjectStoreError;

/// Write side of object storage: stores bytes and returns a URL that the
/// inference API can fetch.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<String, ObjectStoreError>;
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, (Vec<u8>, String)>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<(Vec<u8>, String)> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<String, ObjectStoreError> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), (data.to_vec(), content_type.to_string()));
        Ok(format!("memory://{}", key))
    }
}
