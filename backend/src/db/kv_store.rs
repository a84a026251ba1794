use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::Utc;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("DynamoDB error: {0}")]
    DynamoDb(String),
    #[error("Invalid data format: {0}")]
    InvalidData(String),
}

/// TTL-capable key-value store shared by the analysis cache and task records.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;
}

/// DynamoDB table keyed by `key` (S) with `value` (S) and an `expires_at`
/// epoch-seconds attribute registered as the table's TTL attribute.
#[derive(Clone)]
pub struct DynamoDbStore {
    client: Client,
    table_name: String,
}

impl DynamoDbStore {
    pub fn new(client: Client, table_name: String) -> Self {
        log::info!("Using DynamoDB key-value store with table: {}", table_name);
        Self { client, table_name }
    }
}

#[async_trait]
impl KeyValueStore for DynamoDbStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let response = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("key", AttributeValue::S(key.to_string()))
            .send()
            .await
            .map_err(|e| {
                log::error!("DynamoDB get_item failed for {}: {:?}", key, e);
                StoreError::DynamoDb(e.to_string())
            })?;

        let Some(item) = response.item else {
            return Ok(None);
        };

        // TTL deletion in DynamoDB is lazy, so expired rows can still be returned.
        let expires_at = item
            .get("expires_at")
            .and_then(|av| av.as_n().ok())
            .and_then(|n| n.parse::<i64>().ok());
        if let Some(expires_at) = expires_at {
            if expires_at <= Utc::now().timestamp() {
                log::debug!("Item {} found but expired", key);
                return Ok(None);
            }
        }

        let value = item
            .get("value")
            .and_then(|av| av.as_s().ok())
            .ok_or_else(|| StoreError::InvalidData(format!("Missing value attribute for {}", key)))?;
        Ok(Some(value.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = Utc::now().timestamp() + ttl.as_secs() as i64;

        let mut item = HashMap::new();
        item.insert("key".to_string(), AttributeValue::S(key.to_string()));
        item.insert("value".to_string(), AttributeValue::S(value.to_string()));
        item.insert(
            "expires_at".to_string(),
            AttributeValue::N(expires_at.to_string()),
        );

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| {
                log::error!("DynamoDB put_item failed for {}: {:?}", key, e);
                StoreError::DynamoDb(e.to_string())
            })?;
        Ok(())
    }
}

/// Process-local store used when no table is configured, and in tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, deadline)| *deadline > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    /// Expired entries are dropped on every write.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, (_, deadline)| *deadline > now);
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(())
    }
}
