use chrono::Utc;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use shared::{AsyncTask, MediaType};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::cache::keys::task_key;
use crate::db::kv_store::{KeyValueStore, StoreError};

#[derive(Error, Debug)]
pub enum TaskServiceError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Serde JSON error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Persists `AsyncTask` records as JSON under `ai_task:{task_id}` with a TTL.
#[derive(Clone)]
pub struct TaskService {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl TaskService {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// `img_`/`vid_` followed by 16 hex chars of a SHA-256 over the media
    /// reference, the submit time and a random nonce.
    pub fn generate_task_id(media_url: &str, media_type: MediaType) -> String {
        let mut hasher = Sha256::new();
        hasher.update(media_type.task_prefix().as_bytes());
        hasher.update(media_url.as_bytes());
        hasher.update(Utc::now().timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
        hasher.update(Uuid::new_v4().as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("{}_{}", media_type.task_prefix(), &digest[..16])
    }

    pub async fn create_task(&self, media_url: &str, media_type: MediaType) -> Result<AsyncTask, TaskServiceError> {
        let task_id = Self::generate_task_id(media_url, media_type);
        let task = AsyncTask::new(task_id, media_url.to_string(), media_type);
        self.update_task(&task).await?;
        info!("Task {} created for {} {}", task.task_id, media_type, media_url);
        Ok(task)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<AsyncTask>, TaskServiceError> {
        debug!("Retrieving task {}", task_id);
        match self.store.get(&task_key(task_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => {
                warn!("Task {} not found (never submitted or expired)", task_id);
                Ok(None)
            }
        }
    }

    /// Writes the whole record, refreshing its TTL.
    pub async fn update_task(&self, task: &AsyncTask) -> Result<(), TaskServiceError> {
        let serialized = serde_json::to_string(task)?;
        self.store
            .set(&task_key(&task.task_id), &serialized, self.ttl)
            .await?;
        debug!("Task {} persisted with status {}", task.task_id, task.status);
        Ok(())
    }
}
