use crate::db::kv_store::StoreError;
use crate::storage::s3_service::ObjectStoreError;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// Missing or empty media URL. Never retried, never cached.
    #[error("Validation error: {0}")]
    Validation(String),
    /// Inference API, network, storage or video decoding failure.
    #[error("Service error: {0}")]
    Service(String),
}

impl AnalysisError {
    pub fn service(msg: impl Into<String>) -> Self {
        AnalysisError::Service(msg.into())
    }

    pub fn is_service(&self) -> bool {
        matches!(self, AnalysisError::Service(_))
    }
}

impl From<reqwest::Error> for AnalysisError {
    fn from(err: reqwest::Error) -> Self {
        AnalysisError::Service(format!("HTTP request failed: {}", err))
    }
}

impl From<StoreError> for AnalysisError {
    fn from(err: StoreError) -> Self {
        AnalysisError::Service(err.to_string())
    }
}

impl From<ObjectStoreError> for AnalysisError {
    fn from(err: ObjectStoreError) -> Self {
        AnalysisError::Service(err.to_string())
    }
}

impl From<std::io::Error> for AnalysisError {
    fn from(err: std::io::Error) -> Self {
        AnalysisError::Service(format!("IO error: {}", err))
    }
}

impl From<image::ImageError> for AnalysisError {
    fn from(err: image::ImageError) -> Self {
        AnalysisError::Service(format!("Image encoding error: {}", err))
    }
}

/// Rejects empty or whitespace-only media URLs.
pub fn validate_media_url(url: &str) -> Result<&str, AnalysisError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(AnalysisError::Validation("media URL must not be empty".into()));
    }
    Ok(trimmed)
}
