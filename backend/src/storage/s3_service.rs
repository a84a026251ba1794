use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::time::Duration;

use super::object_store::ObjectStore;

#[derive(Clone)]
pub struct S3Service {
    client: Client,
    bucket_name: String,
    public_base_url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("S3 error: {0}")]
    S3(String),
    #[error("Invalid file format")]
    InvalidFormat,
    #[error("File too large")]
    FileTooLarge,
}

const PRESIGNED_URL_TTL: Duration = Duration::from_secs(3600);

impl S3Service {
    pub fn new(client: Client, bucket_name: String, public_base_url: Option<String>) -> Self {
        Self {
            client,
            bucket_name,
            public_base_url,
        }
    }

    pub fn generate_frame_key(video_hash: &str, frame_index: u64, file_extension: &str) -> String {
        format!("frames/{}/{}.{}", video_hash, frame_index, file_extension)
    }

    pub fn extract_file_extension(mime_type: &str) -> Result<&str, ObjectStoreError> {
        match mime_type {
            "image/jpeg" => Ok("jpg"),
            "image/png" => Ok("png"),
            "image/webp" => Ok("webp"),
            _ => Err(ObjectStoreError::InvalidFormat),
        }
    }

    pub fn validate_image_size(image_data: &[u8]) -> Result<(), ObjectStoreError> {
        const MAX_SIZE: usize = 50 * 1024 * 1024;
        if image_data.len() > MAX_SIZE {
            return Err(ObjectStoreError::FileTooLarge);
        }
        Ok(())
    }

    async fn object_url(&self, s3_key: &str) -> Result<String, ObjectStoreError> {
        if let Some(base) = &self.public_base_url {
            return Ok(format!("{}/{}", base.trim_end_matches('/'), s3_key));
        }

        let presign = PresigningConfig::expires_in(PRESIGNED_URL_TTL)
            .map_err(|e| ObjectStoreError::S3(e.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket_name)
            .key(s3_key)
            .presigned(presign)
            .await
            .map_err(|e| ObjectStoreError::S3(e.to_string()))?;
        Ok(request.uri().to_string())
    }
}

#[async_trait]
impl ObjectStore for S3Service {
    async fn put_object(
        &self,
        s3_key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<String, ObjectStoreError> {
        S3Service::validate_image_size(data)?;
        S3Service::extract_file_extension(content_type)?;

        let body = ByteStream::from(data.to_vec());

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(s3_key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| ObjectStoreError::S3(e.to_string()))?;

        log::debug!("Uploaded {} bytes to s3://{}/{}", data.len(), self.bucket_name, s3_key);
        self.object_url(s3_key).await
    }
}
