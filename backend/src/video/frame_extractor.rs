use image::ImageFormat;
use reqwest::Client;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;

use super::decoder::VideoDecoder;
use crate::cache::keys::url_digest;
use crate::error::AnalysisError;
use crate::storage::object_store::ObjectStore;
use crate::storage::s3_service::S3Service;

const FRAME_CONTENT_TYPE: &str = "image/jpeg";

/// Samples key frames from a video and republishes them as images.
#[derive(Clone)]
pub struct FrameExtractor {
    http: Client,
    decoder: Arc<dyn VideoDecoder>,
    storage: Arc<dyn ObjectStore>,
    scratch_root: Option<PathBuf>,
}

impl FrameExtractor {
    pub fn new(
        decoder: Arc<dyn VideoDecoder>,
        storage: Arc<dyn ObjectStore>,
        download_timeout: Duration,
    ) -> Result<Self, AnalysisError> {
        let http = Client::builder().timeout(download_timeout).build()?;
        Ok(Self {
            http,
            decoder,
            storage,
            scratch_root: None,
        })
    }

    /// Parent directory for per-video download dirs instead of the system temp dir.
    pub fn with_scratch_dir(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    /// Downloads `video_url` into a scoped temp dir, which is removed when this
    /// returns, whatever the outcome.
    pub async fn extract(&self, video_url: &str, max_frames: usize) -> Result<Vec<String>, AnalysisError> {
        let workdir = match &self.scratch_root {
            Some(root) => TempDir::new_in(root)?,
            None => TempDir::new()?,
        };
        let local_path = workdir.path().join(format!("source.{}", video_extension(video_url)));

        self.download(video_url, &local_path).await?;
        self.extract_from_file(&local_path, video_url, max_frames).await
    }

    async fn download(&self, video_url: &str, dest: &Path) -> Result<(), AnalysisError> {
        if let Some(local) = local_source(video_url) {
            log::info!("Copying local video {}", local.display());
            tokio::fs::copy(&local, dest).await?;
            return Ok(());
        }

        log::info!("Downloading video {}", video_url);
        let mut response = self.http.get(video_url).send().await?;
        if !response.status().is_success() {
            return Err(AnalysisError::Service(format!(
                "video download failed with status {}",
                response.status()
            )));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0usize;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len();
        }
        file.flush().await?;
        log::debug!("Downloaded {} bytes to {}", written, dest.display());
        Ok(())
    }

    pub async fn extract_from_file(
        &self,
        path: &Path,
        video_url: &str,
        max_frames: usize,
    ) -> Result<Vec<String>, AnalysisError> {
        let total_frames = self.decoder.frame_count(path).await?;
        if total_frames == 0 {
            return Err(AnalysisError::service("video reports zero frames"));
        }

        let indices = sample_frame_indices(total_frames, max_frames);
        log::info!(
            "Extracting {} of {} frames from {}",
            indices.len(),
            total_frames,
            video_url
        );

        let video_hash = url_digest(video_url);
        let mut frame_urls = Vec::with_capacity(indices.len());
        for index in indices {
            match self.publish_frame(path, &video_hash, index).await {
                Ok(url) => frame_urls.push(url),
                Err(e) => log::warn!("Skipping frame {} of {}: {}", index, video_url, e),
            }
        }

        if frame_urls.is_empty() {
            return Err(AnalysisError::service("no frames could be extracted from video"));
        }
        Ok(frame_urls)
    }

    async fn publish_frame(&self, path: &Path, video_hash: &str, index: u64) -> Result<String, AnalysisError> {
        let encoded = self.decoder.decode_frame(path, index).await?;
        let jpeg = reencode_as_jpeg(&encoded)?;
        let key = S3Service::generate_frame_key(video_hash, index, "jpg");
        Ok(self.storage.put_object(&key, &jpeg, FRAME_CONTENT_TYPE).await?)
    }
}

/// Every frame when `total <= max_frames`, otherwise `max_frames` indices at
/// stride `total / max_frames`.
pub fn sample_frame_indices(total_frames: u64, max_frames: usize) -> Vec<u64> {
    let max = max_frames as u64;
    if max == 0 {
        return Vec::new();
    }
    if total_frames <= max {
        return (0..total_frames).collect();
    }
    let stride = total_frames / max;
    (0..max).map(|i| i * stride).collect()
}

fn reencode_as_jpeg(encoded: &[u8]) -> Result<Vec<u8>, AnalysisError> {
    let frame = image::load_from_memory(encoded)?;
    let rgb = image::DynamicImage::ImageRgb8(frame.to_rgb8());
    let mut buf = Cursor::new(Vec::new());
    rgb.write_to(&mut buf, ImageFormat::Jpeg)?;
    Ok(buf.into_inner())
}

fn local_source(video_url: &str) -> Option<std::path::PathBuf> {
    let parsed = url::Url::parse(video_url).ok()?;
    if parsed.scheme() != "file" {
        return None;
    }
    parsed.to_file_path().ok()
}

fn video_extension(video_url: &str) -> String {
    url::Url::parse(video_url)
        .ok()
        .and_then(|u| {
            Path::new(u.path())
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
        })
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "mp4".to_string())
}
