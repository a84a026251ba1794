use futures::future::join_all;
use serde_json::{json, Value};
use shared::{AnalysisResult, Classification, MediaType};

use crate::cache::cache_service::CacheService;
use crate::classify::event_classifier::EventClassifier;
use crate::error::{validate_media_url, AnalysisError};
use crate::inference::fallback::FallbackClassifier;
use crate::inference::remote_analyzer::RemoteAnalyzer;
use crate::video::frame_extractor::FrameExtractor;
use crate::video::fusion;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaItem {
    Image { url: String },
    Video { url: String, max_frames: usize },
}

impl MediaItem {
    pub fn image(url: impl Into<String>) -> Self {
        MediaItem::Image { url: url.into() }
    }

    pub fn video(url: impl Into<String>, max_frames: usize) -> Self {
        MediaItem::Video {
            url: url.into(),
            max_frames,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            MediaItem::Image { url } | MediaItem::Video { url, .. } => url,
        }
    }

    pub fn media_type(&self) -> MediaType {
        match self {
            MediaItem::Image { .. } => MediaType::Image,
            MediaItem::Video { .. } => MediaType::Video,
        }
    }
}

/// Either a result backed by the inference API, or a best-effort one produced
/// by the fallback classifier along with why the API path was abandoned.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Authoritative(AnalysisResult),
    Degraded { result: AnalysisResult, reason: String },
}

impl AnalysisOutcome {
    pub fn result(&self) -> &AnalysisResult {
        match self {
            AnalysisOutcome::Authoritative(result) | AnalysisOutcome::Degraded { result, .. } => result,
        }
    }

    pub fn into_result(self) -> AnalysisResult {
        match self {
            AnalysisOutcome::Authoritative(result) | AnalysisOutcome::Degraded { result, .. } => result,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, AnalysisOutcome::Degraded { .. })
    }
}

/// Synchronous image/video pipeline: cache, remote analysis, frame fusion and
/// degraded mode.
#[derive(Clone)]
pub struct MediaAnalysisService {
    cache: CacheService,
    remote: RemoteAnalyzer,
    fallback: FallbackClassifier,
    frames: FrameExtractor,
    classifier: EventClassifier,
    enable_fallback: bool,
    max_frames: usize,
}

impl MediaAnalysisService {
    pub fn new(
        cache: CacheService,
        remote: RemoteAnalyzer,
        frames: FrameExtractor,
        enable_fallback: bool,
        max_frames: usize,
    ) -> Self {
        Self {
            cache,
            remote,
            fallback: FallbackClassifier::new(),
            frames,
            classifier: EventClassifier::new(),
            enable_fallback,
            max_frames,
        }
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    pub async fn analyze_image(&self, url: &str, use_cache: bool) -> Result<AnalysisOutcome, AnalysisError> {
        self.analyze(&MediaItem::image(url), use_cache).await
    }

    pub async fn analyze_video(&self, url: &str, use_cache: bool) -> Result<AnalysisOutcome, AnalysisError> {
        self.analyze(&MediaItem::video(url, self.max_frames), use_cache)
            .await
    }

    pub async fn analyze(&self, item: &MediaItem, use_cache: bool) -> Result<AnalysisOutcome, AnalysisError> {
        let url = validate_media_url(item.url())?;
        let key = self.cache.key(url, item.media_type());

        if use_cache {
            if let Some(cached) = self.cache.get(&key).await {
                return Ok(AnalysisOutcome::Authoritative(cached));
            }
        }

        let attempt = if !self.remote.is_configured() {
            Err(AnalysisError::service("inference API is not configured"))
        } else {
            match item {
                MediaItem::Image { .. } => self.run_image(url).await,
                MediaItem::Video { max_frames, .. } => self.run_video(url, *max_frames).await,
            }
        };

        match attempt {
            Ok(result) => {
                if use_cache {
                    self.cache.set(&key, &result, None).await;
                }
                Ok(AnalysisOutcome::Authoritative(result))
            }
            Err(e) if e.is_service() && self.enable_fallback => {
                let reason = e.to_string();
                log::warn!("Analysis of {} degraded to fallback: {}", url, reason);
                let result = self
                    .fallback
                    .classify(url)
                    .with_detail("media_type", item.media_type().to_string())
                    .with_detail("reason", reason.clone());
                Ok(AnalysisOutcome::Degraded { result, reason })
            }
            Err(e) => Err(e),
        }
    }

    /// Classification for an already produced result.
    pub fn classify(&self, result: &AnalysisResult) -> Classification {
        let mut details = result.details.clone();
        details
            .entry("confidence".to_string())
            .or_insert_with(|| json!(result.confidence));
        self.classifier.classify(&result.description, &details)
    }

    async fn run_image(&self, url: &str) -> Result<AnalysisResult, AnalysisError> {
        let result = self.remote.analyze_to_result(url, MediaType::Image).await?;
        Ok(self.enrich(result))
    }

    async fn run_video(&self, url: &str, max_frames: usize) -> Result<AnalysisResult, AnalysisError> {
        let frame_urls = self.frames.extract(url, max_frames).await?;

        let attempts = join_all(
            frame_urls
                .iter()
                .map(|frame_url| self.remote.analyze_to_result(frame_url, MediaType::Image)),
        )
        .await;

        let mut frame_results = Vec::with_capacity(attempts.len());
        for (frame_url, attempt) in frame_urls.iter().zip(attempts) {
            match attempt {
                Ok(result) => frame_results.push(result),
                Err(e) => log::warn!("Frame analysis failed for {}: {}", frame_url, e),
            }
        }
        if frame_results.is_empty() {
            return Err(AnalysisError::service("analysis failed for every extracted frame"));
        }

        let mut merged = fusion::merge(&frame_results)?;
        merged
            .details
            .insert("media_type".to_string(), json!(MediaType::Video.to_string()));
        Ok(self.enrich(merged))
    }

    fn enrich(&self, mut result: AnalysisResult) -> AnalysisResult {
        let classification = self.classify(&result);
        result.details.insert(
            "suggested_priority".to_string(),
            json!(classification.suggested_priority.to_string()),
        );
        result
            .details
            .insert("keywords".to_string(), json!(classification.keywords));
        if let Some(secondary) = classification.secondary_category {
            result
                .details
                .insert("secondary_category".to_string(), Value::String(secondary));
        }
        result
    }
}
