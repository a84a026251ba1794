use futures::FutureExt;
use log::{error, info, warn};
use shared::{AsyncTask, MediaType};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use super::task_service::{TaskService, TaskServiceError};
use crate::error::{validate_media_url, AnalysisError};
use crate::service::media_analysis::{AnalysisOutcome, MediaAnalysisService, MediaItem};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error("Task store error: {0}")]
    Task(#[from] TaskServiceError),
    #[error("Task queue is closed")]
    QueueClosed,
}

struct QueuedTask {
    task: AsyncTask,
    item: MediaItem,
}

type SharedQueue = Arc<tokio::sync::Mutex<UnboundedReceiver<QueuedTask>>>;

/// Entry point for callers. Synchronous analysis runs inline; asynchronous
/// submissions are persisted as `pending` and drained by background workers
/// from a single unbounded queue.
pub struct TaskOrchestrator {
    analysis: Arc<MediaAnalysisService>,
    tasks: TaskService,
    sender: Mutex<Option<UnboundedSender<QueuedTask>>>,
    queue: SharedQueue,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl TaskOrchestrator {
    pub fn new(analysis: Arc<MediaAnalysisService>, tasks: TaskService) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            analysis,
            tasks,
            sender: Mutex::new(Some(sender)),
            queue: Arc::new(tokio::sync::Mutex::new(receiver)),
            workers: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn analyze_image(&self, url: &str, use_cache: bool) -> Result<AnalysisOutcome, AnalysisError> {
        self.analysis.analyze_image(url, use_cache).await
    }

    pub async fn analyze_video(&self, url: &str, use_cache: bool) -> Result<AnalysisOutcome, AnalysisError> {
        self.analysis.analyze_video(url, use_cache).await
    }

    pub async fn submit_image(&self, url: &str) -> Result<String, OrchestratorError> {
        self.submit(url, MediaType::Image).await
    }

    pub async fn submit_video(&self, url: &str) -> Result<String, OrchestratorError> {
        self.submit(url, MediaType::Video).await
    }

    /// Persists a `pending` record, enqueues it and returns the task id
    /// without waiting for analysis.
    pub async fn submit(&self, url: &str, media_type: MediaType) -> Result<String, OrchestratorError> {
        let url = validate_media_url(url)?;
        let sender = self.current_sender().ok_or(OrchestratorError::QueueClosed)?;

        let task = self.tasks.create_task(url, media_type).await?;
        let task_id = task.task_id.clone();
        let item = match media_type {
            MediaType::Image => MediaItem::image(url),
            MediaType::Video => MediaItem::video(url, self.analysis.max_frames()),
        };

        sender
            .send(QueuedTask { task, item })
            .map_err(|_| OrchestratorError::QueueClosed)?;
        info!("Task {} queued", task_id);
        Ok(task_id)
    }

    /// `None` when the task was never submitted or its record has expired.
    pub async fn status(&self, task_id: &str) -> Result<Option<AsyncTask>, OrchestratorError> {
        Ok(self.tasks.get_task(task_id).await?)
    }

    pub async fn start(&self, worker_count: usize) {
        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            warn!("Task workers already running");
            return;
        }

        for id in 0..worker_count.max(1) {
            let worker = Worker {
                id,
                analysis: self.analysis.clone(),
                tasks: self.tasks.clone(),
                queue: self.queue.clone(),
            };
            workers.push(tokio::spawn(worker.run()));
        }
        info!("Started {} task worker(s)", workers.len());
    }

    /// Closes the queue, lets workers finish everything already queued, then
    /// joins them. Later submissions fail with `QueueClosed`.
    pub async fn shutdown(&self) {
        match self.sender.lock() {
            Ok(mut sender) => {
                sender.take();
            }
            Err(poisoned) => {
                poisoned.into_inner().take();
            }
        }

        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Task worker ended abnormally: {}", e);
            }
        }
        info!("Task orchestrator stopped");
    }

    fn current_sender(&self) -> Option<UnboundedSender<QueuedTask>> {
        match self.sender.lock() {
            Ok(sender) => sender.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

struct Worker {
    id: usize,
    analysis: Arc<MediaAnalysisService>,
    tasks: TaskService,
    queue: SharedQueue,
}

impl Worker {
    async fn run(self) {
        info!("Task worker {} started", self.id);
        loop {
            let next = {
                let mut queue = self.queue.lock().await;
                queue.recv().await
            };
            match next {
                Some(queued) => self.process(queued).await,
                None => break,
            }
        }
        info!("Task worker {} stopped", self.id);
    }

    /// Both the success and the failure path end with the record persisted.
    async fn process(&self, queued: QueuedTask) {
        let QueuedTask { mut task, item } = queued;

        if let Err(e) = task.start() {
            error!("Task {} cannot start: {}", task.task_id, e);
            return;
        }
        if let Err(e) = self.tasks.update_task(&task).await {
            warn!("Could not persist processing state for {}: {}", task.task_id, e);
        }
        info!("Worker {} processing task {}", self.id, task.task_id);

        let outcome = AssertUnwindSafe(self.analysis.analyze(&item, true))
            .catch_unwind()
            .await;

        let transition = match outcome {
            Ok(Ok(outcome)) => {
                if outcome.is_degraded() {
                    warn!("Task {} completed in degraded mode", task.task_id);
                }
                task.complete(outcome.into_result())
            }
            Ok(Err(e)) => {
                warn!("Task {} failed: {}", task.task_id, e);
                task.fail(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Task {} panicked: {}", task.task_id, message);
                task.fail(format!("analysis panicked: {}", message))
            }
        };
        if let Err(e) = transition {
            error!("Task {}: {}", task.task_id, e);
        }

        match self.tasks.update_task(&task).await {
            Ok(()) => info!("Task {} finished with status {}", task.task_id, task.status),
            Err(e) => error!("Could not persist final state for {}: {}", task.task_id, e),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::cache_service::CacheService;
    use crate::db::kv_store::MemoryStore;
    use crate::inference::client::InferenceClient;
    use crate::inference::remote_analyzer::RemoteAnalyzer;
    use crate::service::media_analysis::tests::{local_video, service_with, ScriptedClient};
    use crate::storage::object_store::MemoryObjectStore;
    use crate::video::frame_extractor::tests::FakeDecoder;
    use crate::video::frame_extractor::FrameExtractor;
    use async_trait::async_trait;
    use regex::Regex;
    use serde_json::{json, Value};
    use shared::TaskStatus;
    use std::time::Duration;

    fn orchestrator(service: MediaAnalysisService) -> TaskOrchestrator {
        let tasks = TaskService::new(Arc::new(MemoryStore::new()), Duration::from_secs(3600));
        TaskOrchestrator::new(Arc::new(service), tasks)
    }

    async fn wait_for_terminal(orchestrator: &TaskOrchestrator, task_id: &str) -> AsyncTask {
        for _ in 0..200 {
            let task = orchestrator.status(task_id).await.unwrap().unwrap();
            if task.status.is_terminal() {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} never reached a terminal state", task_id);
    }

    #[tokio::test]
    async fn submitted_task_runs_to_completion() {
        let client = ScriptedClient::answering("道路裂缝明显");
        let orchestrator = orchestrator(service_with(client, Arc::new(FakeDecoder::with_frames(0)), true));

        let task_id = orchestrator.submit_image("https://oss.example.com/e/1.jpg").await.unwrap();
        assert!(Regex::new(r"^img_[0-9a-f]{16}$").unwrap().is_match(&task_id));

        let pending = orchestrator.status(&task_id).await.unwrap().unwrap();
        assert_eq!(pending.status, TaskStatus::Pending);
        assert!(pending.result.is_none() && pending.error.is_none());

        orchestrator.start(1).await;
        let done = wait_for_terminal(&orchestrator, &task_id).await;
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.started_at.is_some() && done.completed_at.is_some());
        assert!(done.error.is_none());
        assert_eq!(done.result.unwrap().category, "道路损坏");

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn failures_are_recorded_not_raised() {
        let orchestrator = orchestrator(service_with(
            ScriptedClient::unreachable(),
            Arc::new(FakeDecoder::with_frames(0)),
            false,
        ));
        orchestrator.start(1).await;

        let task_id = orchestrator.submit_image("https://oss.example.com/e/2.jpg").await.unwrap();
        let done = wait_for_terminal(&orchestrator, &task_id).await;
        assert_eq!(done.status, TaskStatus::Failed);
        assert!(done.result.is_none());
        assert!(done.error.unwrap().contains("connection refused"));
        assert!(done.failed_at.is_some());

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn video_tasks_use_video_prefix() {
        let client = ScriptedClient::answering("违章搭建的建筑");
        let orchestrator = orchestrator(service_with(client, Arc::new(FakeDecoder::with_frames(10)), false));
        orchestrator.start(1).await;
        let (_file, url) = local_video();

        let task_id = orchestrator.submit_video(&url).await.unwrap();
        assert!(Regex::new(r"^vid_[0-9a-f]{16}$").unwrap().is_match(&task_id));
        let done = wait_for_terminal(&orchestrator, &task_id).await;
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.result.unwrap().details["frame_count"], json!(5));

        orchestrator.shutdown().await;
    }

    /// Panics for URLs containing "panic", answers otherwise.
    struct PanickyClient;

    #[async_trait]
    impl InferenceClient for PanickyClient {
        async fn complete(&self, media_url: &str, _media_type: MediaType) -> Result<Value, AnalysisError> {
            if media_url.contains("panic") {
                panic!("model exploded");
            }
            Ok(json!({"choices": [{"message": {"content": "垃圾"}, "finish_reason": "stop"}]}))
        }

        fn model_id(&self) -> &str {
            "panicky"
        }

        fn is_configured(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn a_panicking_task_does_not_kill_the_worker() {
        let cache = CacheService::new(Arc::new(MemoryStore::new()), Duration::from_secs(3600));
        let frames = FrameExtractor::new(
            Arc::new(FakeDecoder::with_frames(0)),
            Arc::new(MemoryObjectStore::new()),
            Duration::from_secs(5),
        )
        .unwrap();
        let service = MediaAnalysisService::new(cache, RemoteAnalyzer::new(Arc::new(PanickyClient)), frames, true, 5);
        let orchestrator = orchestrator(service);
        orchestrator.start(1).await;

        let bad = orchestrator.submit_image("https://x/panic.jpg").await.unwrap();
        let good = orchestrator.submit_image("https://x/fine.jpg").await.unwrap();

        let bad = wait_for_terminal(&orchestrator, &bad).await;
        assert_eq!(bad.status, TaskStatus::Failed);
        assert!(bad.error.unwrap().contains("model exploded"));

        let good = wait_for_terminal(&orchestrator, &good).await;
        assert_eq!(good.status, TaskStatus::Completed);

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_drains_queue_across_workers() {
        let client = ScriptedClient::answering("路灯损坏");
        let orchestrator = orchestrator(service_with(client.clone(), Arc::new(FakeDecoder::with_frames(0)), true));

        let mut ids = Vec::new();
        for i in 0..6 {
            ids.push(
                orchestrator
                    .submit_image(&format!("https://oss.example.com/e/{}.jpg", i))
                    .await
                    .unwrap(),
            );
        }
        orchestrator.start(3).await;
        orchestrator.shutdown().await;

        for id in &ids {
            let task = orchestrator.status(id).await.unwrap().unwrap();
            assert_eq!(task.status, TaskStatus::Completed);
        }
        assert_eq!(client.calls(), 6);

        let err = orchestrator.submit_image("https://oss.example.com/e/late.jpg").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::QueueClosed));
    }

    #[tokio::test]
    async fn rejects_empty_urls_and_unknown_ids() {
        let orchestrator = orchestrator(service_with(
            ScriptedClient::unreachable(),
            Arc::new(FakeDecoder::with_frames(0)),
            true,
        ));
        let err = orchestrator.submit_image("").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Analysis(AnalysisError::Validation(_))));
        assert!(orchestrator.status("img_0000000000000000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn synchronous_entry_points_delegate() {
        let orchestrator = orchestrator(service_with(
            ScriptedClient::unreachable(),
            Arc::new(FakeDecoder::with_frames(0)),
            true,
        ));
        let outcome = orchestrator.analyze_image("https://x/garbage.jpg", false).await.unwrap();
        assert!(outcome.is_degraded());
        assert_eq!(outcome.result().category, "垃圾堆积");

        let (_file, url) = local_video();
        let video = orchestrator.analyze_video(&url, false).await.unwrap();
        assert!(video.is_degraded());
    }
}
