use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_s3::Client as S3Client;
use media_analysis::cache::cache_service::CacheService;
use media_analysis::config::AppConfig;
use media_analysis::db::kv_store::{DynamoDbStore, KeyValueStore, MemoryStore};
use media_analysis::inference::client::HttpInferenceClient;
use media_analysis::inference::remote_analyzer::RemoteAnalyzer;
use media_analysis::service::media_analysis::MediaAnalysisService;
use media_analysis::storage::object_store::{MemoryObjectStore, ObjectStore};
use media_analysis::storage::s3_service::S3Service;
use media_analysis::tasks::orchestrator::TaskOrchestrator;
use media_analysis::tasks::task_service::TaskService;
use media_analysis::video::decoder::FfmpegDecoder;
use media_analysis::video::frame_extractor::FrameExtractor;
use shared::{AsyncTask, MediaType};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let requests = parse_requests(std::env::args().skip(1))?;
    if requests.is_empty() {
        eprintln!("usage: media-analysis image:<url> | video:<url> ...");
        return Ok(());
    }

    let config = AppConfig::load()?;
    if !config.inference.is_configured() {
        log::warn!("Inference API key is not configured; results will come from the fallback classifier");
    }

    let orchestrator = build_orchestrator(&config).await?;
    orchestrator.start(config.worker_count).await;

    let mut task_ids = Vec::with_capacity(requests.len());
    for (media_type, url) in &requests {
        match orchestrator.submit(url, *media_type).await {
            Ok(task_id) => task_ids.push(task_id),
            Err(e) => log::error!("Could not submit {} {}: {}", media_type, url, e),
        }
    }

    let mut finished: Vec<AsyncTask> = Vec::with_capacity(task_ids.len());
    for task_id in &task_ids {
        match wait_for_task(&orchestrator, task_id).await {
            Ok(Some(task)) => finished.push(task),
            Ok(None) => log::error!("Task {} disappeared before finishing", task_id),
            Err(e) => log::error!("Could not read task {}: {}", task_id, e),
        }
    }

    orchestrator.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&finished)?);
    Ok(())
}

fn parse_requests<I>(args: I) -> Result<Vec<(MediaType, String)>, Box<dyn Error>>
where
    I: IntoIterator<Item = String>,
{
    args.into_iter()
        .map(|arg| -> Result<(MediaType, String), Box<dyn Error>> {
            let (kind, url) = arg
                .split_once(':')
                .ok_or_else(|| format!("expected image:<url> or video:<url>, got {}", arg))?;
            let media_type: MediaType = kind
                .parse()
                .map_err(|_| format!("unknown media type {} in {}", kind, arg))?;
            Ok((media_type, url.to_string()))
        })
        .collect()
}

async fn build_orchestrator(config: &AppConfig) -> Result<TaskOrchestrator, Box<dyn Error>> {
    let needs_aws = config.dynamodb_table.is_some() || config.s3_bucket.is_some();
    let sdk_config = if needs_aws {
        Some(aws_config::defaults(BehaviorVersion::latest()).load().await)
    } else {
        None
    };

    let store: Arc<dyn KeyValueStore> = match (&config.dynamodb_table, &sdk_config) {
        (Some(table), Some(aws)) => {
            log::info!("Using DynamoDB table {} for cache and tasks", table);
            Arc::new(DynamoDbStore::new(DynamoDbClient::new(aws), table.clone()))
        }
        _ => {
            log::info!("Using in-memory store for cache and tasks");
            Arc::new(MemoryStore::new())
        }
    };

    let objects: Arc<dyn ObjectStore> = match (&config.s3_bucket, &sdk_config) {
        (Some(bucket), Some(aws)) => {
            log::info!("Publishing video frames to S3 bucket {}", bucket);
            Arc::new(S3Service::new(
                S3Client::new(aws),
                bucket.clone(),
                config.frame_public_base_url.clone(),
            ))
        }
        _ => {
            log::warn!("No S3 bucket configured; frames stay in memory and are unreachable by the inference API");
            Arc::new(MemoryObjectStore::new())
        }
    };

    let decoder = Arc::new(FfmpegDecoder::new(
        config.ffmpeg_path.clone(),
        config.ffprobe_path.clone(),
    ));
    let mut frames = FrameExtractor::new(decoder, objects, config.download_timeout())?;
    if let Some(dir) = &config.scratch_dir {
        frames = frames.with_scratch_dir(dir);
    }
    let client = Arc::new(HttpInferenceClient::new(config.inference.clone())?);

    let analysis = MediaAnalysisService::new(
        CacheService::new(store.clone(), config.cache_ttl()),
        RemoteAnalyzer::new(client),
        frames,
        config.enable_fallback,
        config.max_frames,
    );
    let tasks = TaskService::new(store, config.task_ttl());

    Ok(TaskOrchestrator::new(Arc::new(analysis), tasks))
}

async fn wait_for_task(
    orchestrator: &TaskOrchestrator,
    task_id: &str,
) -> Result<Option<AsyncTask>, Box<dyn Error>> {
    loop {
        match orchestrator.status(task_id).await? {
            Some(task) if task.status.is_terminal() => return Ok(Some(task)),
            Some(_) => tokio::time::sleep(POLL_INTERVAL).await,
            None => return Ok(None),
        }
    }
}
