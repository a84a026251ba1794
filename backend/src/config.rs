use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            api_url: "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "qwen-vl-max".to_string(),
            timeout_secs: 30,
        }
    }
}

impl InferenceConfig {
    /// An empty key or an untouched `your_...` placeholder counts as unconfigured.
    pub fn is_configured(&self) -> bool {
        let key = self.api_key.trim();
        !key.is_empty() && !key.starts_with("your_") && !self.api_url.trim().is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub inference: InferenceConfig,
    pub enable_fallback: bool,
    pub cache_ttl_secs: u64,
    pub task_ttl_secs: u64,
    pub max_frames: usize,
    pub worker_count: usize,
    pub download_timeout_secs: u64,
    pub dynamodb_table: Option<String>,
    pub s3_bucket: Option<String>,
    pub frame_public_base_url: Option<String>,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    /// Parent for per-video download dirs; the system temp dir when unset.
    pub scratch_dir: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            inference: InferenceConfig::default(),
            enable_fallback: true,
            cache_ttl_secs: 3600,
            task_ttl_secs: 3600,
            max_frames: 5,
            worker_count: 1,
            download_timeout_secs: 60,
            dynamodb_table: None,
            s3_bucket: None,
            frame_public_base_url: None,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            scratch_dir: None,
        }
    }
}

impl AppConfig {
    /// Loads `.env`, then the optional YAML file named by `ANALYSIS_CONFIG_PATH`,
    /// then applies environment overrides on top.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let mut config = match env::var("ANALYSIS_CONFIG_PATH") {
            Ok(path) => Self::from_yaml_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("INFERENCE_API_URL") {
            self.inference.api_url = v;
        }
        if let Some(v) = lookup("INFERENCE_API_KEY") {
            self.inference.api_key = v;
        }
        if let Some(v) = lookup("INFERENCE_MODEL") {
            self.inference.model = v;
        }
        if let Some(v) = lookup("INFERENCE_TIMEOUT_SECS") {
            self.inference.timeout_secs = parse_value("INFERENCE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("ENABLE_FALLBACK") {
            self.enable_fallback = parse_value("ENABLE_FALLBACK", &v)?;
        }
        if let Some(v) = lookup("CACHE_TTL_SECS") {
            self.cache_ttl_secs = parse_value("CACHE_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("TASK_TTL_SECS") {
            self.task_ttl_secs = parse_value("TASK_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("MAX_FRAMES") {
            self.max_frames = parse_value("MAX_FRAMES", &v)?;
        }
        if let Some(v) = lookup("WORKER_COUNT") {
            self.worker_count = parse_value("WORKER_COUNT", &v)?;
        }
        if let Some(v) = lookup("DOWNLOAD_TIMEOUT_SECS") {
            self.download_timeout_secs = parse_value("DOWNLOAD_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("DYNAMODB_ANALYSIS_TABLE") {
            self.dynamodb_table = non_empty(v);
        }
        if let Some(v) = lookup("S3_BUCKET_NAME") {
            self.s3_bucket = non_empty(v);
        }
        if let Some(v) = lookup("FRAME_PUBLIC_BASE_URL") {
            self.frame_public_base_url = non_empty(v);
        }
        if let Some(v) = lookup("FFMPEG_PATH") {
            self.ffmpeg_path = v;
        }
        if let Some(v) = lookup("FFPROBE_PATH") {
            self.ffprobe_path = v;
        }
        if let Some(v) = lookup("VIDEO_SCRATCH_DIR") {
            self.scratch_dir = non_empty(v);
        }

        if self.max_frames == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAX_FRAMES".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn task_ttl(&self) -> Duration {
        Duration::from_secs(self.task_ttl_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() { None } else { Some(value) }
}
