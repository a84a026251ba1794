use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    /// Prefix used for asynchronous task ids.
    pub fn task_prefix(&self) -> &'static str {
        match self {
            MediaType::Image => "img",
            MediaType::Video => "vid",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AnalysisResult {
    pub category: String,
    pub description: String,
    pub confidence: f64,
    #[serde(default)]
    pub details: HashMap<String, Value>,
    #[serde(default)]
    pub raw_response: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn new(category: impl Into<String>, description: impl Into<String>, confidence: f64) -> Self {
        Self {
            category: category.into(),
            description: description.into(),
            confidence: confidence.clamp(0.0, 1.0),
            details: HashMap::new(),
            raw_response: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// Value of `details.method`, e.g. "remote", "fallback" or "video_fusion".
    pub fn method(&self) -> Option<&str> {
        self.details.get("method").and_then(Value::as_str)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Classification {
    pub primary_category: String,
    pub secondary_category: Option<String>,
    pub confidence: f64,
    pub suggested_priority: Priority,
    pub keywords: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Only forward moves along pending -> processing -> {completed, failed}.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AsyncTask {
    pub task_id: String,
    pub media_url: String,
    pub media_type: MediaType,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid task transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

impl AsyncTask {
    pub fn new(task_id: String, media_url: String, media_type: MediaType) -> Self {
        Self {
            task_id,
            media_url,
            media_type,
            status: TaskStatus::default(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            failed_at: None,
            result: None,
            error: None,
        }
    }

    fn transition(&mut self, next: TaskStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), InvalidTransition> {
        self.transition(TaskStatus::Processing)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self, result: AnalysisResult) -> Result<(), InvalidTransition> {
        self.transition(TaskStatus::Completed)?;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, error: String) -> Result<(), InvalidTransition> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(error);
        self.failed_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_lifecycle_moves_forward_only() {
        let mut task = AsyncTask::new("img_0123456789abcdef".into(), "https://x/a.jpg".into(), MediaType::Image);
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.complete(AnalysisResult::new("其他", "", 0.3)).is_err());

        task.start().unwrap();
        assert!(task.started_at.is_some());
        task.fail("boom".into()).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.result.is_none());
        assert_eq!(task.error.as_deref(), Some("boom"));

        let err = task.start().unwrap_err();
        assert_eq!(err.from, TaskStatus::Failed);
        assert_eq!(err.to_string(), "invalid task transition failed -> processing");
    }

    #[test]
    fn enums_use_lowercase_wire_names() {
        assert_eq!(serde_json::to_string(&TaskStatus::Processing).unwrap(), "\"processing\"");
        assert_eq!(serde_json::to_string(&MediaType::Video).unwrap(), "\"video\"");
        assert_eq!(MediaType::Image.to_string(), "image");
        assert_eq!("video".parse::<MediaType>().unwrap(), MediaType::Video);
        assert!(Priority::Urgent > Priority::High);
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(AnalysisResult::new("其他", "", 1.7).confidence, 1.0);
        assert_eq!(AnalysisResult::new("其他", "", -0.2).confidence, 0.0);
    }
}
