use serde_json::Value;
use shared::{AnalysisResult, MediaType};
use std::collections::HashMap;
use std::sync::Arc;

use super::client::InferenceClient;
use crate::classify::taxonomy::{self, OTHER};
use crate::error::AnalysisError;

const SCORE_NORMALIZER: f64 = 5.0;
const NO_MATCH_CONFIDENCE: f64 = 0.3;
const MAX_DESCRIPTION_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAnswer {
    pub category: String,
    pub description: String,
    pub confidence: f64,
}

#[derive(Clone)]
pub struct RemoteAnalyzer {
    client: Arc<dyn InferenceClient>,
}

impl RemoteAnalyzer {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self { client }
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_configured()
    }

    pub fn model_id(&self) -> &str {
        self.client.model_id()
    }

    pub async fn analyze(&self, media_url: &str, media_type: MediaType) -> Result<Value, AnalysisError> {
        self.client.complete(media_url, media_type).await
    }

    /// Pulls `choices[0].message.content` out of a chat-completions body and
    /// scores it against the taxonomy.
    pub fn parse(raw_response: &Value) -> Result<ParsedAnswer, AnalysisError> {
        let answer = raw_response
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(content_text)
            .ok_or_else(|| AnalysisError::service("inference response has no message content"))?;

        let scores = taxonomy::score_categories(&answer);
        let (category, confidence) = match taxonomy::best_category(&scores) {
            Some((entry, score)) => (entry.name, (score as f64 / SCORE_NORMALIZER).min(1.0)),
            None => (OTHER, NO_MATCH_CONFIDENCE),
        };

        Ok(ParsedAnswer {
            category: category.to_string(),
            description: answer.chars().take(MAX_DESCRIPTION_CHARS).collect(),
            confidence,
        })
    }

    /// One remote call, parsed into an `AnalysisResult`.
    pub async fn analyze_to_result(
        &self,
        media_url: &str,
        media_type: MediaType,
    ) -> Result<AnalysisResult, AnalysisError> {
        let raw = self.analyze(media_url, media_type).await?;
        let parsed = Self::parse(&raw)?;

        let mut result = AnalysisResult::new(parsed.category, parsed.description, parsed.confidence)
            .with_detail("method", "remote")
            .with_detail("model", self.model_id())
            .with_detail("media_type", media_type.to_string());
        if let Some(finish_reason) = raw
            .pointer("/choices/0/finish_reason")
            .and_then(Value::as_str)
        {
            result = result.with_detail("finish_reason", finish_reason);
        }
        result.raw_response = match raw {
            Value::Object(map) => map.into_iter().collect::<HashMap<_, _>>(),
            other => HashMap::from([("body".to_string(), other)]),
        };
        Ok(result)
    }
}

/// Content is either a plain string or a list of `{type: "text", text}` parts.
fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let text: Vec<&str> = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect();
            if text.is_empty() { None } else { Some(text.join("\n")) }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::taxonomy::ROAD_DAMAGE;
    use serde_json::json;

    fn completion(content: Value) -> Value {
        json!({
            "choices": [{"message": {"role": "assistant", "content": content}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 1200, "completion_tokens": 80}
        })
    }

    #[test]
    fn parses_and_scores_answer() {
        let parsed = RemoteAnalyzer::parse(&completion(json!("图片显示道路裂缝，路面有坑洞"))).unwrap();
        assert_eq!(parsed.category, ROAD_DAMAGE);
        // 道路 + 裂缝 + 路面 + 坑洞
        assert!((parsed.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn unmatched_answer_is_other() {
        let parsed = RemoteAnalyzer::parse(&completion(json!("A clear blue sky."))).unwrap();
        assert_eq!(parsed.category, OTHER);
        assert_eq!(parsed.confidence, 0.3);
    }

    #[test]
    fn description_is_truncated_by_chars() {
        let long = "裂".repeat(800);
        let parsed = RemoteAnalyzer::parse(&completion(json!(long))).unwrap();
        assert_eq!(parsed.description.chars().count(), 500);
        assert_eq!(parsed.confidence, 0.3);
    }

    #[test]
    fn accepts_content_parts() {
        let parsed = RemoteAnalyzer::parse(&completion(json!([{"type": "text", "text": "垃圾堆积严重"}]))).unwrap();
        assert_eq!(parsed.description, "垃圾堆积严重");
    }

    #[test]
    fn malformed_body_is_service_error() {
        assert!(RemoteAnalyzer::parse(&json!({"error": "rate limited"})).unwrap_err().is_service());
        assert!(RemoteAnalyzer::parse(&json!({"choices": []})).unwrap_err().is_service());
    }
}
