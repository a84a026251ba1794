use serde_json::{json, Map, Value};
use shared::AnalysisResult;

use crate::error::AnalysisError;

/// Merges per-frame results into one video-level result.
///
/// The category is the most frequent one across frames. Ties go to the
/// category that shows up first in input order. Confidence is the plain mean.
pub fn merge(results: &[AnalysisResult]) -> Result<AnalysisResult, AnalysisError> {
    if results.is_empty() {
        return Err(AnalysisError::service("no frame results to merge"));
    }

    // (category, count) in first-seen order
    let mut distribution: Vec<(&str, usize)> = Vec::new();
    for result in results {
        match distribution.iter_mut().find(|(c, _)| *c == result.category) {
            Some((_, count)) => *count += 1,
            None => distribution.push((result.category.as_str(), 1)),
        }
    }

    let mut category = distribution[0];
    for &entry in &distribution[1..] {
        if entry.1 > category.1 {
            category = entry;
        }
    }

    let confidence = results.iter().map(|r| r.confidence).sum::<f64>() / results.len() as f64;

    let mut highlights: Vec<&str> = Vec::new();
    for result in results {
        let d = result.description.trim();
        if !d.is_empty() && !highlights.contains(&d) {
            highlights.push(d);
            if highlights.len() == 2 {
                break;
            }
        }
    }
    let description = if highlights.is_empty() {
        format!("基于视频{}个关键帧的综合分析", results.len())
    } else {
        format!("基于视频{}个关键帧的综合分析：{}", results.len(), highlights.join("；"))
    };

    let type_distribution: Map<String, Value> = distribution
        .iter()
        .map(|(c, n)| (c.to_string(), json!(n)))
        .collect();
    let frame_categories: Vec<&str> = results.iter().map(|r| r.category.as_str()).collect();

    let mut merged = AnalysisResult::new(category.0, description, confidence)
        .with_detail("method", "video_fusion")
        .with_detail("frame_count", results.len())
        .with_detail("type_distribution", Value::Object(type_distribution));
    if let Some(model) = results.iter().find_map(|r| r.details.get("model")) {
        merged.details.insert("model".to_string(), model.clone());
    }
    merged
        .raw_response
        .insert("frame_categories".to_string(), json!(frame_categories));
    Ok(merged)
}
