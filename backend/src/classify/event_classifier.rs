use serde_json::Value;
use shared::{Classification, Priority};
use std::collections::HashMap;

use super::taxonomy::{self, OTHER};

const DEFAULT_CONFIDENCE: f64 = 0.3;
const SCORE_NORMALIZER: f64 = 10.0;
const MAX_KEYWORDS: usize = 10;

const HAZARD_TERMS: &[&str] = &["fire", "explosion", "casualty", "火灾", "起火", "爆炸", "伤亡"];
const URGENT_THRESHOLD: f64 = 0.8;
const HIGH_THRESHOLD: f64 = 0.6;

/// Maps free text onto the governance-issue taxonomy with a suggested priority.
#[derive(Clone, Default)]
pub struct EventClassifier;

impl EventClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, description: &str, details: &HashMap<String, Value>) -> Classification {
        let scores = taxonomy::score_categories(description);

        let (primary, confidence, keywords) = match taxonomy::best_category(&scores) {
            Some((entry, score)) => {
                let lowered = description.to_lowercase();
                let mut keywords: Vec<String> = Vec::new();
                for kw in entry.keywords {
                    if lowered.contains(kw) && !keywords.iter().any(|k| k == kw) {
                        keywords.push(kw.to_string());
                    }
                    if keywords.len() == MAX_KEYWORDS {
                        break;
                    }
                }
                let confidence = (score as f64 / SCORE_NORMALIZER).min(1.0);
                (entry.name, confidence, keywords)
            }
            None => (OTHER, DEFAULT_CONFIDENCE, Vec::new()),
        };

        let secondary = scores
            .iter()
            .filter(|(entry, score)| *score > 0 && entry.name != primary)
            .fold(None::<(&str, usize)>, |acc, (entry, score)| match acc {
                Some((_, top)) if *score <= top => acc,
                _ => Some((entry.name, *score)),
            })
            .map(|(name, _)| name.to_string());

        let mut priority = taxonomy::priority_for(primary);
        if let Some(forced) = hazard_override(description, details) {
            log::info!("Hazard detected, priority raised to {}", forced);
            priority = priority.max(forced);
        }

        Classification {
            primary_category: primary.to_string(),
            secondary_category: secondary,
            confidence,
            suggested_priority: priority,
            keywords,
        }
    }
}

/// Hazard terms may come from the text itself or a `hazards` list in details.
/// Confidence is `details.hazard_confidence`, falling back to `details.confidence`.
fn hazard_override(description: &str, details: &HashMap<String, Value>) -> Option<Priority> {
    let lowered = description.to_lowercase();
    let in_text = HAZARD_TERMS.iter().any(|t| lowered.contains(t));
    let in_details = details
        .get("hazards")
        .and_then(Value::as_array)
        .map(|items| {
            items.iter().filter_map(Value::as_str).any(|h| {
                let h = h.to_lowercase();
                HAZARD_TERMS.iter().any(|t| h.contains(t))
            })
        })
        .unwrap_or(false);
    if !in_text && !in_details {
        return None;
    }

    let confidence = details
        .get("hazard_confidence")
        .or_else(|| details.get("confidence"))
        .and_then(Value::as_f64)?;

    if confidence > URGENT_THRESHOLD {
        Some(Priority::Urgent)
    } else if confidence >= HIGH_THRESHOLD {
        Some(Priority::High)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::taxonomy::{GARBAGE, ROAD_DAMAGE, TRAFFIC};
    use serde_json::json;

    fn details(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn picks_highest_scoring_category() {
        let c = EventClassifier::new().classify("路口车辆拥堵，旁边还有垃圾，交通受阻", &HashMap::new());
        assert_eq!(c.primary_category, TRAFFIC);
        assert_eq!(c.secondary_category.as_deref(), Some(GARBAGE));
        assert!((c.confidence - 0.3).abs() < 1e-9);
        assert_eq!(c.suggested_priority, Priority::High);
        assert_eq!(c.keywords, vec!["交通", "拥堵", "车辆"]);
    }

    #[test]
    fn no_match_falls_back_to_other() {
        let c = EventClassifier::new().classify("a quiet park on a sunny day", &HashMap::new());
        assert_eq!(c.primary_category, OTHER);
        assert_eq!(c.confidence, 0.3);
        assert_eq!(c.suggested_priority, Priority::Low);
        assert!(c.keywords.is_empty());
        assert!(c.secondary_category.is_none());
    }

    #[test]
    fn confidence_saturates_at_one() {
        let text = "道路 ".repeat(12);
        let c = EventClassifier::new().classify(&text, &HashMap::new());
        assert_eq!(c.primary_category, ROAD_DAMAGE);
        assert_eq!(c.confidence, 1.0);
        assert_eq!(c.keywords, vec!["道路"]);
    }

    #[test]
    fn hazard_forces_priority() {
        let classifier = EventClassifier::new();
        let text = "垃圾堆旁发现 fire";

        let urgent = classifier.classify(text, &details(&[("confidence", json!(0.85))]));
        assert_eq!(urgent.suggested_priority, Priority::Urgent);

        let high = classifier.classify(text, &details(&[("confidence", json!(0.7))]));
        assert_eq!(high.suggested_priority, Priority::High);

        let unchanged = classifier.classify(text, &details(&[("confidence", json!(0.4))]));
        assert_eq!(unchanged.suggested_priority, Priority::Medium);

        let from_list = classifier.classify(
            "垃圾",
            &details(&[("hazards", json!(["Explosion"])), ("hazard_confidence", json!(0.95))]),
        );
        assert_eq!(from_list.suggested_priority, Priority::Urgent);
    }
}
