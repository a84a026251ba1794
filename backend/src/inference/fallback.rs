use shared::AnalysisResult;

use crate::classify::taxonomy::{
    FACILITY_DAMAGE, GARBAGE, ILLEGAL_CONSTRUCTION, OTHER, POLLUTION, ROAD_DAMAGE, TRAFFIC,
};

const DEFAULT_CONFIDENCE: f64 = 0.4;

/// URL substring hints, checked in order; first match wins. Rows whose hints
/// contain another row's hint ("streetlight" vs "street") must come first.
const URL_HINTS: &[(&[&str], &str, f64)] = &[
    (&["facility", "streetlight", "lamp", "bench"], FACILITY_DAMAGE, 0.45),
    (&["road", "street", "pothole", "pavement"], ROAD_DAMAGE, 0.5),
    (&["trash", "garbage", "waste", "litter"], GARBAGE, 0.5),
    (&["construction", "building"], ILLEGAL_CONSTRUCTION, 0.45),
    (&["water", "smoke", "pollution", "sewage"], POLLUTION, 0.45),
    (&["traffic", "parking", "vehicle"], TRAFFIC, 0.45),
];

/// Degraded analysis used when the inference API is unavailable.
#[derive(Clone, Default)]
pub struct FallbackClassifier;

impl FallbackClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, media_url: &str) -> AnalysisResult {
        let lowered = media_url.to_lowercase();
        let (category, confidence, hint) = URL_HINTS
            .iter()
            .find_map(|(hints, category, confidence)| {
                hints
                    .iter()
                    .find(|h| lowered.contains(*h))
                    .map(|h| (*category, *confidence, Some(*h)))
            })
            .unwrap_or((OTHER, DEFAULT_CONFIDENCE, None));

        log::warn!("Using fallback classification for {}: {}", media_url, category);

        let description = match hint {
            Some(h) => format!("智能分析服务暂不可用，根据文件信息（{}）初步判断为{}，请人工复核", h, category),
            None => "智能分析服务暂不可用，无法自动识别问题类型，请人工复核".to_string(),
        };

        let mut result = AnalysisResult::new(category, description, confidence)
            .with_detail("method", "fallback");
        if let Some(h) = hint {
            result = result.with_detail("matched_hint", h);
        }
        result
    }
}
