use md5::{Digest, Md5};
use shared::MediaType;

pub const ANALYSIS_PREFIX: &str = "ai_analysis";
pub const TASK_PREFIX: &str = "ai_task";

/// Hex MD5 of a media URL.
pub fn url_digest(url: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

/// `ai_analysis:{media_type}:{md5(url)[:8]}`
pub fn analysis_key(url: &str, media_type: MediaType) -> String {
    let digest = url_digest(url);
    format!("{}:{}:{}", ANALYSIS_PREFIX, media_type, &digest[..8])
}

/// `ai_task:{task_id}`
pub fn task_key(task_id: &str) -> String {
    format!("{}:{}", TASK_PREFIX, task_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use uuid::Uuid;

    #[test]
    fn analysis_key_layout() {
        // md5("abc") = 900150983cd24fb0d6963f7d28e17f72
        assert_eq!(analysis_key("abc", MediaType::Image), "ai_analysis:image:90015098");
        assert_eq!(analysis_key("abc", MediaType::Video), "ai_analysis:video:90015098");
        assert_eq!(task_key("img_0011223344556677"), "ai_task:img_0011223344556677");
    }

    #[test]
    fn analysis_key_is_deterministic_and_distinct() {
        let mut seen = HashSet::new();
        for _ in 0..500 {
            let url = format!("https://oss.example.com/evidence/{}.jpg", Uuid::new_v4());
            for media_type in [MediaType::Image, MediaType::Video] {
                let key = analysis_key(&url, media_type);
                assert_eq!(key, analysis_key(&url, media_type));
                assert!(seen.insert(key), "collision for {} / {}", url, media_type);
            }
        }
    }
}
