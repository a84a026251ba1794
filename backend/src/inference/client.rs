use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use shared::MediaType;

use crate::config::InferenceConfig;
use crate::error::AnalysisError;

pub const ANALYSIS_INSTRUCTION: &str = "请仔细观察这份市民上报的证据材料，识别其中的城市基础设施、环境卫生或公共安全问题\
（例如道路损坏、垃圾堆积、违章建筑、环境污染、公共设施损坏、交通问题），描述问题的具体表现，并评估其严重程度。";

/// Transport to a vision-language chat-completions endpoint.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Sends one multimodal request and returns the decoded JSON body.
    async fn complete(&self, media_url: &str, media_type: MediaType) -> Result<Value, AnalysisError>;

    fn model_id(&self) -> &str;

    fn is_configured(&self) -> bool;
}

#[derive(Clone)]
pub struct HttpInferenceClient {
    client: Client,
    config: InferenceConfig,
}

impl HttpInferenceClient {
    pub fn new(config: InferenceConfig) -> Result<Self, AnalysisError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: InferenceConfig) -> Self {
        Self { client, config }
    }

    pub fn build_request_body(model: &str, media_url: &str, media_type: MediaType) -> Value {
        let media_part = match media_type {
            MediaType::Image => json!({"type": "image_url", "image_url": {"url": media_url}}),
            MediaType::Video => json!({"type": "video", "video": media_url}),
        };
        json!({
            "model": model,
            "messages": [{
                "role": "user",
                "content": [
                    media_part,
                    {"type": "text", "text": ANALYSIS_INSTRUCTION}
                ]
            }]
        })
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn complete(&self, media_url: &str, media_type: MediaType) -> Result<Value, AnalysisError> {
        if !self.is_configured() {
            return Err(AnalysisError::service("inference API is not configured"));
        }

        let body = Self::build_request_body(&self.config.model, media_url, media_type);
        log::debug!("Calling inference API {} for {}", self.config.api_url, media_url);

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            log::error!("Inference API returned {}: {}", status, text);
            return Err(AnalysisError::Service(format!(
                "inference API returned status {}",
                status
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| AnalysisError::Service(format!("malformed inference response: {}", e)))
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }

    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers exactly one HTTP request with the given status line and body.
    async fn serve_once(status: &'static str, content_type: &'static str, body: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request_complete(&request) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                content_type,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        addr
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    fn client_for(addr: SocketAddr) -> HttpInferenceClient {
        let http = Client::builder()
            .no_proxy()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap();
        HttpInferenceClient::with_client(
            http,
            InferenceConfig {
                api_url: format!("http://{}/v1/chat/completions", addr),
                api_key: "sk-test".to_string(),
                ..InferenceConfig::default()
            },
        )
    }

    #[test]
    fn request_body_carries_media_and_instruction() {
        let body = HttpInferenceClient::build_request_body("qwen-vl-max", "https://x/a.jpg", MediaType::Image);
        assert_eq!(body["model"], "qwen-vl-max");
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["image_url"]["url"], "https://x/a.jpg");
        assert_eq!(content[1]["text"], ANALYSIS_INSTRUCTION);

        let video = HttpInferenceClient::build_request_body("m", "https://x/v.mp4", MediaType::Video);
        assert_eq!(video["messages"][0]["content"][0]["video"], "https://x/v.mp4");
    }

    #[tokio::test]
    async fn unconfigured_client_refuses_to_call() {
        let client = HttpInferenceClient::new(InferenceConfig::default()).unwrap();
        assert!(!client.is_configured());
        let err = client.complete("https://x/a.jpg", MediaType::Image).await.unwrap_err();
        assert!(err.is_service());
    }

    #[tokio::test]
    async fn error_status_is_service_error() {
        let addr = serve_once("500 Internal Server Error", "application/json", r#"{"error":"overloaded"}"#).await;
        let err = client_for(addr)
            .complete("https://x/a.jpg", MediaType::Image)
            .await
            .unwrap_err();
        assert!(err.is_service());
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn non_json_body_is_service_error() {
        let addr = serve_once("200 OK", "text/html", "<html>gateway login</html>").await;
        let err = client_for(addr)
            .complete("https://x/a.jpg", MediaType::Image)
            .await
            .unwrap_err();
        assert!(err.is_service());
        assert!(err.to_string().contains("malformed inference response"));
    }

    #[tokio::test]
    async fn success_returns_decoded_body() {
        let addr = serve_once(
            "200 OK",
            "application/json",
            r#"{"choices":[{"message":{"content":"道路裂缝"},"finish_reason":"stop"}]}"#,
        )
        .await;
        let body = client_for(addr)
            .complete("https://x/a.jpg", MediaType::Image)
            .await
            .unwrap();
        assert_eq!(body["choices"][0]["message"]["content"], "道路裂缝");
    }
}
