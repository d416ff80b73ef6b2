use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Sad,
    Anxious,
    Stressed,
    #[default]
    Neutral,
    Positive,
}

impl Emotion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Sad => "sad",
            Emotion::Anxious => "anxious",
            Emotion::Stressed => "stressed",
            Emotion::Neutral => "neutral",
            Emotion::Positive => "positive",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionResult {
    pub emotion: Emotion,
    pub confidence: f32,
    #[serde(default)]
    pub indicators: Vec<String>,
}

impl EmotionResult {
    /// Result for empty input: nothing to read, so certainly neutral.
    pub fn blank() -> Self {
        Self {
            emotion: Emotion::Neutral,
            confidence: 1.0,
            indicators: Vec::new(),
        }
    }

    /// Result used whenever classification fails.
    pub fn fallback() -> Self {
        Self {
            emotion: Emotion::Neutral,
            confidence: 0.5,
            indicators: Vec::new(),
        }
    }

    fn clamped(mut self) -> Self {
        self.confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            0.5
        };
        self
    }
}

/// Classifies the emotion of a user message. Never fails.
#[async_trait]
pub trait EmotionSource: Send + Sync {
    async fn detect(&self, text: &str) -> EmotionResult;
}

pub struct EmotionClient {
    http: reqwest::Client,
    url: Url,
    api_key: String,
}

impl EmotionClient {
    pub fn new(url: Url, api_key: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url,
            api_key: api_key.into(),
        })
    }

    async fn request(&self, text: &str) -> anyhow::Result<EmotionResult> {
        let response = self
            .http
            .post(self.url.clone())
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<EmotionResult>().await?)
    }
}

#[async_trait]
impl EmotionSource for EmotionClient {
    async fn detect(&self, text: &str) -> EmotionResult {
        if text.trim().is_empty() {
            return EmotionResult::blank();
        }
        match self.request(text).await {
            Ok(result) => result.clamped(),
            Err(e) => {
                log::warn!("Emotion detection failed: {}", e);
                EmotionResult::fallback()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::test_server;

    fn client(url: Url) -> EmotionClient {
        EmotionClient::new(url, "test-key", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn parses_and_clamps_classifier_reply() {
        let (url, request) = test_server::serve_once(
            200,
            "application/json",
            r#"{"emotion":"anxious","confidence":1.4,"indicators":["worried"]}"#,
        )
        .await;
        let result = client(url).detect("I'm so worried").await;
        assert_eq!(result.emotion, Emotion::Anxious);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.indicators, vec!["worried".to_string()]);

        let request = request.await.unwrap();
        assert!(request.head.contains("Bearer test-key"));
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&request.body).unwrap(),
            serde_json::json!({"text": "I'm so worried"})
        );
    }

    #[tokio::test]
    async fn failures_degrade_to_neutral() {
        let (url, _) = test_server::serve_once(500, "application/json", "{}").await;
        assert_eq!(client(url).detect("help").await, EmotionResult::fallback());

        let (url, _) =
            test_server::serve_once(200, "application/json", r#"{"emotion":"furious"}"#).await;
        assert_eq!(client(url).detect("help").await, EmotionResult::fallback());
    }

    #[tokio::test]
    async fn blank_text_skips_the_request() {
        let url = Url::parse("http://127.0.0.1:9/unreachable").unwrap();
        assert_eq!(client(url).detect("   ").await, EmotionResult::blank());
    }
}
