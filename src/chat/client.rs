use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use super::conversation::Role;
use super::emotion::Emotion;
use super::sse::SseDecoder;
use super::style::SupportStyle;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("chat service returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("chat request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl ChatError {
    /// Rate limiting and credit exhaustion are worth a later retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::Status { status: 429 | 402, .. })
    }
}

/// One `{role, content}` turn as the reply service expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ReplyRequest {
    pub turns: Vec<ChatTurn>,
    pub emotion: Emotion,
    pub style: SupportStyle,
}

#[derive(Serialize)]
struct RequestBody<'a> {
    messages: &'a [ChatTurn],
    emotion: Emotion,
    #[serde(rename = "supportStyle", skip_serializing_if = "Option::is_none")]
    support_style: Option<SupportStyle>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Streams an assistant reply for a conversation.
#[async_trait]
pub trait ReplySource: Send + Sync {
    /// Stream the reply, reporting each fragment to `on_delta` as it arrives,
    /// and return the full text.
    async fn stream_reply(
        &self,
        request: &ReplyRequest,
        on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, ChatError>;
}

pub struct ChatClient {
    http: reqwest::Client,
    url: Url,
    api_key: String,
}

impl ChatClient {
    pub fn new(url: Url, api_key: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url,
            api_key: api_key.into(),
        })
    }
}

/// Join `path` onto `base`, treating `base` as a directory.
pub fn endpoint(base: &str, path: &str) -> anyhow::Result<Url> {
    let mut base = Url::parse(base)?;
    if !base.path().ends_with('/') {
        let dir = format!("{}/", base.path());
        base.set_path(&dir);
    }
    Ok(base.join(path.trim_start_matches('/'))?)
}

#[async_trait]
impl ReplySource for ChatClient {
    async fn stream_reply(
        &self,
        request: &ReplyRequest,
        on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, ChatError> {
        let body = RequestBody {
            messages: &request.turns,
            emotion: request.emotion,
            support_style: request.style.preference(),
        };
        let response = self
            .http
            .post(self.url.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .ok()
                .and_then(|b| b.error)
                .unwrap_or_else(|| "Failed to get response".to_string());
            return Err(ChatError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let mut decoder = SseDecoder::new();
        let mut reply = String::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk: Bytes = chunk?;
            for fragment in decoder.push(&chunk) {
                on_delta(&fragment);
                reply.push_str(&fragment);
            }
            if decoder.is_done() {
                break;
            }
        }
        for fragment in decoder.finish() {
            on_delta(&fragment);
            reply.push_str(&fragment);
        }
        log::debug!("Reply streamed: {} chars", reply.chars().count());
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::test_server;

    fn request() -> ReplyRequest {
        ReplyRequest {
            turns: vec![
                ChatTurn {
                    role: Role::Assistant,
                    content: "Hello".into(),
                },
                ChatTurn {
                    role: Role::User,
                    content: "I can't sleep".into(),
                },
            ],
            emotion: Emotion::Stressed,
            style: SupportStyle::Practical,
        }
    }

    #[test]
    fn endpoint_joins_under_base_path() {
        let url = endpoint("http://localhost:54321/functions/v1", "chat").unwrap();
        assert_eq!(url.as_str(), "http://localhost:54321/functions/v1/chat");
        let url = endpoint("http://localhost:54321/functions/v1/", "/detect-emotion").unwrap();
        assert_eq!(url.as_str(), "http://localhost:54321/functions/v1/detect-emotion");
    }

    #[tokio::test]
    async fn streams_fragments_and_sends_history() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Try a \"}}]}\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"short walk.\"}}]}\n\n\
                    data: [DONE]\n\n";
        let (url, captured) = test_server::serve_once(200, "text/event-stream", body).await;
        let client = ChatClient::new(url, "key", Duration::from_secs(5)).unwrap();

        let mut deltas = Vec::new();
        let reply = client
            .stream_reply(&request(), &mut |d: &str| deltas.push(d.to_string()))
            .await
            .unwrap();
        assert_eq!(reply, "Try a short walk.");
        assert_eq!(deltas, vec!["Try a ", "short walk."]);

        let sent: serde_json::Value =
            serde_json::from_str(&captured.await.unwrap().body).unwrap();
        assert_eq!(sent["emotion"], "stressed");
        assert_eq!(sent["supportStyle"], "practical");
        assert_eq!(sent["messages"][1]["role"], "user");
        assert_eq!(sent["messages"][1]["content"], "I can't sleep");
    }

    #[tokio::test]
    async fn trait_object_streams_from_a_spawned_task() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Breathe.\"}}]}\n\n\
                    data: [DONE]\n\n";
        let (url, _) = test_server::serve_once(200, "text/event-stream", body).await;
        let source: std::sync::Arc<dyn ReplySource> =
            std::sync::Arc::new(ChatClient::new(url, "key", Duration::from_secs(5)).unwrap());

        let task = tokio::spawn(async move {
            let mut deltas: Vec<String> = Vec::new();
            let reply = source
                .stream_reply(&request(), &mut |d: &str| deltas.push(d.to_owned()))
                .await
                .map_err(|e| e.to_string());
            (reply, deltas)
        });
        let (reply, deltas) = task.await.unwrap();
        assert_eq!(reply.unwrap(), "Breathe.");
        assert_eq!(deltas, vec!["Breathe."]);
    }

    #[tokio::test]
    async fn error_status_carries_service_message() {
        let (url, _) = test_server::serve_once(
            429,
            "application/json",
            r#"{"error":"Rate limit exceeded. Please try again in a moment."}"#,
        )
        .await;
        let client = ChatClient::new(url, "key", Duration::from_secs(5)).unwrap();
        let err = client
            .stream_reply(&request(), &mut |_: &str| {})
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        match err {
            ChatError::Status { status, message } => {
                assert_eq!(status, 429);
                assert!(message.starts_with("Rate limit"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
