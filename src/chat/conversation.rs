use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::client::{ChatTurn, ReplyRequest, ReplySource};
use super::emotion::{Emotion, EmotionResult, EmotionSource};
use super::style::SupportStyle;
use crate::call::MessageHandler;
use crate::sync::lock;

pub const GREETING: &str = "Hello, I'm Serenity, your mental health companion. I'm here to listen and support you. How are you feeling today?";

pub const FALLBACK_REPLY: &str = "I'm sorry, I'm having trouble responding right now. Please take a deep breath, and let's try again in a moment.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<Emotion>,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>, emotion: Option<Emotion>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp,
            emotion,
        }
    }

    pub fn user(content: impl Into<String>, emotion: Emotion) -> Self {
        Self::new(Role::User, content, Some(emotion))
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content, None)
    }
}

/// In-memory history, opened by the assistant greeting.
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            messages: vec![ChatMessage::assistant(GREETING)],
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// The history as `{role, content}` turns for the reply service.
    pub fn turns(&self) -> Vec<ChatTurn> {
        self.messages
            .iter()
            .map(|m| ChatTurn {
                role: m.role,
                content: m.content.clone(),
            })
            .collect()
    }
}

/// Progress of one exchange, for the UI.
#[derive(Debug, Clone)]
pub enum CompanionEvent {
    Emotion(EmotionResult),
    Delta(String),
    Reply(ChatMessage),
    /// The service is rate limited or out of credit; worth retrying later.
    Unavailable(String),
}

/// Runs one exchange at a time: classify, record, stream the reply.
pub struct Companion {
    replies: Arc<dyn ReplySource>,
    emotions: Arc<dyn EmotionSource>,
    conversation: Mutex<Conversation>,
    style: Mutex<SupportStyle>,
    current_emotion: Mutex<Emotion>,
    busy: AtomicBool,
    events: Option<mpsc::UnboundedSender<CompanionEvent>>,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Companion {
    pub fn new(replies: Arc<dyn ReplySource>, emotions: Arc<dyn EmotionSource>) -> Self {
        Self {
            replies,
            emotions,
            conversation: Mutex::new(Conversation::new()),
            style: Mutex::new(SupportStyle::default()),
            current_emotion: Mutex::new(Emotion::Neutral),
            busy: AtomicBool::new(false),
            events: None,
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<CompanionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn support_style(&self) -> SupportStyle {
        *lock(&self.style)
    }

    pub fn set_support_style(&self, style: SupportStyle) {
        log::info!("Support style set to {}", style);
        *lock(&self.style) = style;
    }

    pub fn current_emotion(&self) -> Emotion {
        *lock(&self.current_emotion)
    }

    pub fn conversation(&self) -> Conversation {
        lock(&self.conversation).clone()
    }

    fn emit(&self, event: CompanionEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Send a user message and return the assistant's answer.
    ///
    /// Blank input, or input arriving while another reply is in flight, is
    /// ignored and yields `None`. A failed reply yields the fallback text.
    pub async fn send_message(&self, text: &str) -> Option<String> {
        let content = text.trim();
        if content.is_empty() {
            return None;
        }
        if self.busy.swap(true, Ordering::SeqCst) {
            log::debug!("Reply already in flight, ignoring message");
            return None;
        }
        let _busy = BusyGuard(&self.busy);

        let emotion = self.emotions.detect(content).await;
        *lock(&self.current_emotion) = emotion.emotion;
        self.emit(CompanionEvent::Emotion(emotion.clone()));

        let request = {
            let mut conversation = lock(&self.conversation);
            conversation.push(ChatMessage::user(content, emotion.emotion));
            ReplyRequest {
                turns: conversation.turns(),
                emotion: emotion.emotion,
                style: self.support_style(),
            }
        };

        let events = self.events.clone();
        let mut on_delta = move |fragment: &str| {
            if let Some(tx) = &events {
                let _ = tx.send(CompanionEvent::Delta(fragment.to_string()));
            }
        };
        let reply = match self.replies.stream_reply(&request, &mut on_delta).await {
            Ok(reply) if !reply.is_empty() => reply,
            Ok(_) => {
                log::warn!("Reply stream carried no content");
                return None;
            }
            Err(e) => {
                log::error!("Chat error: {}", e);
                if e.is_retryable() {
                    self.emit(CompanionEvent::Unavailable(e.to_string()));
                }
                FALLBACK_REPLY.to_string()
            }
        };

        let message = ChatMessage::assistant(reply.clone());
        lock(&self.conversation).push(message.clone());
        self.emit(CompanionEvent::Reply(message));
        Some(reply)
    }
}

#[async_trait]
impl MessageHandler for Companion {
    async fn handle_user_message(&self, text: &str) -> anyhow::Result<Option<String>> {
        Ok(self.send_message(text).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::client::ChatError;
    use std::time::Duration;

    struct FixedEmotion(Emotion);

    #[async_trait]
    impl EmotionSource for FixedEmotion {
        async fn detect(&self, _text: &str) -> EmotionResult {
            EmotionResult {
                emotion: self.0,
                confidence: 0.9,
                indicators: vec![],
            }
        }
    }

    struct ScriptedReplies {
        fragments: Vec<&'static str>,
        fail: Option<u16>,
        delay: Duration,
        seen: Mutex<Vec<ReplyRequest>>,
    }

    impl ScriptedReplies {
        fn new(fragments: Vec<&'static str>) -> Self {
            Self {
                fragments,
                fail: None,
                delay: Duration::ZERO,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ReplySource for ScriptedReplies {
        async fn stream_reply(
            &self,
            request: &ReplyRequest,
            on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
        ) -> Result<String, ChatError> {
            self.seen.lock().unwrap().push(request.clone());
            tokio::time::sleep(self.delay).await;
            if let Some(status) = self.fail {
                return Err(ChatError::Status {
                    status,
                    message: "Rate limit exceeded. Please try again in a moment.".into(),
                });
            }
            let mut reply = String::new();
            for fragment in &self.fragments {
                on_delta(fragment);
                reply.push_str(fragment);
            }
            Ok(reply)
        }
    }

    #[tokio::test]
    async fn exchange_records_history_and_streams_deltas() {
        let replies = Arc::new(ScriptedReplies::new(vec!["Let's ", "breathe."]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let companion = Companion::new(replies.clone(), Arc::new(FixedEmotion(Emotion::Anxious)))
            .with_events(tx);
        companion.set_support_style(SupportStyle::Minimal);

        let reply = companion.send_message("  my chest is tight  ").await;
        assert_eq!(reply.as_deref(), Some("Let's breathe."));
        assert_eq!(companion.current_emotion(), Emotion::Anxious);

        let conversation = companion.conversation();
        assert_eq!(conversation.messages().len(), 3);
        assert_eq!(conversation.messages()[0].content, GREETING);
        assert_eq!(conversation.messages()[1].content, "my chest is tight");
        assert_eq!(conversation.messages()[1].emotion, Some(Emotion::Anxious));
        assert_eq!(conversation.last().map(|m| m.role), Some(Role::Assistant));

        let seen = replies.seen.lock().unwrap();
        assert_eq!(seen[0].turns.len(), 2);
        assert_eq!(seen[0].style, SupportStyle::Minimal);
        assert_eq!(seen[0].emotion, Emotion::Anxious);

        assert!(matches!(rx.recv().await, Some(CompanionEvent::Emotion(_))));
        assert!(matches!(rx.recv().await, Some(CompanionEvent::Delta(d)) if d == "Let's "));
        assert!(matches!(rx.recv().await, Some(CompanionEvent::Delta(_))));
        assert!(matches!(rx.recv().await, Some(CompanionEvent::Reply(_))));
    }

    #[tokio::test]
    async fn failure_appends_fallback() {
        let mut replies = ScriptedReplies::new(vec![]);
        replies.fail = Some(500);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let companion = Companion::new(Arc::new(replies), Arc::new(FixedEmotion(Emotion::Sad)))
            .with_events(tx);
        let reply = companion.handle_user_message("hi").await.unwrap();
        assert_eq!(reply.as_deref(), Some(FALLBACK_REPLY));
        assert_eq!(
            companion.conversation().last().map(|m| m.content.clone()),
            Some(FALLBACK_REPLY.to_string())
        );
        assert!(!companion.is_busy());

        assert!(matches!(rx.recv().await, Some(CompanionEvent::Emotion(_))));
        assert!(matches!(rx.recv().await, Some(CompanionEvent::Reply(_))));
    }

    #[tokio::test]
    async fn rate_limit_is_reported_before_fallback() {
        let mut replies = ScriptedReplies::new(vec![]);
        replies.fail = Some(429);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let companion = Companion::new(Arc::new(replies), Arc::new(FixedEmotion(Emotion::Neutral)))
            .with_events(tx);
        assert_eq!(companion.send_message("hello").await.as_deref(), Some(FALLBACK_REPLY));

        assert!(matches!(rx.recv().await, Some(CompanionEvent::Emotion(_))));
        match rx.recv().await {
            Some(CompanionEvent::Unavailable(text)) => assert!(text.contains("429")),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(rx.recv().await, Some(CompanionEvent::Reply(_))));
    }

    #[tokio::test]
    async fn blank_and_concurrent_messages_are_ignored() {
        let mut replies = ScriptedReplies::new(vec!["ok"]);
        replies.delay = Duration::from_millis(50);
        let companion = Arc::new(Companion::new(
            Arc::new(replies),
            Arc::new(FixedEmotion(Emotion::Neutral)),
        ));
        assert_eq!(companion.send_message("   ").await, None);

        let first = {
            let companion = companion.clone();
            tokio::spawn(async move { companion.send_message("first").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(companion.is_busy());
        assert_eq!(companion.send_message("second").await, None);

        assert_eq!(first.await.unwrap().as_deref(), Some("ok"));
        // greeting, first, reply
        assert_eq!(companion.conversation().messages().len(), 3);
    }
}
