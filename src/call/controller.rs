//! The call actor: one task owns all call state and consumes a single event
//! channel, so device callbacks, timers and UI commands never interleave.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::devices::{MessageHandler, SpeechCapture, SpeechOutput};
use super::state::{CallEvent, CallState, Ticket};
use crate::config::Config;

#[derive(Debug, Clone)]
pub struct CallSettings {
    pub greeting: String,
    /// Delay before listening again after a silent attempt.
    pub silence_restart: Duration,
    /// Delay after a recoverable recognition or handler failure.
    pub error_restart: Duration,
    /// Delay between the end of a spoken reply and the next attempt.
    pub resume_after_reply: Duration,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            greeting: "Hi there! I'm here to help with your mental health and wellness. How are you feeling today?".to_string(),
            silence_restart: Duration::from_millis(500),
            error_restart: Duration::from_millis(1000),
            resume_after_reply: Duration::from_millis(300),
        }
    }
}

impl From<&Config> for CallSettings {
    fn from(config: &Config) -> Self {
        Self {
            greeting: config.greeting.to_string(),
            silence_restart: Duration::from_millis(config.silence_restart_ms),
            error_restart: Duration::from_millis(config.error_restart_ms),
            resume_after_reply: Duration::from_millis(config.resume_after_reply_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Utterance {
    Greeting,
    Reply,
}

pub struct CallController {
    settings: CallSettings,
    capture: Arc<dyn SpeechCapture>,
    output: Arc<dyn SpeechOutput>,
    handler: Arc<dyn MessageHandler>,
    // weak so the actor stops once every handle is gone
    events: mpsc::WeakSender<CallEvent>,
    status: watch::Sender<CallState>,

    active: bool,
    processing: bool,
    generation: u64,
    seq: u64,
    recognition: Option<Ticket>,
    utterance: Option<(Ticket, Utterance)>,
    restart: Option<JoinHandle<()>>,
}

impl CallController {
    pub fn new(
        settings: CallSettings,
        capture: Arc<dyn SpeechCapture>,
        output: Arc<dyn SpeechOutput>,
        handler: Arc<dyn MessageHandler>,
        events: &mpsc::Sender<CallEvent>,
    ) -> Self {
        let (status, _) = watch::channel(CallState::Idle);
        Self {
            settings,
            capture,
            output,
            handler,
            events: events.downgrade(),
            status,
            active: false,
            processing: false,
            generation: 0,
            seq: 0,
            recognition: None,
            utterance: None,
            restart: None,
        }
    }

    pub fn state(&self) -> CallState {
        *self.status.borrow()
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn subscribe(&self) -> watch::Receiver<CallState> {
        self.status.subscribe()
    }

    /// Consume events until every sender is dropped, then hang up.
    pub async fn run(mut self, mut rx: mpsc::Receiver<CallEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle_event(event).await;
        }
        self.end_call().await;
        debug!("Call controller stopped");
    }

    pub async fn handle_event(&mut self, event: CallEvent) {
        match event {
            CallEvent::Start => self.start_call().await,
            CallEvent::End => self.end_call().await,
            CallEvent::RecognitionResult { ticket, transcript } => {
                self.on_transcript(ticket, transcript)
            }
            CallEvent::RecognitionEnd { ticket } => self.on_recognition_end(ticket),
            CallEvent::RecognitionError { ticket, error } => {
                if self.recognition != Some(ticket) {
                    debug!("Ignoring stale recognition error {:?}", ticket);
                    return;
                }
                self.recognition = None;
                if error.is_permission_denied() {
                    warn!("Speech capture permission denied, ending call");
                    self.end_call().await;
                } else {
                    warn!("Recognition error: {}", error);
                    if self.active && !self.processing {
                        self.schedule_restart(self.settings.error_restart);
                    }
                }
            }
            CallEvent::SpeechFinished { ticket } => self.on_speech_finished(ticket).await,
            CallEvent::ReplyReady { generation, reply } => {
                self.on_reply(generation, reply).await
            }
            CallEvent::RestartListening { generation } => {
                if generation != self.generation {
                    return;
                }
                self.restart = None;
                self.start_listening().await;
            }
        }
    }

    fn set_state(&self, state: CallState) {
        self.status.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!("Call state {} -> {}", current.as_str(), state.as_str());
            *current = state;
            true
        });
    }

    fn next_ticket(&mut self) -> Ticket {
        self.seq += 1;
        Ticket {
            generation: self.generation,
            seq: self.seq,
        }
    }

    async fn start_call(&mut self) {
        if self.active {
            debug!("Call already active");
            return;
        }
        self.active = true;
        self.processing = false;
        self.generation += 1;
        info!("Call started (generation {})", self.generation);

        let greeting = self.settings.greeting.clone();
        self.speak(&greeting, Utterance::Greeting).await;
    }

    /// Hang up from any state. Safe to call when no call is active.
    async fn end_call(&mut self) {
        let was_active = self.active;
        self.active = false;
        self.processing = false;
        self.generation += 1;
        if let Some(restart) = self.restart.take() {
            restart.abort();
        }
        if let Some(ticket) = self.recognition.take() {
            self.capture.abort(ticket).await;
        }
        if self.utterance.take().is_some() {
            self.output.cancel().await;
        }
        self.set_state(CallState::Idle);
        if was_active {
            info!("Call ended");
        }
    }

    async fn speak(&mut self, text: &str, kind: Utterance) {
        if self.utterance.take().is_some() {
            self.output.cancel().await;
        }
        let ticket = self.next_ticket();
        self.utterance = Some((ticket, kind));
        self.set_state(CallState::Speaking);

        if let Err(e) = self.output.speak(ticket, text).await {
            warn!("Speech output failed: {}", e);
            self.on_speech_finished(ticket).await;
        }
    }

    async fn on_speech_finished(&mut self, ticket: Ticket) {
        let kind = match self.utterance {
            Some((current, kind)) if current == ticket => kind,
            _ => {
                debug!("Ignoring stale speech completion {:?}", ticket);
                return;
            }
        };
        self.utterance = None;
        if !self.active {
            return;
        }
        match kind {
            Utterance::Greeting => self.start_listening().await,
            Utterance::Reply => self.schedule_restart(self.settings.resume_after_reply),
        }
    }

    async fn start_listening(&mut self) {
        if !self.active || self.processing || self.utterance.is_some() {
            return;
        }
        if let Some(previous) = self.recognition.take() {
            self.capture.abort(previous).await;
        }

        let ticket = self.next_ticket();
        match self.capture.start(ticket).await {
            Ok(()) => {
                self.recognition = Some(ticket);
                self.set_state(CallState::Listening);
            }
            Err(e) => {
                warn!("Failed to start recognition: {}, ending call", e);
                self.end_call().await;
            }
        }
    }

    fn on_transcript(&mut self, ticket: Ticket, transcript: String) {
        if self.recognition != Some(ticket) || !self.active {
            debug!("Ignoring stale transcript {:?}", ticket);
            return;
        }
        let text = transcript.trim().to_string();
        if text.is_empty() || self.processing {
            return;
        }

        info!("User said: {}", text);
        self.processing = true;
        self.set_state(CallState::Processing);

        let handler = self.handler.clone();
        let events = self.events.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let reply = handler
                .handle_user_message(&text)
                .await
                .map_err(|e| e.to_string());
            if let Some(tx) = events.upgrade() {
                let _ = tx.send(CallEvent::ReplyReady { generation, reply }).await;
            }
        });
    }

    fn on_recognition_end(&mut self, ticket: Ticket) {
        if self.recognition != Some(ticket) {
            return;
        }
        self.recognition = None;
        if self.active && !self.processing && self.utterance.is_none() {
            debug!("Recognition ended without a transcript");
            self.schedule_restart(self.settings.silence_restart);
        }
    }

    async fn on_reply(&mut self, generation: u64, reply: Result<Option<String>, String>) {
        if generation != self.generation || !self.active {
            debug!("Dropping reply for finished call generation {}", generation);
            return;
        }
        self.processing = false;
        match reply {
            Ok(Some(text)) if !text.trim().is_empty() => {
                self.speak(&text, Utterance::Reply).await;
            }
            Ok(_) => self.schedule_restart(self.settings.resume_after_reply),
            Err(e) => {
                warn!("Message handler failed: {}", e);
                self.schedule_restart(self.settings.error_restart);
            }
        }
    }

    fn schedule_restart(&mut self, delay: Duration) {
        if let Some(previous) = self.restart.take() {
            previous.abort();
        }
        let events = self.events.clone();
        let generation = self.generation;
        self.restart = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = events.upgrade() {
                let _ = tx.send(CallEvent::RestartListening { generation }).await;
            }
        }));
    }
}

/// Cheap handle used by the UI side to drive a running call actor.
#[derive(Clone)]
pub struct CallHandle {
    tx: mpsc::Sender<CallEvent>,
    status: watch::Receiver<CallState>,
}

impl CallHandle {
    pub fn new(tx: mpsc::Sender<CallEvent>, status: watch::Receiver<CallState>) -> Self {
        Self { tx, status }
    }

    /// Spawn `controller` on the runtime and return a handle to it.
    pub fn spawn(
        controller: CallController,
        tx: mpsc::Sender<CallEvent>,
        rx: mpsc::Receiver<CallEvent>,
    ) -> Self {
        let status = controller.subscribe();
        tokio::spawn(controller.run(rx));
        Self::new(tx, status)
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.tx.send(CallEvent::Start).await?;
        Ok(())
    }

    pub async fn end(&self) -> anyhow::Result<()> {
        self.tx.send(CallEvent::End).await?;
        Ok(())
    }

    pub fn state(&self) -> CallState {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallState> {
        self.status.clone()
    }

    /// Sender for device bridges reporting recognition and speech events.
    #[cfg(test)]
    pub fn events(&self) -> mpsc::Sender<CallEvent> {
        self.tx.clone()
    }
}
